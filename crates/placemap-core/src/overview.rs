//! Outline of an official place.
//!
//! Selecting an official place on the map fetches its overview: the area's
//! polygon, the bounds to frame it and the zoom level that shows it best.
//! Every field is optional; a place without an outline is centred on its
//! marker instead.

use crate::{
    credential::CredentialStore,
    envelope::decode_data,
    error::{Error, Result},
    session::SessionCoordinator,
    transport::{Request, Transport},
    viewport::{BoundingBox, Coordinate},
};
use serde::{Deserialize, Serialize};

pub fn overview_endpoint(place_id: u64) -> String {
    format!("/official-place/{place_id}/overview")
}

/// Edges of the area, as sent by the server.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
struct RawBounds {
    south: f64,
    west: f64,
    north: f64,
    east: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOverview {
    /// A JSON string holding `[longitude, latitude]` pairs.
    #[serde(default)]
    polygon_coordinates: Option<String>,
    #[serde(default)]
    bounds: Option<RawBounds>,
    #[serde(default)]
    recommended_zoom_level: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOverview {
    pub place_id: u64,
    /// Outline of the area; empty when the server has none.
    pub polygon: Vec<Coordinate>,
    pub bounds: Option<BoundingBox>,
    pub recommended_zoom_level: Option<u8>,
}

impl PlaceOverview {
    /// The rectangle the map should show: the server's bounds, otherwise the
    /// extent of the polygon.
    pub fn frame(&self) -> Option<BoundingBox> {
        if self.bounds.is_some() {
            return self.bounds;
        }
        let (first, rest) = self.polygon.split_first()?;
        let (mut south, mut west, mut north, mut east) = (
            first.latitude,
            first.longitude,
            first.latitude,
            first.longitude,
        );
        for point in rest {
            south = south.min(point.latitude);
            north = north.max(point.latitude);
            west = west.min(point.longitude);
            east = east.max(point.longitude);
        }
        Some(BoundingBox::from_corners(
            Coordinate::new(south, west),
            Coordinate::new(north, east),
        ))
    }

    fn from_raw(place_id: u64, endpoint: &str, raw: RawOverview) -> Result<Self> {
        let polygon = match raw.polygon_coordinates.as_deref() {
            None | Some("") => Vec::new(),
            Some(encoded) => serde_json::from_str::<Vec<[f64; 2]>>(encoded)
                .map_err(|e| Error::Decode {
                    endpoint: endpoint.to_string(),
                    reason: format!("polygonCoordinates: {e}"),
                })?
                .into_iter()
                .map(|[longitude, latitude]| Coordinate::new(latitude, longitude))
                .collect(),
        };
        let bounds = raw.bounds.map(|b| {
            BoundingBox::from_corners(Coordinate::new(b.south, b.west), Coordinate::new(b.north, b.east))
        });
        Ok(Self {
            place_id,
            polygon,
            bounds,
            recommended_zoom_level: raw.recommended_zoom_level,
        })
    }
}

/// Fetches the overview of official place `place_id` through `session`.
///
/// # Errors
///
/// Whatever [`SessionCoordinator::call`] reports, or [`Error::Decode`] if the
/// body or its polygon is malformed. A `null` payload is an empty overview.
pub async fn fetch_overview<T, S>(session: &SessionCoordinator<T, S>, place_id: u64) -> Result<PlaceOverview>
where
    T: Transport,
    S: CredentialStore + 'static,
{
    let endpoint = overview_endpoint(place_id);
    let response = session.call(Request::get(endpoint.as_str())).await?;
    let raw: Option<RawOverview> = decode_data(&endpoint, &response.body)?;
    PlaceOverview::from_raw(place_id, &endpoint, raw.unwrap_or_default())
}
