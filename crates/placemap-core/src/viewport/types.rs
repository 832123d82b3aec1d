//! Viewport descriptors, place categories and visible results.

use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl FromStr for Coordinate {
    type Err = String;

    /// Parses `"LAT,LNG"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lng) = s
            .split_once(',')
            .ok_or_else(|| format!("expected LAT,LNG but got `{s}`"))?;
        let latitude: f64 = lat
            .trim()
            .parse()
            .map_err(|e| format!("invalid latitude `{lat}`: {e}"))?;
        let longitude: f64 = lng
            .trim()
            .parse()
            .map_err(|e| format!("invalid longitude `{lng}`: {e}"))?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(format!("coordinate `{s}` is out of range"));
        }
        Ok(Self::new(latitude, longitude))
    }
}

/// The visible rectangle, as its north-west and south-east corners.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub top_left: Coordinate,
    pub bottom_right: Coordinate,
}

impl BoundingBox {
    /// Builds the box from the south-west and north-east corners a map SDK
    /// usually reports.
    pub const fn from_corners(south_west: Coordinate, north_east: Coordinate) -> Self {
        Self {
            top_left: Coordinate::new(north_east.latitude, south_west.longitude),
            bottom_right: Coordinate::new(south_west.latitude, north_east.longitude),
        }
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.top_left.latitude + self.bottom_right.latitude) / 2.0,
            (self.top_left.longitude + self.bottom_right.longitude) / 2.0,
        )
    }
}

/// A data category with its own query endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Official,
    Member,
}

impl Category {
    pub const fn endpoint(self) -> &'static str {
        match self {
            Category::Official => "/web/official-place",
            Category::Member => "/web/member-place",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Official => write!(f, "official"),
            Category::Member => write!(f, "member"),
        }
    }
}

/// The active category filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceFilter {
    #[default]
    Official,
    Member,
    Both,
}

impl PlaceFilter {
    /// Categories queried for this filter, in merge order.
    pub const fn categories(self) -> &'static [Category] {
        match self {
            PlaceFilter::Official => &[Category::Official],
            PlaceFilter::Member => &[Category::Member],
            PlaceFilter::Both => &[Category::Official, Category::Member],
        }
    }
}

impl FromStr for PlaceFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "official" => Ok(PlaceFilter::Official),
            "member" => Ok(PlaceFilter::Member),
            "both" => Ok(PlaceFilter::Both),
            other => Err(format!("unknown filter `{other}` (official, member, both)")),
        }
    }
}

/// Everything a viewport query depends on, captured once per signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportDescriptor {
    pub bounds: BoundingBox,
    /// The user's location when known, otherwise the viewport centre.
    pub reference: Coordinate,
    pub zoom_level: u8,
    #[serde(default)]
    pub filter: PlaceFilter,
}

impl ViewportDescriptor {
    /// Describes a viewport referenced at its own centre.
    pub fn new(bounds: BoundingBox, zoom_level: u8, filter: PlaceFilter) -> Self {
        Self {
            reference: bounds.center(),
            bounds,
            zoom_level,
            filter,
        }
    }

    /// Uses the user's location as the reference point when it is known.
    #[must_use]
    pub fn with_user_location(mut self, location: Option<Coordinate>) -> Self {
        if let Some(location) = location {
            self.reference = location;
        }
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: PlaceFilter) -> Self {
        self.filter = filter;
        self
    }

    pub(crate) fn payload(&self) -> QueryPayload {
        QueryPayload {
            top_left: self.bounds.top_left,
            bottom_right: self.bounds.bottom_right,
            member_coordinate: self.reference,
            zoom_level: self.zoom_level,
        }
    }
}

/// Request body of every category query.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryPayload {
    pub(crate) top_left: Coordinate,
    pub(crate) bottom_right: Coordinate,
    pub(crate) member_coordinate: Coordinate,
    pub(crate) zoom_level: u8,
}

/// One server record, tagged with the category that produced it.
///
/// The record itself is passed through untouched.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Place {
    pub category: Category,
    pub record: serde_json::Value,
}

/// The merged result of one settled generation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VisibleResult {
    pub generation: u64,
    pub descriptor: ViewportDescriptor,
    pub places: Vec<Place>,
    /// Categories whose sub-query failed and contributed nothing.
    pub degraded: Vec<Category>,
}

impl VisibleResult {
    pub fn places_in(&self, category: Category) -> impl Iterator<Item = &Place> {
        self.places
            .iter()
            .filter(move |place| place.category == category)
    }

    pub fn is_complete(&self) -> bool {
        self.degraded.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_map_to_north_west_and_south_east() {
        let bounds = BoundingBox::from_corners(
            Coordinate::new(37.50, 126.90),
            Coordinate::new(37.60, 127.00),
        );
        assert_eq!(bounds.top_left, Coordinate::new(37.60, 126.90));
        assert_eq!(bounds.bottom_right, Coordinate::new(37.50, 127.00));
    }

    #[test]
    fn payload_uses_user_location_when_known() {
        let bounds = BoundingBox::from_corners(
            Coordinate::new(37.0, 127.0),
            Coordinate::new(38.0, 128.0),
        );
        let centred = ViewportDescriptor::new(bounds, 5, PlaceFilter::Both);
        assert_eq!(centred.payload().member_coordinate, Coordinate::new(37.5, 127.5));

        let located = centred.with_user_location(Some(Coordinate::new(37.1, 127.2)));
        let json = serde_json::to_value(located.payload()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "topLeft": { "latitude": 38.0, "longitude": 127.0 },
                "bottomRight": { "latitude": 37.0, "longitude": 128.0 },
                "memberCoordinate": { "latitude": 37.1, "longitude": 127.2 },
                "zoomLevel": 5
            })
        );
    }

    #[test]
    fn filter_expands_to_categories() {
        assert_eq!(PlaceFilter::default().categories(), &[Category::Official]);
        assert_eq!(
            PlaceFilter::Both.categories(),
            &[Category::Official, Category::Member]
        );
        assert_eq!("BOTH".parse::<PlaceFilter>(), Ok(PlaceFilter::Both));
        assert!("all".parse::<PlaceFilter>().is_err());
    }

    #[test]
    fn coordinates_parse_and_validate() {
        assert_eq!(
            "37.5665, 126.978".parse::<Coordinate>(),
            Ok(Coordinate::new(37.5665, 126.978))
        );
        assert!("37.5".parse::<Coordinate>().is_err());
        assert!("91,0".parse::<Coordinate>().is_err());
    }

    #[test]
    fn descriptor_reads_from_json_with_default_filter() {
        let json = r#"{
            "bounds": {
                "topLeft": { "latitude": 1.0, "longitude": 2.0 },
                "bottomRight": { "latitude": 0.0, "longitude": 3.0 }
            },
            "reference": { "latitude": 0.5, "longitude": 2.5 },
            "zoomLevel": 4
        }"#;
        let descriptor: ViewportDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.filter, PlaceFilter::Official);
        assert_eq!(descriptor.zoom_level, 4);
    }
}
