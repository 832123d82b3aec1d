//! The response envelope shared by every API endpoint.
//!
//! ```json
//! { "code": 200, "status": "OK", "message": "...", "data": { ... } }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, de::DeserializeOwned};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    pub data: T,
}

/// Payload of a successful refresh call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReissueData {
    pub access_token: String,
}

/// Decodes `body` as an [`ApiEnvelope`] and returns its `data`.
///
/// # Errors
///
/// Returns [`Error::Decode`] naming `endpoint` if the body is not a valid
/// envelope around `T`.
pub fn decode_data<T: DeserializeOwned>(endpoint: &str, body: &[u8]) -> Result<T> {
    serde_json::from_slice::<ApiEnvelope<T>>(body)
        .map(|envelope| envelope.data)
        .map_err(|e| Error::Decode {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reissue_token_is_read_from_data() {
        let body = br#"{"code":200,"status":"OK","message":"ok","data":{"accessToken":"at-2"}}"#;
        let data: ReissueData = decode_data("/web/reissue", body).unwrap();
        assert_eq!(data.access_token, "at-2");
    }

    #[test]
    fn null_data_decodes_as_none() {
        let body = br#"{"code":200,"status":"OK","message":"ok","data":null}"#;
        let data: Option<Vec<serde_json::Value>> = decode_data("/web/official-place", body).unwrap();
        assert!(data.is_none());
    }

    #[test]
    fn missing_token_is_a_decode_error() {
        let body = br#"{"data":{}}"#;
        let err = decode_data::<ReissueData>("/web/reissue", body).unwrap_err();
        assert!(matches!(err, Error::Decode { ref endpoint, .. } if endpoint == "/web/reissue"));
    }
}
