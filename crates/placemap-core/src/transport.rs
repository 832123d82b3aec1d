//! The transport primitive the coordinators are built on.
//!
//! A [`Transport`] performs one HTTP-like exchange and reports the status
//! code; it does not interpret statuses. Interpretation (401 handling,
//! success checks) belongs to the [`SessionCoordinator`].
//!
//! [`SessionCoordinator`]: crate::SessionCoordinator

use crate::{
    credential::Credential,
    error::{Error, Result},
};
use bytes::Bytes;
use core::{fmt, future::Future};
use serde::Serialize;

pub const STATUS_UNAUTHORIZED: u16 = 401;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// An outbound call, addressed by endpoint path relative to the API base.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub endpoint: String,
    /// JSON body, if any.
    pub body: Option<Bytes>,
}

impl Request {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            endpoint: endpoint.into(),
            body: None,
        }
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            endpoint: endpoint.into(),
            body: None,
        }
    }

    /// Builds a `POST` with `payload` serialized as its JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if `payload` cannot be serialized.
    pub fn post_json<P: Serialize>(endpoint: impl Into<String>, payload: &P) -> Result<Self> {
        let endpoint = endpoint.into();
        let body = serde_json::to_vec(payload).map_err(|e| Error::Decode {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            method: Method::Post,
            endpoint,
            body: Some(Bytes::from(body)),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub const fn is_unauthorized(&self) -> bool {
        self.status == STATUS_UNAUTHORIZED
    }

    /// Passes 2xx responses through and turns anything else into
    /// [`Error::Status`].
    pub(crate) fn into_result(self, endpoint: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Status {
                endpoint: endpoint.to_string(),
                status: self.status,
            })
        }
    }
}

/// Performs a single exchange with the API.
///
/// Implementations attach `credential` (when present) as a bearer token and
/// return whatever status the server produced. Only failures below the HTTP
/// layer are reported as errors.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: &Request,
        credential: Option<&Credential>,
    ) -> impl Future<Output = Result<Response>> + Send;
}
