//! Error types for the request orchestration core.
//!
//! This module defines the central `Error` enum, which captures every failure
//! a caller of the coordinators can observe. It is `Clone` because a single
//! refresh failure is delivered to every request that was waiting on it.
//!
//! ## Error Cases
//! - `Unauthorized`: An authorization failure that is not recovered locally
//!   (the request was already retried once, or it targeted the refresh
//!   endpoint itself).
//! - `RefreshFailed`: The credential refresh failed, timed out, or was
//!   abandoned. Terminal for every request queued behind it.
//! - `Status`: Any other non-success status, propagated unchanged.
//! - `Transport`: The transport could not complete the exchange.
//! - `Decode`: A response body did not have the expected shape.
//! - `Superseded`: A viewport sub-query belongs to an outdated generation.
//!   This is a normal outcome of the race model, not a failure.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the orchestration core.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Authorization failed and will not be retried.
    #[error("Unauthorized: {endpoint}")]
    Unauthorized { endpoint: String },

    /// The credential refresh did not produce a new credential.
    #[error("Credential refresh failed: {reason}")]
    RefreshFailed { reason: String },

    /// The server answered with a non-success status other than 401.
    #[error("HTTP {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },

    /// Connect, I/O or protocol failure below the HTTP status layer.
    #[error("Transport error: {context}")]
    Transport { context: String },

    /// The response body could not be decoded.
    #[error("Malformed response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    /// The query was overtaken by a newer generation.
    #[error("Query generation {generation} superseded by {current}")]
    Superseded { generation: u64, current: u64 },
}

impl Error {
    /// Returns `true` if this error means the session could not be renewed
    /// and the user has to authenticate again.
    pub const fn is_refresh_failure(&self) -> bool {
        matches!(self, Self::RefreshFailed { .. })
    }

    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns `true` for the supersession signal, which callers must drop
    /// silently.
    pub const fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded { .. })
    }

    pub(crate) fn refresh(reason: impl Into<String>) -> Self {
        Self::RefreshFailed {
            reason: reason.into(),
        }
    }
}
