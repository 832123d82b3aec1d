#![doc = include_str!("../README.md")]

pub mod account;
pub mod credential;
pub mod envelope;
pub mod error;
pub mod handshake;
#[cfg(test)]
mod mock;
pub mod overview;
pub mod session;
pub mod transport;
pub mod viewport;

pub use account::{Account, LoginState, Member, SocialProvider};
pub use credential::{Credential, CredentialStore, MemoryCredentialStore};
pub use envelope::ApiEnvelope;
pub use error::{Error, Result};
pub use handshake::{Handshake, HandshakeMessage, HandshakeOutcome};
pub use overview::{PlaceOverview, fetch_overview};
pub use session::{SessionConfig, SessionCoordinator};
pub use transport::{Method, Request, Response, Transport};
pub use viewport::{
    BoundingBox, Category, Coordinate, Place, PlaceFilter, ViewportConfig, ViewportDescriptor,
    ViewportPhase, ViewportQueryCoordinator, VisibleResult,
};
