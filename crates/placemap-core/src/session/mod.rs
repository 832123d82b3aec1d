//! Session authentication coordination.
//!
//! ## Structure
//!
//! - [`coordinator`] - [`SessionCoordinator`], the wrapper every outbound
//!   call goes through.
//! - `refresh` - the idle/refreshing state machine and its wait queue.

pub mod coordinator;
mod refresh;
#[cfg(test)]
mod tests;

pub use coordinator::{
    DEFAULT_REFRESH_ENDPOINT, DEFAULT_REFRESH_TIMEOUT, SessionConfig, SessionCoordinator,
};
