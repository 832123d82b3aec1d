//! Viewport query coordination.
//!
//! ## Structure
//!
//! - [`coordinator`] - [`ViewportQueryCoordinator`]: debounce, generation
//!   stamping, fan-out and apply-or-discard.
//! - [`types`] - viewport descriptors, categories and visible results.
//! - [`generation`] - the monotonic query generation counter.
//! - `timer` - the single pending debounce timer.

pub mod coordinator;
pub mod generation;
mod timer;
pub mod types;

pub use coordinator::{
    DEFAULT_DEBOUNCE, ViewportConfig, ViewportPhase, ViewportQueryCoordinator, VisibleReceiver,
};
pub use generation::QueryGeneration;
pub use types::{
    BoundingBox, Category, Coordinate, Place, PlaceFilter, ViewportDescriptor, VisibleResult,
};
