//! Bisync Conflict - Change merging and conflict handling
//!
//! Provides:
//! - Deterministic, collision-free conflict names (`file..path1`)
//! - The configurable conflict policy (tags, update-vs-delete tie break)
//! - Content equality checks for paths changed on both sides
//! - The pure queue builder that merges two delta sets into work queues

pub mod detector;
pub mod error;
pub mod namer;
pub mod policy;
pub mod resolver;

pub use detector::{streams_equal, ContentComparer};
pub use error::ConflictError;
pub use namer::ConflictNamer;
pub use policy::ConflictPolicy;
pub use resolver::QueueBuilder;
