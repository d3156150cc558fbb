//! Domain entities and business logic
//!
//! This module contains the core domain types for bisync:
//! - Newtypes for validated relative paths, content hashes and session names
//! - Listings (point-in-time snapshots of one side)
//! - Delta sets (per-side classification against the prior listing)
//! - Queues (the merged, directional work plan of one run)
//! - Conflict policy values
//! - Domain-specific error types

pub mod conflict;
pub mod delta;
pub mod errors;
pub mod listing;
pub mod newtypes;
pub mod queues;

// Re-export commonly used types
pub use conflict::UpdateDeleteRule;
pub use delta::{Delta, DeltaSet, UpdateReason};
pub use errors::DomainError;
pub use listing::{EntryKind, Listing, ListingEntry};
pub use newtypes::*;
pub use queues::Queues;
