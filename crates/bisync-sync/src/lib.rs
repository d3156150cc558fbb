//! Bisync Sync - Bidirectional reconciliation engine
//!
//! Provides:
//! - Snapshot-based delta detection against persisted listings
//! - Safety guards against mass deletion and unreachable sides
//! - A bounded worker pool applying copies, deletes and conflict renames
//! - Crash-safe listing commits and the resync recovery protocol
//!
//! ## Modules
//!
//! - [`engine`] - Run coordinator (`bisync()` entry point, modes, finalization)
//! - [`listing_store`] - Listing file paths, atomic commits, `-err` marking
//! - [`lock`] - Create-exclusive session lock file
//! - [`deltas`] - Listing capture with filters and per-side delta detection
//! - [`guard`] - Excess-delete, all-changed and access-health checks
//! - [`applier`] - Concurrent execution of the work queues
//! - [`listing_update`] - Next prior listings from actual outcomes
//! - [`filesystem`] - Local directory backend
//! - [`memory`] - In-memory backend

pub mod applier;
pub mod deltas;
pub mod engine;
pub mod filesystem;
pub mod guard;
pub mod listing_store;
pub mod listing_update;
pub mod lock;
pub mod memory;

use std::path::PathBuf;

use thiserror::Error;

use bisync_conflict::ConflictError;
use bisync_core::domain::DomainError;

pub use engine::{bisync, RunMode, RunSummary};
pub use filesystem::LocalBackend;
pub use memory::MemoryBackend;

/// Errors that can occur during a reconciliation run
#[derive(Debug, Error)]
pub enum BisyncError {
    /// A critical failure; the listings are unusable unless the run was
    /// retryable in resilient mode. Maps to exit status 2.
    #[error("bisync aborted: {reason}")]
    Aborted {
        reason: String,
        /// True when the listings were marked failed and `--resync` is needed
        must_resync: bool,
    },

    /// The run was cancelled; listings were marked failed
    #[error("bisync interrupted: listings marked as failed, run with --resync to recover")]
    Interrupted,

    /// A safety guard tripped before any mutation
    #[error("safety abort: {0}")]
    SafetyAbort(String),

    /// Another run holds the session lock
    #[error("prior lock file found: {}", .0.display())]
    LockHeld(PathBuf),

    /// A side cannot store modification times
    #[error("modification time support is missing on {0}")]
    ModTimeUnsupported(String),

    /// Prior listings are absent
    #[error("cannot find prior Path1 or Path2 listings, likely due to critical error on prior run")]
    MissingListings,

    /// Committed listings disagree on their path sets
    #[error("path1 and path2 are out of sync: {0}")]
    OutOfSync(String),

    /// Check files differ between the two sides
    #[error("check file check failed: {0}")]
    AccessCheckFailed(String),

    /// A listing file could not be parsed
    #[error("cannot read listing {}: {source}", .path.display())]
    ListingLoad {
        path: PathBuf,
        #[source]
        source: DomainError,
    },

    /// An I/O error occurred on the work directory
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A backend operation failed
    #[error("backend error: {0:#}")]
    Backend(#[from] anyhow::Error),

    /// A domain-level error propagated from bisync-core
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// A conflict-handling error propagated from bisync-conflict
    #[error("Conflict error: {0}")]
    Conflict(#[from] ConflictError),
}

impl BisyncError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BisyncError::Aborted { .. } | BisyncError::Interrupted => 2,
            _ => 1,
        }
    }

    /// True if the next run must use `--resync`
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            BisyncError::Aborted {
                must_resync: true,
                ..
            } | BisyncError::Interrupted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let aborted = BisyncError::Aborted {
            reason: "x".into(),
            must_resync: true,
        };
        assert_eq!(aborted.exit_code(), 2);
        assert_eq!(BisyncError::Interrupted.exit_code(), 2);
        assert_eq!(BisyncError::SafetyAbort("too many deletes".into()).exit_code(), 1);
        assert_eq!(BisyncError::LockHeld(PathBuf::from("/w/s.lck")).exit_code(), 1);
    }

    #[test]
    fn test_messages() {
        let err = BisyncError::LockHeld(PathBuf::from("/w/s.lck"));
        assert_eq!(err.to_string(), "prior lock file found: /w/s.lck");

        let err = BisyncError::ModTimeUnsupported("path2".into());
        assert_eq!(err.to_string(), "modification time support is missing on path2");

        assert!(BisyncError::MissingListings
            .to_string()
            .starts_with("cannot find prior Path1 or Path2 listings"));
    }

    #[test]
    fn test_requires_resync() {
        assert!(BisyncError::Interrupted.requires_resync());
        assert!(!BisyncError::Aborted {
            reason: "retryable".into(),
            must_resync: false
        }
        .requires_resync());
        assert!(!BisyncError::SafetyAbort("x".into()).requires_resync());
    }
}
