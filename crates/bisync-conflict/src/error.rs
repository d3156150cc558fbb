//! Error types for the conflict engine

use thiserror::Error;

/// Errors that can occur while classifying conflicts and building queues
#[derive(Debug, Error)]
pub enum ConflictError {
    /// No free conflict name could be found for a path
    #[error("no unique conflict name available for {0}")]
    NoUniqueName(String),

    /// A conflict tag cannot be used as a file name suffix
    #[error("invalid conflict tag '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },

    /// Comparing file contents failed on a backend
    #[error("content comparison failed for {path}: {source}")]
    Compare {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}
