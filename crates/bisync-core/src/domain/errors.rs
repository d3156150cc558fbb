//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including path validation failures and malformed listing files.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid relative path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid content hash format (expected `algorithm:hexdigest`)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// A listing line could not be parsed
    #[error("Invalid listing line {line}: {reason}")]
    InvalidListing {
        /// 1-based line number in the listing file
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// The same path appeared twice in one listing
    #[error("Duplicate path in listing: {0}")]
    DuplicatePath(String),

    /// Unknown policy or mode keyword
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
