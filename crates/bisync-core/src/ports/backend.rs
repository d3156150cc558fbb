//! Backend port (driven/secondary port)
//!
//! This module defines the capability contract every side of a
//! reconciliation pair must satisfy: enumerate entries, stream content in
//! and out, and perform basic namespace operations.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because backend errors are adapter-specific.
//! - Optional features are exposed through capability-query methods that
//!   return `Option<&dyn ...>`. Callers fall back to the generic streaming
//!   path when a capability is absent.
//! - `as_any` lets a server-side copy implementation recognise a source
//!   backend of its own concrete type.

use std::any::Any;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::domain::listing::{EntryKind, ListingEntry};
use crate::domain::newtypes::{ContentHash, RelPath};

/// Content stream returned by [`IBackend::open`] and consumed by [`IBackend::put`]
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

// ============================================================================
// Value types
// ============================================================================

/// Stable identity of a backend, used to derive the session name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendIdentity {
    /// Backend kind, e.g. `local` or `memory`
    pub name: String,
    /// Root within the backend, e.g. an absolute directory
    pub root: String,
}

impl BackendIdentity {
    pub fn new(name: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }
}

impl fmt::Display for BackendIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.root)
    }
}

/// How precisely a backend stores modification times
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModTimePrecision {
    /// Modification times cannot be set or are meaningless
    NotSupported,
    /// Modification times are stored with the given granularity
    Granularity(Duration),
}

impl ModTimePrecision {
    /// Tolerance to use when comparing modtimes, or `None` if unsupported
    #[must_use]
    pub fn tolerance(self) -> Option<Duration> {
        match self {
            ModTimePrecision::NotSupported => None,
            ModTimePrecision::Granularity(d) => Some(d),
        }
    }

    #[must_use]
    pub fn is_supported(self) -> bool {
        !matches!(self, ModTimePrecision::NotSupported)
    }
}

/// Metadata of one entry as reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: RelPath,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub kind: EntryKind,
    /// Present only when the backend computed it while listing
    pub hash: Option<ContentHash>,
}

impl RemoteEntry {
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Converts into the listing representation
    #[must_use]
    pub fn to_listing_entry(&self) -> ListingEntry {
        ListingEntry {
            size: self.size,
            modified: self.modified,
            hash: self.hash.clone(),
            kind: self.kind,
        }
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Content hashing capability
#[async_trait]
pub trait IContentHasher: Send + Sync {
    /// Algorithm name as written in listings (e.g. `sha256`)
    fn algorithm(&self) -> &str;

    /// Computes the hash of the file at `path`
    async fn hash(&self, path: &RelPath) -> anyhow::Result<ContentHash>;
}

/// Copy-without-streaming capability
#[async_trait]
pub trait IServerSideCopy: Send + Sync {
    /// Copies `from` on `source` to `to` on this backend
    ///
    /// Returns `Ok(None)` when `source` is not compatible, in which case the
    /// caller falls back to streaming.
    async fn copy_from(
        &self,
        source: &dyn IBackend,
        from: &RelPath,
        to: &RelPath,
        modified: DateTime<Utc>,
    ) -> anyhow::Result<Option<RemoteEntry>>;
}

// ============================================================================
// IBackend trait
// ============================================================================

/// One side of a reconciliation pair
///
/// Implementations must be safe to share between concurrent transfer
/// tasks. Paths are always relative to the backend root.
#[async_trait]
pub trait IBackend: Send + Sync {
    /// Returns the identity used for session naming and logs
    fn identity(&self) -> BackendIdentity;

    /// Returns how precisely modification times are stored
    fn precision(&self) -> ModTimePrecision;

    /// Lists every file and directory below the root
    async fn list(&self) -> anyhow::Result<Vec<RemoteEntry>>;

    /// Returns metadata for one path, or `None` if it does not exist
    async fn stat(&self, path: &RelPath) -> anyhow::Result<Option<RemoteEntry>>;

    /// Opens a file for reading
    async fn open(&self, path: &RelPath) -> anyhow::Result<ByteStream>;

    /// Writes a file from a stream, creating parent directories and setting
    /// the modification time. Returns the resulting entry.
    async fn put(
        &self,
        path: &RelPath,
        content: ByteStream,
        modified: DateTime<Utc>,
    ) -> anyhow::Result<RemoteEntry>;

    /// Renames a file within this backend
    async fn move_file(&self, from: &RelPath, to: &RelPath) -> anyhow::Result<()>;

    /// Removes a file
    async fn remove(&self, path: &RelPath) -> anyhow::Result<()>;

    /// Creates a directory and any missing parents
    async fn mkdir(&self, path: &RelPath) -> anyhow::Result<()>;

    /// Removes an empty directory
    async fn rmdir(&self, path: &RelPath) -> anyhow::Result<()>;

    /// Content hashing capability, if any
    fn hasher(&self) -> Option<&dyn IContentHasher> {
        None
    }

    /// Server-side copy capability, if any
    fn server_side_copy(&self) -> Option<&dyn IServerSideCopy> {
        None
    }

    /// Downcasting hook for capability implementations
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_identity_display() {
        let id = BackendIdentity::new("local", "/srv/data");
        assert_eq!(id.to_string(), "local:/srv/data");
    }

    #[test]
    fn test_precision_tolerance() {
        assert_eq!(ModTimePrecision::NotSupported.tolerance(), None);
        assert!(!ModTimePrecision::NotSupported.is_supported());
        let p = ModTimePrecision::Granularity(Duration::seconds(1));
        assert_eq!(p.tolerance(), Some(Duration::seconds(1)));
        assert!(p.is_supported());
    }

    #[test]
    fn test_remote_entry_to_listing_entry() {
        let entry = RemoteEntry {
            path: RelPath::new("a/b.txt").unwrap(),
            size: 42,
            modified: Utc.timestamp_opt(1_000, 0).unwrap(),
            kind: EntryKind::File,
            hash: None,
        };
        let le = entry.to_listing_entry();
        assert_eq!(le.size, 42);
        assert_eq!(le.kind, EntryKind::File);
        assert!(!entry.is_dir());
    }
}
