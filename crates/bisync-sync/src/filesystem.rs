//! Local filesystem backend (secondary/driven adapter)
//!
//! Implements [`IBackend`] for a directory tree using `tokio::fs`.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: content is written to a temporary sibling and
//!   renamed over the target, so readers never see a partial file.
//! - **Modification times**: set on the temporary file before the rename;
//!   stored with nanosecond granularity.
//! - **Hashing**: SHA-256 over the file content.
//! - **Server-side copy**: a copy between two local roots uses `fs::copy`
//!   instead of streaming through the engine.
//! - Symbolic links and non UTF-8 names are skipped while listing.

use std::any::Any;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument, warn};

use bisync_core::domain::{ContentHash, EntryKind, RelPath, SHA256};
use bisync_core::ports::{
    BackendIdentity, ByteStream, IBackend, IContentHasher, IServerSideCopy, ModTimePrecision,
    RemoteEntry,
};

/// Suffix of in-flight writes; such files are never listed
const PARTIAL_SUFFIX: &str = ".bisync-partial";

// ============================================================================
// LocalBackend
// ============================================================================

/// A directory tree on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    precision: ModTimePrecision,
    hasher: Sha256Hasher,
}

impl LocalBackend {
    /// Create a backend rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            hasher: Sha256Hasher { root: root.clone() },
            root,
            precision: ModTimePrecision::Granularity(Duration::nanoseconds(1)),
        }
    }

    /// Overrides the modification time precision reported to the engine
    #[must_use]
    pub fn with_precision(mut self, precision: ModTimePrecision) -> Self {
        self.precision = precision;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abs(&self, path: &RelPath) -> PathBuf {
        self.root.join(path.as_str())
    }

    /// `None` for names that cannot round-trip through a `RelPath`: non-UTF-8
    /// names and names containing a literal backslash
    fn relative(&self, abs: &Path) -> Option<RelPath> {
        let rel = abs.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();
        for component in rel.components() {
            let std::path::Component::Normal(name) = component else {
                return None;
            };
            let name = name.to_str()?;
            if name.contains('\\') {
                return None;
            }
            parts.push(name);
        }
        RelPath::new(parts.join("/")).ok()
    }

    fn entry_from_metadata(path: RelPath, metadata: &std::fs::Metadata) -> RemoteEntry {
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH));
        let kind = if metadata.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        RemoteEntry {
            path,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified,
            kind,
            hash: None,
        }
    }

    async fn stat_required(&self, path: &RelPath) -> anyhow::Result<RemoteEntry> {
        self.stat(path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{path} vanished after write"))
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut p = target.as_os_str().to_owned();
    p.push(PARTIAL_SUFFIX);
    PathBuf::from(p)
}

async fn ensure_parent(target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Sets the modification time of a file from a blocking thread
async fn set_modified(path: &Path, modified: DateTime<Utc>) -> anyhow::Result<()> {
    let path = path.to_path_buf();
    let time = SystemTime::from(modified);
    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.set_modified(time)
    })
    .await??;
    Ok(())
}

/// Renames a finished partial file over its target, removing it on failure
async fn finish_partial(
    partial: &Path,
    target: &Path,
    modified: DateTime<Utc>,
) -> anyhow::Result<()> {
    let result = async {
        set_modified(partial, modified).await?;
        tokio::fs::rename(partial, target).await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(partial).await;
    }
    result
}

#[async_trait]
impl IBackend for LocalBackend {
    fn identity(&self) -> BackendIdentity {
        BackendIdentity::new("local", self.root.to_string_lossy())
    }

    fn precision(&self) -> ModTimePrecision {
        self.precision
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list(&self) -> anyhow::Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut read_dir = tokio::fs::read_dir(&dir).await?;
            while let Some(child) = read_dir.next_entry().await? {
                let abs = child.path();
                let file_type = child.file_type().await?;
                if file_type.is_symlink() {
                    debug!(path = %abs.display(), "skipping symlink");
                    continue;
                }
                let Some(rel) = self.relative(&abs) else {
                    warn!(path = %abs.display(), "skipping unrepresentable path");
                    continue;
                };
                if rel.as_str().ends_with(PARTIAL_SUFFIX) {
                    continue;
                }

                let metadata = child.metadata().await?;
                if file_type.is_dir() {
                    pending.push(abs);
                }
                entries.push(Self::entry_from_metadata(rel, &metadata));
            }
        }

        debug!(entries = entries.len(), "directory tree listed");
        Ok(entries)
    }

    async fn stat(&self, path: &RelPath) -> anyhow::Result<Option<RemoteEntry>> {
        match tokio::fs::symlink_metadata(self.abs(path)).await {
            Ok(metadata) => Ok(Some(Self::entry_from_metadata(path.clone(), &metadata))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn open(&self, path: &RelPath) -> anyhow::Result<ByteStream> {
        let file = tokio::fs::File::open(self.abs(path)).await?;
        Ok(Box::pin(file))
    }

    #[instrument(skip(self, content), fields(path = %path))]
    async fn put(
        &self,
        path: &RelPath,
        mut content: ByteStream,
        modified: DateTime<Utc>,
    ) -> anyhow::Result<RemoteEntry> {
        let target = self.abs(path);
        ensure_parent(&target).await?;
        let partial = partial_path(&target);

        debug!(?partial, "writing to temporary file");
        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let bytes = tokio::io::copy(&mut content, &mut file).await?;
            file.sync_all().await?;
            Ok::<u64, std::io::Error>(bytes)
        }
        .await;
        let bytes = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e.into());
            }
        };

        finish_partial(&partial, &target, modified).await?;
        debug!(bytes, "write complete");
        self.stat_required(path).await
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn move_file(&self, from: &RelPath, to: &RelPath) -> anyhow::Result<()> {
        let target = self.abs(to);
        ensure_parent(&target).await?;
        tokio::fs::rename(self.abs(from), target).await?;
        debug!("rename complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn remove(&self, path: &RelPath) -> anyhow::Result<()> {
        tokio::fs::remove_file(self.abs(path)).await?;
        debug!("file removed");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn mkdir(&self, path: &RelPath) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(self.abs(path)).await?;
        debug!("directory created");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn rmdir(&self, path: &RelPath) -> anyhow::Result<()> {
        tokio::fs::remove_dir(self.abs(path)).await?;
        debug!("directory removed");
        Ok(())
    }

    fn hasher(&self) -> Option<&dyn IContentHasher> {
        Some(&self.hasher)
    }

    fn server_side_copy(&self) -> Option<&dyn IServerSideCopy> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl IServerSideCopy for LocalBackend {
    #[instrument(skip(self, source), fields(from = %from, to = %to))]
    async fn copy_from(
        &self,
        source: &dyn IBackend,
        from: &RelPath,
        to: &RelPath,
        modified: DateTime<Utc>,
    ) -> anyhow::Result<Option<RemoteEntry>> {
        let Some(source) = source.as_any().downcast_ref::<LocalBackend>() else {
            return Ok(None);
        };

        let target = self.abs(to);
        ensure_parent(&target).await?;
        let partial = partial_path(&target);

        if let Err(e) = tokio::fs::copy(source.abs(from), &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        finish_partial(&partial, &target, modified).await?;
        debug!("local copy complete");
        Ok(Some(self.stat_required(to).await?))
    }
}

// ============================================================================
// Sha256Hasher
// ============================================================================

/// SHA-256 content hasher for files below a root
#[derive(Debug, Clone)]
struct Sha256Hasher {
    root: PathBuf,
}

#[async_trait]
impl IContentHasher for Sha256Hasher {
    fn algorithm(&self) -> &str {
        SHA256
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn hash(&self, path: &RelPath) -> anyhow::Result<ContentHash> {
        let mut file = tokio::fs::File::open(self.root.join(path.as_str())).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let digest = format!("{:x}", hasher.finalize());
        debug!(hash = %digest, "hash computed");
        Ok(ContentHash::new(SHA256, digest)?)
    }
}

// ============================================================================
// Unit tests
// ============================================================================
