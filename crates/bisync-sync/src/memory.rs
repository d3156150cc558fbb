//! In-memory backend
//!
//! A complete [`IBackend`] over a map of paths to nodes. Used by tests and
//! for dry experiments; content is lost when the backend is dropped. Parent
//! directories are created implicitly by `put`, `mkdir` and `move_file`.

use std::any::Any;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use bisync_core::domain::{ContentHash, EntryKind, RelPath, SHA256};
use bisync_core::ports::{
    BackendIdentity, ByteStream, IBackend, IContentHasher, ModTimePrecision, RemoteEntry,
};

#[derive(Debug, Clone)]
struct Node {
    kind: EntryKind,
    content: Vec<u8>,
    modified: DateTime<Utc>,
}

type Nodes = Arc<RwLock<BTreeMap<RelPath, Node>>>;

/// A backend whose tree lives in memory
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    nodes: Nodes,
    precision: ModTimePrecision,
    hasher: Option<MemoryHasher>,
}

impl MemoryBackend {
    /// Create an empty backend; `name` becomes the identity root
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Arc::new(RwLock::new(BTreeMap::new())),
            precision: ModTimePrecision::Granularity(Duration::nanoseconds(1)),
            hasher: None,
        }
    }

    #[must_use]
    pub fn with_precision(mut self, precision: ModTimePrecision) -> Self {
        self.precision = precision;
        self
    }

    /// Enables SHA-256 content hashing
    #[must_use]
    pub fn with_hashing(mut self) -> Self {
        self.hasher = Some(MemoryHasher {
            nodes: Arc::clone(&self.nodes),
        });
        self
    }

    /// Stores a modification time the way this backend's precision allows
    fn stored_time(&self, modified: DateTime<Utc>) -> DateTime<Utc> {
        match self.precision {
            ModTimePrecision::NotSupported => DateTime::<Utc>::from(std::time::UNIX_EPOCH),
            ModTimePrecision::Granularity(step) => {
                modified.duration_trunc(step).unwrap_or(modified)
            }
        }
    }

    fn ensure_parents(
        nodes: &mut BTreeMap<RelPath, Node>,
        path: &RelPath,
        modified: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        for ancestor in path.ancestors() {
            match nodes.get(&ancestor) {
                Some(node) if node.kind == EntryKind::File => {
                    bail!("{ancestor} is a file, cannot create {path}")
                }
                Some(_) => {}
                None => {
                    nodes.insert(
                        ancestor,
                        Node {
                            kind: EntryKind::Dir,
                            content: Vec::new(),
                            modified,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn entry(path: &RelPath, node: &Node) -> RemoteEntry {
        RemoteEntry {
            path: path.clone(),
            size: node.content.len() as u64,
            modified: node.modified,
            kind: node.kind,
            hash: None,
        }
    }

    // ========================================================================
    // Direct access (bypasses the listing-driven engine)
    // ========================================================================

    /// Writes a file, creating parent directories
    pub async fn write_file(
        &self,
        path: &RelPath,
        content: impl Into<Vec<u8>>,
        modified: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let modified = self.stored_time(modified);
        let mut nodes = self.nodes.write().await;
        Self::ensure_parents(&mut nodes, path, modified)?;
        nodes.insert(
            path.clone(),
            Node {
                kind: EntryKind::File,
                content: content.into(),
                modified,
            },
        );
        Ok(())
    }

    /// Returns the content of a file, or `None` if it is absent or a directory
    pub async fn read_file(&self, path: &RelPath) -> Option<Vec<u8>> {
        let nodes = self.nodes.read().await;
        nodes
            .get(path)
            .filter(|n| n.kind == EntryKind::File)
            .map(|n| n.content.clone())
    }

    pub async fn exists(&self, path: &RelPath) -> bool {
        self.nodes.read().await.contains_key(path)
    }

    /// Every file path, sorted
    pub async fn file_paths(&self) -> Vec<RelPath> {
        let nodes = self.nodes.read().await;
        nodes
            .iter()
            .filter(|(_, n)| n.kind == EntryKind::File)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Removes a path and everything below it
    pub async fn purge(&self, path: &RelPath) {
        let mut nodes = self.nodes.write().await;
        nodes.retain(|p, _| p != path && !p.is_inside(path));
    }
}

#[async_trait]
impl IBackend for MemoryBackend {
    fn identity(&self) -> BackendIdentity {
        BackendIdentity::new("memory", self.name.clone())
    }

    fn precision(&self) -> ModTimePrecision {
        self.precision
    }

    async fn list(&self) -> anyhow::Result<Vec<RemoteEntry>> {
        let nodes = self.nodes.read().await;
        Ok(nodes.iter().map(|(p, n)| Self::entry(p, n)).collect())
    }

    async fn stat(&self, path: &RelPath) -> anyhow::Result<Option<RemoteEntry>> {
        let nodes = self.nodes.read().await;
        Ok(nodes.get(path).map(|n| Self::entry(path, n)))
    }

    async fn open(&self, path: &RelPath) -> anyhow::Result<ByteStream> {
        let content = self
            .read_file(path)
            .await
            .ok_or_else(|| anyhow!("{path}: no such file"))?;
        Ok(Box::pin(Cursor::new(content)))
    }

    async fn put(
        &self,
        path: &RelPath,
        mut content: ByteStream,
        modified: DateTime<Utc>,
    ) -> anyhow::Result<RemoteEntry> {
        let mut buf = Vec::new();
        content.read_to_end(&mut buf).await?;

        let modified = self.stored_time(modified);
        let mut nodes = self.nodes.write().await;
        if nodes.get(path).is_some_and(|n| n.kind == EntryKind::Dir) {
            bail!("{path} is a directory");
        }
        Self::ensure_parents(&mut nodes, path, modified)?;
        let node = Node {
            kind: EntryKind::File,
            content: buf,
            modified,
        };
        let entry = Self::entry(path, &node);
        nodes.insert(path.clone(), node);
        Ok(entry)
    }

    async fn move_file(&self, from: &RelPath, to: &RelPath) -> anyhow::Result<()> {
        let mut nodes = self.nodes.write().await;
        let node = match nodes.get(from) {
            Some(n) if n.kind == EntryKind::File => n.clone(),
            Some(_) => bail!("{from} is a directory"),
            None => bail!("{from}: no such file"),
        };
        Self::ensure_parents(&mut nodes, to, node.modified)?;
        nodes.remove(from);
        nodes.insert(to.clone(), node);
        Ok(())
    }

    async fn remove(&self, path: &RelPath) -> anyhow::Result<()> {
        let mut nodes = self.nodes.write().await;
        match nodes.get(path) {
            Some(n) if n.kind == EntryKind::File => {
                nodes.remove(path);
                Ok(())
            }
            Some(_) => bail!("{path} is a directory"),
            None => bail!("{path}: no such file"),
        }
    }

    async fn mkdir(&self, path: &RelPath) -> anyhow::Result<()> {
        let now = self.stored_time(Utc::now());
        let mut nodes = self.nodes.write().await;
        match nodes.get(path) {
            Some(n) if n.kind == EntryKind::Dir => return Ok(()),
            Some(_) => bail!("{path} is a file"),
            None => {}
        }
        Self::ensure_parents(&mut nodes, path, now)?;
        nodes.insert(
            path.clone(),
            Node {
                kind: EntryKind::Dir,
                content: Vec::new(),
                modified: now,
            },
        );
        Ok(())
    }

    async fn rmdir(&self, path: &RelPath) -> anyhow::Result<()> {
        let mut nodes = self.nodes.write().await;
        match nodes.get(path) {
            Some(n) if n.kind == EntryKind::Dir => {}
            Some(_) => bail!("{path} is not a directory"),
            None => bail!("{path}: no such directory"),
        }
        if nodes.keys().any(|p| p.is_inside(path)) {
            bail!("{path}: directory not empty");
        }
        nodes.remove(path);
        Ok(())
    }

    fn hasher(&self) -> Option<&dyn IContentHasher> {
        self.hasher.as_ref().map(|h| h as &dyn IContentHasher)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct MemoryHasher {
    nodes: Nodes,
}

#[async_trait]
impl IContentHasher for MemoryHasher {
    fn algorithm(&self) -> &str {
        SHA256
    }

    async fn hash(&self, path: &RelPath) -> anyhow::Result<ContentHash> {
        let nodes = self.nodes.read().await;
        let node = nodes
            .get(path)
            .filter(|n| n.kind == EntryKind::File)
            .ok_or_else(|| anyhow!("{path}: no such file"))?;
        let digest = format!("{:x}", Sha256::digest(&node.content));
        Ok(ContentHash::new(SHA256, digest)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn path(p: &str) -> RelPath {
        RelPath::new(p).unwrap()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_put_creates_parents() {
        let backend = MemoryBackend::new("m");
        backend
            .put(&path("a/b/c.txt"), Box::pin(&b"data"[..]), t(10))
            .await
            .unwrap();

        let listed = backend.list().await.unwrap();
        let names: Vec<&str> = listed.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["a", "a/b", "a/b/c.txt"]);
        assert_eq!(backend.read_file(&path("a/b/c.txt")).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_precision_truncates_times() {
        let backend = MemoryBackend::new("m")
            .with_precision(ModTimePrecision::Granularity(Duration::seconds(1)));
        let precise = t(100) + Duration::milliseconds(750);
        backend.write_file(&path("f"), "x", precise).await.unwrap();

        let entry = backend.stat(&path("f")).await.unwrap().unwrap();
        assert_eq!(entry.modified, t(100));
    }

    #[tokio::test]
    async fn test_rmdir_requires_empty() {
        let backend = MemoryBackend::new("m");
        backend.write_file(&path("d/f"), "x", t(1)).await.unwrap();
        assert!(backend.rmdir(&path("d")).await.is_err());

        backend.remove(&path("d/f")).await.unwrap();
        backend.rmdir(&path("d")).await.unwrap();
        assert!(!backend.exists(&path("d")).await);
    }

    #[tokio::test]
    async fn test_move_and_remove() {
        let backend = MemoryBackend::new("m");
        backend.write_file(&path("a"), "x", t(1)).await.unwrap();
        backend.move_file(&path("a"), &path("a..path1")).await.unwrap();
        assert!(!backend.exists(&path("a")).await);
        assert!(backend.exists(&path("a..path1")).await);
        assert!(backend.remove(&path("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_hashing_is_optional() {
        let plain = MemoryBackend::new("m");
        assert!(plain.hasher().is_none());

        let hashed = MemoryBackend::new("m").with_hashing();
        hashed.write_file(&path("abc"), "abc", t(1)).await.unwrap();
        let hash = hashed.hasher().unwrap().hash(&path("abc")).await.unwrap();
        assert_eq!(
            hash.digest(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
