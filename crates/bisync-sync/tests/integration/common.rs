//! Shared helpers for bisync integration tests
//!
//! Provides a pair of in-memory backends with a temporary work directory,
//! and a wrapper backend that injects transfer failures or cancellation.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use bisync_core::config::Options;
use bisync_core::domain::{RelPath, SessionName};
use bisync_core::ports::{
    BackendIdentity, ByteStream, IBackend, IContentHasher, ModTimePrecision, RemoteEntry,
};
use bisync_sync::listing_store::ListingStore;
use bisync_sync::{bisync, BisyncError, MemoryBackend, RunSummary};

pub fn path(p: &str) -> RelPath {
    RelPath::new(p).unwrap()
}

pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Two memory backends sharing one work directory
pub struct Pair {
    pub p1: Arc<MemoryBackend>,
    pub p2: Arc<MemoryBackend>,
    pub workdir: TempDir,
    pub opts: Options,
}

impl Pair {
    pub fn new() -> Self {
        let workdir = TempDir::new().unwrap();
        let opts = Options::with_workdir(workdir.path());
        Self {
            p1: Arc::new(MemoryBackend::new("one")),
            p2: Arc::new(MemoryBackend::new("two")),
            workdir,
            opts,
        }
    }

    /// A pair whose sides already hold the same files and have been resynced
    pub async fn synced(files: &[(&str, &str)]) -> Self {
        let pair = Self::new();
        for (name, content) in files {
            pair.p1.write_file(&path(name), *content, t(0)).await.unwrap();
            pair.p2.write_file(&path(name), *content, t(0)).await.unwrap();
        }
        pair.resync().await;
        pair
    }

    pub fn backends(&self) -> (Arc<dyn IBackend>, Arc<dyn IBackend>) {
        (self.p1.clone(), self.p2.clone())
    }

    pub async fn run_with(&self, opts: &Options) -> Result<RunSummary, BisyncError> {
        let (p1, p2) = self.backends();
        bisync(p1, p2, opts, CancellationToken::new()).await
    }

    pub async fn run(&self) -> Result<RunSummary, BisyncError> {
        self.run_with(&self.opts).await
    }

    pub async fn resync(&self) -> RunSummary {
        let mut opts = self.opts.clone();
        opts.resync = true;
        self.run_with(&opts).await.expect("resync failed")
    }

    pub fn store(&self) -> ListingStore {
        store_for(&self.opts, self.p1.as_ref(), self.p2.as_ref(), false)
    }

    /// Asserts that both sides hold the same files with the same content
    pub async fn assert_converged(&self) {
        let files1 = self.p1.file_paths().await;
        let files2 = self.p2.file_paths().await;
        assert_eq!(files1, files2, "file sets differ");
        for p in &files1 {
            assert_eq!(
                self.p1.read_file(p).await,
                self.p2.read_file(p).await,
                "content differs for {p}"
            );
        }
    }
}

pub fn store_for(
    opts: &Options,
    p1: &dyn IBackend,
    p2: &dyn IBackend,
    dry_run: bool,
) -> ListingStore {
    ListingStore::new(
        &opts.workdir,
        SessionName::from_identities(&p1.identity().to_string(), &p2.identity().to_string()),
        dry_run,
    )
}

/// Wraps a backend and misbehaves on `put`
///
/// Paths in `fail_puts` fail with an error. If `cancel_on_put` is set the
/// token is cancelled by the first `put`, which then completes normally.
/// The identity is the inner backend's, so runs share its session.
pub struct FlakyBackend {
    pub inner: Arc<MemoryBackend>,
    pub fail_puts: Mutex<BTreeSet<RelPath>>,
    pub cancel_on_put: Option<CancellationToken>,
}

impl FlakyBackend {
    pub fn failing(inner: Arc<MemoryBackend>, paths: &[&str]) -> Self {
        Self {
            inner,
            fail_puts: Mutex::new(paths.iter().map(|p| path(p)).collect()),
            cancel_on_put: None,
        }
    }

    pub fn cancelling(inner: Arc<MemoryBackend>, token: CancellationToken) -> Self {
        Self {
            inner,
            fail_puts: Mutex::new(BTreeSet::new()),
            cancel_on_put: Some(token),
        }
    }
}

#[async_trait]
impl IBackend for FlakyBackend {
    fn identity(&self) -> BackendIdentity {
        self.inner.identity()
    }

    fn precision(&self) -> ModTimePrecision {
        self.inner.precision()
    }

    async fn list(&self) -> anyhow::Result<Vec<RemoteEntry>> {
        self.inner.list().await
    }

    async fn stat(&self, path: &RelPath) -> anyhow::Result<Option<RemoteEntry>> {
        self.inner.stat(path).await
    }

    async fn open(&self, path: &RelPath) -> anyhow::Result<ByteStream> {
        self.inner.open(path).await
    }

    async fn put(
        &self,
        path: &RelPath,
        content: ByteStream,
        modified: DateTime<Utc>,
    ) -> anyhow::Result<RemoteEntry> {
        if self.fail_puts.lock().unwrap().contains(path) {
            anyhow::bail!("injected failure writing {path}");
        }
        if let Some(token) = &self.cancel_on_put {
            token.cancel();
        }
        self.inner.put(path, content, modified).await
    }

    async fn move_file(&self, from: &RelPath, to: &RelPath) -> anyhow::Result<()> {
        self.inner.move_file(from, to).await
    }

    async fn remove(&self, path: &RelPath) -> anyhow::Result<()> {
        self.inner.remove(path).await
    }

    async fn mkdir(&self, path: &RelPath) -> anyhow::Result<()> {
        self.inner.mkdir(path).await
    }

    async fn rmdir(&self, path: &RelPath) -> anyhow::Result<()> {
        self.inner.rmdir(path).await
    }

    fn hasher(&self) -> Option<&dyn IContentHasher> {
        self.inner.hasher()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
