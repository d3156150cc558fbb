//! Operation applier
//!
//! Executes the work queues of a run against both backends:
//!
//! 1. Conflict renames on both sides
//! 2. Copies in both directions (directories first, then files)
//! 3. Deletes (files first, then directories deepest first)
//!
//! Each phase fans out over a bounded worker pool (a [`Semaphore`] limiting
//! tasks in a [`JoinSet`]) and is joined before the next phase starts. Every
//! item yields an [`ItemResult`]; failures are recorded, never raised. Once
//! the cancellation token fires, items that have not started are recorded
//! as failed. In dry-run mode no backend is touched and every item succeeds
//! with the entry it would have produced.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bisync_core::domain::{Listing, ListingEntry, Queues, RelPath, Side};
use bisync_core::ports::IBackend;

use crate::deltas::PathFilter;
use crate::BisyncError;

// ============================================================================
// Results
// ============================================================================

/// Kind of mutation performed on a side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Rename,
    Copy,
    Delete,
}

/// Outcome of one queued item
#[derive(Debug, Clone, Serialize)]
pub struct ItemResult {
    /// Side that was mutated (the destination of a copy)
    pub side: Side,
    pub operation: Operation,
    /// Queued path (the original name for renames)
    pub path: RelPath,
    /// New name for renames
    pub target: Option<RelPath>,
    /// Resulting entry on `side` for successful copies
    pub entry: Option<ListingEntry>,
    pub error: Option<String>,
}

impl ItemResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcomes of every item in a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub results: Vec<ItemResult>,
}

impl ApplyReport {
    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.results.iter().filter(|r| !r.is_ok())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Number of successful operations of `operation` on `side`
    pub fn count(&self, side: Side, operation: Operation) -> usize {
        self.results
            .iter()
            .filter(|r| r.is_ok() && r.side == side && r.operation == operation)
            .count()
    }
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone)]
enum Job {
    Rename {
        side: Side,
        from: RelPath,
        to: RelPath,
    },
    Copy {
        to: Side,
        path: RelPath,
        source: ListingEntry,
    },
    Delete {
        side: Side,
        path: RelPath,
        is_dir: bool,
    },
}

impl Job {
    fn result(self, entry: Option<ListingEntry>, error: Option<String>) -> ItemResult {
        match self {
            Job::Rename { side, from, to } => ItemResult {
                side,
                operation: Operation::Rename,
                path: from,
                target: Some(to),
                entry,
                error,
            },
            Job::Copy { to, path, .. } => ItemResult {
                side: to,
                operation: Operation::Copy,
                path,
                target: None,
                entry,
                error,
            },
            Job::Delete { side, path, .. } => ItemResult {
                side,
                operation: Operation::Delete,
                path,
                target: None,
                entry,
                error,
            },
        }
    }

    fn failed(self, reason: impl Into<String>) -> ItemResult {
        self.result(None, Some(reason.into()))
    }
}

// ============================================================================
// Applier
// ============================================================================

/// Applies queues to a pair of backends
pub struct Applier {
    path1: Arc<dyn IBackend>,
    path2: Arc<dyn IBackend>,
    semaphore: Arc<Semaphore>,
    dry_run: bool,
    cancel: CancellationToken,
}

impl Applier {
    pub fn new(
        path1: Arc<dyn IBackend>,
        path2: Arc<dyn IBackend>,
        concurrency: usize,
        dry_run: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path1,
            path2,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            dry_run,
            cancel,
        }
    }

    fn backend(&self, side: Side) -> &Arc<dyn IBackend> {
        match side {
            Side::Path1 => &self.path1,
            Side::Path2 => &self.path2,
        }
    }

    /// Executes every queued operation and returns the per-item outcomes
    pub async fn apply(&self, queues: &Queues, current1: &Listing, current2: &Listing) -> ApplyReport {
        let mut report = ApplyReport::default();

        // Phase 1: conflict renames
        let renames: Vec<Job> = [Side::Path1, Side::Path2]
            .into_iter()
            .flat_map(|side| {
                queues.renames_on(side).iter().map(move |(from, to)| Job::Rename {
                    side,
                    from: from.clone(),
                    to: to.clone(),
                })
            })
            .collect();
        report.results.extend(self.run_batch(renames).await);

        // Phase 2: copies
        let mut dir_copies = Vec::new();
        let mut file_copies = Vec::new();
        for to in [Side::Path2, Side::Path1] {
            let from = to.other();
            let listing = match from {
                Side::Path1 => current1,
                Side::Path2 => current2,
            };
            for path in queues.copies_to(to) {
                match source_entry(queues, from, listing, path) {
                    Some(source) => {
                        let is_dir = source.is_dir();
                        let job = Job::Copy {
                            to,
                            path: path.clone(),
                            source,
                        };
                        if is_dir {
                            dir_copies.push(job);
                        } else {
                            file_copies.push(job);
                        }
                    }
                    None => {
                        warn!(path = %path, from = %from, "Copy source missing from listing");
                        report.results.push(ItemResult {
                            side: to,
                            operation: Operation::Copy,
                            path: path.clone(),
                            target: None,
                            entry: None,
                            error: Some("source entry missing from listing".to_string()),
                        });
                    }
                }
            }
        }
        report.results.extend(self.run_batch(dir_copies).await);
        report.results.extend(self.run_batch(file_copies).await);

        // Phase 3: deletes
        let mut file_deletes = Vec::new();
        let mut dir_deletes: BTreeMap<usize, Vec<Job>> = BTreeMap::new();
        for side in [Side::Path1, Side::Path2] {
            let listing = match side {
                Side::Path1 => current1,
                Side::Path2 => current2,
            };
            for path in queues.deletes_on(side) {
                let is_dir = listing.get(path).is_some_and(|e| e.is_dir());
                let job = Job::Delete {
                    side,
                    path: path.clone(),
                    is_dir,
                };
                if is_dir {
                    dir_deletes.entry(path.depth()).or_default().push(job);
                } else {
                    file_deletes.push(job);
                }
            }
        }
        report.results.extend(self.run_batch(file_deletes).await);
        for (_, jobs) in dir_deletes.into_iter().rev() {
            report.results.extend(self.run_batch(jobs).await);
        }

        info!(
            total = report.results.len(),
            failed = report.failure_count(),
            dry_run = self.dry_run,
            "Operations applied"
        );
        report
    }

    /// Runs one phase on the worker pool and joins every task
    async fn run_batch(&self, jobs: Vec<Job>) -> Vec<ItemResult> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let mut set = JoinSet::new();
        for (index, job) in jobs.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&self.semaphore);
            let cancel = self.cancel.clone();
            let path1 = Arc::clone(&self.path1);
            let path2 = Arc::clone(&self.path2);
            let dry_run = self.dry_run;

            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, job.failed("worker pool closed")),
                };
                if cancel.is_cancelled() {
                    return (index, job.failed("cancelled"));
                }
                (index, execute(job, path1, path2, dry_run).await)
            });
        }

        let mut slots: Vec<Option<ItemResult>> = vec![None; jobs.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!(error = %e, "Transfer task failed to complete"),
            }
        }

        // Tasks that panicked still count as failed items
        slots
            .into_iter()
            .zip(jobs)
            .map(|(slot, job)| slot.unwrap_or_else(|| job.failed("transfer task aborted")))
            .collect()
    }

    /// Removes every empty directory on `side`, deepest first
    pub async fn remove_empty_dirs(
        &self,
        side: Side,
        filter: &PathFilter,
    ) -> Result<usize, BisyncError> {
        let backend = self.backend(side);
        let entries = backend.list().await?;

        let mut remaining: BTreeSet<RelPath> = entries.iter().map(|e| e.path.clone()).collect();
        let mut dirs: Vec<RelPath> = entries
            .iter()
            .filter(|e| e.is_dir() && !filter.is_excluded(&e.path))
            .map(|e| e.path.clone())
            .collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.depth()));

        let mut removed = 0;
        for dir in dirs {
            if remaining.iter().any(|p| p.is_inside(&dir)) {
                continue;
            }
            if self.dry_run {
                info!(side = %side, dir = %dir, "Dry run: would remove empty directory");
            } else {
                backend.rmdir(&dir).await?;
                debug!(side = %side, dir = %dir, "Removed empty directory");
            }
            remaining.remove(&dir);
            removed += 1;
        }
        Ok(removed)
    }
}

/// Finds the listing entry for a queued copy source, following conflict renames
fn source_entry(
    queues: &Queues,
    from: Side,
    listing: &Listing,
    path: &RelPath,
) -> Option<ListingEntry> {
    listing.get(path).cloned().or_else(|| {
        queues
            .renames_on(from)
            .iter()
            .find(|(_, renamed)| *renamed == path)
            .and_then(|(original, _)| listing.get(original).cloned())
    })
}

async fn execute(
    job: Job,
    path1: Arc<dyn IBackend>,
    path2: Arc<dyn IBackend>,
    dry_run: bool,
) -> ItemResult {
    let backend = |side: Side| match side {
        Side::Path1 => Arc::clone(&path1),
        Side::Path2 => Arc::clone(&path2),
    };

    match &job {
        Job::Rename { side, from, to } => {
            if dry_run {
                info!(side = %side, from = %from, to = %to, "Dry run: would rename");
                return job.result(None, None);
            }
            match backend(*side).move_file(from, to).await {
                Ok(()) => {
                    info!(side = %side, from = %from, to = %to, "Renamed conflicting file");
                    job.result(None, None)
                }
                Err(e) => {
                    error!(side = %side, path = %from, error = %e, "Rename failed");
                    job.failed(format!("{e:#}"))
                }
            }
        }
        Job::Copy { to, path, source } => {
            if dry_run {
                info!(to = %to, path = %path, "Dry run: would copy");
                let entry = source.clone();
                return job.result(Some(entry), None);
            }
            let src = backend(to.other());
            let dst = backend(*to);
            match copy_one(src.as_ref(), dst.as_ref(), path, source).await {
                Ok(entry) => {
                    info!(to = %to, path = %path, size = entry.size, "Copied");
                    job.result(Some(entry), None)
                }
                Err(e) => {
                    error!(to = %to, path = %path, error = %e, "Copy failed");
                    job.failed(format!("{e:#}"))
                }
            }
        }
        Job::Delete { side, path, is_dir } => {
            if dry_run {
                info!(side = %side, path = %path, "Dry run: would delete");
                return job.result(None, None);
            }
            let target = backend(*side);
            let outcome = if *is_dir {
                target.rmdir(path).await
            } else {
                target.remove(path).await
            };
            match outcome {
                Ok(()) => {
                    info!(side = %side, path = %path, "Deleted");
                    job.result(None, None)
                }
                Err(e) => {
                    error!(side = %side, path = %path, error = %e, "Delete failed");
                    job.failed(format!("{e:#}"))
                }
            }
        }
    }
}

/// Copies one entry, preferring a server-side copy when the destination
/// supports it for this source
async fn copy_one(
    src: &dyn IBackend,
    dst: &dyn IBackend,
    path: &RelPath,
    source: &ListingEntry,
) -> anyhow::Result<ListingEntry> {
    if source.is_dir() {
        dst.mkdir(path).await?;
        return Ok(ListingEntry::dir(source.modified));
    }

    let copied = match dst.server_side_copy() {
        Some(ssc) => ssc.copy_from(src, path, path, source.modified).await?,
        None => None,
    };
    let remote = match copied {
        Some(entry) => {
            debug!(path = %path, "server-side copy");
            entry
        }
        None => {
            let stream = src.open(path).await?;
            dst.put(path, stream, source.modified).await?
        }
    };

    let mut entry = remote.to_listing_entry();
    if entry.hash.is_none() {
        if let (Some(hash), Some(hasher)) = (&source.hash, dst.hasher()) {
            if hasher.algorithm() == hash.algorithm() {
                entry.hash = Some(hash.clone());
            }
        }
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use chrono::{DateTime, TimeZone, Utc};

    fn path(p: &str) -> RelPath {
        RelPath::new(p).unwrap()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn listing_of(backend: &MemoryBackend) -> Listing {
        backend
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|e| !e.is_dir())
            .map(|e| (e.path.clone(), e.to_listing_entry()))
            .collect()
    }

    async fn setup() -> (Arc<MemoryBackend>, Arc<MemoryBackend>) {
        let p1 = Arc::new(MemoryBackend::new("one"));
        let p2 = Arc::new(MemoryBackend::new("two"));
        p1.write_file(&path("new.txt"), "fresh", t(10)).await.unwrap();
        p1.write_file(&path("c"), "left", t(20)).await.unwrap();
        p2.write_file(&path("c"), "right!", t(30)).await.unwrap();
        p2.write_file(&path("old.txt"), "stale", t(5)).await.unwrap();
        (p1, p2)
    }

    fn queues() -> Queues {
        let mut q = Queues::new();
        q.copy1to2.insert(path("new.txt"));
        q.delete2.insert(path("old.txt"));
        q.renamed1.insert(path("c"), path("c..path1"));
        q.renamed2.insert(path("c"), path("c..path2"));
        q.copy1to2.insert(path("c..path1"));
        q.copy2to1.insert(path("c..path2"));
        q
    }

    #[tokio::test]
    async fn test_apply_renames_copies_and_deletes() {
        let (p1, p2) = setup().await;
        let cur1 = listing_of(&p1).await;
        let cur2 = listing_of(&p2).await;
        let applier = Applier::new(p1.clone(), p2.clone(), 2, false, CancellationToken::new());

        let report = applier.apply(&queues(), &cur1, &cur2).await;

        assert_eq!(report.failure_count(), 0);
        assert_eq!(report.count(Side::Path2, Operation::Copy), 2);
        assert_eq!(report.count(Side::Path2, Operation::Delete), 1);
        assert_eq!(p2.read_file(&path("new.txt")).await.unwrap(), b"fresh");
        assert_eq!(p2.read_file(&path("c..path1")).await.unwrap(), b"left");
        assert_eq!(p1.read_file(&path("c..path2")).await.unwrap(), b"right!");
        assert!(!p1.exists(&path("c")).await);
        assert!(!p2.exists(&path("old.txt")).await);

        let copied = report
            .results
            .iter()
            .find(|r| r.path == path("new.txt"))
            .unwrap();
        assert_eq!(copied.entry.as_ref().unwrap().modified, t(10));
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let (p1, p2) = setup().await;
        let cur1 = listing_of(&p1).await;
        let cur2 = listing_of(&p2).await;
        let applier = Applier::new(p1.clone(), p2.clone(), 4, true, CancellationToken::new());

        let report = applier.apply(&queues(), &cur1, &cur2).await;

        assert_eq!(report.failure_count(), 0);
        assert_eq!(report.results.len(), queues().operation_count());
        assert!(!p2.exists(&path("new.txt")).await);
        assert!(p1.exists(&path("c")).await);
        assert!(p2.exists(&path("old.txt")).await);
    }

    #[tokio::test]
    async fn test_cancelled_items_are_recorded_as_failed() {
        let (p1, p2) = setup().await;
        let cur1 = listing_of(&p1).await;
        let cur2 = listing_of(&p2).await;
        let token = CancellationToken::new();
        token.cancel();
        let applier = Applier::new(p1.clone(), p2.clone(), 1, false, token);

        let report = applier.apply(&queues(), &cur1, &cur2).await;

        assert_eq!(report.failure_count(), report.results.len());
        assert!(report.failures().all(|r| r.error.as_deref() == Some("cancelled")));
        assert!(p2.exists(&path("old.txt")).await);
    }

    #[tokio::test]
    async fn test_missing_source_is_a_failure() {
        let (p1, p2) = setup().await;
        let mut q = Queues::new();
        q.copy2to1.insert(path("ghost"));

        let applier = Applier::new(p1, p2, 1, false, CancellationToken::new());
        let report = applier.apply(&q, &Listing::new(), &Listing::new()).await;

        assert_eq!(report.failure_count(), 1);
        let failed = &report.results[0];
        assert_eq!(failed.side, Side::Path1);
        assert_eq!(failed.operation, Operation::Copy);
        assert!(failed.entry.is_none());
        assert_eq!(failed.error.as_deref(), Some("source entry missing from listing"));
    }

    #[tokio::test]
    async fn test_remove_empty_dirs_deepest_first() {
        let p1 = Arc::new(MemoryBackend::new("one"));
        let p2 = Arc::new(MemoryBackend::new("two"));
        p1.mkdir(&path("a/b/c")).await.unwrap();
        p1.write_file(&path("keep/file"), "x", t(1)).await.unwrap();

        let applier = Applier::new(p1.clone(), p2, 1, false, CancellationToken::new());
        let removed = applier
            .remove_empty_dirs(Side::Path1, &PathFilter::default())
            .await
            .unwrap();

        assert_eq!(removed, 3);
        assert!(!p1.exists(&path("a")).await);
        assert!(p1.exists(&path("keep")).await);
    }
}
