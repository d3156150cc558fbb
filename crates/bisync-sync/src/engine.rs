//! Run coordinator
//!
//! [`bisync`] runs one reconciliation between two backends and returns a
//! [`RunSummary`].
//!
//! ## Run Flow
//!
//! 1. **Preflight**: validate options, check modtime support, derive the
//!    session name, take the lock (skipped in dry-run)
//! 2. **Mode dispatch**: check-only, resync or normal
//! 3. **Normal**: deltas per side, guards, queue building, apply, listing
//!    update and commit, optional listing agreement check and empty
//!    directory removal
//! 4. **Finish**: failures are sorted into three tiers
//!
//! ## Failure Tiers
//!
//! - **Abort**: a guard tripped before any mutation; listings untouched
//! - **Critical, retryable**: listings kept in resilient mode, else marked `-err`
//! - **Critical**: listings marked `-err`; `--resync` required
//!
//! Cancellation is checked before and after the applier. An interrupted run
//! marks its listings `-err` exactly once and releases the lock.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bisync_conflict::{ConflictPolicy, ContentComparer, QueueBuilder};
use bisync_core::config::{CheckSync, Options};
use bisync_core::domain::{Listing, ListingEntry, Queues, SessionName, Side};
use bisync_core::ports::IBackend;

use crate::applier::{Applier, ApplyReport, ItemResult, Operation};
use crate::deltas::{capture_listing, find_deltas, PathFilter};
use crate::guard::{check_access, check_files_in, SafetyGuard};
use crate::listing_store::ListingStore;
use crate::listing_update::update_listings;
use crate::lock::LockFile;
use crate::BisyncError;

// ============================================================================
// Summary types
// ============================================================================

/// Which protocol a run follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Normal,
    Resync,
    CheckOnly,
}

impl RunMode {
    pub fn from_options(opts: &Options) -> Self {
        if opts.resync {
            RunMode::Resync
        } else if opts.check_sync == CheckSync::Only {
            RunMode::CheckOnly
        } else {
            RunMode::Normal
        }
    }
}

/// Successful operations on one side
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SideCounts {
    pub copied: usize,
    pub deleted: usize,
    pub renamed: usize,
    pub empty_dirs_removed: usize,
}

impl SideCounts {
    fn from_report(report: &ApplyReport, side: Side) -> Self {
        Self {
            copied: report.count(side, Operation::Copy),
            deleted: report.count(side, Operation::Delete),
            renamed: report.count(side, Operation::Rename),
            empty_dirs_removed: 0,
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: RunMode,
    pub dry_run: bool,
    pub session: String,
    /// The planned work (what a dry run would have done)
    pub queues: Queues,
    pub path1: SideCounts,
    pub path2: SideCounts,
    /// Items that failed and will be retried by the next run
    pub failures: Vec<ItemResult>,
    pub duration_ms: u64,
}

impl RunSummary {
    fn new(mode: RunMode, store: &ListingStore, queues: Queues, report: &ApplyReport) -> Self {
        Self {
            mode,
            dry_run: store.is_dry_run(),
            session: store.session().to_string(),
            path1: SideCounts::from_report(report, Side::Path1),
            path2: SideCounts::from_report(report, Side::Path2),
            failures: report.failures().cloned().collect(),
            queues,
            duration_ms: 0,
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

// ============================================================================
// Failure tiers
// ============================================================================

#[derive(Debug)]
enum RunFailure {
    Abort(BisyncError),
    Critical { error: BisyncError, retryable: bool },
    Interrupted,
}

impl RunFailure {
    fn critical(error: impl Into<BisyncError>) -> Self {
        RunFailure::Critical {
            error: error.into(),
            retryable: false,
        }
    }

    fn retryable(error: impl Into<BisyncError>) -> Self {
        RunFailure::Critical {
            error: error.into(),
            retryable: true,
        }
    }

    fn abort(error: impl Into<BisyncError>) -> Self {
        RunFailure::Abort(error.into())
    }

    /// Unreadable prior listings abort; anything else while finding deltas
    /// is a retryable critical error
    fn from_deltas(error: BisyncError) -> Self {
        match error {
            BisyncError::ListingLoad { .. } => RunFailure::Abort(error),
            other => RunFailure::retryable(other),
        }
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Runs one bidirectional reconciliation between `path1` and `path2`
pub async fn bisync(
    path1: Arc<dyn IBackend>,
    path2: Arc<dyn IBackend>,
    opts: &Options,
    cancel: CancellationToken,
) -> Result<RunSummary, BisyncError> {
    let started = Instant::now();
    opts.validate()?;

    if !opts.dry_run && !opts.force {
        for (side, backend) in [(Side::Path1, &path1), (Side::Path2, &path2)] {
            if !backend.precision().is_supported() {
                error!(side = %side, backend = %backend.identity(), "Modification times unsupported");
                return Err(BisyncError::ModTimeUnsupported(side.file_tag().to_string()));
            }
        }
    }

    let session = SessionName::from_identities(
        &path1.identity().to_string(),
        &path2.identity().to_string(),
    );
    let store = ListingStore::new(&opts.workdir, session, opts.dry_run);
    store.ensure_workdir().await?;

    let lock = if opts.dry_run {
        store.prepare_dry_run().await?;
        None
    } else {
        Some(LockFile::acquire(&store.lock_path()).await?)
    };

    let run = BisyncRun {
        path1,
        path2,
        opts,
        store,
        cancel,
        finalized: AtomicBool::new(false),
    };

    let mode = RunMode::from_options(opts);
    info!(
        session = %run.store.session(),
        path1 = %run.path1.identity(),
        path2 = %run.path2.identity(),
        mode = ?mode,
        dry_run = opts.dry_run,
        "Starting bisync"
    );

    let outcome = match mode {
        RunMode::CheckOnly => run.check_only().await,
        RunMode::Resync => run.resync().await,
        RunMode::Normal => run.normal().await,
    };
    let result = run.finish(outcome, started).await;

    if let Some(lock) = lock {
        if let Err(e) = lock.release().await {
            warn!(error = %e, "Failed to release lock");
        }
    }
    result
}

// ============================================================================
// BisyncRun
// ============================================================================

/// State of one run
struct BisyncRun<'a> {
    path1: Arc<dyn IBackend>,
    path2: Arc<dyn IBackend>,
    opts: &'a Options,
    store: ListingStore,
    cancel: CancellationToken,
    finalized: AtomicBool,
}

impl BisyncRun<'_> {
    fn backend(&self, side: Side) -> &dyn IBackend {
        match side {
            Side::Path1 => self.path1.as_ref(),
            Side::Path2 => self.path2.as_ref(),
        }
    }

    fn applier(&self) -> Applier {
        Applier::new(
            Arc::clone(&self.path1),
            Arc::clone(&self.path2),
            self.opts.transfers,
            self.opts.dry_run,
            self.cancel.clone(),
        )
    }

    fn check_cancelled(&self) -> Result<(), RunFailure> {
        if self.cancel.is_cancelled() {
            warn!("Cancellation requested");
            return Err(RunFailure::Interrupted);
        }
        Ok(())
    }

    /// Marks the listings failed; only the first call has an effect
    async fn finalize_failed(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.store.mark_failed().await {
            error!(error = %e, "Failed to mark listings as failed");
        }
    }

    async fn finish(
        &self,
        outcome: Result<RunSummary, RunFailure>,
        started: Instant,
    ) -> Result<RunSummary, BisyncError> {
        match outcome {
            Ok(mut summary) => {
                summary.duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    copied_to_path1 = summary.path1.copied,
                    copied_to_path2 = summary.path2.copied,
                    deleted_path1 = summary.path1.deleted,
                    deleted_path2 = summary.path2.deleted,
                    failed = summary.failures.len(),
                    duration_ms = summary.duration_ms,
                    "Bisync successful"
                );
                Ok(summary)
            }
            Err(RunFailure::Abort(e)) => {
                error!(error = %e, "Bisync aborted, listings untouched");
                Err(e)
            }
            Err(RunFailure::Interrupted) => {
                self.finalize_failed().await;
                error!("Bisync interrupted, must run --resync to recover");
                Err(BisyncError::Interrupted)
            }
            Err(RunFailure::Critical { error, retryable }) => {
                let keep = retryable && self.opts.resilient;
                if keep {
                    warn!(error = %error, "Bisync critical error, listings kept (resilient)");
                } else {
                    self.finalize_failed().await;
                    error!(error = %error, "Bisync critical error, must run --resync to recover");
                }
                Err(BisyncError::Aborted {
                    reason: error.to_string(),
                    must_resync: !keep,
                })
            }
        }
    }

    /// Saves `-old` backups, commits both listings and drops `-new` files
    async fn commit(&self, next1: &Listing, next2: &Listing) -> Result<(), BisyncError> {
        self.store.save_old().await?;
        self.store.commit(Side::Path1, next1).await?;
        self.store.commit(Side::Path2, next2).await?;
        if !self.opts.no_cleanup {
            self.store.remove_new().await?;
        }
        info!(path1 = next1.len(), path2 = next2.len(), "Listings committed");
        Ok(())
    }

    // ========================================================================
    // Normal mode
    // ========================================================================

    async fn normal(&self) -> Result<RunSummary, RunFailure> {
        if !self.store.priors_exist().await.map_err(RunFailure::critical)? {
            return Err(RunFailure::retryable(BisyncError::MissingListings));
        }
        let filter = PathFilter::new(&self.opts.excludes).map_err(RunFailure::abort)?;

        let s1 = find_deltas(Side::Path1, self.backend(Side::Path1), &self.store, self.opts, &filter)
            .await
            .map_err(RunFailure::from_deltas)?;
        let s2 = find_deltas(Side::Path2, self.backend(Side::Path2), &self.store, self.opts, &filter)
            .await
            .map_err(RunFailure::from_deltas)?;

        if self.opts.check_access {
            check_access(&s1.deltas.check_files, &s2.deltas.check_files)
                .map_err(RunFailure::critical)?;
        }
        SafetyGuard::new(self.opts)
            .check(&s1.deltas, &s2.deltas)
            .map_err(RunFailure::abort)?;

        let queues = if s1.deltas.delta_count() == 0 && s2.deltas.delta_count() == 0 {
            info!("No changes found on either side");
            Queues::new()
        } else {
            let policy = ConflictPolicy::from_options(self.opts).map_err(RunFailure::abort)?;
            let candidates =
                QueueBuilder::needs_comparison(&s1.deltas, &s2.deltas, &s1.current, &s2.current);
            let equal = ContentComparer::new(self.backend(Side::Path1), self.backend(Side::Path2))
                .find_equal(&candidates, &s1.current, &s2.current)
                .await
                .map_err(RunFailure::retryable)?;
            QueueBuilder::new(&policy, &s1.current, &s2.current)
                .build(&s1.deltas, &s2.deltas, &equal)
                .map_err(RunFailure::critical)?
        };
        info!(
            copy1to2 = queues.copy1to2.len(),
            copy2to1 = queues.copy2to1.len(),
            delete1 = queues.delete1.len(),
            delete2 = queues.delete2.len(),
            renamed = queues.renamed1.len() + queues.renamed2.len(),
            "Queues built"
        );

        self.check_cancelled()?;
        let applier = self.applier();
        let report = applier.apply(&queues, &s1.current, &s2.current).await;
        self.check_cancelled()?;

        let (next1, next2) =
            update_listings(&s1.prior, &s2.prior, &s1.current, &s2.current, &report);
        self.commit(&next1, &next2).await.map_err(RunFailure::critical)?;

        if self.opts.check_sync == CheckSync::Enabled {
            listings_in_sync(&next1, &next2).map_err(RunFailure::retryable)?;
        }

        let mut summary = RunSummary::new(RunMode::Normal, &self.store, queues, &report);
        if self.opts.remove_empty_dirs {
            summary.path1.empty_dirs_removed = applier
                .remove_empty_dirs(Side::Path1, &filter)
                .await
                .map_err(RunFailure::retryable)?;
            summary.path2.empty_dirs_removed = applier
                .remove_empty_dirs(Side::Path2, &filter)
                .await
                .map_err(RunFailure::retryable)?;
        }
        Ok(summary)
    }

    // ========================================================================
    // Resync mode
    // ========================================================================

    async fn resync(&self) -> Result<RunSummary, RunFailure> {
        info!("Resync: rebuilding listings from both sides");
        let filter = PathFilter::new(&self.opts.excludes).map_err(RunFailure::abort)?;

        let current1 = capture_listing(Side::Path1, self.backend(Side::Path1), self.opts, &filter)
            .await
            .map_err(RunFailure::critical)?;
        self.store
            .save_new(Side::Path1, &current1)
            .await
            .map_err(RunFailure::critical)?;
        let current2 = capture_listing(Side::Path2, self.backend(Side::Path2), self.opts, &filter)
            .await
            .map_err(RunFailure::critical)?;
        self.store
            .save_new(Side::Path2, &current2)
            .await
            .map_err(RunFailure::critical)?;

        if self.opts.check_access {
            let name = &self.opts.check_filename;
            check_access(&check_files_in(&current1, name), &check_files_in(&current2, name))
                .map_err(RunFailure::critical)?;
        }

        let tolerance = shared_tolerance(self.backend(Side::Path1), self.backend(Side::Path2));
        let queues = resync_queues(&current1, &current2, tolerance);
        info!(
            copy1to2 = queues.copy1to2.len(),
            copy2to1 = queues.copy2to1.len(),
            "Resync queues built"
        );

        self.check_cancelled()?;
        let report = self.applier().apply(&queues, &current1, &current2).await;
        self.check_cancelled()?;

        let (next1, next2) =
            update_listings(&Listing::new(), &Listing::new(), &current1, &current2, &report);
        self.commit(&next1, &next2).await.map_err(RunFailure::critical)?;

        Ok(RunSummary::new(RunMode::Resync, &self.store, queues, &report))
    }

    // ========================================================================
    // Check-only mode
    // ========================================================================

    async fn check_only(&self) -> Result<RunSummary, RunFailure> {
        if !self.store.priors_exist().await.map_err(RunFailure::critical)? {
            return Err(RunFailure::retryable(BisyncError::MissingListings));
        }
        let listing1 = self
            .store
            .load_prior(Side::Path1)
            .await
            .map_err(RunFailure::abort)?;
        let listing2 = self
            .store
            .load_prior(Side::Path2)
            .await
            .map_err(RunFailure::abort)?;

        listings_in_sync(&listing1, &listing2).map_err(RunFailure::retryable)?;
        info!(entries = listing1.len(), "Listings are in sync");
        Ok(RunSummary::new(
            RunMode::CheckOnly,
            &self.store,
            Queues::new(),
            &ApplyReport::default(),
        ))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Fails when the two listings do not hold the same set of paths
fn listings_in_sync(listing1: &Listing, listing2: &Listing) -> Result<(), BisyncError> {
    let paths1: BTreeSet<_> = listing1.paths().collect();
    let paths2: BTreeSet<_> = listing2.paths().collect();
    let only1: Vec<String> = paths1.difference(&paths2).map(ToString::to_string).collect();
    let only2: Vec<String> = paths2.difference(&paths1).map(ToString::to_string).collect();

    if only1.is_empty() && only2.is_empty() {
        return Ok(());
    }
    for path in &only1 {
        error!(path = %path, "Only in Path1 listing");
    }
    for path in &only2 {
        error!(path = %path, "Only in Path2 listing");
    }
    Err(BisyncError::OutOfSync(format!(
        "{} path(s) only in Path1, {} only in Path2",
        only1.len(),
        only2.len()
    )))
}

/// Modtime tolerance usable across both sides, `None` if either lacks modtimes
fn shared_tolerance(path1: &dyn IBackend, path2: &dyn IBackend) -> Option<Duration> {
    match (path1.precision().tolerance(), path2.precision().tolerance()) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    }
}

fn differs(e1: &ListingEntry, e2: &ListingEntry, tolerance: Option<Duration>) -> bool {
    if e1.size != e2.size {
        return true;
    }
    if let Some(tolerance) = tolerance {
        let diff = e1.modified - e2.modified;
        if diff > tolerance || -diff > tolerance {
            return true;
        }
    }
    match (&e1.hash, &e2.hash) {
        (Some(a), Some(b)) if a.comparable_with(b) => a != b,
        _ => false,
    }
}

/// Queues of a resync: Path2-only entries come to Path1, then Path1 is
/// copied one-directionally over Path2. Nothing is deleted.
fn resync_queues(current1: &Listing, current2: &Listing, tolerance: Option<Duration>) -> Queues {
    let mut queues = Queues::new();

    for (path, _) in current2.iter() {
        if !current1.contains(path) {
            queues.copy2to1.insert(path.clone());
        }
    }

    for (path, e1) in current1.iter() {
        match current2.get(path) {
            None => {
                queues.copy1to2.insert(path.clone());
            }
            Some(e2) if e1.is_dir() != e2.is_dir() => {
                warn!(path = %path, "File and directory share a path, skipped by resync");
            }
            Some(e2) => {
                if !e1.is_dir() && differs(e1, e2, tolerance) {
                    queues.copy1to2.insert(path.clone());
                }
            }
        }
    }
    queues
}
