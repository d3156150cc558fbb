//! Sync command - Reconcile two directory trees
//!
//! Provides the `bisync sync` CLI command which:
//! 1. Loads configuration and derives the run options
//! 2. Applies command-line overrides on top of the configured values
//! 3. Opens both directories as local backends
//! 4. Runs the engine with Ctrl-C wired to cancellation and displays results

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bisync_core::config::{CheckSync, Config, Options};
use bisync_core::domain::RelPath;
use bisync_core::ports::IBackend;
use bisync_sync::{bisync, LocalBackend, RunSummary};

use crate::output::{get_formatter, plural, OutputFormat, OutputFormatter};
use crate::ConfigSource;

/// `--check-sync` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CheckSyncArg {
    True,
    False,
    Only,
}

impl From<CheckSyncArg> for CheckSync {
    fn from(arg: CheckSyncArg) -> Self {
        match arg {
            CheckSyncArg::True => CheckSync::Enabled,
            CheckSyncArg::False => CheckSync::Disabled,
            CheckSyncArg::Only => CheckSync::Only,
        }
    }
}

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// First directory
    pub path1: PathBuf,

    /// Second directory
    pub path2: PathBuf,

    /// Rebuild both listings from the current state of both sides
    #[arg(long)]
    pub resync: bool,

    /// Show what would be done without making changes
    #[arg(long)]
    pub dry_run: bool,

    /// Bypass the delete safety limits and the modification time check
    #[arg(long)]
    pub force: bool,

    /// Abort unless the check files match on both sides
    #[arg(long)]
    pub check_access: bool,

    /// Name of the check file used by --check-access
    #[arg(long, value_name = "NAME")]
    pub check_filename: Option<String>,

    /// Cross-check the listings after the run, or only check them
    #[arg(long, value_enum, value_name = "MODE")]
    pub check_sync: Option<CheckSyncArg>,

    /// Abort if more than this percentage of files would be deleted on a side
    #[arg(long, value_name = "PERCENT", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub max_delete: Option<u8>,

    /// Abort if more than this many files would be deleted on a side
    #[arg(long, value_name = "COUNT")]
    pub max_delete_count: Option<usize>,

    /// Replicate empty directories
    #[arg(long)]
    pub create_empty_src_dirs: bool,

    /// Remove empty directories left behind after the run
    #[arg(long, conflicts_with = "create_empty_src_dirs")]
    pub remove_empty_dirs: bool,

    /// Keep the listings usable after retryable errors
    #[arg(long)]
    pub resilient: bool,

    /// Keep the working listing files after a successful run
    #[arg(long)]
    pub no_cleanup: bool,

    /// Compare file hashes in addition to size and modification time
    #[arg(long)]
    pub checksum: bool,

    /// Exclude paths matching this glob (can be repeated)
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Number of concurrent transfers
    #[arg(long, value_name = "N")]
    pub transfers: Option<usize>,

    /// Directory holding listings and the lock file
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,
}

impl SyncCommand {
    /// Configured options with this command's flags applied on top.
    ///
    /// Boolean flags can only switch a setting on; value flags replace the
    /// configured value and excludes are appended.
    pub fn options(&self, config: &Config) -> Options {
        let mut opts = Options::from(config);

        opts.resync = self.resync;
        opts.dry_run = self.dry_run;
        opts.force = self.force;
        opts.check_access |= self.check_access;
        opts.create_empty_src_dirs |= self.create_empty_src_dirs;
        opts.remove_empty_dirs |= self.remove_empty_dirs;
        opts.resilient |= self.resilient;
        opts.no_cleanup |= self.no_cleanup;
        opts.checksum |= self.checksum;

        if let Some(name) = &self.check_filename {
            opts.check_filename = name.clone();
        }
        if let Some(mode) = self.check_sync {
            opts.check_sync = mode.into();
        }
        if let Some(percent) = self.max_delete {
            opts.max_delete_percent = percent;
        }
        if let Some(count) = self.max_delete_count {
            opts.max_delete_count = Some(count);
        }
        if let Some(n) = self.transfers {
            opts.transfers = n;
        }
        if let Some(dir) = &self.workdir {
            opts.workdir = dir.clone();
        }
        opts.excludes.extend(self.exclude.iter().cloned());

        opts
    }

    pub async fn execute(&self, format: OutputFormat, source: &ConfigSource) -> Result<()> {
        let formatter = get_formatter(format.is_json());

        let config = source.load()?;
        info!(config_path = %source.path.display(), "Loaded configuration");
        let opts = self.options(&config);

        if opts.dry_run {
            formatter.info("Dry run mode - no changes will be made");
        }

        let summary = run(&self.path1, &self.path2, &opts).await?;
        display_summary(formatter.as_ref(), format, &summary)?;

        if summary.has_failures() {
            anyhow::bail!(
                "{} could not be transferred and will be retried on the next run",
                plural(summary.failures.len(), "item")
            );
        }
        Ok(())
    }
}

/// Opens both directories and runs the engine until it finishes or Ctrl-C
/// cancels it.
pub async fn run(path1: &Path, path2: &Path, opts: &Options) -> Result<RunSummary> {
    let p1 = open_local(path1)?;
    let p2 = open_local(path2)?;

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after in-flight transfers");
                cancel.cancel();
            }
        })
    };

    let result = bisync(p1, p2, opts, cancel).await;
    watcher.abort();

    result.context("bisync run failed")
}

fn open_local(path: &Path) -> Result<Arc<dyn IBackend>> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("cannot access {}", path.display()))?;
    if !meta.is_dir() {
        anyhow::bail!("{} is not a directory", path.display());
    }
    let root = path
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", path.display()))?;
    Ok(Arc::new(LocalBackend::new(root)))
}

fn display_summary(
    formatter: &dyn OutputFormatter,
    format: OutputFormat,
    summary: &RunSummary,
) -> Result<()> {
    if format.is_json() {
        let json = serde_json::to_value(summary).context("Failed to serialize run summary")?;
        formatter.print_json(&json);
        return Ok(());
    }

    let duration_display = if summary.duration_ms >= 1000 {
        format!("{:.1}s", summary.duration_ms as f64 / 1000.0)
    } else {
        format!("{}ms", summary.duration_ms)
    };

    let queues = &summary.queues;
    if summary.dry_run {
        formatter.success(&format!(
            "Dry run planned {} in {}",
            plural(queues.operation_count(), "operation"),
            duration_display
        ));
        formatter.list("Rename on Path1", &renames(&queues.renamed1));
        formatter.list("Rename on Path2", &renames(&queues.renamed2));
        formatter.list("Copy Path1 -> Path2", &paths(&queues.copy1to2));
        formatter.list("Copy Path2 -> Path1", &paths(&queues.copy2to1));
        formatter.list("Delete on Path1", &paths(&queues.delete1));
        formatter.list("Delete on Path2", &paths(&queues.delete2));
        return Ok(());
    }

    if queues.is_empty() && !summary.has_failures() {
        formatter.success(&format!("Already in sync ({})", duration_display));
    } else {
        formatter.success(&format!("Bisync completed in {}", duration_display));
    }

    for (label, counts) in [("Path1", &summary.path1), ("Path2", &summary.path2)] {
        let mut parts = Vec::new();
        if counts.copied > 0 {
            parts.push(format!("{} copied", plural(counts.copied, "file")));
        }
        if counts.deleted > 0 {
            parts.push(format!("{} deleted", counts.deleted));
        }
        if counts.renamed > 0 {
            parts.push(format!("{} renamed", counts.renamed));
        }
        if counts.empty_dirs_removed > 0 {
            parts.push(format!(
                "{} removed",
                plural(counts.empty_dirs_removed, "empty dir")
            ));
        }
        if !parts.is_empty() {
            formatter.info(&format!("{label}: {}", parts.join(", ")));
        }
    }

    if !queues.rename_skipped.is_empty() {
        formatter.info(&format!(
            "{} changed identically on both sides",
            plural(queues.rename_skipped.len(), "file")
        ));
    }

    if summary.has_failures() {
        formatter.warn(&format!(
            "{} failed:",
            plural(summary.failures.len(), "item")
        ));
        for failure in &summary.failures {
            formatter.info(&format!(
                "  - {} on {}: {}",
                failure.path,
                failure.side,
                failure.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    Ok(())
}

fn paths(set: &BTreeSet<RelPath>) -> Vec<String> {
    set.iter().map(RelPath::to_string).collect()
}

fn renames(map: &BTreeMap<RelPath, RelPath>) -> Vec<String> {
    map.iter().map(|(from, to)| format!("{from} -> {to}")).collect()
}
