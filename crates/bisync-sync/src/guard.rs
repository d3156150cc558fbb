//! Safety guard
//!
//! Checks evaluated after delta detection and before any mutation:
//! - **Excess deletes** - too large a share of a side's prior listing vanished
//! - **All changed** - not a single path is unchanged on a side
//! - **Access health** - check files must match on both sides
//!
//! The first two abort the run safely and are bypassed by `force`. The
//! access check is a critical, non-retryable failure and is never bypassed.

use std::collections::BTreeSet;

use tracing::{error, info};

use bisync_core::config::Options;
use bisync_core::domain::{DeltaSet, Listing, RelPath};

use crate::BisyncError;

pub struct SafetyGuard<'a> {
    opts: &'a Options,
}

impl<'a> SafetyGuard<'a> {
    pub fn new(opts: &'a Options) -> Self {
        Self { opts }
    }

    /// Runs the delete and all-changed checks on both sides
    pub fn check(&self, ds1: &DeltaSet, ds2: &DeltaSet) -> Result<(), BisyncError> {
        if self.opts.force {
            info!("Safety checks skipped (force)");
            return Ok(());
        }
        self.check_excess_deletes(ds1)?;
        self.check_excess_deletes(ds2)?;
        self.check_all_changed(ds1)?;
        self.check_all_changed(ds2)?;
        Ok(())
    }

    pub fn check_excess_deletes(&self, ds: &DeltaSet) -> Result<(), BisyncError> {
        let deleted = ds.deleted.len();
        if deleted == 0 {
            return Ok(());
        }

        let limit = f64::from(self.opts.max_delete_percent) / 100.0;
        let over_ratio = ds.delete_ratio() > limit;
        let over_count = self
            .opts
            .max_delete_count
            .is_some_and(|max| deleted > max);

        if over_ratio || over_count {
            error!(
                side = %ds.side,
                deleted,
                prior = ds.prior_count,
                max_percent = self.opts.max_delete_percent,
                max_count = ?self.opts.max_delete_count,
                "Excessive deletes"
            );
            return Err(BisyncError::SafetyAbort(format!(
                "too many deletes - {deleted} of {} files deleted on {} (limit {}%{})",
                ds.prior_count,
                ds.side,
                self.opts.max_delete_percent,
                self.opts
                    .max_delete_count
                    .map(|c| format!(", {c} files"))
                    .unwrap_or_default()
            )));
        }
        Ok(())
    }

    pub fn check_all_changed(&self, ds: &DeltaSet) -> Result<(), BisyncError> {
        if !ds.found_same {
            error!(side = %ds.side, prior = ds.prior_count, "All files changed");
            return Err(BisyncError::SafetyAbort(format!(
                "all files were changed on {}",
                ds.side
            )));
        }
        Ok(())
    }
}

/// Check files of a listing (used during resync)
pub fn check_files_in(listing: &Listing, check_filename: &str) -> BTreeSet<RelPath> {
    listing
        .files()
        .filter(|(p, _)| p.file_name() == check_filename)
        .map(|(p, _)| p.clone())
        .collect()
}

/// Verifies that both sides carry the same, non-empty set of check files
pub fn check_access(
    files1: &BTreeSet<RelPath>,
    files2: &BTreeSet<RelPath>,
) -> Result<(), BisyncError> {
    if files1.is_empty() || files2.is_empty() {
        error!(
            path1 = files1.len(),
            path2 = files2.len(),
            "Check files missing"
        );
        return Err(BisyncError::AccessCheckFailed(
            "no check files found on one or both sides".to_string(),
        ));
    }

    if files1.len() != files2.len() {
        error!(path1 = files1.len(), path2 = files2.len(), "Check file counts differ");
        return Err(BisyncError::AccessCheckFailed(format!(
            "{} check files on Path1, {} on Path2",
            files1.len(),
            files2.len()
        )));
    }

    let mismatched: Vec<String> = files1
        .symmetric_difference(files2)
        .map(ToString::to_string)
        .collect();
    if !mismatched.is_empty() {
        error!(mismatched = ?mismatched, "Check file names differ");
        return Err(BisyncError::AccessCheckFailed(format!(
            "check files differ: {}",
            mismatched.join(", ")
        )));
    }

    info!(count = files1.len(), "Access check passed");
    Ok(())
}
