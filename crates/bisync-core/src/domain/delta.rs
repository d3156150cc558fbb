//! Per-side delta classification
//!
//! A [`DeltaSet`] is the result of comparing one side's prior listing with
//! the listing captured at the start of the current run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::listing::{Listing, ListingEntry};
use super::newtypes::{RelPath, Side};

/// Why a path present in both listings was classified as updated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    /// Current modtime is later than the prior one beyond tolerance
    Newer,
    /// Current modtime is earlier than the prior one beyond tolerance
    Older,
    /// Sizes differ
    Size,
    /// Hashes of the same algorithm differ
    Hash,
}

impl Display for UpdateReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateReason::Newer => "newer",
            UpdateReason::Older => "older",
            UpdateReason::Size => "size",
            UpdateReason::Hash => "hash",
        };
        f.write_str(s)
    }
}

/// Classification of a single changed path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delta {
    Created,
    Updated(UpdateReason),
    Deleted,
}

/// Everything that changed on one side since the last successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSet {
    pub side: Side,
    pub created: BTreeSet<RelPath>,
    pub updated: BTreeMap<RelPath, UpdateReason>,
    pub deleted: BTreeSet<RelPath>,
    pub unchanged: BTreeSet<RelPath>,
    /// Current paths whose base name is the access-check file name
    pub check_files: BTreeSet<RelPath>,
    /// False only when the prior listing was non-empty and nothing is unchanged
    pub found_same: bool,
    /// Number of entries in the prior listing
    pub prior_count: usize,
}

impl DeltaSet {
    /// Compares two listings of the same side
    ///
    /// `tolerance` is `None` when the side cannot store modification times;
    /// modtimes are then ignored and only size and hash are compared.
    #[must_use]
    pub fn classify(
        side: Side,
        prior: &Listing,
        current: &Listing,
        tolerance: Option<Duration>,
        check_filename: &str,
    ) -> Self {
        let mut set = DeltaSet {
            side,
            created: BTreeSet::new(),
            updated: BTreeMap::new(),
            deleted: BTreeSet::new(),
            unchanged: BTreeSet::new(),
            check_files: BTreeSet::new(),
            found_same: true,
            prior_count: prior.len(),
        };

        for (path, old) in prior {
            match current.get(path) {
                None => {
                    set.deleted.insert(path.clone());
                }
                Some(new) => match compare_entries(old, new, tolerance) {
                    Some(reason) => {
                        set.updated.insert(path.clone(), reason);
                    }
                    None => {
                        set.unchanged.insert(path.clone());
                    }
                },
            }
        }

        for (path, entry) in current {
            if !prior.contains(path) {
                set.created.insert(path.clone());
            }
            if !check_filename.is_empty()
                && !entry.is_dir()
                && path.file_name() == check_filename
            {
                set.check_files.insert(path.clone());
            }
        }

        set.found_same = set.prior_count == 0 || !set.unchanged.is_empty();
        set
    }

    /// Returns the classification of a path, if it changed
    #[must_use]
    pub fn delta_for(&self, path: &RelPath) -> Option<Delta> {
        if self.created.contains(path) {
            Some(Delta::Created)
        } else if let Some(reason) = self.updated.get(path) {
            Some(Delta::Updated(*reason))
        } else if self.deleted.contains(path) {
            Some(Delta::Deleted)
        } else {
            None
        }
    }

    /// Created or updated on this side
    #[must_use]
    pub fn is_changed(&self, path: &RelPath) -> bool {
        self.created.contains(path) || self.updated.contains_key(path)
    }

    /// Every path with a delta, in order
    #[must_use]
    pub fn changed_paths(&self) -> BTreeSet<RelPath> {
        self.created
            .iter()
            .chain(self.updated.keys())
            .chain(self.deleted.iter())
            .cloned()
            .collect()
    }

    /// Number of paths with a delta
    #[must_use]
    pub fn delta_count(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// Fraction of the prior listing that was deleted (0.0 for an empty prior)
    #[must_use]
    pub fn delete_ratio(&self) -> f64 {
        if self.prior_count == 0 {
            0.0
        } else {
            self.deleted.len() as f64 / self.prior_count as f64
        }
    }
}

/// Returns the reason two entries differ, or `None` if they are considered equal
fn compare_entries(
    old: &ListingEntry,
    new: &ListingEntry,
    tolerance: Option<Duration>,
) -> Option<UpdateReason> {
    // Directories only ever appear or disappear
    if old.is_dir() && new.is_dir() {
        return None;
    }

    if let Some(tolerance) = tolerance {
        let diff = new.modified - old.modified;
        if diff > tolerance {
            return Some(UpdateReason::Newer);
        }
        if -diff > tolerance {
            return Some(UpdateReason::Older);
        }
    }

    if old.size != new.size || old.kind != new.kind {
        return Some(UpdateReason::Size);
    }

    if let (Some(a), Some(b)) = (&old.hash, &new.hash) {
        if a.comparable_with(b) && a != b {
            return Some(UpdateReason::Hash);
        }
    }

    None
}
