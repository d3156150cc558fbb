//! Directional work queues
//!
//! [`Queues`] is the merged plan of a single run: what to copy in each
//! direction, what to delete on each side and which conflicting paths were
//! renamed aside. It is built once and consumed by both the applier and the
//! listing update.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::newtypes::{RelPath, Side};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queues {
    /// Paths to copy from Path1 to Path2
    pub copy1to2: BTreeSet<RelPath>,
    /// Paths to copy from Path2 to Path1
    pub copy2to1: BTreeSet<RelPath>,
    /// Paths to delete on Path1
    pub delete1: BTreeSet<RelPath>,
    /// Paths to delete on Path2
    pub delete2: BTreeSet<RelPath>,
    /// Conflict renames on Path1 (original -> renamed)
    pub renamed1: BTreeMap<RelPath, RelPath>,
    /// Conflict renames on Path2 (original -> renamed)
    pub renamed2: BTreeMap<RelPath, RelPath>,
    /// Changed on both sides with identical content
    pub rename_skipped: BTreeSet<RelPath>,
    /// Deleted on both sides
    pub deleted_on_both: BTreeSet<RelPath>,
}

impl Queues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies whose destination is `side`
    #[must_use]
    pub fn copies_to(&self, side: Side) -> &BTreeSet<RelPath> {
        match side {
            Side::Path1 => &self.copy2to1,
            Side::Path2 => &self.copy1to2,
        }
    }

    pub fn copies_to_mut(&mut self, side: Side) -> &mut BTreeSet<RelPath> {
        match side {
            Side::Path1 => &mut self.copy2to1,
            Side::Path2 => &mut self.copy1to2,
        }
    }

    /// Deletes to perform on `side`
    #[must_use]
    pub fn deletes_on(&self, side: Side) -> &BTreeSet<RelPath> {
        match side {
            Side::Path1 => &self.delete1,
            Side::Path2 => &self.delete2,
        }
    }

    pub fn deletes_on_mut(&mut self, side: Side) -> &mut BTreeSet<RelPath> {
        match side {
            Side::Path1 => &mut self.delete1,
            Side::Path2 => &mut self.delete2,
        }
    }

    /// Conflict renames to perform on `side`
    #[must_use]
    pub fn renames_on(&self, side: Side) -> &BTreeMap<RelPath, RelPath> {
        match side {
            Side::Path1 => &self.renamed1,
            Side::Path2 => &self.renamed2,
        }
    }

    pub fn renames_on_mut(&mut self, side: Side) -> &mut BTreeMap<RelPath, RelPath> {
        match side {
            Side::Path1 => &mut self.renamed1,
            Side::Path2 => &mut self.renamed2,
        }
    }

    /// True if the run has nothing to do on either side
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.copy1to2.is_empty()
            && self.copy2to1.is_empty()
            && self.delete1.is_empty()
            && self.delete2.is_empty()
            && self.renamed1.is_empty()
            && self.renamed2.is_empty()
    }

    /// True if `side` receives any mutation
    #[must_use]
    pub fn touches(&self, side: Side) -> bool {
        !self.copies_to(side).is_empty()
            || !self.deletes_on(side).is_empty()
            || !self.renames_on(side).is_empty()
    }

    /// Total number of mutating operations
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.copy1to2.len()
            + self.copy2to1.len()
            + self.delete1.len()
            + self.delete2.len()
            + self.renamed1.len()
            + self.renamed2.len()
    }
}
