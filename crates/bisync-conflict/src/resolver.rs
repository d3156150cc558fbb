//! Queue builder
//!
//! Merges the delta sets of both sides into directional work queues. This
//! is a pure, deterministic function of its inputs: the same delta sets,
//! equality set, policy and listings always produce the same [`Queues`].
//!
//! | Path1            | Path2            | Result                               |
//! |------------------|------------------|--------------------------------------|
//! | created/updated  | unchanged        | copy Path1 -> Path2                  |
//! | unchanged        | created/updated  | copy Path2 -> Path1                  |
//! | created/updated  | created/updated  | skip if equal, else rename both      |
//! | deleted          | unchanged        | delete on Path2                      |
//! | deleted          | created/updated  | policy (default: restore to Path1)   |
//! | deleted          | deleted          | nothing to do                        |

use std::collections::BTreeSet;

use tracing::{debug, info, trace};

use bisync_core::domain::{Delta, DeltaSet, Listing, Queues, RelPath, Side};

use crate::error::ConflictError;
use crate::namer::ConflictNamer;
use crate::policy::{ConflictPolicy, UpdateDeleteOutcome};

/// Builds the work queues of a normal run
pub struct QueueBuilder<'a> {
    policy: &'a ConflictPolicy,
    current1: &'a Listing,
    current2: &'a Listing,
}

impl<'a> QueueBuilder<'a> {
    pub fn new(policy: &'a ConflictPolicy, current1: &'a Listing, current2: &'a Listing) -> Self {
        Self {
            policy,
            current1,
            current2,
        }
    }

    /// Paths created or updated on both sides where both entries are files
    ///
    /// These are the only paths whose contents need comparing before the
    /// queues can be built.
    pub fn needs_comparison(
        ds1: &DeltaSet,
        ds2: &DeltaSet,
        current1: &Listing,
        current2: &Listing,
    ) -> BTreeSet<RelPath> {
        ds1.created
            .iter()
            .chain(ds1.updated.keys())
            .filter(|p| ds2.is_changed(p))
            .filter(|p| {
                matches!(
                    (current1.get(p), current2.get(p)),
                    (Some(a), Some(b)) if !a.is_dir() && !b.is_dir()
                )
            })
            .cloned()
            .collect()
    }

    /// Merges both delta sets into queues
    ///
    /// `equal` holds the both-changed paths whose contents were found to be
    /// identical.
    pub fn build(
        &self,
        ds1: &DeltaSet,
        ds2: &DeltaSet,
        equal: &BTreeSet<RelPath>,
    ) -> Result<Queues, ConflictError> {
        let mut queues = Queues::new();
        let mut taken: BTreeSet<RelPath> = BTreeSet::new();

        let paths: BTreeSet<RelPath> = ds1
            .changed_paths()
            .into_iter()
            .chain(ds2.changed_paths())
            .collect();

        for path in &paths {
            let d1 = ds1.delta_for(path);
            let d2 = ds2.delta_for(path);
            trace!(path = %path, path1 = ?d1, path2 = ?d2, "Classifying");

            match (d1, d2) {
                (Some(Delta::Deleted), Some(Delta::Deleted)) => {
                    queues.deleted_on_both.insert(path.clone());
                }
                (Some(Delta::Deleted), None) => {
                    if self.current2.contains(path) {
                        queues.delete2.insert(path.clone());
                    }
                }
                (None, Some(Delta::Deleted)) => {
                    if self.current1.contains(path) {
                        queues.delete1.insert(path.clone());
                    }
                }
                (Some(Delta::Deleted), Some(_)) => {
                    self.update_vs_delete(&mut queues, path, Side::Path2);
                }
                (Some(_), Some(Delta::Deleted)) => {
                    self.update_vs_delete(&mut queues, path, Side::Path1);
                }
                (Some(_), None) => {
                    queues.copy1to2.insert(path.clone());
                }
                (None, Some(_)) => {
                    queues.copy2to1.insert(path.clone());
                }
                (Some(_), Some(_)) => {
                    self.both_changed(&mut queues, &mut taken, path, equal)?;
                }
                (None, None) => {}
            }
        }

        self.keep_occupied_dirs(&mut queues, Side::Path1);
        self.keep_occupied_dirs(&mut queues, Side::Path2);

        info!(
            copy1to2 = queues.copy1to2.len(),
            copy2to1 = queues.copy2to1.len(),
            delete1 = queues.delete1.len(),
            delete2 = queues.delete2.len(),
            conflicts = queues.renamed1.len().max(queues.renamed2.len()),
            skipped = queues.rename_skipped.len(),
            "Queues built"
        );

        Ok(queues)
    }

    fn current(&self, side: Side) -> &Listing {
        match side {
            Side::Path1 => self.current1,
            Side::Path2 => self.current2,
        }
    }

    fn update_vs_delete(&self, queues: &mut Queues, path: &RelPath, updated_on: Side) {
        match self.policy.evaluate_update_delete() {
            UpdateDeleteOutcome::Restore => {
                debug!(path = %path, side = %updated_on, "Update wins over delete");
                queues.copies_to_mut(updated_on.other()).insert(path.clone());
            }
            UpdateDeleteOutcome::Propagate => {
                debug!(path = %path, side = %updated_on, "Delete wins over update");
                queues.deletes_on_mut(updated_on).insert(path.clone());
            }
        }
    }

    fn both_changed(
        &self,
        queues: &mut Queues,
        taken: &mut BTreeSet<RelPath>,
        path: &RelPath,
        equal: &BTreeSet<RelPath>,
    ) -> Result<(), ConflictError> {
        let is_dir1 = self.current1.get(path).is_some_and(|e| e.is_dir());
        let is_dir2 = self.current2.get(path).is_some_and(|e| e.is_dir());

        if (is_dir1 && is_dir2) || equal.contains(path) {
            queues.rename_skipped.insert(path.clone());
            return Ok(());
        }

        info!(path = %path, "Conflict: changed on both sides");

        // A directory on one side keeps its name; only file sides are renamed
        for (side, is_dir) in [(Side::Path1, is_dir1), (Side::Path2, is_dir2)] {
            if is_dir {
                queues.copies_to_mut(side.other()).insert(path.clone());
                continue;
            }

            let renamed =
                ConflictNamer::generate_unique(path, self.policy.tag(side), |candidate| {
                    self.current1.contains(candidate)
                        || self.current2.contains(candidate)
                        || taken.contains(candidate)
                })?;
            debug!(side = %side, from = %path, to = %renamed, "Conflict rename planned");

            taken.insert(renamed.clone());
            queues.copies_to_mut(side.other()).insert(renamed.clone());
            queues.renames_on_mut(side).insert(path.clone(), renamed);
        }

        Ok(())
    }

    /// Directories queued for deletion on `side` that will still hold files
    /// are kept, and recreated on the other side instead
    fn keep_occupied_dirs(&self, queues: &mut Queues, side: Side) {
        let current = self.current(side);
        let deletes = queues.deletes_on(side).clone();

        let occupied: Vec<RelPath> = deletes
            .iter()
            .filter(|dir| current.get(dir).is_some_and(|e| e.is_dir()))
            .filter(|dir| {
                current
                    .paths()
                    .any(|p| p.is_inside(dir) && !deletes.contains(p))
            })
            .cloned()
            .collect();

        for dir in occupied {
            debug!(side = %side, dir = %dir, "Keeping non-empty directory");
            queues.deletes_on_mut(side).remove(&dir);
            queues.copies_to_mut(side.other()).insert(dir);
        }
    }
}
