//! Next prior listings
//!
//! Builds the listings committed at the end of a run from the listings
//! captured at its start, the queues and the per-item outcomes. Successful
//! operations are folded into the listing of the side they changed. A
//! failed item is reset to its prior entry on both sides (or dropped when
//! it had none) so the next run detects it again and retries.

use tracing::debug;

use bisync_core::domain::{Listing, RelPath, Side};

use crate::applier::{ApplyReport, ItemResult, Operation};

/// Computes the next prior listings of both sides
pub fn update_listings(
    prior1: &Listing,
    prior2: &Listing,
    current1: &Listing,
    current2: &Listing,
    report: &ApplyReport,
) -> (Listing, Listing) {
    let mut next1 = current1.clone();
    let mut next2 = current2.clone();

    for result in report.results.iter().filter(|r| r.is_ok()) {
        let next = match result.side {
            Side::Path1 => &mut next1,
            Side::Path2 => &mut next2,
        };
        apply_success(next, result);
    }

    for result in report.failures() {
        for path in affected_paths(result) {
            restore(&mut next1, prior1, path);
            restore(&mut next2, prior2, path);
            debug!(path = %path, operation = ?result.operation, "failed item reset to prior state");
        }
    }

    (next1, next2)
}

fn apply_success(next: &mut Listing, result: &ItemResult) {
    match result.operation {
        Operation::Rename => {
            if let (Some(entry), Some(target)) = (next.remove(&result.path), &result.target) {
                next.put(target.clone(), entry);
            }
        }
        Operation::Copy => {
            if let Some(entry) = &result.entry {
                next.put(result.path.clone(), entry.clone());
            }
        }
        Operation::Delete => {
            next.remove(&result.path);
        }
    }
}

fn affected_paths(result: &ItemResult) -> impl Iterator<Item = &RelPath> {
    std::iter::once(&result.path).chain(result.target.iter())
}

fn restore(next: &mut Listing, prior: &Listing, path: &RelPath) {
    match prior.get(path) {
        Some(entry) => {
            next.put(path.clone(), entry.clone());
        }
        None => {
            next.remove(path);
        }
    }
}
