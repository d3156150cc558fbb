//! Listing capture and delta detection
//!
//! Captures the current state of one side as a [`Listing`] (applying the
//! exclude filters, optional hashing and directory handling) and compares
//! it with the side's prior listing.

use glob::Pattern;
use tracing::{debug, info, instrument};

use bisync_core::config::Options;
use bisync_core::domain::{DeltaSet, Listing, RelPath, Side};
use bisync_core::ports::IBackend;

use crate::listing_store::ListingStore;
use crate::BisyncError;

// ============================================================================
// PathFilter
// ============================================================================

/// Exclude filter applied while listing
///
/// A path is excluded when it, or any of its ancestor directories, matches
/// one of the glob patterns. Excluded paths are invisible to every later
/// stage of a run.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    excludes: Vec<Pattern>,
}

impl PathFilter {
    pub fn new(patterns: &[String]) -> Result<Self, BisyncError> {
        let excludes = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    BisyncError::Domain(bisync_core::domain::DomainError::InvalidValue(format!(
                        "invalid exclude pattern '{p}': {e}"
                    )))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { excludes })
    }

    pub fn is_excluded(&self, path: &RelPath) -> bool {
        if self.excludes.is_empty() {
            return false;
        }
        let matches = |p: &RelPath| self.excludes.iter().any(|pat| pat.matches(p.as_str()));
        matches(path) || path.ancestors().iter().any(matches)
    }
}

// ============================================================================
// Capture
// ============================================================================

/// Captures the current listing of one side
#[instrument(skip_all, fields(side = %side))]
pub async fn capture_listing(
    side: Side,
    backend: &dyn IBackend,
    opts: &Options,
    filter: &PathFilter,
) -> Result<Listing, BisyncError> {
    let entries = backend.list().await?;
    let want_hash = opts.checksum || !backend.precision().is_supported();
    let hasher = if want_hash { backend.hasher() } else { None };
    if want_hash && hasher.is_none() {
        debug!("hashes requested but backend has no hasher");
    }

    let mut listing = Listing::new();
    let mut excluded = 0usize;

    for remote in entries {
        if filter.is_excluded(&remote.path) {
            excluded += 1;
            continue;
        }
        if remote.is_dir() && !opts.create_empty_src_dirs {
            continue;
        }

        let mut entry = remote.to_listing_entry();
        if !remote.is_dir() && entry.hash.is_none() {
            if let Some(hasher) = hasher {
                entry.hash = Some(hasher.hash(&remote.path).await?);
            }
        }
        listing.put(remote.path, entry);
    }

    info!(
        backend = %backend.identity(),
        entries = listing.len(),
        excluded,
        "Listing captured"
    );
    Ok(listing)
}

// ============================================================================
// find_deltas
// ============================================================================

/// Prior listing, current listing and their differences for one side
#[derive(Debug, Clone)]
pub struct SideDeltas {
    pub deltas: DeltaSet,
    pub prior: Listing,
    pub current: Listing,
}

/// Loads the prior listing, captures and persists the current one, and
/// classifies every path
#[instrument(skip_all, fields(side = %side))]
pub async fn find_deltas(
    side: Side,
    backend: &dyn IBackend,
    store: &ListingStore,
    opts: &Options,
    filter: &PathFilter,
) -> Result<SideDeltas, BisyncError> {
    let prior = store.load_prior(side).await?;
    let current = capture_listing(side, backend, opts, filter).await?;
    store.save_new(side, &current).await?;

    let deltas = DeltaSet::classify(
        side,
        &prior,
        &current,
        backend.precision().tolerance(),
        &opts.check_filename,
    );

    for path in &deltas.created {
        debug!(path = %path, "created");
    }
    for (path, reason) in &deltas.updated {
        debug!(path = %path, reason = %reason, "updated");
    }
    for path in &deltas.deleted {
        debug!(path = %path, "deleted");
    }

    if deltas.delta_count() == 0 {
        info!("No changes found");
    } else {
        info!(
            created = deltas.created.len(),
            updated = deltas.updated.len(),
            deleted = deltas.deleted.len(),
            unchanged = deltas.unchanged.len(),
            "Changes found"
        );
    }

    Ok(SideDeltas {
        deltas,
        prior,
        current,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> RelPath {
        RelPath::new(p).unwrap()
    }

    #[test]
    fn test_filter_empty_excludes_nothing() {
        let f = PathFilter::default();
        assert!(!f.is_excluded(&path("a.tmp")));
    }

    #[test]
    fn test_filter_matches_name_anywhere() {
        let f = PathFilter::new(&["*.tmp".to_string()]).unwrap();
        assert!(f.is_excluded(&path("a.tmp")));
        assert!(f.is_excluded(&path("deep/dir/a.tmp")));
        assert!(!f.is_excluded(&path("a.txt")));
    }

    #[test]
    fn test_filter_excludes_directory_contents() {
        let f = PathFilter::new(&[".git".to_string()]).unwrap();
        assert!(f.is_excluded(&path(".git")));
        assert!(f.is_excluded(&path(".git/objects/ab")));
        assert!(!f.is_excluded(&path("src/.gitignore")));
    }

    #[test]
    fn test_filter_rejects_bad_pattern() {
        assert!(PathFilter::new(&["[".to_string()]).is_err());
    }
}
