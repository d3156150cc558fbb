//! Content equality detection
//!
//! Decides whether a path created or updated on both sides ended up with
//! identical content, in which case no conflict copy is needed.
//!
//! Checks run cheapest first:
//! 1. Different sizes are never equal.
//! 2. Listing hashes of the same algorithm are compared directly.
//! 3. Backend hashers of the same algorithm are asked for fresh hashes.
//! 4. Otherwise both files are streamed and compared byte for byte.

use std::collections::BTreeSet;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use bisync_core::domain::{Listing, ListingEntry, RelPath};
use bisync_core::ports::IBackend;

use crate::error::ConflictError;

const COMPARE_BUFFER_SIZE: usize = 64 * 1024;

/// Compares file contents across the two backends
pub struct ContentComparer<'a> {
    path1: &'a dyn IBackend,
    path2: &'a dyn IBackend,
}

impl<'a> ContentComparer<'a> {
    pub fn new(path1: &'a dyn IBackend, path2: &'a dyn IBackend) -> Self {
        Self { path1, path2 }
    }

    /// Returns the subset of `candidates` whose contents are identical
    pub async fn find_equal(
        &self,
        candidates: &BTreeSet<RelPath>,
        current1: &Listing,
        current2: &Listing,
    ) -> Result<BTreeSet<RelPath>, ConflictError> {
        let mut equal = BTreeSet::new();

        for path in candidates {
            let (Some(e1), Some(e2)) = (current1.get(path), current2.get(path)) else {
                continue;
            };
            if self.equal_content(path, e1, e2).await? {
                equal.insert(path.clone());
            }
        }

        debug!(
            candidates = candidates.len(),
            equal = equal.len(),
            "Compared both-changed paths"
        );
        Ok(equal)
    }

    /// Compares one path on both sides
    pub async fn equal_content(
        &self,
        path: &RelPath,
        e1: &ListingEntry,
        e2: &ListingEntry,
    ) -> Result<bool, ConflictError> {
        if e1.size != e2.size {
            trace!(path = %path, "Sizes differ");
            return Ok(false);
        }

        if let (Some(h1), Some(h2)) = (&e1.hash, &e2.hash) {
            if h1.comparable_with(h2) {
                trace!(path = %path, algorithm = h1.algorithm(), "Compared listing hashes");
                return Ok(h1 == h2);
            }
        }

        let compare_err = |source: anyhow::Error| ConflictError::Compare {
            path: path.to_string(),
            source,
        };

        if let (Some(hasher1), Some(hasher2)) = (self.path1.hasher(), self.path2.hasher()) {
            if hasher1.algorithm() == hasher2.algorithm() {
                let h1 = hasher1.hash(path).await.map_err(compare_err)?;
                let h2 = hasher2.hash(path).await.map_err(compare_err)?;
                trace!(path = %path, algorithm = hasher1.algorithm(), "Compared backend hashes");
                return Ok(h1 == h2);
            }
        }

        let s1 = self.path1.open(path).await.map_err(compare_err)?;
        let s2 = self.path2.open(path).await.map_err(compare_err)?;
        let equal = streams_equal(s1, s2)
            .await
            .map_err(|e| compare_err(e.into()))?;
        trace!(path = %path, equal, "Compared contents byte for byte");
        Ok(equal)
    }
}

/// Compares two byte streams for equality
pub async fn streams_equal<A, B>(mut a: A, mut b: B) -> std::io::Result<bool>
where
    A: AsyncRead + Unpin,
    B: AsyncRead + Unpin,
{
    let mut buf_a = vec![0u8; COMPARE_BUFFER_SIZE];
    let mut buf_b = vec![0u8; COMPARE_BUFFER_SIZE];

    loop {
        let n = a.read(&mut buf_a).await?;
        if n == 0 {
            // `a` is exhausted; equal only if `b` is too
            return Ok(b.read(&mut buf_b[..1]).await? == 0);
        }

        match b.read_exact(&mut buf_b[..n]).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        }

        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}
