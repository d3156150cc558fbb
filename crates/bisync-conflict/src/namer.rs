//! Conflict naming for keep-both resolution
//!
//! A path changed differently on both sides is renamed aside on each side
//! with a side tag appended: `report.docx` becomes `report.docx..path1` on
//! Path1 and `report.docx..path2` on Path2. Names are deterministic so a
//! dry run predicts the real run exactly.

use bisync_core::domain::RelPath;

use crate::error::ConflictError;
use crate::policy::validate_tag;

/// Highest numbered fallback tried before giving up
const MAX_ATTEMPTS: u32 = 99;

/// Generates conflict file names
pub struct ConflictNamer;

impl ConflictNamer {
    /// Returns the primary conflict name for `path` with `tag`
    pub fn generate(path: &RelPath, tag: &str) -> Result<RelPath, ConflictError> {
        validate_tag(tag)?;
        path.with_suffix(&format!("..{tag}"))
            .map_err(|e| ConflictError::InvalidTag {
                tag: tag.to_string(),
                reason: e.to_string(),
            })
    }

    /// Returns the first conflict name that does not collide
    ///
    /// Tries `path..tag`, then `path..tag2`, `path..tag3` and so on.
    /// `exists` must report names already present on either side or
    /// already handed out in the current run.
    pub fn generate_unique<F>(
        path: &RelPath,
        tag: &str,
        mut exists: F,
    ) -> Result<RelPath, ConflictError>
    where
        F: FnMut(&RelPath) -> bool,
    {
        let candidate = Self::generate(path, tag)?;
        if !exists(&candidate) {
            return Ok(candidate);
        }

        for i in 2..=MAX_ATTEMPTS {
            let numbered = Self::generate(path, &format!("{tag}{i}"))?;
            if !exists(&numbered) {
                return Ok(numbered);
            }
        }

        Err(ConflictError::NoUniqueName(path.to_string()))
    }
}
