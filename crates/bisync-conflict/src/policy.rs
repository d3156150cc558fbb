//! Conflict policy
//!
//! Holds the configurable parts of conflict handling: the tags appended to
//! renamed conflict copies and the tie break applied when one side updates
//! a path that the other side deleted.

use serde::{Deserialize, Serialize};
use tracing::debug;

use bisync_core::config::Options;
use bisync_core::domain::{Side, UpdateDeleteRule};

use crate::error::ConflictError;

/// Outcome of an update-vs-delete tie break for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDeleteOutcome {
    /// Copy the updated file back to the side that deleted it
    Restore,
    /// Delete the updated file on the side that still has it
    Propagate,
}

/// Configurable conflict handling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPolicy {
    path1_tag: String,
    path2_tag: String,
    update_delete: UpdateDeleteRule,
}

impl ConflictPolicy {
    /// Creates a policy, validating that both tags are usable as suffixes
    pub fn new(
        path1_tag: impl Into<String>,
        path2_tag: impl Into<String>,
        update_delete: UpdateDeleteRule,
    ) -> Result<Self, ConflictError> {
        let path1_tag = path1_tag.into();
        let path2_tag = path2_tag.into();

        validate_tag(&path1_tag)?;
        validate_tag(&path2_tag)?;
        if path1_tag == path2_tag {
            return Err(ConflictError::InvalidTag {
                tag: path2_tag,
                reason: "both sides use the same tag".to_string(),
            });
        }

        debug!(
            path1_tag = %path1_tag,
            path2_tag = %path2_tag,
            update_delete = %update_delete,
            "Conflict policy initialized"
        );

        Ok(Self {
            path1_tag,
            path2_tag,
            update_delete,
        })
    }

    /// Builds the policy from run options
    pub fn from_options(opts: &Options) -> Result<Self, ConflictError> {
        Self::new(&opts.path1_tag, &opts.path2_tag, opts.update_delete)
    }

    /// Tag appended to conflict copies on `side`
    pub fn tag(&self, side: Side) -> &str {
        match side {
            Side::Path1 => &self.path1_tag,
            Side::Path2 => &self.path2_tag,
        }
    }

    pub fn update_delete(&self) -> UpdateDeleteRule {
        self.update_delete
    }

    /// Decides an update-vs-delete tie break
    pub fn evaluate_update_delete(&self) -> UpdateDeleteOutcome {
        match self.update_delete {
            UpdateDeleteRule::UpdateWins => UpdateDeleteOutcome::Restore,
            UpdateDeleteRule::DeleteWins => UpdateDeleteOutcome::Propagate,
        }
    }
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            path1_tag: "path1".to_string(),
            path2_tag: "path2".to_string(),
            update_delete: UpdateDeleteRule::UpdateWins,
        }
    }
}

/// Rejects tags that would move a conflict copy out of its directory
pub(crate) fn validate_tag(tag: &str) -> Result<(), ConflictError> {
    let reason = if tag.is_empty() {
        Some("tag is empty")
    } else if tag.contains('/') {
        Some("tag contains '/'")
    } else if tag.contains('\0') {
        Some("tag contains NUL")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConflictError::InvalidTag {
            tag: tag.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ConflictPolicy::default();
        assert_eq!(policy.tag(Side::Path1), "path1");
        assert_eq!(policy.tag(Side::Path2), "path2");
        assert_eq!(policy.evaluate_update_delete(), UpdateDeleteOutcome::Restore);
    }

    #[test]
    fn test_delete_wins_opt_in() {
        let policy = ConflictPolicy::new("a", "b", UpdateDeleteRule::DeleteWins).unwrap();
        assert_eq!(policy.evaluate_update_delete(), UpdateDeleteOutcome::Propagate);
        assert_eq!(policy.update_delete(), UpdateDeleteRule::DeleteWins);
    }

    #[test]
    fn test_rejects_invalid_tags() {
        assert!(ConflictPolicy::new("", "b", UpdateDeleteRule::UpdateWins).is_err());
        assert!(ConflictPolicy::new("a/b", "b", UpdateDeleteRule::UpdateWins).is_err());
        assert!(ConflictPolicy::new("same", "same", UpdateDeleteRule::UpdateWins).is_err());
    }

    #[test]
    fn test_from_options() {
        let mut opts = Options::default();
        opts.path1_tag = "laptop".into();
        opts.path2_tag = "nas".into();
        opts.update_delete = UpdateDeleteRule::DeleteWins;

        let policy = ConflictPolicy::from_options(&opts).unwrap();
        assert_eq!(policy.tag(Side::Path1), "laptop");
        assert_eq!(policy.tag(Side::Path2), "nas");
        assert_eq!(policy.update_delete(), UpdateDeleteRule::DeleteWins);
    }
}
