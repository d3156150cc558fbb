//! Conflict policy values
//!
//! This module defines the configurable tie-break applied when one side
//! deletes a path that the other side created or updated.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Tie-break between an update on one side and a delete on the other
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateDeleteRule {
    /// The updated file is copied back to the deleting side
    #[default]
    UpdateWins,
    /// The delete is propagated and the update is discarded
    DeleteWins,
}

impl UpdateDeleteRule {
    /// Returns the configuration keyword for this rule
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            UpdateDeleteRule::UpdateWins => "update_wins",
            UpdateDeleteRule::DeleteWins => "delete_wins",
        }
    }
}

impl Display for UpdateDeleteRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateDeleteRule {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "update_wins" | "update" => Ok(UpdateDeleteRule::UpdateWins),
            "delete_wins" | "delete" => Ok(UpdateDeleteRule::DeleteWins),
            other => Err(DomainError::InvalidValue(format!(
                "unknown update/delete rule '{other}', expected update_wins or delete_wins"
            ))),
        }
    }
}
