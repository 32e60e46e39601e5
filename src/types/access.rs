use std::fmt;

use serde::{Deserialize, Serialize};

/// An action that can be granted on a shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Read => write!(f, "read"),
            Action::Write => write!(f, "write"),
        }
    }
}

/// Identifiers granted an action: direct principal ids plus group ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrants {
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub group_ids: Vec<String>,
}

impl AccessGrants {
    /// Returns true if the grant set names the principal directly or names
    /// one of the groups the principal belongs to.
    #[must_use]
    pub fn permits(&self, principal_id: &str, member_group_ids: &[String]) -> bool {
        self.user_ids.iter().any(|id| id == principal_id)
            || self
                .group_ids
                .iter()
                .any(|id| member_group_ids.iter().any(|m| m == id))
    }
}

/// Explicit per-resource grants, layered on top of ownership. The owner of a
/// resource always has full rights regardless of this structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    #[serde(default)]
    pub read: AccessGrants,
    #[serde(default)]
    pub write: AccessGrants,
}

impl AccessControl {
    #[must_use]
    pub fn grants(&self, action: Action) -> &AccessGrants {
        match action {
            Action::Read => &self.read,
            Action::Write => &self.write,
        }
    }
}
