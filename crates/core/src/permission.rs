//! Permission levels granted to a caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Permission level, ordered `None < Read < Write < All`.
///
/// A capability requiring level `p` is usable by any caller granted `>= p`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// No capabilities
    None,
    /// Read-only capabilities
    #[default]
    Read,
    /// Read and write capabilities
    Write,
    /// Everything, including command execution
    All,
}

impl Permission {
    /// Whether this grant covers `required`.
    pub fn allows(self, required: Permission) -> bool {
        required <= self
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::None => write!(f, "none"),
            Permission::Read => write!(f, "read"),
            Permission::Write => write!(f, "write"),
            Permission::All => write!(f, "all"),
        }
    }
}

/// Error returned when parsing an unknown permission name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission level: {0} (expected none, read, write or all)")]
pub struct ParsePermissionError(pub String);

impl FromStr for Permission {
    type Err = ParsePermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Permission::None),
            "read" | "read_only" => Ok(Permission::Read),
            "write" | "read_write" => Ok(Permission::Write),
            "all" => Ok(Permission::All),
            other => Err(ParsePermissionError(other.to_string())),
        }
    }
}
