//! User roles on the SchoolBus platform.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Fixed set of roles a local user can hold.
///
/// New accounts always start as [`Role::Parent`], the lowest privilege.
/// Roles are assigned by platform administrators, never taken from the
/// identity provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Platform-wide administrator
    Admin,
    /// Administrator of a single school
    SchoolAdmin,
    Teacher,
    Driver,
    #[default]
    Parent,
}

impl Role {
    /// All role variants for iteration.
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::SchoolAdmin,
        Role::Teacher,
        Role::Driver,
        Role::Parent,
    ];

    /// Stable text form, as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::SchoolAdmin => "school_admin",
            Role::Teacher => "teacher",
            Role::Driver => "driver",
            Role::Parent => "parent",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| ParseRoleError(s.to_string()))
    }
}
