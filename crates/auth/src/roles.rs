use serde::{Deserialize, Serialize};

/// Marketplace role of an acting user.
///
/// Closed set: customers request transport, transport companies quote and
/// execute, managers operate the marketplace (review disputes, work
/// exceptions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Transport,
    Manager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "CUSTOMER",
            Role::Transport => "TRANSPORT",
            Role::Manager => "MANAGER",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
