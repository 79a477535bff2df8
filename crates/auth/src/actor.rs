use serde::{Deserialize, Serialize};

use haulflow_core::UserId;

use crate::roles::Role;

/// A resolved acting identity attached to every command.
///
/// Construction is decoupled from transport: callers derive the actor from
/// whatever session/claims mechanism they use before invoking the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn customer(user_id: UserId) -> Self {
        Self::new(user_id, Role::Customer)
    }

    pub fn transport(user_id: UserId) -> Self {
        Self::new(user_id, Role::Transport)
    }

    pub fn manager(user_id: UserId) -> Self {
        Self::new(user_id, Role::Manager)
    }
}
