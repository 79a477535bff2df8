//! Resolver capability (externally-granted authorization).
//!
//! Reviewing and resolving disputes/exceptions requires a capability the core
//! does not own: it is an external authorization decision, injected at the
//! command boundary. The default policy grants it to managers.

use haulflow_core::{DomainError, DomainResult};

use crate::actor::Actor;
use crate::roles::Role;

/// Decides whether an actor may review/resolve disputes and exceptions.
///
/// - No IO
/// - No panics
/// - No business logic beyond the pure policy check
pub trait ResolverAuthority: Send + Sync {
    fn can_resolve(&self, actor: &Actor) -> bool;
}

/// Default role-based policy: marketplace managers hold the resolver
/// capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoleResolverAuthority;

impl ResolverAuthority for RoleResolverAuthority {
    fn can_resolve(&self, actor: &Actor) -> bool {
        actor.role == Role::Manager
    }
}

/// Enforce the resolver capability at the command boundary.
pub fn require_resolver(authority: &dyn ResolverAuthority, actor: &Actor) -> DomainResult<()> {
    if authority.can_resolve(actor) {
        Ok(())
    } else {
        Err(DomainError::forbidden(format!(
            "user {} ({}) lacks the resolver capability",
            actor.user_id, actor.role
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haulflow_core::UserId;

    #[test]
    fn managers_hold_the_resolver_capability() {
        let authority = RoleResolverAuthority;
        assert!(require_resolver(&authority, &Actor::manager(UserId::new())).is_ok());
    }

    #[test]
    fn customers_and_transports_do_not() {
        let authority = RoleResolverAuthority;

        let err = require_resolver(&authority, &Actor::customer(UserId::new())).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));

        let err = require_resolver(&authority, &Actor::transport(UserId::new())).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }
}
