//! `haulflow-auth` — actor identity and capability checks.
//!
//! This crate is intentionally decoupled from HTTP and storage. Who a user is
//! (identity provider, sessions) lives outside the core; commands arrive with
//! a resolved [`Actor`], and externally-granted capabilities are injected as
//! [`ResolverAuthority`] implementations.

pub mod actor;
pub mod capability;
pub mod roles;

pub use actor::Actor;
pub use capability::{RoleResolverAuthority, ResolverAuthority, require_resolver};
pub use roles::Role;
