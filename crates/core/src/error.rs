//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business/domain failures. Infrastructure
/// concerns (storage, delivery) belong elsewhere.
///
/// `Forbidden` is deliberately distinct from `InvalidState`: callers present
/// "you can't do this" and "this can't be done right now" differently.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A requested entity is unknown (domain-level).
    #[error("not found")]
    NotFound,

    /// The operation is not valid for the entity's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed or semantically impossible input (e.g. non-positive price).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The actor lacks authority over this action on this entity.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A time-bound entity is no longer actionable.
    #[error("expired: {0}")]
    Expired(String),

    /// Lost a per-aggregate race (e.g. stale version / concurrent writer).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn expired(msg: impl Into<String>) -> Self {
        Self::Expired(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
