//! Exceptions domain module (event-sourced).
//!
//! Exceptions track non-dispute operational incidents (a truck breakdown, an
//! access problem) with priority and escalation. They optionally link an
//! incident and/or a booking by identity only. Business rules are
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod exception;

pub use exception::{
    BeginWork, Escalate, Exception, ExceptionCommand, ExceptionEscalated, ExceptionEvent,
    ExceptionId, ExceptionOpened, ExceptionPriority, ExceptionResolved, ExceptionStatus,
    ExceptionWorkStarted, OpenException, ResolveException,
};
