//! Transport-agnostic command/query services.
//!
//! Each command validates against the owning aggregate, commits a single
//! event batch under the per-aggregate critical section, and returns the
//! updated snapshot plus the effect list for external collaborators. Effects
//! are also published to an in-process effect queue so a background worker
//! can deliver them asynchronously; the command never blocks on delivery.

pub mod bookings;
pub mod disputes;
pub mod exceptions;

pub use bookings::{BookingService, CounterOfferView, SweepReport};
pub use disputes::DisputeService;
pub use exceptions::ExceptionService;

use haulflow_events::Effect;

/// Aggregate type tags used as stream discriminators in the event store.
pub const BOOKING_AGGREGATE: &str = "booking";
pub const DISPUTE_AGGREGATE: &str = "dispute";
pub const EXCEPTION_AGGREGATE: &str = "exception";

/// A successful command: the updated entity snapshot plus the effects the
/// calling infrastructure must apply (at-least-once, asynchronously).
#[derive(Debug)]
pub struct CommandOutcome<T> {
    pub snapshot: T,
    pub effects: Vec<Effect>,
}
