//! `haulflow-events` — event, command, and effect plumbing.
//!
//! Domain aggregates emit events; infrastructure wraps them in envelopes,
//! distributes them over a bus, and translates them into outbound effects
//! (notification requests, audit records) for external collaborators.

pub mod bus;
pub mod command;
pub mod effect;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use effect::{
    AuditAction, AuditRecord, AuditTargetType, Effect, NotificationKind, NotificationRequest,
};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::InMemoryEventBus;
