//! Infrastructure layer: event store, per-aggregate locking, command
//! dispatch, effect adapters, services, and background workers.

pub mod command_dispatcher;
pub mod config;
pub mod effects;
pub mod event_store;
pub mod locks;
pub mod services;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
pub use config::NegotiationConfig;
pub use effects::{
    AuditSink, InMemoryAuditSink, InMemoryNotificationOutbox, NotificationDelivery,
};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use locks::AggregateLocks;
pub use services::{
    BookingService, CommandOutcome, CounterOfferView, DisputeService, ExceptionService,
    SweepReport,
};
pub use workers::{EffectWorker, ExpirySweeper, WorkerHandle};
