//! Command execution pipeline (application-level orchestration).
//!
//! The dispatcher implements the command lifecycle shared by every aggregate:
//!
//! ```text
//! Command
//!   ↓
//! 1. Acquire the per-aggregate critical section
//!   ↓
//! 2. Load events from store + rehydrate aggregate
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (at-least-once; failures never roll back 4.)
//! ```
//!
//! Steps 2–4 run under the aggregate's lock, so concurrent commands against
//! the same aggregate serialize and invariants that span a whole batch (for
//! example, superseding every sibling quotation together with the accept)
//! are never observable half-applied. Commands against different aggregates
//! do not contend. The optimistic version check stays in place underneath
//! the lock as defense in depth; a command that loses a race surfaces as
//! `Conflict`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use haulflow_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use haulflow_events::{Command, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::locks::AggregateLocks;

/// Command dispatch error: the domain's own taxonomy plus infrastructure
/// failures.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Failed to deserialize historical event payloads into the aggregate
    /// event type.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),

    /// Persisting to the event store failed.
    #[error(transparent)]
    Store(EventStoreError),
}

impl DispatchError {
    /// The domain error, when this dispatch failure is one.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            DispatchError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            // Losing the per-aggregate race is a domain-visible conflict.
            EventStoreError::Concurrency(msg) => DispatchError::Domain(DomainError::Conflict(msg)),
            other => DispatchError::Store(other),
        }
    }
}

/// Result of a successful dispatch.
#[derive(Debug)]
pub struct Dispatched<A: Aggregate> {
    /// The aggregate after applying the decided events.
    pub aggregate: A,
    /// The decided typed events (empty for an idempotent no-op).
    pub events: Vec<A::Event>,
    /// The committed stored events with assigned sequence numbers.
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run fully in memory and a real
/// backend can be swapped in without touching domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    locks: AggregateLocks,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            locks: AggregateLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// On success, returns the rehydrated-and-advanced aggregate together
    /// with the decided and committed events. On error, no state change and
    /// nothing is published.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: haulflow_events::Command,
        A::Event: haulflow_events::Event + Serialize + DeserializeOwned,
    {
        // Route check before any locking: a command addressed to a different
        // aggregate than the one being dispatched is a caller bug.
        if command.target_aggregate_id() != aggregate_id {
            return Err(DispatchError::Domain(DomainError::invalid_argument(
                "command targets a different aggregate",
            )));
        }

        // 1) Per-aggregate critical section.
        let section = self.locks.handle(aggregate_id);
        let _guard = section.lock().expect("aggregate lock poisoned");

        // 2) Load + rehydrate.
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation).
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                events: vec![],
                committed: vec![],
            });
        }

        // 4) Persist (append-only, optimistic).
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(aggregate_id, aggregate_type.clone(), Uuid::now_v7(), ev)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for ev in &decided {
            aggregate.apply(ev);
        }

        // 5) Publish committed events. Delivery is at-least-once and never
        // rolls back the committed state; a failed publish is logged and the
        // events remain in the store for republication.
        for stored in &committed {
            if let Err(err) = self.bus.publish(stored.to_envelope()) {
                warn!(
                    aggregate_id = %aggregate_id,
                    event_type = %stored.event_type,
                    error = ?err,
                    "event publication failed after append"
                );
            }
        }

        Ok(Dispatched {
            aggregate,
            events: decided,
            committed,
        })
    }

    /// Rehydrate an aggregate for a read-only query.
    ///
    /// Returns `None` when the stream is empty (aggregate never created).
    /// The snapshot is consistent: `load_stream` returns a stream copy taken
    /// under the store's read lock, never a partially applied batch.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Option<A>, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        if history.is_empty() {
            return Ok(None);
        }
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(Some(aggregate))
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Defense in depth even if a buggy backend returns a foreign stream:
    // correct aggregate, monotonically increasing sequence numbers.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!("loaded stream contains wrong aggregate_id at index {idx}"),
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
