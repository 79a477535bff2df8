//! Exception service: the command/query surface over the exception
//! aggregate.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use haulflow_auth::{Actor, ResolverAuthority, require_resolver};
use haulflow_bookings::BookingId;
use haulflow_core::{AggregateId, Clock, UserId};
use haulflow_events::{Effect, EventBus, EventEnvelope, InMemoryEventBus};
use haulflow_exceptions::{
    BeginWork, Escalate, Exception, ExceptionCommand, ExceptionId, ExceptionPriority,
    OpenException, ResolveException,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::effects::exception_effects;
use crate::event_store::EventStore;

use super::{CommandOutcome, EXCEPTION_AGGREGATE};

/// Command/query service for operational exceptions.
pub struct ExceptionService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    clock: Arc<dyn Clock>,
    authority: Arc<dyn ResolverAuthority>,
    effect_bus: Arc<InMemoryEventBus<Effect>>,
}

impl<S, B> ExceptionService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        clock: Arc<dyn Clock>,
        authority: Arc<dyn ResolverAuthority>,
        effect_bus: Arc<InMemoryEventBus<Effect>>,
    ) -> Self {
        Self {
            dispatcher,
            clock,
            authority,
            effect_bus,
        }
    }

    // ───────────────────────── commands ─────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn open_exception(
        &self,
        title: String,
        exception_type: String,
        description: String,
        priority: ExceptionPriority,
        incident_id: Option<u64>,
        booking_id: Option<BookingId>,
        actor: Actor,
    ) -> Result<CommandOutcome<Exception>, DispatchError> {
        let exception_id = ExceptionId::new(AggregateId::new());
        let command = ExceptionCommand::OpenException(OpenException {
            exception_id,
            title,
            exception_type,
            description,
            priority,
            incident_id,
            booking_id,
            actor,
            occurred_at: self.clock.now(),
        });

        let outcome = self.dispatch(exception_id, command)?;
        info!(exception_id = %exception_id, priority = ?priority, "exception opened");
        Ok(outcome)
    }

    pub fn begin_work(
        &self,
        exception_id: ExceptionId,
        actor: Actor,
    ) -> Result<CommandOutcome<Exception>, DispatchError> {
        let command = ExceptionCommand::BeginWork(BeginWork {
            exception_id,
            actor,
            occurred_at: self.clock.now(),
        });
        self.dispatch(exception_id, command)
    }

    /// Escalate an exception, optionally raising its priority and/or
    /// reassigning it. Priority is never lowered.
    ///
    /// Requires the externally-granted resolver capability.
    pub fn escalate(
        &self,
        exception_id: ExceptionId,
        new_priority: Option<ExceptionPriority>,
        assignee: Option<UserId>,
        actor: Actor,
    ) -> Result<CommandOutcome<Exception>, DispatchError> {
        require_resolver(self.authority.as_ref(), &actor)?;

        let command = ExceptionCommand::Escalate(Escalate {
            exception_id,
            new_priority,
            assignee,
            actor,
            occurred_at: self.clock.now(),
        });
        self.dispatch(exception_id, command)
    }

    /// Close an exception. Single resolution write; terminal.
    pub fn resolve(
        &self,
        exception_id: ExceptionId,
        resolution_notes: String,
        actor: Actor,
    ) -> Result<CommandOutcome<Exception>, DispatchError> {
        require_resolver(self.authority.as_ref(), &actor)?;

        let command = ExceptionCommand::ResolveException(ResolveException {
            exception_id,
            resolution_notes,
            resolved_by: actor,
            occurred_at: self.clock.now(),
        });
        let result = self.dispatch(exception_id, command)?;
        info!(exception_id = %exception_id, "exception resolved");
        Ok(result)
    }

    // ───────────────────────── queries ─────────────────────────

    pub fn exception(
        &self,
        exception_id: ExceptionId,
    ) -> Result<Option<Exception>, DispatchError> {
        self.dispatcher
            .load(exception_id.0, |id| Exception::empty(ExceptionId::new(id)))
    }

    pub fn exceptions_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Vec<Exception>, DispatchError> {
        let mut found = Vec::new();
        for aggregate_id in self.dispatcher.store().stream_ids(EXCEPTION_AGGREGATE)? {
            if let Some(exception) = self.exception(ExceptionId::new(aggregate_id))? {
                if exception.booking_id() == Some(booking_id) {
                    found.push(exception);
                }
            }
        }
        Ok(found)
    }

    // ───────────────────────── internals ─────────────────────────

    fn dispatch(
        &self,
        exception_id: ExceptionId,
        command: ExceptionCommand,
    ) -> Result<CommandOutcome<Exception>, DispatchError> {
        let dispatched = self.dispatcher.dispatch::<Exception>(
            exception_id.0,
            EXCEPTION_AGGREGATE,
            command,
            |id| Exception::empty(ExceptionId::new(id)),
        )?;

        let effects = exception_effects(&dispatched.aggregate, &dispatched.events);
        for effect in &effects {
            if let Err(err) = self.effect_bus.publish(effect.clone()) {
                warn!(error = ?err, "failed to enqueue effect for delivery");
            }
        }

        Ok(CommandOutcome {
            snapshot: dispatched.aggregate,
            effects,
        })
    }
}
