//! Dispute service: the command/query surface over the dispute aggregate.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use haulflow_auth::{Actor, ResolverAuthority, require_resolver};
use haulflow_bookings::{Booking, BookingId};
use haulflow_core::{AggregateId, Clock, DomainError, UserId};
use haulflow_disputes::{
    AttachEvidence, Dispute, DisputeCommand, DisputeId, DisputeMessage, DisputeMessageId,
    DisputeOutcome, DisputeReviewTarget, DisputeType, EvidenceRef, FileDispute, PostMessage,
    Resolve, TransitionReview,
};
use haulflow_events::{Effect, EventBus, EventEnvelope, InMemoryEventBus};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::effects::dispute_effects;
use crate::event_store::EventStore;

use super::{CommandOutcome, DISPUTE_AGGREGATE};

/// Command/query service for disputes and their message threads.
pub struct DisputeService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    clock: Arc<dyn Clock>,
    authority: Arc<dyn ResolverAuthority>,
    effect_bus: Arc<InMemoryEventBus<Effect>>,
}

impl<S, B> DisputeService<S, B>
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

    /// File a dispute against a booking.
    ///
    /// The booking's status is read under that aggregate's own consistent
    /// snapshot immediately before dispatch; pre-confirmation bookings are
    /// rejected with `InvalidState` before any state is written.
    pub fn file_dispute(
        &self,
        booking_id: BookingId,
        dispute_type: DisputeType,
        title: String,
        description: String,
        requested_resolution: Option<String>,
        actor: Actor,
    ) -> Result<CommandOutcome<Dispute>, DispatchError> {
        let booking = self
            .dispatcher
            .load(booking_id.0, |id| Booking::empty(BookingId::new(id)))?
            .ok_or(DispatchError::Domain(DomainError::NotFound))?;

        let dispute_id = DisputeId::new(AggregateId::new());
        let command = DisputeCommand::FileDispute(FileDispute {
            dispute_id,
            booking_id,
            booking_status: booking.status(),
            dispute_type,
            title,
            description,
            requested_resolution,
            actor,
            occurred_at: self.clock.now(),
        });

        let outcome = self.dispatch(dispute_id, command)?;
        info!(dispute_id = %dispute_id, booking_id = %booking_id, "dispute filed");
        Ok(outcome)
    }

    pub fn post_message(
        &self,
        dispute_id: DisputeId,
        sender: Actor,
        text: String,
    ) -> Result<CommandOutcome<Dispute>, DispatchError> {
        let command = DisputeCommand::PostMessage(PostMessage {
            dispute_id,
            message_id: DisputeMessageId::new(AggregateId::new()),
            sender,
            text,
            occurred_at: self.clock.now(),
        });
        self.dispatch(dispute_id, command)
    }

    pub fn attach_evidence(
        &self,
        dispute_id: DisputeId,
        evidence: EvidenceRef,
        actor: Actor,
    ) -> Result<CommandOutcome<Dispute>, DispatchError> {
        let command = DisputeCommand::AttachEvidence(AttachEvidence {
            dispute_id,
            evidence,
            actor,
            occurred_at: self.clock.now(),
        });
        self.dispatch(dispute_id, command)
    }

    /// Move a dispute into review or escalate it.
    ///
    /// Requires the externally-granted resolver capability, checked at this
    /// command boundary before dispatch.
    pub fn transition_review(
        &self,
        dispute_id: DisputeId,
        target: DisputeReviewTarget,
        assignee: Option<UserId>,
        actor: Actor,
    ) -> Result<CommandOutcome<Dispute>, DispatchError> {
        require_resolver(self.authority.as_ref(), &actor)?;

        let command = DisputeCommand::TransitionReview(TransitionReview {
            dispute_id,
            target,
            assignee,
            actor,
            occurred_at: self.clock.now(),
        });
        self.dispatch(dispute_id, command)
    }

    /// Close a dispute with a terminal outcome. Single resolution write.
    pub fn resolve(
        &self,
        dispute_id: DisputeId,
        outcome: DisputeOutcome,
        resolution_notes: String,
        actor: Actor,
    ) -> Result<CommandOutcome<Dispute>, DispatchError> {
        require_resolver(self.authority.as_ref(), &actor)?;

        let command = DisputeCommand::Resolve(Resolve {
            dispute_id,
            outcome,
            resolution_notes,
            resolved_by: actor,
            occurred_at: self.clock.now(),
        });
        let result = self.dispatch(dispute_id, command)?;
        info!(dispute_id = %dispute_id, outcome = ?outcome, "dispute closed");
        Ok(result)
    }

    // ───────────────────────── queries ─────────────────────────

    pub fn dispute(&self, dispute_id: DisputeId) -> Result<Option<Dispute>, DispatchError> {
        self.dispatcher
            .load(dispute_id.0, |id| Dispute::empty(DisputeId::new(id)))
    }

    /// The dispute's message thread in creation order.
    pub fn messages(&self, dispute_id: DisputeId) -> Result<Vec<DisputeMessage>, DispatchError> {
        Ok(self
            .dispute(dispute_id)?
            .map(|d| d.messages().cloned().collect())
            .unwrap_or_default())
    }

    pub fn disputes_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Vec<Dispute>, DispatchError> {
        let mut found = Vec::new();
        for aggregate_id in self.dispatcher.store().stream_ids(DISPUTE_AGGREGATE)? {
            if let Some(dispute) = self.dispute(DisputeId::new(aggregate_id))? {
                if dispute.booking_id() == Some(booking_id) {
                    found.push(dispute);
                }
            }
        }
        Ok(found)
    }

    // ───────────────────────── internals ─────────────────────────

    fn dispatch(
        &self,
        dispute_id: DisputeId,
        command: DisputeCommand,
    ) -> Result<CommandOutcome<Dispute>, DispatchError> {
        let dispatched = self.dispatcher.dispatch::<Dispute>(
            dispute_id.0,
            DISPUTE_AGGREGATE,
            command,
            |id| Dispute::empty(DisputeId::new(id)),
        )?;

        let effects = dispute_effects(&dispatched.aggregate, &dispatched.events);
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
