//! Notification fan-out and audit trail adapters.
//!
//! Pure translators from committed domain events to outbound effects. The
//! post-apply aggregate snapshot is passed in so recipients (the negotiation
//! counterpart, thread participants) can be resolved without another store
//! round-trip; each produced effect then carries everything needed to retry
//! delivery on its own.
//!
//! Delivery itself is external: [`NotificationDelivery`] and [`AuditSink`]
//! are the injected boundaries, with in-memory collecting implementations
//! for tests and development.

use std::sync::Mutex;

use serde_json::json;

use haulflow_bookings::{Booking, BookingEvent, BookingStatus};
use haulflow_core::UserId;
use haulflow_disputes::{Dispute, DisputeEvent, DisputeOutcome, DisputeStatus};
use haulflow_events::{
    AuditAction, AuditRecord, AuditTargetType, Effect, NotificationKind, NotificationRequest,
};
use haulflow_exceptions::{Exception, ExceptionEvent};

/// Hands notification requests to the external delivery mechanism
/// (push/email). Must be safe to call more than once per request.
pub trait NotificationDelivery: Send + Sync {
    fn deliver(&self, request: &NotificationRequest) -> anyhow::Result<()>;
}

/// Hands audit records to the external audit-persistence mechanism.
/// Append-only; must tolerate duplicates.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> anyhow::Result<()>;
}

/// Collecting outbox for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotificationOutbox {
    delivered: Mutex<Vec<NotificationRequest>>,
}

impl InMemoryNotificationOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<NotificationRequest> {
        self.delivered.lock().expect("outbox lock poisoned").clone()
    }
}

impl NotificationDelivery for InMemoryNotificationOutbox {
    fn deliver(&self, request: &NotificationRequest) -> anyhow::Result<()> {
        self.delivered
            .lock()
            .expect("outbox lock poisoned")
            .push(request.clone());
        Ok(())
    }
}

/// Collecting audit sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit lock poisoned").clone()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .expect("audit lock poisoned")
            .push(record.clone());
        Ok(())
    }
}

/// Effects for a batch of booking events.
pub fn booking_effects(booking: &Booking, events: &[BookingEvent]) -> Vec<Effect> {
    let mut effects = Vec::new();

    for event in events {
        match event {
            BookingEvent::BookingCreated(e) => {
                effects.push(Effect::audit(
                    AuditAction::BookingCreated,
                    AuditTargetType::Booking,
                    e.booking_id.0,
                    json!({ "customer_id": e.customer_id }),
                ));
            }
            BookingEvent::BookingTransitioned(e) => {
                let action = if e.to == BookingStatus::Cancelled {
                    AuditAction::BookingCancelled
                } else {
                    AuditAction::BookingTransitioned
                };
                effects.push(Effect::audit(
                    action,
                    AuditTargetType::Booking,
                    e.booking_id.0,
                    json!({ "from": e.from, "to": e.to }),
                ));

                let kind = if e.to == BookingStatus::Cancelled {
                    NotificationKind::BookingCancelled
                } else {
                    NotificationKind::BookingStatusChanged
                };
                let payload = json!({ "booking_id": e.booking_id, "status": e.to });

                // The customer and the winning transport (if any) both learn
                // about lifecycle changes; the acting user does not need to
                // be told what it just did.
                let mut recipients: Vec<UserId> = Vec::new();
                if let Some(customer) = booking.customer_id() {
                    recipients.push(customer);
                }
                if let Some(accepted) = booking.accepted_quotation() {
                    recipients.push(accepted.transport_id);
                }
                for recipient in recipients {
                    if e.actor_id != Some(recipient) {
                        effects.push(Effect::notification(recipient, kind, payload.clone()));
                    }
                }
            }
            BookingEvent::QuotationSubmitted(e) => {
                effects.push(Effect::audit(
                    AuditAction::QuotationSubmitted,
                    AuditTargetType::Quotation,
                    e.quotation_id.0,
                    json!({ "booking_id": e.booking_id, "price": e.price }),
                ));
                if let Some(customer) = booking.customer_id() {
                    effects.push(Effect::notification(
                        customer,
                        NotificationKind::QuotationReceived,
                        json!({
                            "booking_id": e.booking_id,
                            "quotation_id": e.quotation_id,
                            "price": e.price,
                        }),
                    ));
                }
            }
            BookingEvent::QuotationAccepted(e) => {
                effects.push(Effect::audit(
                    AuditAction::QuotationAccepted,
                    AuditTargetType::Quotation,
                    e.quotation_id.0,
                    json!({ "booking_id": e.booking_id, "price": e.price }),
                ));
                if let Some(q) = booking.quotation(e.quotation_id) {
                    effects.push(Effect::notification(
                        q.transport_id,
                        NotificationKind::QuotationAccepted,
                        json!({
                            "booking_id": e.booking_id,
                            "quotation_id": e.quotation_id,
                            "price": e.price,
                        }),
                    ));
                }
            }
            BookingEvent::QuotationSuperseded(e) => {
                effects.push(Effect::audit(
                    AuditAction::QuotationSuperseded,
                    AuditTargetType::Quotation,
                    e.quotation_id.0,
                    json!({ "booking_id": e.booking_id }),
                ));
                if let Some(q) = booking.quotation(e.quotation_id) {
                    effects.push(Effect::notification(
                        q.transport_id,
                        NotificationKind::QuotationSuperseded,
                        json!({ "booking_id": e.booking_id, "quotation_id": e.quotation_id }),
                    ));
                }
            }
            BookingEvent::CounterOfferSubmitted(e) => {
                effects.push(Effect::audit(
                    AuditAction::CounterOfferSubmitted,
                    AuditTargetType::CounterOffer,
                    e.counter_offer_id.0,
                    json!({
                        "quotation_id": e.quotation_id,
                        "original_price": e.original_price,
                        "offered_price": e.offered_price,
                    }),
                ));
                if let Some(counterpart) = negotiation_counterpart(booking, e.quotation_id, e.offered_by)
                {
                    effects.push(Effect::notification(
                        counterpart,
                        NotificationKind::CounterOfferReceived,
                        json!({
                            "booking_id": e.booking_id,
                            "quotation_id": e.quotation_id,
                            "counter_offer_id": e.counter_offer_id,
                            "offered_price": e.offered_price,
                            "expires_at": e.expires_at,
                        }),
                    ));
                }
            }
            BookingEvent::CounterOfferSuperseded(e) => {
                effects.push(Effect::audit(
                    AuditAction::CounterOfferSuperseded,
                    AuditTargetType::CounterOffer,
                    e.counter_offer_id.0,
                    json!({ "quotation_id": e.quotation_id }),
                ));
            }
            BookingEvent::CounterOfferAccepted(e) => {
                effects.push(Effect::audit(
                    AuditAction::CounterOfferAccepted,
                    AuditTargetType::CounterOffer,
                    e.counter_offer_id.0,
                    json!({ "quotation_id": e.quotation_id, "agreed_price": e.agreed_price }),
                ));
                if let Some(offer) = booking.counter_offer(e.counter_offer_id) {
                    effects.push(Effect::notification(
                        offer.offered_by,
                        NotificationKind::CounterOfferAccepted,
                        json!({
                            "booking_id": e.booking_id,
                            "counter_offer_id": e.counter_offer_id,
                            "agreed_price": e.agreed_price,
                        }),
                    ));
                }
            }
            BookingEvent::CounterOfferRejected(e) => {
                effects.push(Effect::audit(
                    AuditAction::CounterOfferRejected,
                    AuditTargetType::CounterOffer,
                    e.counter_offer_id.0,
                    json!({ "quotation_id": e.quotation_id }),
                ));
                if let Some(offer) = booking.counter_offer(e.counter_offer_id) {
                    effects.push(Effect::notification(
                        offer.offered_by,
                        NotificationKind::CounterOfferRejected,
                        json!({
                            "booking_id": e.booking_id,
                            "counter_offer_id": e.counter_offer_id,
                        }),
                    ));
                }
            }
            BookingEvent::CounterOfferExpired(e) => {
                effects.push(Effect::audit(
                    AuditAction::CounterOfferExpired,
                    AuditTargetType::CounterOffer,
                    e.counter_offer_id.0,
                    json!({ "quotation_id": e.quotation_id }),
                ));
                if let Some(offer) = booking.counter_offer(e.counter_offer_id) {
                    effects.push(Effect::notification(
                        offer.offered_by,
                        NotificationKind::CounterOfferExpired,
                        json!({
                            "booking_id": e.booking_id,
                            "counter_offer_id": e.counter_offer_id,
                        }),
                    ));
                }
            }
        }
    }

    effects
}

fn negotiation_counterpart(
    booking: &Booking,
    quotation_id: haulflow_bookings::QuotationId,
    offered_by: UserId,
) -> Option<UserId> {
    let quotation = booking.quotation(quotation_id)?;
    if offered_by == quotation.transport_id {
        booking.customer_id()
    } else {
        Some(quotation.transport_id)
    }
}

/// Effects for a batch of dispute events.
pub fn dispute_effects(dispute: &Dispute, events: &[DisputeEvent]) -> Vec<Effect> {
    let mut effects = Vec::new();

    for event in events {
        match event {
            DisputeEvent::DisputeFiled(e) => {
                effects.push(Effect::audit(
                    AuditAction::DisputeFiled,
                    AuditTargetType::Dispute,
                    e.dispute_id.0,
                    json!({
                        "booking_id": e.booking_id,
                        "dispute_type": e.dispute_type,
                        "filed_by": e.filed_by.user_id,
                    }),
                ));
            }
            DisputeEvent::DisputeMessagePosted(e) => {
                effects.push(Effect::audit(
                    AuditAction::DisputeMessagePosted,
                    AuditTargetType::Dispute,
                    e.dispute_id.0,
                    json!({ "message_id": e.message_id }),
                ));
                for participant in thread_participants(dispute) {
                    if participant != e.sender.user_id {
                        effects.push(Effect::notification(
                            participant,
                            NotificationKind::DisputeMessagePosted,
                            json!({ "dispute_id": e.dispute_id, "message_id": e.message_id }),
                        ));
                    }
                }
            }
            DisputeEvent::DisputeEvidenceAttached(e) => {
                effects.push(Effect::audit(
                    AuditAction::DisputeEvidenceAttached,
                    AuditTargetType::Dispute,
                    e.dispute_id.0,
                    json!({ "file_name": e.evidence.file_name }),
                ));
            }
            DisputeEvent::DisputeReviewTransitioned(e) => {
                let action = if e.to == DisputeStatus::Escalated {
                    AuditAction::DisputeEscalated
                } else {
                    AuditAction::DisputeUnderReview
                };
                effects.push(Effect::audit(
                    action,
                    AuditTargetType::Dispute,
                    e.dispute_id.0,
                    json!({ "from": e.from, "to": e.to, "assignee": e.assignee }),
                ));
                if let Some(filer) = dispute.filed_by() {
                    effects.push(Effect::notification(
                        filer.user_id,
                        NotificationKind::DisputeStatusChanged,
                        json!({ "dispute_id": e.dispute_id, "status": e.to }),
                    ));
                }
            }
            DisputeEvent::DisputeResolved(e) => {
                let action = match e.outcome {
                    DisputeOutcome::Resolved => AuditAction::DisputeResolved,
                    DisputeOutcome::Rejected => AuditAction::DisputeRejected,
                };
                effects.push(Effect::audit(
                    action,
                    AuditTargetType::Dispute,
                    e.dispute_id.0,
                    json!({ "outcome": e.outcome, "resolved_by": e.resolved_by }),
                ));
                if let Some(filer) = dispute.filed_by() {
                    effects.push(Effect::notification(
                        filer.user_id,
                        NotificationKind::DisputeResolved,
                        json!({ "dispute_id": e.dispute_id, "outcome": e.outcome }),
                    ));
                }
            }
        }
    }

    effects
}

fn thread_participants(dispute: &Dispute) -> Vec<UserId> {
    let mut participants: Vec<UserId> = Vec::new();
    if let Some(filer) = dispute.filed_by() {
        participants.push(filer.user_id);
    }
    for message in dispute.messages() {
        if !participants.contains(&message.sender_user_id) {
            participants.push(message.sender_user_id);
        }
    }
    participants
}

/// Effects for a batch of exception events.
pub fn exception_effects(exception: &Exception, events: &[ExceptionEvent]) -> Vec<Effect> {
    let mut effects = Vec::new();

    for event in events {
        match event {
            ExceptionEvent::ExceptionOpened(e) => {
                effects.push(Effect::audit(
                    AuditAction::ExceptionOpened,
                    AuditTargetType::Exception,
                    e.exception_id.0,
                    json!({
                        "priority": e.priority,
                        "incident_id": e.incident_id,
                        "booking_id": e.booking_id,
                    }),
                ));
            }
            ExceptionEvent::ExceptionWorkStarted(e) => {
                effects.push(Effect::audit(
                    AuditAction::ExceptionUpdated,
                    AuditTargetType::Exception,
                    e.exception_id.0,
                    json!({ "status": "IN_PROGRESS" }),
                ));
            }
            ExceptionEvent::ExceptionEscalated(e) => {
                effects.push(Effect::audit(
                    AuditAction::ExceptionEscalated,
                    AuditTargetType::Exception,
                    e.exception_id.0,
                    json!({ "from_priority": e.from_priority, "new_priority": e.new_priority }),
                ));
                if let Some(assignee) = e.assignee {
                    effects.push(Effect::notification(
                        assignee,
                        NotificationKind::ExceptionEscalated,
                        json!({ "exception_id": e.exception_id, "priority": e.new_priority }),
                    ));
                }
            }
            ExceptionEvent::ExceptionResolved(e) => {
                effects.push(Effect::audit(
                    AuditAction::ExceptionResolved,
                    AuditTargetType::Exception,
                    e.exception_id.0,
                    json!({ "resolved_by": e.resolved_by }),
                ));
                if let Some(assignee) = exception.assigned_to() {
                    if assignee != e.resolved_by {
                        effects.push(Effect::notification(
                            assignee,
                            NotificationKind::ExceptionResolved,
                            json!({ "exception_id": e.exception_id }),
                        ));
                    }
                }
            }
        }
    }

    effects
}
