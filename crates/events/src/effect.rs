//! Outbound effects consumed by external collaborators.
//!
//! Every mutating operation returns, next to the updated snapshot, the list
//! of effects the calling infrastructure must apply: notification requests
//! handed to a delivery adapter and audit records handed to an
//! audit-persistence adapter. Effects carry everything needed to retry
//! delivery without re-querying the aggregate.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use haulflow_core::{AggregateId, UserId};

/// What an outbound notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    BookingStatusChanged,
    BookingCancelled,
    QuotationReceived,
    QuotationAccepted,
    QuotationSuperseded,
    CounterOfferReceived,
    CounterOfferAccepted,
    CounterOfferRejected,
    CounterOfferExpired,
    DisputeFiled,
    DisputeMessagePosted,
    DisputeStatusChanged,
    DisputeResolved,
    ExceptionOpened,
    ExceptionEscalated,
    ExceptionResolved,
}

/// Request to deliver one notification to one user.
///
/// Delivery itself (push, email) is external; this struct is the complete
/// retryable unit handed to the delivery adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub recipient_user_id: UserId,
    pub kind: NotificationKind,
    /// Context payload (booking id, quotation id, prices, ...).
    pub payload: JsonValue,
}

/// Audited action, in the marketplace's established taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    BookingCreated,
    BookingTransitioned,
    BookingCancelled,
    QuotationSubmitted,
    QuotationAccepted,
    QuotationSuperseded,
    CounterOfferSubmitted,
    CounterOfferAccepted,
    CounterOfferRejected,
    CounterOfferExpired,
    CounterOfferSuperseded,
    DisputeFiled,
    DisputeMessagePosted,
    DisputeEvidenceAttached,
    DisputeUnderReview,
    DisputeEscalated,
    DisputeResolved,
    DisputeRejected,
    ExceptionOpened,
    ExceptionUpdated,
    ExceptionEscalated,
    ExceptionResolved,
}

/// Target taxonomy of the audit trail.
///
/// The first seven variants are the marketplace's existing audit targets;
/// the negotiation core extends them with its own aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditTargetType {
    User,
    Transport,
    Category,
    Review,
    OutboxEvent,
    Bid,
    Exception,
    Booking,
    Quotation,
    CounterOffer,
    Dispute,
}

/// Append-only audit record handed to the audit-persistence adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub target_type: AuditTargetType,
    pub target_id: AggregateId,
    pub details: JsonValue,
}

/// A single outbound effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Notification(NotificationRequest),
    Audit(AuditRecord),
}

impl Effect {
    pub fn notification(
        recipient_user_id: UserId,
        kind: NotificationKind,
        payload: JsonValue,
    ) -> Self {
        Self::Notification(NotificationRequest {
            recipient_user_id,
            kind,
            payload,
        })
    }

    pub fn audit(
        action: AuditAction,
        target_type: AuditTargetType,
        target_id: AggregateId,
        details: JsonValue,
    ) -> Self {
        Self::Audit(AuditRecord {
            action,
            target_type,
            target_id,
            details,
        })
    }
}
