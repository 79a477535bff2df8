use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use haulflow_auth::{Actor, Role};
use haulflow_bookings::{BookingId, BookingStatus};
use haulflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Entity, UserId};
use haulflow_events::Event;

/// Dispute identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisputeId(pub AggregateId);

impl DisputeId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for DisputeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Dispute message identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisputeMessageId(pub AggregateId);

impl DisputeMessageId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for DisputeMessageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Dispute status lifecycle.
///
/// `Resolved` and `Rejected` are terminal; `Escalated` is a non-terminal
/// intermediate state that changes the assigned resolver, not the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    Pending,
    UnderReview,
    Resolved,
    Rejected,
    Escalated,
}

impl DisputeStatus {
    /// Closed disputes accept no further discussion, evidence, or resolution.
    pub fn is_closed(self) -> bool {
        matches!(self, DisputeStatus::Resolved | DisputeStatus::Rejected)
    }
}

/// What the dispute is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeType {
    PricingDispute,
    DamageClaim,
    ServiceQuality,
    DeliveryIssue,
    PaymentIssue,
    Other,
}

/// Review-stage transition targets (closed subset of [`DisputeStatus`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeReviewTarget {
    UnderReview,
    Escalated,
}

impl DisputeReviewTarget {
    pub fn as_status(self) -> DisputeStatus {
        match self {
            DisputeReviewTarget::UnderReview => DisputeStatus::UnderReview,
            DisputeReviewTarget::Escalated => DisputeStatus::Escalated,
        }
    }
}

/// Terminal resolution outcomes (closed subset of [`DisputeStatus`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeOutcome {
    Resolved,
    Rejected,
}

impl DisputeOutcome {
    pub fn as_status(self) -> DisputeStatus {
        match self {
            DisputeOutcome::Resolved => DisputeStatus::Resolved,
            DisputeOutcome::Rejected => DisputeStatus::Rejected,
        }
    }
}

/// One message in a dispute thread. Immutable once created; ordering is
/// creation-time total order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeMessage {
    pub message_id: DisputeMessageId,
    pub sender_user_id: UserId,
    pub sender_role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Entity for DisputeMessage {
    type Id = DisputeMessageId;

    fn id(&self) -> &Self::Id {
        &self.message_id
    }
}

/// Reference to evidence held by an external store. The dispute records the
/// reference and the count only; the content lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub evidence_type: String,
    pub file_name: String,
    pub file_url: String,
}

/// Aggregate root: Dispute.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispute {
    id: DisputeId,
    booking_id: Option<BookingId>,
    status: DisputeStatus,
    dispute_type: Option<DisputeType>,
    title: String,
    description: String,
    requested_resolution: Option<String>,
    filed_by: Option<Actor>,
    messages: HashMap<DisputeMessageId, DisputeMessage>,
    message_order: Vec<DisputeMessageId>,
    evidence: Vec<EvidenceRef>,
    assigned_to: Option<UserId>,
    resolution_notes: Option<String>,
    resolved_by: Option<UserId>,
    resolved_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Dispute {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: DisputeId) -> Self {
        Self {
            id,
            booking_id: None,
            status: DisputeStatus::Pending,
            dispute_type: None,
            title: String::new(),
            description: String::new(),
            requested_resolution: None,
            filed_by: None,
            messages: HashMap::new(),
            message_order: Vec::new(),
            evidence: Vec::new(),
            assigned_to: None,
            resolution_notes: None,
            resolved_by: None,
            resolved_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DisputeId {
        self.id
    }

    pub fn booking_id(&self) -> Option<BookingId> {
        self.booking_id
    }

    pub fn status(&self) -> DisputeStatus {
        self.status
    }

    pub fn dispute_type(&self) -> Option<DisputeType> {
        self.dispute_type
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn requested_resolution(&self) -> Option<&str> {
        self.requested_resolution.as_deref()
    }

    pub fn filed_by(&self) -> Option<Actor> {
        self.filed_by
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Messages in creation-time order (append-only).
    pub fn messages(&self) -> impl Iterator<Item = &DisputeMessage> {
        self.message_order
            .iter()
            .filter_map(|id| self.messages.get(id))
    }

    pub fn message_count(&self) -> usize {
        self.message_order.len()
    }

    pub fn evidence(&self) -> &[EvidenceRef] {
        &self.evidence
    }

    pub fn evidence_count(&self) -> usize {
        self.evidence.len()
    }

    pub fn assigned_to(&self) -> Option<UserId> {
        self.assigned_to
    }

    pub fn resolution_notes(&self) -> Option<&str> {
        self.resolution_notes.as_deref()
    }

    pub fn resolved_by(&self) -> Option<UserId> {
        self.resolved_by
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }
}

impl AggregateRoot for Dispute {
    type Id = DisputeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: FileDispute.
///
/// `booking_status` is the status read from the booking aggregate under its
/// own consistent snapshot immediately before dispatch; the guard against
/// pre-confirmation bookings is enforced here so a rejected filing leaves no
/// trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDispute {
    pub dispute_id: DisputeId,
    pub booking_id: BookingId,
    pub booking_status: BookingStatus,
    pub dispute_type: DisputeType,
    pub title: String,
    pub description: String,
    pub requested_resolution: Option<String>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostMessage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostMessage {
    pub dispute_id: DisputeId,
    pub message_id: DisputeMessageId,
    pub sender: Actor,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachEvidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachEvidence {
    pub dispute_id: DisputeId,
    pub evidence: EvidenceRef,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionReview.
///
/// The resolver capability is an external authorization decision enforced at
/// the command boundary, before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionReview {
    pub dispute_id: DisputeId,
    pub target: DisputeReviewTarget,
    /// Escalation may hand the dispute to a different resolver.
    pub assignee: Option<UserId>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolve {
    pub dispute_id: DisputeId,
    pub outcome: DisputeOutcome,
    pub resolution_notes: String,
    pub resolved_by: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DisputeCommand {
    FileDispute(FileDispute),
    PostMessage(PostMessage),
    AttachEvidence(AttachEvidence),
    TransitionReview(TransitionReview),
    Resolve(Resolve),
}

impl haulflow_events::Command for DisputeCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            DisputeCommand::FileDispute(c) => c.dispute_id.0,
            DisputeCommand::PostMessage(c) => c.dispute_id.0,
            DisputeCommand::AttachEvidence(c) => c.dispute_id.0,
            DisputeCommand::TransitionReview(c) => c.dispute_id.0,
            DisputeCommand::Resolve(c) => c.dispute_id.0,
        }
    }
}

/// Event: DisputeFiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeFiled {
    pub dispute_id: DisputeId,
    pub booking_id: BookingId,
    pub dispute_type: DisputeType,
    pub title: String,
    pub description: String,
    pub requested_resolution: Option<String>,
    pub filed_by: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DisputeMessagePosted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeMessagePosted {
    pub dispute_id: DisputeId,
    pub message_id: DisputeMessageId,
    pub sender: Actor,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DisputeEvidenceAttached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeEvidenceAttached {
    pub dispute_id: DisputeId,
    pub evidence: EvidenceRef,
    pub attached_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DisputeReviewTransitioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeReviewTransitioned {
    pub dispute_id: DisputeId,
    pub from: DisputeStatus,
    pub to: DisputeStatus,
    pub assignee: Option<UserId>,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DisputeResolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeResolved {
    pub dispute_id: DisputeId,
    pub outcome: DisputeOutcome,
    pub resolution_notes: String,
    pub resolved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DisputeEvent {
    DisputeFiled(DisputeFiled),
    DisputeMessagePosted(DisputeMessagePosted),
    DisputeEvidenceAttached(DisputeEvidenceAttached),
    DisputeReviewTransitioned(DisputeReviewTransitioned),
    DisputeResolved(DisputeResolved),
}

impl Event for DisputeEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DisputeEvent::DisputeFiled(_) => "dispute.filed",
            DisputeEvent::DisputeMessagePosted(_) => "dispute.message.posted",
            DisputeEvent::DisputeEvidenceAttached(_) => "dispute.evidence.attached",
            DisputeEvent::DisputeReviewTransitioned(_) => "dispute.review.transitioned",
            DisputeEvent::DisputeResolved(_) => "dispute.resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DisputeEvent::DisputeFiled(e) => e.occurred_at,
            DisputeEvent::DisputeMessagePosted(e) => e.occurred_at,
            DisputeEvent::DisputeEvidenceAttached(e) => e.occurred_at,
            DisputeEvent::DisputeReviewTransitioned(e) => e.occurred_at,
            DisputeEvent::DisputeResolved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Dispute {
    type Command = DisputeCommand;
    type Event = DisputeEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DisputeEvent::DisputeFiled(e) => {
                self.id = e.dispute_id;
                self.booking_id = Some(e.booking_id);
                self.status = DisputeStatus::Pending;
                self.dispute_type = Some(e.dispute_type);
                self.title = e.title.clone();
                self.description = e.description.clone();
                self.requested_resolution = e.requested_resolution.clone();
                self.filed_by = Some(e.filed_by);
                self.created = true;
            }
            DisputeEvent::DisputeMessagePosted(e) => {
                self.messages.insert(
                    e.message_id,
                    DisputeMessage {
                        message_id: e.message_id,
                        sender_user_id: e.sender.user_id,
                        sender_role: e.sender.role,
                        text: e.text.clone(),
                        created_at: e.occurred_at,
                    },
                );
                self.message_order.push(e.message_id);
            }
            DisputeEvent::DisputeEvidenceAttached(e) => {
                self.evidence.push(e.evidence.clone());
            }
            DisputeEvent::DisputeReviewTransitioned(e) => {
                self.status = e.to;
                if let Some(assignee) = e.assignee {
                    self.assigned_to = Some(assignee);
                }
            }
            DisputeEvent::DisputeResolved(e) => {
                self.status = e.outcome.as_status();
                self.resolution_notes = Some(e.resolution_notes.clone());
                self.resolved_by = Some(e.resolved_by);
                self.resolved_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DisputeCommand::FileDispute(cmd) => self.handle_file(cmd),
            DisputeCommand::PostMessage(cmd) => self.handle_post_message(cmd),
            DisputeCommand::AttachEvidence(cmd) => self.handle_attach_evidence(cmd),
            DisputeCommand::TransitionReview(cmd) => self.handle_transition_review(cmd),
            DisputeCommand::Resolve(cmd) => self.handle_resolve(cmd),
        }
    }
}

impl Dispute {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if self.created {
            Ok(())
        } else {
            Err(DomainError::not_found())
        }
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.status.is_closed() {
            Err(DomainError::invalid_state(format!(
                "dispute is closed (status: {:?})",
                self.status
            )))
        } else {
            Ok(())
        }
    }

    fn handle_file(&self, cmd: &FileDispute) -> Result<Vec<DisputeEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("dispute already exists"));
        }

        // No executed booking yet to dispute.
        if cmd.booking_status.is_pre_confirmation() {
            return Err(DomainError::invalid_state(format!(
                "disputes cannot be filed against a booking in {} status",
                cmd.booking_status
            )));
        }

        if cmd.title.trim().is_empty() {
            return Err(DomainError::invalid_argument("dispute title is required"));
        }
        if cmd.description.trim().is_empty() {
            return Err(DomainError::invalid_argument(
                "dispute description is required",
            ));
        }

        Ok(vec![DisputeEvent::DisputeFiled(DisputeFiled {
            dispute_id: cmd.dispute_id,
            booking_id: cmd.booking_id,
            dispute_type: cmd.dispute_type,
            title: cmd.title.clone(),
            description: cmd.description.clone(),
            requested_resolution: cmd.requested_resolution.clone(),
            filed_by: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post_message(&self, cmd: &PostMessage) -> Result<Vec<DisputeEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_open()?;

        if cmd.text.trim().is_empty() {
            return Err(DomainError::invalid_argument("message text is required"));
        }
        if self.messages.contains_key(&cmd.message_id) {
            return Err(DomainError::conflict("message already exists"));
        }

        Ok(vec![DisputeEvent::DisputeMessagePosted(
            DisputeMessagePosted {
                dispute_id: cmd.dispute_id,
                message_id: cmd.message_id,
                sender: cmd.sender,
                text: cmd.text.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_attach_evidence(
        &self,
        cmd: &AttachEvidence,
    ) -> Result<Vec<DisputeEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_open()?;

        if cmd.evidence.file_url.trim().is_empty() {
            return Err(DomainError::invalid_argument(
                "evidence reference requires a file url",
            ));
        }

        Ok(vec![DisputeEvent::DisputeEvidenceAttached(
            DisputeEvidenceAttached {
                dispute_id: cmd.dispute_id,
                evidence: cmd.evidence.clone(),
                attached_by: cmd.actor.user_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_transition_review(
        &self,
        cmd: &TransitionReview,
    ) -> Result<Vec<DisputeEvent>, DomainError> {
        self.ensure_created()?;

        let target = cmd.target.as_status();

        // Idempotent under retry.
        if target == self.status {
            return Ok(vec![]);
        }

        if !matches!(
            self.status,
            DisputeStatus::Pending | DisputeStatus::UnderReview
        ) {
            return Err(DomainError::invalid_state(format!(
                "review transitions are only permitted from PENDING or UNDER_REVIEW \
                 (current status: {:?})",
                self.status
            )));
        }

        Ok(vec![DisputeEvent::DisputeReviewTransitioned(
            DisputeReviewTransitioned {
                dispute_id: cmd.dispute_id,
                from: self.status,
                to: target,
                assignee: cmd.assignee,
                actor_id: cmd.actor.user_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_resolve(&self, cmd: &Resolve) -> Result<Vec<DisputeEvent>, DomainError> {
        self.ensure_created()?;

        if !matches!(
            self.status,
            DisputeStatus::UnderReview | DisputeStatus::Escalated
        ) {
            return Err(DomainError::invalid_state(format!(
                "disputes are resolved from UNDER_REVIEW or ESCALATED \
                 (current status: {:?})",
                self.status
            )));
        }

        Ok(vec![DisputeEvent::DisputeResolved(DisputeResolved {
            dispute_id: cmd.dispute_id,
            outcome: cmd.outcome,
            resolution_notes: cmd.resolution_notes.clone(),
            resolved_by: cmd.resolved_by.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use haulflow_events::execute;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn dispute_id() -> DisputeId {
        DisputeId::new(AggregateId::new())
    }

    fn booking_ref() -> BookingId {
        BookingId::new(AggregateId::new())
    }

    fn file_cmd(id: DisputeId, booking_status: BookingStatus) -> DisputeCommand {
        DisputeCommand::FileDispute(FileDispute {
            dispute_id: id,
            booking_id: booking_ref(),
            booking_status,
            dispute_type: DisputeType::DamageClaim,
            title: "Broken table leg".to_string(),
            description: "The table arrived with a cracked leg.".to_string(),
            requested_resolution: Some("Partial refund".to_string()),
            actor: Actor::customer(UserId::new()),
            occurred_at: test_time(),
        })
    }

    fn filed_dispute() -> (Dispute, DisputeId) {
        let id = dispute_id();
        let mut dispute = Dispute::empty(id);
        execute(&mut dispute, &file_cmd(id, BookingStatus::Completed)).unwrap();
        (dispute, id)
    }

    fn reviewed_dispute() -> (Dispute, DisputeId, Actor) {
        let (mut dispute, id) = filed_dispute();
        let resolver = Actor::manager(UserId::new());
        execute(
            &mut dispute,
            &DisputeCommand::TransitionReview(TransitionReview {
                dispute_id: id,
                target: DisputeReviewTarget::UnderReview,
                assignee: Some(resolver.user_id),
                actor: resolver,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        (dispute, id, resolver)
    }

    #[test]
    fn filing_against_pre_confirmation_booking_is_invalid_state() {
        for status in [BookingStatus::Pending, BookingStatus::Quoted] {
            let id = dispute_id();
            let dispute = Dispute::empty(id);
            let err = dispute.handle(&file_cmd(id, status)).unwrap_err();
            assert!(matches!(err, DomainError::InvalidState(_)));
        }
    }

    #[test]
    fn filing_against_executed_booking_starts_pending() {
        let (dispute, _) = filed_dispute();
        assert_eq!(dispute.status(), DisputeStatus::Pending);
        assert_eq!(dispute.dispute_type(), Some(DisputeType::DamageClaim));
        assert_eq!(dispute.message_count(), 0);
        assert_eq!(dispute.evidence_count(), 0);
    }

    #[test]
    fn messages_keep_creation_order_and_grow_the_count() {
        let (mut dispute, id) = filed_dispute();
        let sender = Actor::customer(UserId::new());

        let mut posted = Vec::new();
        for i in 0..3 {
            let message_id = DisputeMessageId::new(AggregateId::new());
            execute(
                &mut dispute,
                &DisputeCommand::PostMessage(PostMessage {
                    dispute_id: id,
                    message_id,
                    sender,
                    text: format!("message {i}"),
                    occurred_at: test_time() + chrono::Duration::minutes(i),
                }),
            )
            .unwrap();
            posted.push(message_id);
        }

        let order: Vec<_> = dispute.messages().map(|m| m.message_id).collect();
        assert_eq!(order, posted);
        assert_eq!(dispute.message_count(), 3);

        let times: Vec<_> = dispute.messages().map(|m| m.created_at).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn posting_does_not_change_dispute_status() {
        let (mut dispute, id) = filed_dispute();
        execute(
            &mut dispute,
            &DisputeCommand::PostMessage(PostMessage {
                dispute_id: id,
                message_id: DisputeMessageId::new(AggregateId::new()),
                sender: Actor::transport(UserId::new()),
                text: "We are looking into it.".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(dispute.status(), DisputeStatus::Pending);
    }

    #[test]
    fn evidence_attaches_by_reference_and_counts() {
        let (mut dispute, id) = filed_dispute();
        execute(
            &mut dispute,
            &DisputeCommand::AttachEvidence(AttachEvidence {
                dispute_id: id,
                evidence: EvidenceRef {
                    evidence_type: "PHOTO".to_string(),
                    file_name: "table.jpg".to_string(),
                    file_url: "https://evidence.example/table.jpg".to_string(),
                },
                actor: Actor::customer(UserId::new()),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(dispute.evidence_count(), 1);
        assert_eq!(dispute.evidence()[0].file_name, "table.jpg");
    }

    #[test]
    fn review_transitions_from_pending_and_under_review_only() {
        let (mut dispute, id, resolver) = reviewed_dispute();
        assert_eq!(dispute.status(), DisputeStatus::UnderReview);

        // UNDER_REVIEW -> ESCALATED reassigns the resolver.
        let new_resolver = UserId::new();
        execute(
            &mut dispute,
            &DisputeCommand::TransitionReview(TransitionReview {
                dispute_id: id,
                target: DisputeReviewTarget::Escalated,
                assignee: Some(new_resolver),
                actor: resolver,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(dispute.status(), DisputeStatus::Escalated);
        assert_eq!(dispute.assigned_to(), Some(new_resolver));

        // Escalated is not a valid source for further review transitions.
        let err = dispute
            .handle(&DisputeCommand::TransitionReview(TransitionReview {
                dispute_id: id,
                target: DisputeReviewTarget::UnderReview,
                assignee: None,
                actor: resolver,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn review_transition_is_idempotent_under_retry() {
        let (mut dispute, id, resolver) = reviewed_dispute();
        let version = dispute.version();

        let events = execute(
            &mut dispute,
            &DisputeCommand::TransitionReview(TransitionReview {
                dispute_id: id,
                target: DisputeReviewTarget::UnderReview,
                assignee: None,
                actor: resolver,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(events.is_empty());
        assert_eq!(dispute.version(), version);
    }

    #[test]
    fn resolution_requires_review_first() {
        let (dispute, id) = filed_dispute();
        let err = dispute
            .handle(&DisputeCommand::Resolve(Resolve {
                dispute_id: id,
                outcome: DisputeOutcome::Resolved,
                resolution_notes: "refunded".to_string(),
                resolved_by: Actor::manager(UserId::new()),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn resolution_writes_fields_exactly_once_and_closes_the_dispute() {
        let (mut dispute, id, resolver) = reviewed_dispute();

        execute(
            &mut dispute,
            &DisputeCommand::Resolve(Resolve {
                dispute_id: id,
                outcome: DisputeOutcome::Resolved,
                resolution_notes: "Partial refund issued.".to_string(),
                resolved_by: resolver,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(dispute.status(), DisputeStatus::Resolved);
        assert_eq!(dispute.resolution_notes(), Some("Partial refund issued."));
        assert_eq!(dispute.resolved_by(), Some(resolver.user_id));
        assert_eq!(dispute.resolved_at(), Some(test_time()));

        // Terminal: further discussion and resolution both fail.
        let err = dispute
            .handle(&DisputeCommand::PostMessage(PostMessage {
                dispute_id: id,
                message_id: DisputeMessageId::new(AggregateId::new()),
                sender: resolver,
                text: "one more thing".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        let err = dispute
            .handle(&DisputeCommand::Resolve(Resolve {
                dispute_id: id,
                outcome: DisputeOutcome::Rejected,
                resolution_notes: "changed my mind".to_string(),
                resolved_by: resolver,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        // Resolution fields are untouched by the rejected attempts.
        assert_eq!(dispute.status(), DisputeStatus::Resolved);
        assert_eq!(dispute.resolution_notes(), Some("Partial refund issued."));
    }

    #[test]
    fn rejected_outcome_is_terminal_too() {
        let (mut dispute, id, resolver) = reviewed_dispute();

        execute(
            &mut dispute,
            &DisputeCommand::Resolve(Resolve {
                dispute_id: id,
                outcome: DisputeOutcome::Rejected,
                resolution_notes: "No fault found.".to_string(),
                resolved_by: resolver,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(dispute.status(), DisputeStatus::Rejected);

        let err = dispute
            .handle(&DisputeCommand::AttachEvidence(AttachEvidence {
                dispute_id: id,
                evidence: EvidenceRef {
                    evidence_type: "PHOTO".to_string(),
                    file_name: "late.jpg".to_string(),
                    file_url: "https://evidence.example/late.jpg".to_string(),
                },
                actor: resolver,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let (dispute, id) = filed_dispute();
        let cmd = DisputeCommand::PostMessage(PostMessage {
            dispute_id: id,
            message_id: DisputeMessageId::new(AggregateId::new()),
            sender: Actor::customer(UserId::new()),
            text: "hello".to_string(),
            occurred_at: test_time(),
        });

        let version = dispute.version();
        let events1 = dispute.handle(&cmd).unwrap();
        let events2 = dispute.handle(&cmd).unwrap();
        assert_eq!(dispute.version(), version);
        assert_eq!(events1, events2);
    }
}
