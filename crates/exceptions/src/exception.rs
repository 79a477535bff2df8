use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use haulflow_auth::Actor;
use haulflow_bookings::BookingId;
use haulflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use haulflow_events::Event;

/// Exception identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExceptionId(pub AggregateId);

impl ExceptionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ExceptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Exception status lifecycle. `Resolved` is the only terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionStatus {
    Pending,
    InProgress,
    Resolved,
    Escalated,
}

impl ExceptionStatus {
    pub fn is_terminal(self) -> bool {
        self == ExceptionStatus::Resolved
    }
}

/// Exception priority, ordered from lowest to highest urgency.
///
/// The `Ord` derivation is load-bearing: escalation may raise priority but
/// the system never silently lowers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionPriority {
    Low,
    Medium,
    High,
    Urgent,
}

/// Aggregate root: Exception.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    id: ExceptionId,
    title: String,
    exception_type: String,
    description: String,
    status: ExceptionStatus,
    priority: ExceptionPriority,
    /// Externally-owned incident reference, if any.
    incident_id: Option<u64>,
    booking_id: Option<BookingId>,
    assigned_to: Option<UserId>,
    resolution_notes: Option<String>,
    resolved_by: Option<UserId>,
    resolved_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Exception {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ExceptionId) -> Self {
        Self {
            id,
            title: String::new(),
            exception_type: String::new(),
            description: String::new(),
            status: ExceptionStatus::Pending,
            priority: ExceptionPriority::Medium,
            incident_id: None,
            booking_id: None,
            assigned_to: None,
            resolution_notes: None,
            resolved_by: None,
            resolved_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ExceptionId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn exception_type(&self) -> &str {
        &self.exception_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> ExceptionStatus {
        self.status
    }

    pub fn priority(&self) -> ExceptionPriority {
        self.priority
    }

    pub fn incident_id(&self) -> Option<u64> {
        self.incident_id
    }

    pub fn booking_id(&self) -> Option<BookingId> {
        self.booking_id
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

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Exception {
    type Id = ExceptionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenException.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenException {
    pub exception_id: ExceptionId,
    pub title: String,
    pub exception_type: String,
    pub description: String,
    pub priority: ExceptionPriority,
    pub incident_id: Option<u64>,
    pub booking_id: Option<BookingId>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: BeginWork (PENDING/ESCALATED -> IN_PROGRESS).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginWork {
    pub exception_id: ExceptionId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Escalate.
///
/// May raise priority and/or reassign, never lowers priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalate {
    pub exception_id: ExceptionId,
    pub new_priority: Option<ExceptionPriority>,
    pub assignee: Option<UserId>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ResolveException.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveException {
    pub exception_id: ExceptionId,
    pub resolution_notes: String,
    pub resolved_by: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExceptionCommand {
    OpenException(OpenException),
    BeginWork(BeginWork),
    Escalate(Escalate),
    ResolveException(ResolveException),
}

impl haulflow_events::Command for ExceptionCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            ExceptionCommand::OpenException(c) => c.exception_id.0,
            ExceptionCommand::BeginWork(c) => c.exception_id.0,
            ExceptionCommand::Escalate(c) => c.exception_id.0,
            ExceptionCommand::ResolveException(c) => c.exception_id.0,
        }
    }
}

/// Event: ExceptionOpened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionOpened {
    pub exception_id: ExceptionId,
    pub title: String,
    pub exception_type: String,
    pub description: String,
    pub priority: ExceptionPriority,
    pub incident_id: Option<u64>,
    pub booking_id: Option<BookingId>,
    pub opened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExceptionWorkStarted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionWorkStarted {
    pub exception_id: ExceptionId,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExceptionEscalated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionEscalated {
    pub exception_id: ExceptionId,
    pub from_priority: ExceptionPriority,
    pub new_priority: ExceptionPriority,
    pub assignee: Option<UserId>,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExceptionResolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionResolved {
    pub exception_id: ExceptionId,
    pub resolution_notes: String,
    pub resolved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExceptionEvent {
    ExceptionOpened(ExceptionOpened),
    ExceptionWorkStarted(ExceptionWorkStarted),
    ExceptionEscalated(ExceptionEscalated),
    ExceptionResolved(ExceptionResolved),
}

impl Event for ExceptionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ExceptionEvent::ExceptionOpened(_) => "exception.opened",
            ExceptionEvent::ExceptionWorkStarted(_) => "exception.work_started",
            ExceptionEvent::ExceptionEscalated(_) => "exception.escalated",
            ExceptionEvent::ExceptionResolved(_) => "exception.resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ExceptionEvent::ExceptionOpened(e) => e.occurred_at,
            ExceptionEvent::ExceptionWorkStarted(e) => e.occurred_at,
            ExceptionEvent::ExceptionEscalated(e) => e.occurred_at,
            ExceptionEvent::ExceptionResolved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Exception {
    type Command = ExceptionCommand;
    type Event = ExceptionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ExceptionEvent::ExceptionOpened(e) => {
                self.id = e.exception_id;
                self.title = e.title.clone();
                self.exception_type = e.exception_type.clone();
                self.description = e.description.clone();
                self.status = ExceptionStatus::Pending;
                self.priority = e.priority;
                self.incident_id = e.incident_id;
                self.booking_id = e.booking_id;
                self.created = true;
            }
            ExceptionEvent::ExceptionWorkStarted(e) => {
                self.status = ExceptionStatus::InProgress;
                self.assigned_to = Some(e.actor_id);
            }
            ExceptionEvent::ExceptionEscalated(e) => {
                self.status = ExceptionStatus::Escalated;
                self.priority = e.new_priority;
                if let Some(assignee) = e.assignee {
                    self.assigned_to = Some(assignee);
                }
            }
            ExceptionEvent::ExceptionResolved(e) => {
                self.status = ExceptionStatus::Resolved;
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
            ExceptionCommand::OpenException(cmd) => self.handle_open(cmd),
            ExceptionCommand::BeginWork(cmd) => self.handle_begin_work(cmd),
            ExceptionCommand::Escalate(cmd) => self.handle_escalate(cmd),
            ExceptionCommand::ResolveException(cmd) => self.handle_resolve(cmd),
        }
    }
}

impl Exception {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if self.created {
            Ok(())
        } else {
            Err(DomainError::not_found())
        }
    }

    fn ensure_unresolved(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            Err(DomainError::invalid_state(
                "exception is resolved and immutable",
            ))
        } else {
            Ok(())
        }
    }

    fn handle_open(&self, cmd: &OpenException) -> Result<Vec<ExceptionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("exception already exists"));
        }

        if cmd.title.trim().is_empty() {
            return Err(DomainError::invalid_argument("exception title is required"));
        }

        Ok(vec![ExceptionEvent::ExceptionOpened(ExceptionOpened {
            exception_id: cmd.exception_id,
            title: cmd.title.clone(),
            exception_type: cmd.exception_type.clone(),
            description: cmd.description.clone(),
            priority: cmd.priority,
            incident_id: cmd.incident_id,
            booking_id: cmd.booking_id,
            opened_by: cmd.actor.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_begin_work(&self, cmd: &BeginWork) -> Result<Vec<ExceptionEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_unresolved()?;

        // Idempotent under retry.
        if self.status == ExceptionStatus::InProgress {
            return Ok(vec![]);
        }

        Ok(vec![ExceptionEvent::ExceptionWorkStarted(
            ExceptionWorkStarted {
                exception_id: cmd.exception_id,
                actor_id: cmd.actor.user_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_escalate(&self, cmd: &Escalate) -> Result<Vec<ExceptionEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_unresolved()?;

        let new_priority = match cmd.new_priority {
            Some(p) if p < self.priority => {
                return Err(DomainError::invalid_argument(format!(
                    "escalation may raise priority, never lower it ({:?} -> {:?})",
                    self.priority, p
                )));
            }
            Some(p) => p,
            None => self.priority,
        };

        Ok(vec![ExceptionEvent::ExceptionEscalated(ExceptionEscalated {
            exception_id: cmd.exception_id,
            from_priority: self.priority,
            new_priority,
            assignee: cmd.assignee,
            actor_id: cmd.actor.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resolve(&self, cmd: &ResolveException) -> Result<Vec<ExceptionEvent>, DomainError> {
        self.ensure_created()?;

        if !matches!(
            self.status,
            ExceptionStatus::InProgress | ExceptionStatus::Escalated
        ) {
            return Err(DomainError::invalid_state(format!(
                "exceptions are resolved from IN_PROGRESS or ESCALATED \
                 (current status: {:?})",
                self.status
            )));
        }

        Ok(vec![ExceptionEvent::ExceptionResolved(ExceptionResolved {
            exception_id: cmd.exception_id,
            resolution_notes: cmd.resolution_notes.clone(),
            resolved_by: cmd.resolved_by.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
