use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use haulflow_auth::{Actor, Role};
use haulflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use haulflow_events::Event;

use crate::negotiation::{
    CounterOffer, CounterOfferDecision, CounterOfferId, CounterOfferStatus, Quotation,
    QuotationId, QuotationStatus,
};
use crate::status::BookingStatus;

/// Booking identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(pub AggregateId);

impl BookingId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BookingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Pickup or delivery descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSpec {
    pub address: String,
    pub district: Option<String>,
    pub city: Option<String>,
}

/// Preferred service window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

impl TimeWindow {
    pub fn is_well_formed(&self) -> bool {
        self.earliest <= self.latest
    }
}

/// Item size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemSize {
    S,
    M,
    L,
}

/// One item to be transported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub name: String,
    pub quantity: u32,
    pub size: Option<ItemSize>,
    pub is_fragile: bool,
    pub requires_disassembly: bool,
    pub requires_packaging: bool,
}

/// Aggregate root: Booking.
///
/// The booking, its quotations, and their counter-offers are one consistency
/// unit: every invariant that spans them ("at most one ACCEPTED quotation",
/// "at most one PENDING counter-offer per quotation") is enforced inside a
/// single `handle` call and committed as a single event batch.
///
/// Children live in arenas keyed by identity; ordering is kept in separate
/// id lists (`quotation_order`, `Quotation::counter_offers`).
#[derive(Debug, Clone, PartialEq)]
pub struct Booking {
    id: BookingId,
    customer_id: Option<UserId>,
    status: BookingStatus,
    pickup: Option<LocationSpec>,
    delivery: Option<LocationSpec>,
    window: Option<TimeWindow>,
    items: Vec<ItemSpec>,
    quotations: HashMap<QuotationId, Quotation>,
    quotation_order: Vec<QuotationId>,
    counter_offers: HashMap<CounterOfferId, CounterOffer>,
    version: u64,
    created: bool,
}

impl Booking {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: BookingId) -> Self {
        Self {
            id,
            customer_id: None,
            status: BookingStatus::Pending,
            pickup: None,
            delivery: None,
            window: None,
            items: Vec::new(),
            quotations: HashMap::new(),
            quotation_order: Vec::new(),
            counter_offers: HashMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> BookingId {
        self.id
    }

    pub fn customer_id(&self) -> Option<UserId> {
        self.customer_id
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn pickup(&self) -> Option<&LocationSpec> {
        self.pickup.as_ref()
    }

    pub fn delivery(&self) -> Option<&LocationSpec> {
        self.delivery.as_ref()
    }

    pub fn window(&self) -> Option<TimeWindow> {
        self.window
    }

    pub fn items(&self) -> &[ItemSpec] {
        &self.items
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Quotations in submission order.
    pub fn quotations(&self) -> impl Iterator<Item = &Quotation> {
        self.quotation_order
            .iter()
            .filter_map(|id| self.quotations.get(id))
    }

    pub fn quotation(&self, id: QuotationId) -> Option<&Quotation> {
        self.quotations.get(&id)
    }

    pub fn counter_offer(&self, id: CounterOfferId) -> Option<&CounterOffer> {
        self.counter_offers.get(&id)
    }

    /// Counter-offers of one quotation, in creation order.
    pub fn counter_offers_for(&self, quotation_id: QuotationId) -> Vec<&CounterOffer> {
        self.quotations
            .get(&quotation_id)
            .map(|q| {
                q.counter_offers
                    .iter()
                    .filter_map(|id| self.counter_offers.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn accepted_quotation(&self) -> Option<&Quotation> {
        self.quotations()
            .find(|q| q.status == QuotationStatus::Accepted)
    }

    /// The at-most-one pending counter-offer on a quotation.
    pub fn pending_counter_offer(&self, quotation_id: QuotationId) -> Option<&CounterOffer> {
        self.counter_offers_for(quotation_id)
            .into_iter()
            .find(|o| o.status == CounterOfferStatus::Pending)
    }

    /// Most recently created counter-offer on a quotation, any status.
    fn latest_counter_offer(&self, quotation_id: QuotationId) -> Option<&CounterOffer> {
        self.quotations
            .get(&quotation_id)
            .and_then(|q| q.counter_offers.last())
            .and_then(|id| self.counter_offers.get(id))
    }

    fn is_negotiation_party(&self, quotation: &Quotation, user_id: UserId) -> bool {
        self.customer_id == Some(user_id) || quotation.transport_id == user_id
    }
}

impl AggregateRoot for Booking {
    type Id = BookingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateBooking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBooking {
    pub booking_id: BookingId,
    pub customer_id: UserId,
    pub pickup: LocationSpec,
    pub delivery: LocationSpec,
    pub window: Option<TimeWindow>,
    pub items: Vec<ItemSpec>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RequestTransition (including cancellation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTransition {
    pub booking_id: BookingId,
    pub target: BookingStatus,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitQuotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitQuotation {
    pub booking_id: BookingId,
    pub quotation_id: QuotationId,
    pub transport_id: UserId,
    /// Price in smallest currency unit.
    pub price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcceptQuotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptQuotation {
    pub booking_id: BookingId,
    pub quotation_id: QuotationId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitCounterOffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitCounterOffer {
    pub booking_id: BookingId,
    pub quotation_id: QuotationId,
    pub counter_offer_id: CounterOfferId,
    pub offered_price: u64,
    pub reason: Option<String>,
    pub actor: Actor,
    /// Absolute expiry, computed by the caller from the injected clock and
    /// the configured negotiation window.
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RespondToCounterOffer.
///
/// `occurred_at` is the injected "now": the expiry check is a pure function
/// of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondToCounterOffer {
    pub booking_id: BookingId,
    pub counter_offer_id: CounterOfferId,
    pub decision: CounterOfferDecision,
    pub message: Option<String>,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireCounterOffers (batch sweep against one booking).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpireCounterOffers {
    pub booking_id: BookingId,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BookingCommand {
    CreateBooking(CreateBooking),
    RequestTransition(RequestTransition),
    SubmitQuotation(SubmitQuotation),
    AcceptQuotation(AcceptQuotation),
    SubmitCounterOffer(SubmitCounterOffer),
    RespondToCounterOffer(RespondToCounterOffer),
    ExpireCounterOffers(ExpireCounterOffers),
}

impl haulflow_events::Command for BookingCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            BookingCommand::CreateBooking(c) => c.booking_id.0,
            BookingCommand::RequestTransition(c) => c.booking_id.0,
            BookingCommand::SubmitQuotation(c) => c.booking_id.0,
            BookingCommand::AcceptQuotation(c) => c.booking_id.0,
            BookingCommand::SubmitCounterOffer(c) => c.booking_id.0,
            BookingCommand::RespondToCounterOffer(c) => c.booking_id.0,
            BookingCommand::ExpireCounterOffers(c) => c.booking_id.0,
        }
    }
}

/// Event: BookingCreated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingCreated {
    pub booking_id: BookingId,
    pub customer_id: UserId,
    pub pickup: LocationSpec,
    pub delivery: LocationSpec,
    pub window: Option<TimeWindow>,
    pub items: Vec<ItemSpec>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BookingTransitioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingTransitioned {
    pub booking_id: BookingId,
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub actor_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuotationSubmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotationSubmitted {
    pub booking_id: BookingId,
    pub quotation_id: QuotationId,
    pub transport_id: UserId,
    pub price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuotationAccepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotationAccepted {
    pub booking_id: BookingId,
    pub quotation_id: QuotationId,
    pub accepted_by: UserId,
    /// Final agreed price (the quotation's reference price at acceptance).
    pub price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuotationSuperseded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotationSuperseded {
    pub booking_id: BookingId,
    pub quotation_id: QuotationId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CounterOfferSubmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterOfferSubmitted {
    pub booking_id: BookingId,
    pub quotation_id: QuotationId,
    pub counter_offer_id: CounterOfferId,
    pub offered_by: UserId,
    pub offered_by_role: Role,
    /// Reference price the offer was computed against.
    pub original_price: u64,
    pub offered_price: u64,
    pub reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CounterOfferSuperseded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterOfferSuperseded {
    pub booking_id: BookingId,
    pub quotation_id: QuotationId,
    pub counter_offer_id: CounterOfferId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CounterOfferAccepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterOfferAccepted {
    pub booking_id: BookingId,
    pub quotation_id: QuotationId,
    pub counter_offer_id: CounterOfferId,
    /// Becomes the quotation's new reference price.
    pub agreed_price: u64,
    pub responded_by: UserId,
    pub message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CounterOfferRejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterOfferRejected {
    pub booking_id: BookingId,
    pub quotation_id: QuotationId,
    pub counter_offer_id: CounterOfferId,
    pub responded_by: UserId,
    pub message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CounterOfferExpired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterOfferExpired {
    pub booking_id: BookingId,
    pub quotation_id: QuotationId,
    pub counter_offer_id: CounterOfferId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BookingEvent {
    BookingCreated(BookingCreated),
    BookingTransitioned(BookingTransitioned),
    QuotationSubmitted(QuotationSubmitted),
    QuotationAccepted(QuotationAccepted),
    QuotationSuperseded(QuotationSuperseded),
    CounterOfferSubmitted(CounterOfferSubmitted),
    CounterOfferSuperseded(CounterOfferSuperseded),
    CounterOfferAccepted(CounterOfferAccepted),
    CounterOfferRejected(CounterOfferRejected),
    CounterOfferExpired(CounterOfferExpired),
}

impl Event for BookingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BookingEvent::BookingCreated(_) => "booking.created",
            BookingEvent::BookingTransitioned(_) => "booking.transitioned",
            BookingEvent::QuotationSubmitted(_) => "booking.quotation.submitted",
            BookingEvent::QuotationAccepted(_) => "booking.quotation.accepted",
            BookingEvent::QuotationSuperseded(_) => "booking.quotation.superseded",
            BookingEvent::CounterOfferSubmitted(_) => "booking.counter_offer.submitted",
            BookingEvent::CounterOfferSuperseded(_) => "booking.counter_offer.superseded",
            BookingEvent::CounterOfferAccepted(_) => "booking.counter_offer.accepted",
            BookingEvent::CounterOfferRejected(_) => "booking.counter_offer.rejected",
            BookingEvent::CounterOfferExpired(_) => "booking.counter_offer.expired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BookingEvent::BookingCreated(e) => e.occurred_at,
            BookingEvent::BookingTransitioned(e) => e.occurred_at,
            BookingEvent::QuotationSubmitted(e) => e.occurred_at,
            BookingEvent::QuotationAccepted(e) => e.occurred_at,
            BookingEvent::QuotationSuperseded(e) => e.occurred_at,
            BookingEvent::CounterOfferSubmitted(e) => e.occurred_at,
            BookingEvent::CounterOfferSuperseded(e) => e.occurred_at,
            BookingEvent::CounterOfferAccepted(e) => e.occurred_at,
            BookingEvent::CounterOfferRejected(e) => e.occurred_at,
            BookingEvent::CounterOfferExpired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Booking {
    type Command = BookingCommand;
    type Event = BookingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BookingEvent::BookingCreated(e) => {
                self.id = e.booking_id;
                self.customer_id = Some(e.customer_id);
                self.status = BookingStatus::Pending;
                self.pickup = Some(e.pickup.clone());
                self.delivery = Some(e.delivery.clone());
                self.window = e.window;
                self.items = e.items.clone();
                self.created = true;
            }
            BookingEvent::BookingTransitioned(e) => {
                self.status = e.to;
            }
            BookingEvent::QuotationSubmitted(e) => {
                self.quotations.insert(
                    e.quotation_id,
                    Quotation {
                        quotation_id: e.quotation_id,
                        transport_id: e.transport_id,
                        price: e.price,
                        reference_price: e.price,
                        status: QuotationStatus::Pending,
                        submitted_at: e.occurred_at,
                        counter_offers: Vec::new(),
                    },
                );
                self.quotation_order.push(e.quotation_id);
            }
            BookingEvent::QuotationAccepted(e) => {
                if let Some(q) = self.quotations.get_mut(&e.quotation_id) {
                    q.status = QuotationStatus::Accepted;
                }
            }
            BookingEvent::QuotationSuperseded(e) => {
                if let Some(q) = self.quotations.get_mut(&e.quotation_id) {
                    q.status = QuotationStatus::Superseded;
                }
            }
            BookingEvent::CounterOfferSubmitted(e) => {
                self.counter_offers.insert(
                    e.counter_offer_id,
                    CounterOffer {
                        counter_offer_id: e.counter_offer_id,
                        quotation_id: e.quotation_id,
                        offered_by: e.offered_by,
                        offered_by_role: e.offered_by_role,
                        original_price: e.original_price,
                        offered_price: e.offered_price,
                        reason: e.reason.clone(),
                        status: CounterOfferStatus::Pending,
                        created_at: e.occurred_at,
                        expires_at: e.expires_at,
                        responded_by: None,
                        responded_at: None,
                        response_message: None,
                    },
                );
                if let Some(q) = self.quotations.get_mut(&e.quotation_id) {
                    q.counter_offers.push(e.counter_offer_id);
                }
            }
            BookingEvent::CounterOfferSuperseded(e) => {
                if let Some(o) = self.counter_offers.get_mut(&e.counter_offer_id) {
                    o.status = CounterOfferStatus::Superseded;
                }
            }
            BookingEvent::CounterOfferAccepted(e) => {
                if let Some(o) = self.counter_offers.get_mut(&e.counter_offer_id) {
                    o.status = CounterOfferStatus::Accepted;
                    o.responded_by = Some(e.responded_by);
                    o.responded_at = Some(e.occurred_at);
                    o.response_message = e.message.clone();
                }
                if let Some(q) = self.quotations.get_mut(&e.quotation_id) {
                    q.reference_price = e.agreed_price;
                }
            }
            BookingEvent::CounterOfferRejected(e) => {
                if let Some(o) = self.counter_offers.get_mut(&e.counter_offer_id) {
                    o.status = CounterOfferStatus::Rejected;
                    o.responded_by = Some(e.responded_by);
                    o.responded_at = Some(e.occurred_at);
                    o.response_message = e.message.clone();
                }
            }
            BookingEvent::CounterOfferExpired(e) => {
                if let Some(o) = self.counter_offers.get_mut(&e.counter_offer_id) {
                    o.status = CounterOfferStatus::Expired;
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BookingCommand::CreateBooking(cmd) => self.handle_create(cmd),
            BookingCommand::RequestTransition(cmd) => self.handle_request_transition(cmd),
            BookingCommand::SubmitQuotation(cmd) => self.handle_submit_quotation(cmd),
            BookingCommand::AcceptQuotation(cmd) => self.handle_accept_quotation(cmd),
            BookingCommand::SubmitCounterOffer(cmd) => self.handle_submit_counter_offer(cmd),
            BookingCommand::RespondToCounterOffer(cmd) => self.handle_respond(cmd),
            BookingCommand::ExpireCounterOffers(cmd) => self.handle_expire(cmd),
        }
    }
}

impl Booking {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if self.created {
            Ok(())
        } else {
            Err(DomainError::not_found())
        }
    }

    fn handle_create(&self, cmd: &CreateBooking) -> Result<Vec<BookingEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("booking already exists"));
        }

        if let Some(window) = &cmd.window {
            if !window.is_well_formed() {
                return Err(DomainError::invalid_argument(
                    "time window must not end before it starts",
                ));
            }
        }

        if cmd.items.is_empty() {
            return Err(DomainError::invalid_argument(
                "booking requires at least one item",
            ));
        }
        if cmd.items.iter().any(|i| i.quantity == 0) {
            return Err(DomainError::invalid_argument(
                "item quantity must be positive",
            ));
        }

        Ok(vec![BookingEvent::BookingCreated(BookingCreated {
            booking_id: cmd.booking_id,
            customer_id: cmd.customer_id,
            pickup: cmd.pickup.clone(),
            delivery: cmd.delivery.clone(),
            window: cmd.window,
            items: cmd.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_request_transition(
        &self,
        cmd: &RequestTransition,
    ) -> Result<Vec<BookingEvent>, DomainError> {
        self.ensure_created()?;

        // Idempotent under retry: re-requesting the applied target is a no-op,
        // not an error (enables at-least-once command delivery).
        if cmd.target == self.status {
            return Ok(vec![]);
        }

        self.status.check_transition(cmd.target)?;

        Ok(vec![BookingEvent::BookingTransitioned(BookingTransitioned {
            booking_id: cmd.booking_id,
            from: self.status,
            to: cmd.target,
            actor_id: Some(cmd.actor.user_id),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit_quotation(
        &self,
        cmd: &SubmitQuotation,
    ) -> Result<Vec<BookingEvent>, DomainError> {
        self.ensure_created()?;

        // Zero reference price would make percentage change undefined for
        // every later counter-offer; reject it here so it is unreachable by
        // construction.
        if cmd.price == 0 {
            return Err(DomainError::invalid_argument(
                "quotation price must be positive",
            ));
        }

        if !matches!(self.status, BookingStatus::Pending | BookingStatus::Quoted) {
            return Err(DomainError::invalid_state(format!(
                "quotations can only be submitted while the booking is open for quotes \
                 (current status: {})",
                self.status
            )));
        }

        if self.quotations.contains_key(&cmd.quotation_id) {
            return Err(DomainError::conflict("quotation already exists"));
        }

        let mut events = vec![BookingEvent::QuotationSubmitted(QuotationSubmitted {
            booking_id: cmd.booking_id,
            quotation_id: cmd.quotation_id,
            transport_id: cmd.transport_id,
            price: cmd.price,
            occurred_at: cmd.occurred_at,
        })];

        // First quotation moves the booking to QUOTED.
        if self.status == BookingStatus::Pending {
            events.push(BookingEvent::BookingTransitioned(BookingTransitioned {
                booking_id: cmd.booking_id,
                from: BookingStatus::Pending,
                to: BookingStatus::Quoted,
                actor_id: Some(cmd.transport_id),
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_accept_quotation(
        &self,
        cmd: &AcceptQuotation,
    ) -> Result<Vec<BookingEvent>, DomainError> {
        self.ensure_created()?;

        let quotation = self
            .quotations
            .get(&cmd.quotation_id)
            .ok_or(DomainError::NotFound)?;

        if self.customer_id != Some(cmd.actor.user_id) {
            return Err(DomainError::forbidden(
                "only the booking's customer may accept a quotation",
            ));
        }

        if quotation.status != QuotationStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "quotation is not pending (status: {:?})",
                quotation.status
            )));
        }

        // Accepting confirms the booking; the transition rule also guards the
        // "at most one accepted quotation" invariant, since a second accept
        // would find the booking already CONFIRMED.
        self.status.check_transition(BookingStatus::Confirmed)?;

        let mut events = Vec::new();

        // Close out negotiation on every quotation: pending counter-offers
        // are superseded, pending sibling quotations are superseded.
        for sibling in self.quotations() {
            if let Some(pending) = self.pending_counter_offer(sibling.quotation_id) {
                events.push(BookingEvent::CounterOfferSuperseded(CounterOfferSuperseded {
                    booking_id: cmd.booking_id,
                    quotation_id: sibling.quotation_id,
                    counter_offer_id: pending.counter_offer_id,
                    occurred_at: cmd.occurred_at,
                }));
            }
            if sibling.quotation_id != cmd.quotation_id
                && sibling.status == QuotationStatus::Pending
            {
                events.push(BookingEvent::QuotationSuperseded(QuotationSuperseded {
                    booking_id: cmd.booking_id,
                    quotation_id: sibling.quotation_id,
                    occurred_at: cmd.occurred_at,
                }));
            }
        }

        events.push(BookingEvent::QuotationAccepted(QuotationAccepted {
            booking_id: cmd.booking_id,
            quotation_id: cmd.quotation_id,
            accepted_by: cmd.actor.user_id,
            price: quotation.reference_price,
            occurred_at: cmd.occurred_at,
        }));

        events.push(BookingEvent::BookingTransitioned(BookingTransitioned {
            booking_id: cmd.booking_id,
            from: self.status,
            to: BookingStatus::Confirmed,
            actor_id: Some(cmd.actor.user_id),
            occurred_at: cmd.occurred_at,
        }));

        Ok(events)
    }

    fn handle_submit_counter_offer(
        &self,
        cmd: &SubmitCounterOffer,
    ) -> Result<Vec<BookingEvent>, DomainError> {
        self.ensure_created()?;

        let quotation = self
            .quotations
            .get(&cmd.quotation_id)
            .ok_or(DomainError::NotFound)?;

        if !self.is_negotiation_party(quotation, cmd.actor.user_id) {
            return Err(DomainError::forbidden("not a party to this negotiation"));
        }

        if quotation.status != QuotationStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "counter-offers are only valid on pending quotations (status: {:?})",
                quotation.status
            )));
        }

        if cmd.offered_price == 0 {
            return Err(DomainError::invalid_argument(
                "counter-offer price must be positive",
            ));
        }
        if cmd.offered_price == quotation.reference_price {
            return Err(DomainError::invalid_argument(
                "counter-offer must change the price",
            ));
        }
        if cmd.expires_at <= cmd.occurred_at {
            return Err(DomainError::invalid_argument(
                "counter-offer expiry must be in the future",
            ));
        }

        // Parties alternate: the same actor may not follow up its own offer
        // until the counterpart has responded. An offer that lapsed or was
        // superseded is not a response.
        if let Some(latest) = self.latest_counter_offer(cmd.quotation_id) {
            if latest.offered_by == cmd.actor.user_id
                && matches!(
                    latest.status,
                    CounterOfferStatus::Pending | CounterOfferStatus::Expired
                )
            {
                return Err(DomainError::forbidden(
                    "await the counterpart's response before submitting another counter-offer",
                ));
            }
        }

        let mut events = Vec::new();

        // A counter from the other side supersedes the outstanding pending
        // offer, atomically with creating the new one.
        if let Some(pending) = self.pending_counter_offer(cmd.quotation_id) {
            events.push(BookingEvent::CounterOfferSuperseded(CounterOfferSuperseded {
                booking_id: cmd.booking_id,
                quotation_id: cmd.quotation_id,
                counter_offer_id: pending.counter_offer_id,
                occurred_at: cmd.occurred_at,
            }));
        }

        events.push(BookingEvent::CounterOfferSubmitted(CounterOfferSubmitted {
            booking_id: cmd.booking_id,
            quotation_id: cmd.quotation_id,
            counter_offer_id: cmd.counter_offer_id,
            offered_by: cmd.actor.user_id,
            offered_by_role: cmd.actor.role,
            original_price: quotation.reference_price,
            offered_price: cmd.offered_price,
            reason: cmd.reason.clone(),
            expires_at: cmd.expires_at,
            occurred_at: cmd.occurred_at,
        }));

        Ok(events)
    }

    fn handle_respond(
        &self,
        cmd: &RespondToCounterOffer,
    ) -> Result<Vec<BookingEvent>, DomainError> {
        self.ensure_created()?;

        let offer = self
            .counter_offers
            .get(&cmd.counter_offer_id)
            .ok_or(DomainError::NotFound)?;
        let quotation = self
            .quotations
            .get(&offer.quotation_id)
            .ok_or(DomainError::NotFound)?;

        // Expiry first: the caller learns the truth even when it would also
        // have been forbidden, and the service repairs the state.
        if offer.status == CounterOfferStatus::Expired
            || (offer.status == CounterOfferStatus::Pending && offer.is_expired(cmd.occurred_at))
        {
            return Err(DomainError::expired(format!(
                "counter-offer expired at {}",
                offer.expires_at
            )));
        }

        if !self.is_negotiation_party(quotation, cmd.actor.user_id) {
            return Err(DomainError::forbidden("not a party to this negotiation"));
        }
        if offer.offered_by == cmd.actor.user_id {
            return Err(DomainError::forbidden(
                "the offering party cannot respond to its own counter-offer",
            ));
        }

        if offer.status != CounterOfferStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "counter-offer is not pending (status: {:?})",
                offer.status
            )));
        }

        let event = match cmd.decision {
            CounterOfferDecision::Accept => {
                BookingEvent::CounterOfferAccepted(CounterOfferAccepted {
                    booking_id: cmd.booking_id,
                    quotation_id: offer.quotation_id,
                    counter_offer_id: cmd.counter_offer_id,
                    agreed_price: offer.offered_price,
                    responded_by: cmd.actor.user_id,
                    message: cmd.message.clone(),
                    occurred_at: cmd.occurred_at,
                })
            }
            CounterOfferDecision::Reject => {
                BookingEvent::CounterOfferRejected(CounterOfferRejected {
                    booking_id: cmd.booking_id,
                    quotation_id: offer.quotation_id,
                    counter_offer_id: cmd.counter_offer_id,
                    responded_by: cmd.actor.user_id,
                    message: cmd.message.clone(),
                    occurred_at: cmd.occurred_at,
                })
            }
        };

        Ok(vec![event])
    }

    fn handle_expire(&self, cmd: &ExpireCounterOffers) -> Result<Vec<BookingEvent>, DomainError> {
        self.ensure_created()?;

        let mut events = Vec::new();
        for quotation_id in &self.quotation_order {
            for offer in self.counter_offers_for(*quotation_id) {
                if offer.status == CounterOfferStatus::Pending && offer.is_expired(cmd.now) {
                    events.push(BookingEvent::CounterOfferExpired(CounterOfferExpired {
                        booking_id: cmd.booking_id,
                        quotation_id: *quotation_id,
                        counter_offer_id: offer.counter_offer_id,
                        occurred_at: cmd.now,
                    }));
                }
            }
        }

        Ok(events)
    }
}
