//! Booking & negotiation service: the command/query surface over the
//! booking aggregate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use haulflow_auth::Actor;
use haulflow_bookings::{
    AcceptQuotation, Booking, BookingCommand, BookingEvent, BookingId, BookingStatus,
    CounterOffer, CounterOfferDecision, CounterOfferId, CreateBooking, ExpireCounterOffers,
    ItemSpec, LocationSpec, Quotation, QuotationId, RequestTransition, RespondToCounterOffer,
    SubmitCounterOffer, SubmitQuotation, TimeWindow,
};
use haulflow_core::{AggregateId, Clock, DomainError, UserId};
use haulflow_events::{Effect, EventBus, EventEnvelope, InMemoryEventBus};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::NegotiationConfig;
use crate::effects::booking_effects;
use crate::event_store::EventStore;

use super::{BOOKING_AGGREGATE, CommandOutcome};

/// Counter-offer snapshot with its derived, query-time values.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterOfferView {
    pub counter_offer: CounterOffer,
    pub price_difference: i64,
    pub percentage_change: f64,
    pub is_expired: bool,
    pub can_respond: bool,
    pub hours_until_expiration: Option<f64>,
}

impl CounterOfferView {
    fn at(offer: CounterOffer, now: DateTime<Utc>) -> Self {
        Self {
            price_difference: offer.price_difference(),
            percentage_change: offer.percentage_change(),
            is_expired: offer.is_expired(now),
            can_respond: offer.can_respond(now),
            hours_until_expiration: offer.hours_until_expiration(now),
            counter_offer: offer,
        }
    }
}

/// Result of one expiry sweep run.
#[derive(Debug)]
pub struct SweepReport {
    /// Identities of counter-offers transitioned to EXPIRED, each exactly
    /// once, for notification fan-out.
    pub affected: Vec<CounterOfferId>,
    pub effects: Vec<Effect>,
    /// False when the sweep was cancelled between aggregate batches. Every
    /// aggregate processed so far is fully updated; re-running later is
    /// idempotent.
    pub completed: bool,
}

/// Command/query service for bookings, quotations, and counter-offers.
pub struct BookingService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    clock: Arc<dyn Clock>,
    config: NegotiationConfig,
    effect_bus: Arc<InMemoryEventBus<Effect>>,
    quotation_index: Mutex<HashMap<QuotationId, BookingId>>,
    counter_offer_index: Mutex<HashMap<CounterOfferId, BookingId>>,
}

impl<S, B> BookingService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        clock: Arc<dyn Clock>,
        config: NegotiationConfig,
        effect_bus: Arc<InMemoryEventBus<Effect>>,
    ) -> Self {
        Self {
            dispatcher,
            clock,
            config,
            effect_bus,
            quotation_index: Mutex::new(HashMap::new()),
            counter_offer_index: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    // ───────────────────────── commands ─────────────────────────

    pub fn create_booking(
        &self,
        customer_id: UserId,
        pickup: LocationSpec,
        delivery: LocationSpec,
        window: Option<TimeWindow>,
        items: Vec<ItemSpec>,
    ) -> Result<CommandOutcome<Booking>, DispatchError> {
        let booking_id = BookingId::new(AggregateId::new());
        let command = BookingCommand::CreateBooking(CreateBooking {
            booking_id,
            customer_id,
            pickup,
            delivery,
            window,
            items,
            occurred_at: self.clock.now(),
        });

        let (booking, _, effects) = self.dispatch(booking_id, command)?;
        info!(booking_id = %booking_id, "booking created");
        Ok(CommandOutcome {
            snapshot: booking,
            effects,
        })
    }

    pub fn request_transition(
        &self,
        booking_id: BookingId,
        target: BookingStatus,
        actor: Actor,
    ) -> Result<CommandOutcome<Booking>, DispatchError> {
        let command = BookingCommand::RequestTransition(RequestTransition {
            booking_id,
            target,
            actor,
            occurred_at: self.clock.now(),
        });

        let (booking, events, effects) = self.dispatch(booking_id, command)?;
        if events.is_empty() {
            debug!(booking_id = %booking_id, target = %target, "transition retry was a no-op");
        }
        Ok(CommandOutcome {
            snapshot: booking,
            effects,
        })
    }

    pub fn submit_quotation(
        &self,
        booking_id: BookingId,
        transport_id: UserId,
        price: u64,
    ) -> Result<CommandOutcome<Quotation>, DispatchError> {
        let quotation_id = QuotationId::new(AggregateId::new());
        let command = BookingCommand::SubmitQuotation(SubmitQuotation {
            booking_id,
            quotation_id,
            transport_id,
            price,
            occurred_at: self.clock.now(),
        });

        let (booking, _, effects) = self.dispatch(booking_id, command)?;
        let snapshot = booking
            .quotation(quotation_id)
            .cloned()
            .expect("committed quotation must be present in the aggregate");
        Ok(CommandOutcome { snapshot, effects })
    }

    pub fn accept_quotation(
        &self,
        quotation_id: QuotationId,
        actor: Actor,
    ) -> Result<CommandOutcome<Quotation>, DispatchError> {
        let booking_id = self.resolve_quotation(quotation_id)?;
        let command = BookingCommand::AcceptQuotation(AcceptQuotation {
            booking_id,
            quotation_id,
            actor,
            occurred_at: self.clock.now(),
        });

        let (booking, _, effects) = self.dispatch(booking_id, command)?;
        info!(booking_id = %booking_id, quotation_id = %quotation_id, "quotation accepted");
        let snapshot = booking
            .quotation(quotation_id)
            .cloned()
            .expect("accepted quotation must be present in the aggregate");
        Ok(CommandOutcome { snapshot, effects })
    }

    pub fn submit_counter_offer(
        &self,
        quotation_id: QuotationId,
        offered_price: u64,
        reason: Option<String>,
        actor: Actor,
    ) -> Result<CommandOutcome<CounterOfferView>, DispatchError> {
        let booking_id = self.resolve_quotation(quotation_id)?;
        let counter_offer_id = CounterOfferId::new(AggregateId::new());
        let now = self.clock.now();
        let command = BookingCommand::SubmitCounterOffer(SubmitCounterOffer {
            booking_id,
            quotation_id,
            counter_offer_id,
            offered_price,
            reason,
            actor,
            expires_at: now + self.config.offer_window,
            occurred_at: now,
        });

        let (booking, _, effects) = self.dispatch(booking_id, command)?;
        let offer = booking
            .counter_offer(counter_offer_id)
            .cloned()
            .expect("committed counter-offer must be present in the aggregate");
        Ok(CommandOutcome {
            snapshot: CounterOfferView::at(offer, now),
            effects,
        })
    }

    /// Respond to a pending counter-offer.
    ///
    /// Expiry is detected lazily here: a lapsed offer yields `Expired`, and
    /// the state-fixing transition to EXPIRED is applied as a side effect so
    /// the caller and the aggregate agree on truth.
    pub fn respond_to_counter_offer(
        &self,
        counter_offer_id: CounterOfferId,
        decision: CounterOfferDecision,
        actor: Actor,
        message: Option<String>,
    ) -> Result<CommandOutcome<CounterOfferView>, DispatchError> {
        let booking_id = self.resolve_counter_offer(counter_offer_id)?;
        let now = self.clock.now();
        let command = BookingCommand::RespondToCounterOffer(RespondToCounterOffer {
            booking_id,
            counter_offer_id,
            decision,
            message,
            actor,
            occurred_at: now,
        });

        match self.dispatch(booking_id, command) {
            Ok((booking, _, effects)) => {
                let offer = booking
                    .counter_offer(counter_offer_id)
                    .cloned()
                    .expect("responded counter-offer must be present in the aggregate");
                Ok(CommandOutcome {
                    snapshot: CounterOfferView::at(offer, now),
                    effects,
                })
            }
            Err(err) if matches!(err.as_domain(), Some(DomainError::Expired(_))) => {
                // Repair state eagerly, then surface the expiry to the
                // caller. The sweep command is idempotent, so racing the
                // background sweeper is harmless.
                if let Err(sweep_err) = self.expire_booking(booking_id, now) {
                    warn!(
                        booking_id = %booking_id,
                        error = %sweep_err,
                        "failed to mark lapsed counter-offer expired"
                    );
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Expire every lapsed pending counter-offer across all bookings.
    ///
    /// Invoked by the background sweeper on a fixed interval; also callable
    /// directly. Each booking is its own atomic unit: `should_continue` is
    /// consulted between aggregates, so cancellation never leaves one
    /// half-updated.
    pub fn sweep_expired_with(
        &self,
        mut should_continue: impl FnMut() -> bool,
    ) -> Result<SweepReport, DispatchError> {
        let now = self.clock.now();
        let mut report = SweepReport {
            affected: Vec::new(),
            effects: Vec::new(),
            completed: true,
        };

        for aggregate_id in self.dispatcher.store().stream_ids(BOOKING_AGGREGATE)? {
            if !should_continue() {
                report.completed = false;
                break;
            }

            let (affected, effects) = self.expire_booking(BookingId::new(aggregate_id), now)?;
            report.affected.extend(affected);
            report.effects.extend(effects);
        }

        if report.affected.is_empty() {
            debug!("expiry sweep found nothing to do");
        } else {
            info!(expired = report.affected.len(), "expiry sweep transitioned counter-offers");
        }
        Ok(report)
    }

    pub fn sweep_expired(&self) -> Result<SweepReport, DispatchError> {
        self.sweep_expired_with(|| true)
    }

    // ───────────────────────── queries ─────────────────────────

    pub fn booking(&self, booking_id: BookingId) -> Result<Option<Booking>, DispatchError> {
        self.dispatcher
            .load(booking_id.0, |id| Booking::empty(BookingId::new(id)))
    }

    pub fn quotation(&self, quotation_id: QuotationId) -> Result<Option<Quotation>, DispatchError> {
        let Some(booking_id) = self.try_resolve_quotation(quotation_id)? else {
            return Ok(None);
        };
        Ok(self
            .booking(booking_id)?
            .and_then(|b| b.quotation(quotation_id).cloned()))
    }

    pub fn counter_offer(
        &self,
        counter_offer_id: CounterOfferId,
    ) -> Result<Option<CounterOfferView>, DispatchError> {
        let Some(booking_id) = self.try_resolve_counter_offer(counter_offer_id)? else {
            return Ok(None);
        };
        let now = self.clock.now();
        Ok(self
            .booking(booking_id)?
            .and_then(|b| b.counter_offer(counter_offer_id).cloned())
            .map(|offer| CounterOfferView::at(offer, now)))
    }

    pub fn quotations_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Vec<Quotation>, DispatchError> {
        Ok(self
            .booking(booking_id)?
            .map(|b| b.quotations().cloned().collect())
            .unwrap_or_default())
    }

    pub fn counter_offers_for_quotation(
        &self,
        quotation_id: QuotationId,
    ) -> Result<Vec<CounterOfferView>, DispatchError> {
        let Some(booking_id) = self.try_resolve_quotation(quotation_id)? else {
            return Ok(vec![]);
        };
        let now = self.clock.now();
        Ok(self
            .booking(booking_id)?
            .map(|b| {
                b.counter_offers_for(quotation_id)
                    .into_iter()
                    .map(|o| CounterOfferView::at(o.clone(), now))
                    .collect()
            })
            .unwrap_or_default())
    }

    // ───────────────────────── internals ─────────────────────────

    fn dispatch(
        &self,
        booking_id: BookingId,
        command: BookingCommand,
    ) -> Result<(Booking, Vec<BookingEvent>, Vec<Effect>), DispatchError> {
        let dispatched = self.dispatcher.dispatch::<Booking>(
            booking_id.0,
            BOOKING_AGGREGATE,
            command,
            |id| Booking::empty(BookingId::new(id)),
        )?;

        self.index_children(booking_id, &dispatched.events);

        let effects = booking_effects(&dispatched.aggregate, &dispatched.events);
        self.publish_effects(&effects);

        Ok((dispatched.aggregate, dispatched.events, effects))
    }

    fn expire_booking(
        &self,
        booking_id: BookingId,
        now: DateTime<Utc>,
    ) -> Result<(Vec<CounterOfferId>, Vec<Effect>), DispatchError> {
        let command = BookingCommand::ExpireCounterOffers(ExpireCounterOffers { booking_id, now });
        let (_, events, effects) = self.dispatch(booking_id, command)?;

        let affected = events
            .iter()
            .filter_map(|e| match e {
                BookingEvent::CounterOfferExpired(e) => Some(e.counter_offer_id),
                _ => None,
            })
            .collect();
        Ok((affected, effects))
    }

    fn index_children(&self, booking_id: BookingId, events: &[BookingEvent]) {
        for event in events {
            match event {
                BookingEvent::QuotationSubmitted(e) => {
                    self.quotation_index
                        .lock()
                        .expect("quotation index poisoned")
                        .insert(e.quotation_id, booking_id);
                }
                BookingEvent::CounterOfferSubmitted(e) => {
                    self.counter_offer_index
                        .lock()
                        .expect("counter-offer index poisoned")
                        .insert(e.counter_offer_id, booking_id);
                }
                _ => {}
            }
        }
    }

    fn publish_effects(&self, effects: &[Effect]) {
        for effect in effects {
            if let Err(err) = self.effect_bus.publish(effect.clone()) {
                // Fire-and-forget relative to the state machine: the command
                // result still carries the effects for caller-driven retry.
                warn!(error = ?err, "failed to enqueue effect for delivery");
            }
        }
    }

    fn resolve_quotation(&self, quotation_id: QuotationId) -> Result<BookingId, DispatchError> {
        self.try_resolve_quotation(quotation_id)?
            .ok_or(DispatchError::Domain(DomainError::NotFound))
    }

    fn try_resolve_quotation(
        &self,
        quotation_id: QuotationId,
    ) -> Result<Option<BookingId>, DispatchError> {
        if let Some(found) = self
            .quotation_index
            .lock()
            .expect("quotation index poisoned")
            .get(&quotation_id)
        {
            return Ok(Some(*found));
        }

        // Index miss (e.g. a service newly attached to an existing store):
        // fall back to scanning booking streams, then cache.
        for aggregate_id in self.dispatcher.store().stream_ids(BOOKING_AGGREGATE)? {
            let booking_id = BookingId::new(aggregate_id);
            if let Some(booking) = self.booking(booking_id)? {
                if booking.quotation(quotation_id).is_some() {
                    self.quotation_index
                        .lock()
                        .expect("quotation index poisoned")
                        .insert(quotation_id, booking_id);
                    return Ok(Some(booking_id));
                }
            }
        }
        Ok(None)
    }

    fn resolve_counter_offer(
        &self,
        counter_offer_id: CounterOfferId,
    ) -> Result<BookingId, DispatchError> {
        self.try_resolve_counter_offer(counter_offer_id)?
            .ok_or(DispatchError::Domain(DomainError::NotFound))
    }

    fn try_resolve_counter_offer(
        &self,
        counter_offer_id: CounterOfferId,
    ) -> Result<Option<BookingId>, DispatchError> {
        if let Some(found) = self
            .counter_offer_index
            .lock()
            .expect("counter-offer index poisoned")
            .get(&counter_offer_id)
        {
            return Ok(Some(*found));
        }

        for aggregate_id in self.dispatcher.store().stream_ids(BOOKING_AGGREGATE)? {
            let booking_id = BookingId::new(aggregate_id);
            if let Some(booking) = self.booking(booking_id)? {
                if booking.counter_offer(counter_offer_id).is_some() {
                    self.counter_offer_index
                        .lock()
                        .expect("counter-offer index poisoned")
                        .insert(counter_offer_id, booking_id);
                    return Ok(Some(booking_id));
                }
            }
        }
        Ok(None)
    }
}
