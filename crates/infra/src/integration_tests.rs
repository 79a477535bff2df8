//! End-to-end scenarios over the in-memory store, bus, and services.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::Value as JsonValue;

use haulflow_auth::{Actor, Role, RoleResolverAuthority};
use haulflow_bookings::{
    Booking, BookingId, BookingStatus, CounterOfferDecision, CounterOfferStatus, ItemSize,
    ItemSpec, LocationSpec, QuotationStatus,
};
use haulflow_core::{DomainError, FixedClock, UserId};
use haulflow_disputes::{DisputeOutcome, DisputeReviewTarget, DisputeType, EvidenceRef};
use haulflow_events::{
    AuditAction, Effect, EventEnvelope, InMemoryEventBus, NotificationKind,
};
use haulflow_exceptions::ExceptionPriority;

use crate::command_dispatcher::CommandDispatcher;
use crate::config::NegotiationConfig;
use crate::effects::{InMemoryAuditSink, InMemoryNotificationOutbox};
use crate::event_store::InMemoryEventStore;
use crate::services::{BookingService, DisputeService, ExceptionService};
use crate::workers::{EffectWorker, ExpirySweeper};

type Store = Arc<InMemoryEventStore>;
type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

struct Harness {
    clock: Arc<FixedClock>,
    effect_bus: Arc<InMemoryEventBus<Effect>>,
    bookings: Arc<BookingService<Store, Bus>>,
    disputes: DisputeService<Store, Bus>,
    exceptions: ExceptionService<Store, Bus>,
    customer: Actor,
    transport: Actor,
    manager: Actor,
}

fn start() -> Harness {
    start_with(NegotiationConfig::default())
}

fn start_with(config: NegotiationConfig) -> Harness {
    haulflow_observability::init();

    let store: Store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let dispatcher = Arc::new(CommandDispatcher::new(store, bus));
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
    ));
    let effect_bus = Arc::new(InMemoryEventBus::new());
    let authority = Arc::new(RoleResolverAuthority);

    let bookings = Arc::new(BookingService::new(
        Arc::clone(&dispatcher),
        clock.clone(),
        config,
        Arc::clone(&effect_bus),
    ));
    let disputes = DisputeService::new(
        Arc::clone(&dispatcher),
        clock.clone(),
        authority.clone(),
        Arc::clone(&effect_bus),
    );
    let exceptions = ExceptionService::new(
        Arc::clone(&dispatcher),
        clock.clone(),
        authority,
        Arc::clone(&effect_bus),
    );

    Harness {
        clock,
        effect_bus,
        bookings,
        disputes,
        exceptions,
        customer: Actor::customer(UserId::new()),
        transport: Actor::transport(UserId::new()),
        manager: Actor::manager(UserId::new()),
    }
}

fn pickup() -> LocationSpec {
    LocationSpec {
        address: "12 Dock Rd".to_string(),
        district: Some("Harbor".to_string()),
        city: Some("Portsmouth".to_string()),
    }
}

fn delivery() -> LocationSpec {
    LocationSpec {
        address: "7 Hill St".to_string(),
        district: None,
        city: Some("Leeds".to_string()),
    }
}

fn items() -> Vec<ItemSpec> {
    vec![ItemSpec {
        name: "Piano".to_string(),
        quantity: 1,
        size: Some(ItemSize::L),
        is_fragile: true,
        requires_disassembly: false,
        requires_packaging: true,
    }]
}

impl Harness {
    fn new_booking(&self) -> Booking {
        self.bookings
            .create_booking(
                self.customer.user_id,
                pickup(),
                delivery(),
                None,
                items(),
            )
            .unwrap()
            .snapshot
    }

    /// Booking quoted by the transport at the given price.
    fn quoted_booking(&self, price: u64) -> (BookingId, haulflow_bookings::QuotationId) {
        let booking = self.new_booking();
        let quotation = self
            .bookings
            .submit_quotation(booking.id_typed(), self.transport.user_id, price)
            .unwrap()
            .snapshot;
        (booking.id_typed(), quotation.quotation_id)
    }

    /// Booking driven through accept into CONFIRMED.
    fn confirmed_booking(&self) -> BookingId {
        let (booking_id, quotation_id) = self.quoted_booking(1_000_000);
        self.bookings
            .accept_quotation(quotation_id, self.customer)
            .unwrap();
        booking_id
    }
}

fn expect_domain(err: crate::DispatchError) -> DomainError {
    err.as_domain().cloned().expect("expected a domain error")
}

#[test]
fn quotation_counter_offer_derives_difference_and_percentage() {
    let h = start();
    let (_, quotation_id) = h.quoted_booking(1_000_000);

    let view = h
        .bookings
        .submit_counter_offer(quotation_id, 900_000, Some("market rate".to_string()), h.customer)
        .unwrap()
        .snapshot;

    assert_eq!(view.price_difference, -100_000);
    assert!((view.percentage_change - (-10.0)).abs() < 1e-9);
    assert!(view.can_respond);
    assert!(!view.is_expired);
    let hours = view.hours_until_expiration.unwrap();
    assert!((hours - 24.0).abs() < 1e-9);
}

#[test]
fn consecutive_counter_offers_by_the_same_party_are_forbidden() {
    let h = start();
    let (_, quotation_id) = h.quoted_booking(1_000_000);

    h.bookings
        .submit_counter_offer(quotation_id, 900_000, None, h.customer)
        .unwrap();
    let err = h
        .bookings
        .submit_counter_offer(quotation_id, 850_000, None, h.customer)
        .unwrap_err();
    assert!(matches!(expect_domain(err), DomainError::Forbidden(_)));
}

#[test]
fn dispute_filing_requires_an_executed_booking() {
    let h = start();
    let booking = h.new_booking();
    assert_eq!(booking.status(), BookingStatus::Pending);

    let err = h
        .disputes
        .file_dispute(
            booking.id_typed(),
            DisputeType::ServiceQuality,
            "Late arrival".to_string(),
            "Crew arrived four hours late.".to_string(),
            None,
            h.customer,
        )
        .unwrap_err();
    assert!(matches!(expect_domain(err), DomainError::InvalidState(_)));
}

#[test]
fn closed_disputes_accept_no_messages_or_second_resolution() {
    let h = start();
    let booking_id = h.confirmed_booking();

    let dispute = h
        .disputes
        .file_dispute(
            booking_id,
            DisputeType::DamageClaim,
            "Scratched piano".to_string(),
            "Deep scratch across the lid.".to_string(),
            Some("Repair cost coverage".to_string()),
            h.customer,
        )
        .unwrap()
        .snapshot;
    let dispute_id = dispute.id_typed();

    h.disputes
        .post_message(dispute_id, h.transport, "Checking with the crew.".to_string())
        .unwrap();
    h.disputes
        .attach_evidence(
            dispute_id,
            EvidenceRef {
                evidence_type: "PHOTO".to_string(),
                file_name: "lid.jpg".to_string(),
                file_url: "https://evidence.example/lid.jpg".to_string(),
            },
            h.customer,
        )
        .unwrap();

    h.disputes
        .transition_review(dispute_id, DisputeReviewTarget::UnderReview, None, h.manager)
        .unwrap();
    let resolved = h
        .disputes
        .resolve(
            dispute_id,
            DisputeOutcome::Resolved,
            "Repair reimbursed.".to_string(),
            h.manager,
        )
        .unwrap()
        .snapshot;
    assert_eq!(resolved.resolution_notes(), Some("Repair reimbursed."));
    assert_eq!(resolved.message_count(), 1);
    assert_eq!(resolved.evidence_count(), 1);

    let err = h
        .disputes
        .post_message(dispute_id, h.customer, "one more".to_string())
        .unwrap_err();
    assert!(matches!(expect_domain(err), DomainError::InvalidState(_)));

    let err = h
        .disputes
        .resolve(
            dispute_id,
            DisputeOutcome::Rejected,
            "second write".to_string(),
            h.manager,
        )
        .unwrap_err();
    assert!(matches!(expect_domain(err), DomainError::InvalidState(_)));

    // Resolution fields were written exactly once.
    let reread = h.disputes.dispute(dispute_id).unwrap().unwrap();
    assert_eq!(reread.resolution_notes(), Some("Repair reimbursed."));
}

#[test]
fn resolver_capability_is_enforced_at_the_command_boundary() {
    let h = start();
    let booking_id = h.confirmed_booking();

    let dispute_id = h
        .disputes
        .file_dispute(
            booking_id,
            DisputeType::PaymentIssue,
            "Double charge".to_string(),
            "Charged twice for the same booking.".to_string(),
            None,
            h.customer,
        )
        .unwrap()
        .snapshot
        .id_typed();

    let err = h
        .disputes
        .transition_review(dispute_id, DisputeReviewTarget::UnderReview, None, h.customer)
        .unwrap_err();
    assert!(matches!(expect_domain(err), DomainError::Forbidden(_)));
}

#[test]
fn sweep_expires_lapsed_offers_exactly_once() {
    let h = start();
    let (_, quotation_id) = h.quoted_booking(1_000_000);

    let offer = h
        .bookings
        .submit_counter_offer(quotation_id, 900_000, None, h.customer)
        .unwrap()
        .snapshot;
    let offer_id = offer.counter_offer.counter_offer_id;

    // 23h later: nothing to expire.
    h.clock.advance(chrono::Duration::hours(23));
    let report = h.bookings.sweep_expired().unwrap();
    assert!(report.affected.is_empty());

    // 25h after submission: the offer lapses.
    h.clock.advance(chrono::Duration::hours(2));
    let report = h.bookings.sweep_expired().unwrap();
    assert_eq!(report.affected, vec![offer_id]);
    assert!(report.completed);

    let view = h.bookings.counter_offer(offer_id).unwrap().unwrap();
    assert_eq!(view.counter_offer.status, CounterOfferStatus::Expired);
    assert!(view.is_expired);
    assert!(!view.can_respond);
    assert_eq!(view.hours_until_expiration, None);

    // Idempotent re-run: already-EXPIRED entries are not re-reported.
    let report = h.bookings.sweep_expired().unwrap();
    assert!(report.affected.is_empty());
}

#[test]
fn responding_after_expiry_fails_and_repairs_state() {
    let h = start();
    let (_, quotation_id) = h.quoted_booking(1_000_000);

    let offer_id = h
        .bookings
        .submit_counter_offer(quotation_id, 900_000, None, h.customer)
        .unwrap()
        .snapshot
        .counter_offer
        .counter_offer_id;

    h.clock.advance(chrono::Duration::hours(25));

    let err = h
        .bookings
        .respond_to_counter_offer(offer_id, CounterOfferDecision::Accept, h.transport, None)
        .unwrap_err();
    assert!(matches!(expect_domain(err), DomainError::Expired(_)));

    // Lazy expiry repaired the aggregate: caller and state agree on truth.
    let view = h.bookings.counter_offer(offer_id).unwrap().unwrap();
    assert_eq!(view.counter_offer.status, CounterOfferStatus::Expired);
}

#[test]
fn accepted_counter_offer_moves_the_reference_price() {
    let h = start();
    let (_, quotation_id) = h.quoted_booking(1_000_000);

    let offer_id = h
        .bookings
        .submit_counter_offer(quotation_id, 900_000, None, h.customer)
        .unwrap()
        .snapshot
        .counter_offer
        .counter_offer_id;

    h.bookings
        .respond_to_counter_offer(
            offer_id,
            CounterOfferDecision::Accept,
            h.transport,
            Some("deal".to_string()),
        )
        .unwrap();

    let quotation = h.bookings.quotation(quotation_id).unwrap().unwrap();
    assert_eq!(quotation.reference_price, 900_000);

    // The transport's follow-up counter is computed against 900k.
    let view = h
        .bookings
        .submit_counter_offer(quotation_id, 945_000, None, h.transport)
        .unwrap()
        .snapshot;
    assert_eq!(view.counter_offer.original_price, 900_000);
    assert_eq!(view.price_difference, 45_000);
    assert!((view.percentage_change - 5.0).abs() < 1e-9);
}

#[test]
fn accepting_one_quotation_supersedes_the_other_pending_ones() {
    let h = start();
    let booking = h.new_booking();
    let booking_id = booking.id_typed();

    let other_transport = Actor::transport(UserId::new());
    let first = h
        .bookings
        .submit_quotation(booking_id, h.transport.user_id, 1_000_000)
        .unwrap()
        .snapshot;
    let second = h
        .bookings
        .submit_quotation(booking_id, other_transport.user_id, 1_100_000)
        .unwrap()
        .snapshot;

    let outcome = h
        .bookings
        .accept_quotation(first.quotation_id, h.customer)
        .unwrap();

    let quotations = h.bookings.quotations_for_booking(booking_id).unwrap();
    let accepted: Vec<_> = quotations
        .iter()
        .filter(|q| q.status == QuotationStatus::Accepted)
        .collect();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].quotation_id, first.quotation_id);
    assert!(
        quotations
            .iter()
            .find(|q| q.quotation_id == second.quotation_id)
            .is_some_and(|q| q.status == QuotationStatus::Superseded)
    );

    let booking = h.bookings.booking(booking_id).unwrap().unwrap();
    assert_eq!(booking.status(), BookingStatus::Confirmed);

    // The losing transport learns its quote was superseded; the winner that
    // it was accepted.
    let superseded_note = outcome.effects.iter().any(|e| {
        matches!(
            e,
            Effect::Notification(n)
                if n.kind == NotificationKind::QuotationSuperseded
                    && n.recipient_user_id == other_transport.user_id
        )
    });
    let accepted_note = outcome.effects.iter().any(|e| {
        matches!(
            e,
            Effect::Notification(n)
                if n.kind == NotificationKind::QuotationAccepted
                    && n.recipient_user_id == h.transport.user_id
        )
    });
    assert!(superseded_note && accepted_note);
}

#[test]
fn booking_transition_requests_are_idempotent_via_the_service() {
    let h = start();
    let booking_id = h.confirmed_booking();

    let outcome = h
        .bookings
        .request_transition(booking_id, BookingStatus::Confirmed, h.customer)
        .unwrap();
    assert_eq!(outcome.snapshot.status(), BookingStatus::Confirmed);
    assert!(outcome.effects.is_empty());

    // Skipping a state is still rejected.
    let err = h
        .bookings
        .request_transition(booking_id, BookingStatus::Completed, h.transport)
        .unwrap_err();
    assert!(matches!(expect_domain(err), DomainError::InvalidState(_)));
}

#[test]
fn exceptions_escalate_monotonically_and_resolve_once() {
    let h = start();
    let exception = h
        .exceptions
        .open_exception(
            "Blocked loading bay".to_string(),
            "ACCESS".to_string(),
            "Loading bay blocked by construction.".to_string(),
            ExceptionPriority::Medium,
            Some(918),
            None,
            h.manager,
        )
        .unwrap()
        .snapshot;
    let exception_id = exception.id_typed();

    h.exceptions.begin_work(exception_id, h.manager).unwrap();

    let err = h
        .exceptions
        .escalate(
            exception_id,
            Some(ExceptionPriority::Low),
            None,
            h.manager,
        )
        .unwrap_err();
    assert!(matches!(expect_domain(err), DomainError::InvalidArgument(_)));

    h.exceptions
        .escalate(exception_id, Some(ExceptionPriority::Urgent), None, h.manager)
        .unwrap();

    h.exceptions
        .resolve(exception_id, "Bay cleared by the city crew.".to_string(), h.manager)
        .unwrap();

    let err = h
        .exceptions
        .resolve(exception_id, "again".to_string(), h.manager)
        .unwrap_err();
    assert!(matches!(expect_domain(err), DomainError::InvalidState(_)));

    // Escalation requires the resolver capability.
    let other = h
        .exceptions
        .open_exception(
            "Flat tire".to_string(),
            "VEHICLE".to_string(),
            "Van has a flat on arrival.".to_string(),
            ExceptionPriority::Low,
            None,
            None,
            h.manager,
        )
        .unwrap()
        .snapshot;
    let err = h
        .exceptions
        .escalate(other.id_typed(), Some(ExceptionPriority::High), None, h.transport)
        .unwrap_err();
    assert!(matches!(expect_domain(err), DomainError::Forbidden(_)));
}

#[test]
fn concurrent_commands_on_one_booking_serialize() {
    let h = start();
    let booking = h.new_booking();
    let booking_id = booking.id_typed();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let bookings = Arc::clone(&h.bookings);
        handles.push(std::thread::spawn(move || {
            bookings
                .submit_quotation(booking_id, UserId::new(), 1_000_000)
                .is_ok()
        }));
    }
    let successes = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 8);
    let quotations = h.bookings.quotations_for_booking(booking_id).unwrap();
    assert_eq!(quotations.len(), 8);
    let booking = h.bookings.booking(booking_id).unwrap().unwrap();
    assert_eq!(booking.status(), BookingStatus::Quoted);
}

#[test]
fn effect_worker_delivers_notifications_and_audit_records() {
    let h = start();
    let outbox = Arc::new(InMemoryNotificationOutbox::new());
    let audit = Arc::new(InMemoryAuditSink::new());
    let worker = EffectWorker::spawn(
        Arc::clone(&h.effect_bus),
        outbox.clone(),
        audit.clone(),
    );

    let (_, quotation_id) = h.quoted_booking(1_000_000);
    h.bookings
        .accept_quotation(quotation_id, h.customer)
        .unwrap();

    // At-least-once, asynchronous: poll until the worker has drained.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let recorded = audit.records();
        if recorded
            .iter()
            .any(|r| r.action == AuditAction::QuotationAccepted)
        {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "effect worker never delivered the audit record"
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(
        outbox
            .delivered()
            .iter()
            .any(|n| n.kind == NotificationKind::QuotationAccepted)
    );

    worker.shutdown();
}

#[test]
fn sweeper_worker_expires_offers_in_the_background() {
    let h = start_with(NegotiationConfig {
        offer_window: chrono::Duration::hours(24),
        sweep_interval: Duration::from_millis(20),
    });
    let (_, quotation_id) = h.quoted_booking(1_000_000);
    let offer_id = h
        .bookings
        .submit_counter_offer(quotation_id, 900_000, None, h.customer)
        .unwrap()
        .snapshot
        .counter_offer
        .counter_offer_id;

    let worker = ExpirySweeper::spawn(
        Arc::clone(&h.bookings),
        h.bookings.config().sweep_interval,
    );

    h.clock.advance(chrono::Duration::hours(25));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let view = h.bookings.counter_offer(offer_id).unwrap().unwrap();
        if view.counter_offer.status == CounterOfferStatus::Expired {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "sweeper never expired the lapsed counter-offer"
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    worker.shutdown();
}

#[test]
fn queries_reflect_consistent_snapshots() {
    let h = start();
    let (booking_id, quotation_id) = h.quoted_booking(1_000_000);

    // Unknown identities read as absent, not as errors.
    assert!(
        h.bookings
            .booking(BookingId::new(haulflow_core::AggregateId::new()))
            .unwrap()
            .is_none()
    );

    let offers = h.bookings.counter_offers_for_quotation(quotation_id).unwrap();
    assert!(offers.is_empty());

    h.bookings
        .submit_counter_offer(quotation_id, 900_000, None, h.customer)
        .unwrap();
    let offers = h.bookings.counter_offers_for_quotation(quotation_id).unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].counter_offer.offered_by_role, Role::Customer);

    let booking = h.bookings.booking(booking_id).unwrap().unwrap();
    assert_eq!(booking.quotations().count(), 1);
}
