use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use std::sync::Arc;

use haulflow_auth::Actor;
use haulflow_bookings::{
    AcceptQuotation, Booking, BookingCommand, BookingId, CreateBooking, ItemSpec, LocationSpec,
    QuotationId, RespondToCounterOffer, SubmitCounterOffer, SubmitQuotation,
};
use haulflow_bookings::{CounterOfferDecision, CounterOfferId};
use haulflow_core::{AggregateId, UserId};
use haulflow_events::{EventEnvelope, InMemoryEventBus};
use haulflow_infra::command_dispatcher::CommandDispatcher;
use haulflow_infra::event_store::InMemoryEventStore;

type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;

fn dispatcher() -> CommandDispatcher<InMemoryEventStore, Bus> {
    let store = InMemoryEventStore::new();
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    CommandDispatcher::new(store, bus)
}

fn pickup() -> LocationSpec {
    LocationSpec {
        address: "12 Dock Rd".to_string(),
        district: None,
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
        name: "Sofa".to_string(),
        quantity: 1,
        size: None,
        is_fragile: false,
        requires_disassembly: false,
        requires_packaging: false,
    }]
}

fn make_booking(id: AggregateId) -> Booking {
    Booking::empty(BookingId::new(id))
}

/// One full negotiation round: create, quote, counter, accept the counter,
/// accept the quotation.
fn negotiation_round(dispatcher: &CommandDispatcher<InMemoryEventStore, Bus>) {
    let booking_id = BookingId::new(AggregateId::new());
    let quotation_id = QuotationId::new(AggregateId::new());
    let counter_offer_id = CounterOfferId::new(AggregateId::new());
    let customer = Actor::customer(UserId::new());
    let transport = Actor::transport(UserId::new());
    let now = Utc::now();

    dispatcher
        .dispatch::<Booking>(
            booking_id.0,
            "booking",
            BookingCommand::CreateBooking(CreateBooking {
                booking_id,
                customer_id: customer.user_id,
                pickup: pickup(),
                delivery: delivery(),
                window: None,
                items: items(),
                occurred_at: now,
            }),
            make_booking,
        )
        .unwrap();

    dispatcher
        .dispatch::<Booking>(
            booking_id.0,
            "booking",
            BookingCommand::SubmitQuotation(SubmitQuotation {
                booking_id,
                quotation_id,
                transport_id: transport.user_id,
                price: 1_000_000,
                occurred_at: now,
            }),
            make_booking,
        )
        .unwrap();

    dispatcher
        .dispatch::<Booking>(
            booking_id.0,
            "booking",
            BookingCommand::SubmitCounterOffer(SubmitCounterOffer {
                booking_id,
                quotation_id,
                counter_offer_id,
                offered_price: 900_000,
                reason: None,
                actor: customer,
                expires_at: now + chrono::Duration::hours(24),
                occurred_at: now,
            }),
            make_booking,
        )
        .unwrap();

    dispatcher
        .dispatch::<Booking>(
            booking_id.0,
            "booking",
            BookingCommand::RespondToCounterOffer(RespondToCounterOffer {
                booking_id,
                counter_offer_id,
                decision: CounterOfferDecision::Accept,
                message: None,
                actor: transport,
                occurred_at: now,
            }),
            make_booking,
        )
        .unwrap();

    dispatcher
        .dispatch::<Booking>(
            booking_id.0,
            "booking",
            BookingCommand::AcceptQuotation(AcceptQuotation {
                booking_id,
                quotation_id,
                actor: customer,
                occurred_at: now,
            }),
            make_booking,
        )
        .unwrap();
}

fn bench_negotiation_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("negotiation");
    group.throughput(Throughput::Elements(5)); // 5 commands per round

    group.bench_function("full_round", |b| {
        let dispatcher = dispatcher();
        b.iter(|| {
            negotiation_round(black_box(&dispatcher));
        });
    });

    group.finish();
}

fn bench_rehydration_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("rehydration");

    // A long-lived booking accumulates events; dispatch cost grows with
    // stream length. Measure a transition-retry (no-op) against a stream of
    // 200 quotation events.
    group.bench_function("noop_dispatch_on_deep_stream", |b| {
        let dispatcher = dispatcher();
        let booking_id = BookingId::new(AggregateId::new());
        let customer = Actor::customer(UserId::new());
        let now = Utc::now();

        dispatcher
            .dispatch::<Booking>(
                booking_id.0,
                "booking",
                BookingCommand::CreateBooking(CreateBooking {
                    booking_id,
                    customer_id: customer.user_id,
                    pickup: pickup(),
                    delivery: delivery(),
                    window: None,
                    items: items(),
                    occurred_at: now,
                }),
                make_booking,
            )
            .unwrap();

        for _ in 0..200 {
            dispatcher
                .dispatch::<Booking>(
                    booking_id.0,
                    "booking",
                    BookingCommand::SubmitQuotation(SubmitQuotation {
                        booking_id,
                        quotation_id: QuotationId::new(AggregateId::new()),
                        transport_id: UserId::new(),
                        price: 1_000_000,
                        occurred_at: now,
                    }),
                    make_booking,
                )
                .unwrap();
        }

        b.iter(|| {
            dispatcher
                .dispatch::<Booking>(
                    booking_id.0,
                    "booking",
                    BookingCommand::RequestTransition(
                        haulflow_bookings::RequestTransition {
                            booking_id,
                            target: haulflow_bookings::BookingStatus::Quoted,
                            actor: customer,
                            occurred_at: now,
                        },
                    ),
                    make_booking,
                )
                .unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_negotiation_round, bench_rehydration_depth);
criterion_main!(benches);
