//! Bookings domain module (event-sourced).
//!
//! A booking, its quotations, and their counter-offers form a single
//! aggregate: the unit of consistency and locking. The status state machine
//! lives in [`status`]; quotation/counter-offer entities in [`negotiation`].
//! Business rules are deterministic domain logic (no IO, no HTTP, no
//! storage).

pub mod booking;
pub mod negotiation;
pub mod status;

pub use booking::{
    AcceptQuotation, Booking, BookingCommand, BookingCreated, BookingEvent, BookingId,
    BookingTransitioned, CounterOfferAccepted, CounterOfferExpired, CounterOfferRejected,
    CounterOfferSubmitted, CounterOfferSuperseded, CreateBooking, ExpireCounterOffers, ItemSize,
    ItemSpec, LocationSpec, QuotationAccepted, QuotationSubmitted, QuotationSuperseded,
    RequestTransition, RespondToCounterOffer, SubmitCounterOffer, SubmitQuotation, TimeWindow,
};
pub use negotiation::{
    CounterOffer, CounterOfferDecision, CounterOfferId, CounterOfferStatus, Quotation,
    QuotationId, QuotationStatus,
};
pub use status::BookingStatus;
