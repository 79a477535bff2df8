//! Quotation and counter-offer entities.
//!
//! Both are owned exclusively by a [`crate::Booking`] aggregate: quotations
//! are stored in an arena keyed by [`QuotationId`], each quotation holding the
//! creation-ordered ids of its counter-offers. Back-references are id lookups,
//! never owning pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use haulflow_auth::Role;
use haulflow_core::{AggregateId, Entity, UserId};

/// Quotation identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotationId(pub AggregateId);

impl QuotationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for QuotationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Counter-offer identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterOfferId(pub AggregateId);

impl CounterOfferId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CounterOfferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Quotation status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotationStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Superseded,
}

/// Counter-offer status lifecycle. Everything except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CounterOfferStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Superseded,
}

impl CounterOfferStatus {
    pub fn is_terminal(self) -> bool {
        self != CounterOfferStatus::Pending
    }
}

/// Decision on a pending counter-offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CounterOfferDecision {
    Accept,
    Reject,
}

/// A transport company's quote for a booking.
///
/// `reference_price` starts at the quoted price and moves to the offered
/// price of each accepted counter-offer; new counter-offers are computed
/// against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotation {
    pub quotation_id: QuotationId,
    pub transport_id: UserId,
    /// Originally quoted price in smallest currency unit. Never zero.
    pub price: u64,
    /// Current negotiation reference price. Never zero.
    pub reference_price: u64,
    pub status: QuotationStatus,
    pub submitted_at: DateTime<Utc>,
    /// Counter-offer ids in creation order.
    pub counter_offers: Vec<CounterOfferId>,
}

impl Entity for Quotation {
    type Id = QuotationId;

    fn id(&self) -> &Self::Id {
        &self.quotation_id
    }
}

/// A price counter-offer on a quotation, time-bound by `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterOffer {
    pub counter_offer_id: CounterOfferId,
    pub quotation_id: QuotationId,
    pub offered_by: UserId,
    pub offered_by_role: Role,
    /// Reference price at submission time. Never zero.
    pub original_price: u64,
    pub offered_price: u64,
    pub reason: Option<String>,
    pub status: CounterOfferStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_by: Option<UserId>,
    pub responded_at: Option<DateTime<Utc>>,
    pub response_message: Option<String>,
}

impl Entity for CounterOffer {
    type Id = CounterOfferId;

    fn id(&self) -> &Self::Id {
        &self.counter_offer_id
    }
}

impl CounterOffer {
    /// Signed difference against the reference price at submission time.
    pub fn price_difference(&self) -> i64 {
        self.offered_price as i64 - self.original_price as i64
    }

    /// Signed percentage change against the reference price.
    ///
    /// Well-defined because `original_price` is never zero: a zero reference
    /// price is rejected at quotation creation.
    pub fn percentage_change(&self) -> f64 {
        self.price_difference() as f64 / self.original_price as f64 * 100.0
    }

    /// Pure function of the injected time: expired iff `now >= expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Actionable iff still pending and not expired.
    pub fn can_respond(&self, now: DateTime<Utc>) -> bool {
        self.status == CounterOfferStatus::Pending && !self.is_expired(now)
    }

    /// Derived display value, recomputed at query time and never stored.
    ///
    /// `None` once the offer is no longer actionable.
    pub fn hours_until_expiration(&self, now: DateTime<Utc>) -> Option<f64> {
        if !self.can_respond(now) {
            return None;
        }
        let remaining = self.expires_at - now;
        Some(remaining.num_milliseconds() as f64 / 3_600_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn offer(original_price: u64, offered_price: u64) -> CounterOffer {
        let created_at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        CounterOffer {
            counter_offer_id: CounterOfferId::new(AggregateId::new()),
            quotation_id: QuotationId::new(AggregateId::new()),
            offered_by: UserId::new(),
            offered_by_role: Role::Customer,
            original_price,
            offered_price,
            reason: None,
            status: CounterOfferStatus::Pending,
            created_at,
            expires_at: created_at + chrono::Duration::hours(24),
            responded_by: None,
            responded_at: None,
            response_message: None,
        }
    }

    #[test]
    fn price_derivations_for_a_ten_percent_discount() {
        let offer = offer(1_000_000, 900_000);
        assert_eq!(offer.price_difference(), -100_000);
        assert!((offer.percentage_change() - (-10.0)).abs() < 1e-9);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let offer = offer(500, 400);

        let just_before = offer.expires_at - chrono::Duration::milliseconds(1);
        assert!(!offer.is_expired(just_before));
        assert!(offer.can_respond(just_before));

        // now == expires_at counts as expired.
        assert!(offer.is_expired(offer.expires_at));
        assert!(!offer.can_respond(offer.expires_at));
    }

    #[test]
    fn hours_until_expiration_is_query_time_derived() {
        let offer = offer(500, 400);

        let twelve_hours_in = offer.created_at + chrono::Duration::hours(12);
        let remaining = offer.hours_until_expiration(twelve_hours_in).unwrap();
        assert!((remaining - 12.0).abs() < 1e-9);

        assert_eq!(offer.hours_until_expiration(offer.expires_at), None);
    }

    #[test]
    fn terminal_offers_are_not_actionable() {
        for status in [
            CounterOfferStatus::Accepted,
            CounterOfferStatus::Rejected,
            CounterOfferStatus::Expired,
            CounterOfferStatus::Superseded,
        ] {
            let mut o = offer(500, 400);
            o.status = status;
            assert!(status.is_terminal());
            assert!(!o.can_respond(o.created_at));
            assert_eq!(o.hours_until_expiration(o.created_at), None);
        }
    }

    proptest! {
        #[test]
        fn difference_and_percentage_agree_for_all_valid_prices(
            original in 1u64..=10_000_000_000,
            offered in 1u64..=10_000_000_000,
        ) {
            let offer = offer(original, offered);
            let difference = offer.price_difference();
            prop_assert_eq!(difference, offered as i64 - original as i64);

            let expected_pct = difference as f64 / original as f64 * 100.0;
            let pct = offer.percentage_change();
            prop_assert!((pct - expected_pct).abs() <= 1e-9 * expected_pct.abs().max(1.0));

            // Sign is preserved.
            prop_assert_eq!(pct > 0.0, difference > 0);
            prop_assert_eq!(pct < 0.0, difference < 0);
        }
    }
}
