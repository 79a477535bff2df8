//! Booking status lifecycle.

use serde::{Deserialize, Serialize};

use haulflow_core::{DomainError, DomainResult};

/// Booking status lifecycle.
///
/// The happy path is strictly linear; `Cancelled` is reachable from any
/// non-terminal state. No transition may skip a state except cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Quoted,
    Confirmed,
    InProgress,
    Completed,
    ConfirmedByCustomer,
    Reviewed,
    Cancelled,
}

impl BookingStatus {
    /// The single immediate successor on the happy path, if any.
    pub fn successor(self) -> Option<BookingStatus> {
        match self {
            BookingStatus::Pending => Some(BookingStatus::Quoted),
            BookingStatus::Quoted => Some(BookingStatus::Confirmed),
            BookingStatus::Confirmed => Some(BookingStatus::InProgress),
            BookingStatus::InProgress => Some(BookingStatus::Completed),
            BookingStatus::Completed => Some(BookingStatus::ConfirmedByCustomer),
            BookingStatus::ConfirmedByCustomer => Some(BookingStatus::Reviewed),
            BookingStatus::Reviewed | BookingStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Reviewed | BookingStatus::Cancelled)
    }

    /// Whether the booking has not yet been confirmed for execution.
    ///
    /// Disputes cannot be filed against a booking in these states: there is
    /// no executed booking to dispute yet.
    pub fn is_pre_confirmation(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Quoted)
    }

    /// Exhaustive transition rule: the immediate successor, or cancellation
    /// from any non-terminal state.
    pub fn can_transition_to(self, target: BookingStatus) -> bool {
        if target == BookingStatus::Cancelled {
            return !self.is_terminal();
        }
        self.successor() == Some(target)
    }

    pub fn check_transition(self, target: BookingStatus) -> DomainResult<()> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(DomainError::invalid_state(format!(
                "booking cannot transition from {self:?} to {target:?}"
            )))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Quoted => "QUOTED",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::ConfirmedByCustomer => "CONFIRMED_BY_CUSTOMER",
            BookingStatus::Reviewed => "REVIEWED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BookingStatus; 8] = [
        BookingStatus::Pending,
        BookingStatus::Quoted,
        BookingStatus::Confirmed,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::ConfirmedByCustomer,
        BookingStatus::Reviewed,
        BookingStatus::Cancelled,
    ];

    #[test]
    fn happy_path_is_strictly_linear() {
        let mut status = BookingStatus::Pending;
        let mut visited = vec![status];
        while let Some(next) = status.successor() {
            assert!(status.can_transition_to(next));
            status = next;
            visited.push(status);
        }
        assert_eq!(status, BookingStatus::Reviewed);
        assert_eq!(visited.len(), 7);
    }

    #[test]
    fn cancellation_reachable_from_every_non_terminal_state() {
        for status in ALL {
            assert_eq!(
                status.can_transition_to(BookingStatus::Cancelled),
                !status.is_terminal(),
                "cancellation rule violated for {status:?}"
            );
        }
    }

    #[test]
    fn no_transition_skips_a_state() {
        // From PENDING, only QUOTED and CANCELLED are legal targets.
        for target in ALL {
            let allowed = BookingStatus::Pending.can_transition_to(target);
            let expected =
                matches!(target, BookingStatus::Quoted | BookingStatus::Cancelled);
            assert_eq!(allowed, expected, "unexpected rule for PENDING -> {target:?}");
        }
    }

    #[test]
    fn terminal_states_allow_nothing() {
        for terminal in [BookingStatus::Reviewed, BookingStatus::Cancelled] {
            for target in ALL {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn check_transition_reports_invalid_state() {
        let err = BookingStatus::Pending
            .check_transition(BookingStatus::Confirmed)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }
}
