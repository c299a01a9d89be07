//! Booking lifecycle states and the transition table between them
use std::fmt;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum BookingStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    QuoteRequested,
    #[n(2)]
    QuoteSent,
    #[n(3)]
    QuoteAccepted,
    #[n(4)]
    QuoteRejected,
    #[n(5)]
    Confirmed,
    #[n(6)]
    DownpaymentPaid,
    #[n(7)]
    PaidInFull,
    #[n(8)]
    InProgress,
    #[n(9)]
    Completed,
    #[n(10)]
    Cancelled,
    #[n(11)]
    Refunded,
    #[n(12)]
    Disputed,
}

/// Outcome of checking a requested status change against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    /// Target equals the current status; nothing to write.
    Unchanged,
    Allowed,
    Terminal,
    Disallowed,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 13] = [
        Self::Pending,
        Self::QuoteRequested,
        Self::QuoteSent,
        Self::QuoteAccepted,
        Self::QuoteRejected,
        Self::Confirmed,
        Self::DownpaymentPaid,
        Self::PaidInFull,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
        Self::Refunded,
        Self::Disputed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::QuoteRequested => "quote_requested",
            Self::QuoteSent => "quote_sent",
            Self::QuoteAccepted => "quote_accepted",
            Self::QuoteRejected => "quote_rejected",
            Self::Confirmed => "confirmed",
            Self::DownpaymentPaid => "downpayment_paid",
            Self::PaidInFull => "paid_in_full",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::Disputed => "disputed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Refunded)
    }

    /// States in which the contracted service can be delivered and confirmed.
    pub fn is_deliverable(&self) -> bool {
        matches!(
            self,
            Self::QuoteAccepted
                | Self::Confirmed
                | Self::DownpaymentPaid
                | Self::PaidInFull
                | Self::InProgress
        )
    }

    /// States a vendor may (re-)issue a quote from.
    pub fn accepts_quote(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::QuoteRequested | Self::QuoteSent | Self::QuoteRejected
        )
    }

    /// Direct successors reachable through a status change request.
    ///
    /// `Completed` is entered only by the completion protocol.
    pub fn successors(&self) -> &'static [BookingStatus] {
        use BookingStatus::*;
        match self {
            Pending => &[QuoteRequested, QuoteSent, Cancelled],
            QuoteRequested => &[QuoteSent, Cancelled],
            QuoteSent => &[QuoteAccepted, QuoteRejected, Cancelled],
            QuoteRejected => &[QuoteSent, Cancelled],
            QuoteAccepted => &[Confirmed, Cancelled],
            Confirmed => &[DownpaymentPaid, PaidInFull, InProgress, Disputed, Cancelled],
            DownpaymentPaid => &[PaidInFull, InProgress, Disputed, Refunded, Cancelled],
            PaidInFull => &[InProgress, Disputed, Refunded, Cancelled],
            InProgress => &[Disputed, Refunded, Cancelled],
            Disputed => &[InProgress, Refunded, Cancelled],
            Completed | Cancelled | Refunded => &[],
        }
    }

    pub fn check_transition(&self, target: BookingStatus) -> TransitionCheck {
        if *self == target {
            TransitionCheck::Unchanged
        } else if self.is_terminal() {
            TransitionCheck::Terminal
        } else if self.successors().contains(&target) {
            TransitionCheck::Allowed
        } else {
            TransitionCheck::Disallowed
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown booking status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_line_is_reachable_in_order() {
        use BookingStatus::*;
        let line = [
            Pending,
            QuoteRequested,
            QuoteSent,
            QuoteAccepted,
            Confirmed,
            DownpaymentPaid,
            PaidInFull,
            InProgress,
        ];
        for pair in line.windows(2) {
            assert_eq!(
                pair[0].check_transition(pair[1]),
                TransitionCheck::Allowed,
                "{} -> {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn terminal_states_have_no_successors() {
        for status in BookingStatus::ALL.iter().filter(|s| s.is_terminal()) {
            assert!(status.successors().is_empty());
            assert_eq!(
                status.check_transition(BookingStatus::Pending),
                TransitionCheck::Terminal
            );
            assert_eq!(status.check_transition(*status), TransitionCheck::Unchanged);
        }
    }

    #[test]
    fn completed_is_never_a_direct_successor() {
        for status in BookingStatus::ALL {
            assert!(!status.successors().contains(&BookingStatus::Completed));
        }
    }

    #[test]
    fn cancellation_reachable_from_every_open_state() {
        for status in BookingStatus::ALL.iter().filter(|s| !s.is_terminal()) {
            assert_eq!(
                status.check_transition(BookingStatus::Cancelled),
                TransitionCheck::Allowed
            );
        }
    }

    #[test]
    fn backwards_moves_are_rejected() {
        assert_eq!(
            BookingStatus::Confirmed.check_transition(BookingStatus::QuoteSent),
            TransitionCheck::Disallowed
        );
        assert_eq!(
            BookingStatus::PaidInFull.check_transition(BookingStatus::DownpaymentPaid),
            TransitionCheck::Disallowed
        );
    }

    #[test]
    fn status_names_parse_back() {
        for status in BookingStatus::ALL {
            let parsed: BookingStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("archived".parse::<BookingStatus>().is_err());
    }
}
