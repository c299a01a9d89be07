//! Domain events written to the outbox alongside the change that caused them
use super::booking::{Side, TimeStamp};
use super::ledger::PaymentType;
use super::status::BookingStatus;
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum BookingEvent {
    #[n(0)]
    BookingCreated {
        #[n(0)]
        reference: String,
    },
    #[n(1)]
    QuoteSent {
        #[n(0)]
        total_amount: u64,
        #[n(1)]
        deposit_amount: u64,
    },
    #[n(2)]
    BookingStatusChanged {
        #[n(0)]
        from: BookingStatus,
        #[n(1)]
        to: BookingStatus,
        #[n(2)]
        reason: Option<String>,
    },
    #[n(3)]
    PaymentRecorded {
        #[n(0)]
        receipt_number: String,
        #[n(1)]
        amount: u64,
        #[n(2)]
        payment_type: PaymentType,
        #[n(3)]
        remaining_balance: u64,
    },
    #[n(4)]
    CompletionConfirmed {
        #[n(0)]
        side: Side,
    },
    #[n(5)]
    BookingFullyCompleted,
    #[n(6)]
    LedgerReconciled {
        #[n(0)]
        previous_total: u64,
        #[n(1)]
        ledger_total: u64,
    },
}

impl BookingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BookingCreated { .. } => "BookingCreated",
            Self::QuoteSent { .. } => "QuoteSent",
            Self::BookingStatusChanged { .. } => "BookingStatusChanged",
            Self::PaymentRecorded { .. } => "PaymentRecorded",
            Self::CompletionConfirmed { .. } => "CompletionConfirmed",
            Self::BookingFullyCompleted => "BookingFullyCompleted",
            Self::LedgerReconciled { .. } => "LedgerReconciled",
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    #[n(0)]
    pub sequence: u64,
    #[n(1)]
    pub booking_id: String,
    #[n(2)]
    pub occurred_at: TimeStamp<Utc>,
    #[n(3)]
    pub event: BookingEvent,
}
