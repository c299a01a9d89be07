//! Error taxonomy for booking and settlement operations
use super::status::BookingStatus;

pub type BookingResult<T> = Result<T, BookingError>;

#[derive(thiserror::Error, Debug)]
pub enum BookingError {
    #[error("{kind} {id} was not found")]
    NotFound { kind: &'static str, id: String },
    #[error("booking {booking_id} cannot move from {from} to {to}{}", detail_suffix(.detail))]
    InvalidTransition {
        booking_id: String,
        from: BookingStatus,
        to: BookingStatus,
        detail: Option<String>,
    },
    #[error("booking {0} cannot accept a quote before a total amount is set")]
    MissingQuoteAmount(String),
    #[error("booking {booking_id} cannot be marked complete yet: {detail}")]
    PrematureCompletion { booking_id: String, detail: String },
    #[error("payment of {amount} for booking {booking_id} is not a valid amount")]
    InvalidPaymentAmount { booking_id: String, amount: u64 },
    #[error("booking {booking_id} is {status} and can no longer be changed")]
    TerminalStateViolation {
        booking_id: String,
        status: BookingStatus,
    },
    #[error("quote for booking {booking_id} is invalid: {detail}")]
    InvalidQuote { booking_id: String, detail: String },
    #[error("payment reference {reference} is already recorded as {receipt_number}: {detail}")]
    ConflictingPaymentReference {
        reference: String,
        receipt_number: String,
        detail: String,
    },
    #[error("invalid booking details: {0}")]
    InvalidDetails(String),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode or decode a stored record: {0}")]
    Codec(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

impl BookingError {
    pub fn not_found_booking(id: &str) -> Self {
        Self::NotFound {
            kind: "booking",
            id: id.to_string(),
        }
    }

    pub fn not_found_receipt(number: &str) -> Self {
        Self::NotFound {
            kind: "receipt",
            id: number.to_string(),
        }
    }

    /// True for expected rule violations a caller should surface to the user,
    /// false for infrastructure faults.
    pub fn is_business_rule(&self) -> bool {
        !matches!(
            self,
            Self::Storage(_) | Self::Codec(_) | Self::Config(_) | Self::Internal(_)
        )
    }
}

impl From<sled::transaction::TransactionError<BookingError>> for BookingError {
    fn from(value: sled::transaction::TransactionError<BookingError>) -> Self {
        match value {
            sled::transaction::TransactionError::Abort(err) => err,
            sled::transaction::TransactionError::Storage(err) => Self::Storage(err),
        }
    }
}

impl From<minicbor::decode::Error> for BookingError {
    fn from(value: minicbor::decode::Error) -> Self {
        Self::Codec(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for BookingError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        Self::Codec(value.to_string())
    }
}
