//! Two-sided confirmation that a booked service was delivered
use super::booking::{Booking, Side, TimeStamp};
use super::config::CompletionPolicy;
use super::error::{BookingError, BookingResult};
use super::status::BookingStatus;
use chrono::Utc;

/// One party's confirmation of delivery. Set once, never cleared.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionRecord {
    #[n(0)]
    pub confirmed: bool,
    #[n(1)]
    pub confirmed_at: Option<TimeStamp<Utc>>,
    #[n(2)]
    pub proof: Vec<String>, // object storage urls, opaque
    #[n(3)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// That side had already confirmed; the booking was left untouched.
    AlreadyConfirmed,
    /// Recorded, still waiting on the other side.
    Confirmed,
    /// Both sides have now confirmed and the booking is completed.
    FullyCompleted,
}

/// Applies one side's confirmation to `booking` in memory.
///
/// Setting the flag and converging to `fully_completed` happen in the same
/// call, so a caller persisting the result in one write can never store
/// both flags without the terminal state.
pub fn confirm(
    booking: &mut Booking,
    side: Side,
    proof: &[String],
    notes: Option<&str>,
    policy: CompletionPolicy,
) -> BookingResult<CompletionOutcome> {
    if booking.completion(side).confirmed {
        return Ok(CompletionOutcome::AlreadyConfirmed);
    }
    if booking.status.is_terminal() {
        return Err(BookingError::TerminalStateViolation {
            booking_id: booking.id.clone(),
            status: booking.status,
        });
    }
    if !booking.status.is_deliverable() {
        return Err(BookingError::PrematureCompletion {
            booking_id: booking.id.clone(),
            detail: format!("status {} is not deliverable", booking.status),
        });
    }
    if policy == CompletionPolicy::RequirePayment && booking.total_paid == 0 {
        return Err(BookingError::PrematureCompletion {
            booking_id: booking.id.clone(),
            detail: "no payment has been recorded".into(),
        });
    }

    let now = TimeStamp::new();
    let record = booking.completion_mut(side);
    record.confirmed = true;
    record.confirmed_at = Some(now.clone());
    record.proof = proof.to_vec();
    record.notes = notes.map(str::to_string);

    let outcome = if booking.vendor.confirmed && booking.couple.confirmed {
        booking.fully_completed = true;
        booking.fully_completed_at = Some(now.clone());
        booking.status = BookingStatus::Completed;
        CompletionOutcome::FullyCompleted
    } else {
        CompletionOutcome::Confirmed
    };
    booking.updated_at = now;

    Ok(outcome)
}
