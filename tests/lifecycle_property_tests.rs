//! Property-based tests for the booking lifecycle and payment ledger
//!
//! Random sequences of status requests, payments and confirmations are
//! replayed against a temporary sled database. Whatever the sequence, the
//! stored booking must keep its invariants:
//!
//! 1. Payment aggregates always equal the projection of the receipt ledger
//! 2. `fully_completed` holds exactly when both sides have confirmed
//! 3. A fully completed booking is in the `completed` state
//! 4. Terminal bookings never change status again
//! 5. A rejected request leaves the stored booking untouched

use proptest::prelude::*;
use std::sync::Arc;
use wedding_bazaar::{
    Booking, BookingDetails, BookingService, BookingStatus, PaymentMethod, PaymentType, Side,
    ledger,
};

#[derive(Debug, Clone)]
enum Action {
    Status(BookingStatus),
    Pay(u64),
    Confirm(Side),
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => prop::sample::select(BookingStatus::ALL.to_vec()).prop_map(Action::Status),
        2 => (1u64..=60_000).prop_map(Action::Pay),
        1 => prop_oneof![Just(Side::Vendor), Just(Side::Couple)].prop_map(Action::Confirm),
    ]
}

fn new_service() -> BookingService {
    let db = sled::Config::new().temporary(true).open().unwrap();
    BookingService::new(Arc::new(db)).unwrap()
}

fn new_booking(service: &BookingService, total: u64) -> Booking {
    service
        .create_booking(
            BookingDetails::new()
                .set_requester("couple-prop")
                .set_vendor("vendor-prop")
                .set_service("svc-prop")
                .set_total_amount(total),
        )
        .unwrap()
}

fn assert_invariants(service: &BookingService, booking: &Booking) -> Result<(), TestCaseError> {
    let receipts = service.get_receipts(&booking.id).unwrap();
    let ledger_total = ledger::ledger_total(&receipts);

    prop_assert_eq!(booking.total_paid, ledger_total);
    prop_assert_eq!(
        booking.remaining_balance,
        booking.total_amount.saturating_sub(ledger_total)
    );
    prop_assert!(booking.payment_progress <= 100);
    prop_assert_eq!(
        booking.fully_completed,
        booking.vendor_completed() && booking.couple_completed()
    );
    if booking.fully_completed {
        prop_assert_eq!(booking.status, BookingStatus::Completed);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_invariants_hold_for_any_sequence(
        total in 1u64..=200_000,
        actions in prop::collection::vec(action_strategy(), 1..=25),
    ) {
        let service = new_service();
        let id = new_booking(&service, total).id;

        for (n, action) in actions.into_iter().enumerate() {
            let before = service.get_booking(&id).unwrap();
            let result = match action {
                Action::Status(target) => service
                    .request_status_change(&id, target, None)
                    .map(|_| ()),
                Action::Pay(amount) => service
                    .record_payment(&id, amount, PaymentMethod::Card, &format!("txn_{n}"), PaymentType::Balance)
                    .map(|_| ()),
                Action::Confirm(side) => service
                    .confirm_completion(&id, side, &[], None)
                    .map(|_| ()),
            };
            let after = service.get_booking(&id).unwrap();

            if let Err(err) = result {
                prop_assert!(err.is_business_rule(), "unexpected fault: {}", err);
                prop_assert_eq!(&before, &after, "a rejected request changed the booking");
            }
            if before.status.is_terminal() {
                prop_assert_eq!(before.status, after.status);
            }
            assert_invariants(&service, &after)?;
        }
    }

    #[test]
    fn prop_ledger_sum_matches_receipts(
        amounts in prop::collection::vec(1u64..=50_000, 1..=12),
    ) {
        let service = new_service();
        let total: u64 = amounts.iter().sum::<u64>() / 2 + 1;
        let id = new_booking(&service, total).id;

        for (n, amount) in amounts.iter().enumerate() {
            service
                .record_payment(&id, *amount, PaymentMethod::BankTransfer, &format!("ref_{n}"), PaymentType::Balance)
                .unwrap();
        }

        let booking = service.get_booking(&id).unwrap();
        let receipts = service.get_receipts(&id).unwrap();
        prop_assert_eq!(receipts.len(), amounts.len());
        prop_assert_eq!(booking.total_paid, amounts.iter().sum::<u64>());
        prop_assert_eq!(booking.remaining_balance, 0);
        prop_assert_eq!(booking.payment_progress, 100);
    }

    #[test]
    fn prop_terminal_states_reject_every_other_target(
        terminal in prop_oneof![Just(BookingStatus::Cancelled), Just(BookingStatus::Refunded)],
        target in prop::sample::select(BookingStatus::ALL.to_vec()),
    ) {
        let service = new_service();
        let id = new_booking(&service, 10_000).id;
        let path: &[BookingStatus] = match terminal {
            BookingStatus::Refunded => &[
                BookingStatus::QuoteSent,
                BookingStatus::QuoteAccepted,
                BookingStatus::Confirmed,
                BookingStatus::Disputed,
                BookingStatus::Refunded,
            ],
            _ => &[BookingStatus::Cancelled],
        };
        for status in path {
            service.request_status_change(&id, *status, None).unwrap();
        }

        let result = service.request_status_change(&id, target, None);
        if target == terminal {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(result.is_err());
        }
        prop_assert_eq!(service.get_booking(&id).unwrap().status, terminal);
    }
}
