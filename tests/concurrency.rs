//! Concurrent writers against a single booking
//!
//! sled transactions must serialize these so that ledger aggregates and the
//! completion flags never lose an update.

use std::sync::Arc;
use std::thread;
use wedding_bazaar::{
    BookingDetails, BookingService, BookingStatus, PaymentMethod, PaymentType, Side,
};

fn temporary_service() -> anyhow::Result<Arc<BookingService>> {
    let db = sled::Config::new().temporary(true).open()?;
    Ok(Arc::new(BookingService::new(Arc::new(db))?))
}

fn accepted_booking(service: &BookingService, total: u64) -> anyhow::Result<String> {
    let booking = service.create_booking(
        BookingDetails::new()
            .set_requester("couple-concurrent")
            .set_vendor("vendor-concurrent")
            .set_service("svc-band")
            .set_total_amount(total),
    )?;
    service.request_status_change(&booking.id, BookingStatus::QuoteSent, None)?;
    service.request_status_change(&booking.id, BookingStatus::QuoteAccepted, None)?;
    Ok(booking.id)
}

#[test]
fn parallel_payments_are_all_counted() -> anyhow::Result<()> {
    let service = temporary_service()?;
    let id = accepted_booking(&service, 1_000_000)?;

    thread::scope(|scope| {
        for worker in 0..8 {
            let service = Arc::clone(&service);
            let id = id.clone();
            scope.spawn(move || {
                for n in 0..5 {
                    service
                        .record_payment(
                            &id,
                            1_000,
                            PaymentMethod::Card,
                            &format!("txn_{worker}_{n}"),
                            PaymentType::Balance,
                        )
                        .unwrap();
                }
            });
        }
    });

    let booking = service.get_booking(&id)?;
    let receipts = service.get_receipts(&id)?;
    assert_eq!(receipts.len(), 40);
    assert_eq!(booking.total_paid, 40_000);
    assert_eq!(booking.remaining_balance, 960_000);
    assert_eq!(booking.payment_progress, 4);
    assert!(service.audit_ledger(&id)?.is_consistent());

    Ok(())
}

#[test]
fn simultaneous_confirmations_converge() -> anyhow::Result<()> {
    let service = temporary_service()?;

    for round in 0..10 {
        let id = accepted_booking(&service, 10_000)?;
        service.record_payment(
            &id,
            10_000,
            PaymentMethod::EWallet,
            &format!("txn_round_{round}"),
            PaymentType::Full,
        )?;

        thread::scope(|scope| {
            for side in [Side::Vendor, Side::Couple] {
                let service = Arc::clone(&service);
                let id = id.clone();
                scope.spawn(move || service.confirm_completion(&id, side, &[], None).unwrap());
            }
        });

        let booking = service.get_booking(&id)?;
        assert!(booking.vendor_completed() && booking.couple_completed());
        assert!(booking.fully_completed, "round {round} left a partial completion");
        assert_eq!(booking.status, BookingStatus::Completed);
    }

    Ok(())
}
