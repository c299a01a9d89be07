//! Service layer API for booking lifecycle and settlement operations
//!
//! Every mutating call is a single sled transaction spanning the trees it
//! touches. sled retries a transaction on conflict, so concurrent writes to
//! the same booking are serialized and the cached payment aggregates,
//! completion flags, counters and outbox always commit together.
use super::booking::{Booking, BookingDetails, PartyId, Side, TimeStamp};
use super::completion::{self, CompletionOutcome};
use super::config::BookingConfig;
use super::error::{BookingError, BookingResult};
use super::events::{BookingEvent, EventEnvelope};
use super::ledger::{
    self, LedgerAudit, PaymentMethod, PaymentStatus, PaymentType, Receipt, StoredReceipt,
};
use super::status::{BookingStatus, TransitionCheck};
use super::utils;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree, abort};
use sled::{Transactional, Tree};
use std::sync::Arc;
use tracing::{debug, info, warn};

type TxResult<T> = ConflictableTransactionResult<T, BookingError>;

const BOOKING_HRP: &str = "booking_";
const PAYMENT_ORIGIN: &str = "payment_processor";
const EVENT_COUNTER: &[u8] = b"events";

pub struct BookingService {
    instance: Arc<sled::Db>,
    bookings: Tree,
    references: Tree,
    receipts: Tree,
    payment_refs: Tree,
    counters: Tree,
    events: Tree,
    config: BookingConfig,
}

impl BookingService {
    pub fn new(instance: Arc<sled::Db>) -> BookingResult<Self> {
        Self::with_config(instance, BookingConfig::default())
    }

    pub fn with_config(instance: Arc<sled::Db>, config: BookingConfig) -> BookingResult<Self> {
        Ok(Self {
            bookings: instance.open_tree("bookings")?,
            references: instance.open_tree("references")?,
            receipts: instance.open_tree("receipts")?,
            payment_refs: instance.open_tree("payment_refs")?,
            counters: instance.open_tree("counters")?,
            events: instance.open_tree("events")?,
            instance,
            config,
        })
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    /// Persist a new booking request in `pending` state
    #[tracing::instrument(skip(self, details))]
    pub fn create_booking(&self, details: BookingDetails) -> BookingResult<Booking> {
        let id = utils::new_uuid_to_bech32(BOOKING_HRP)?;
        let prefix = self.config.reference_prefix.as_str();

        let booking = (&self.bookings, &self.references, &self.counters, &self.events)
            .transaction(|(bookings, references, counters, events)| -> TxResult<Booking> {
                let year = TimeStamp::new().year();
                let sequence = next_sequence(counters, &utils::year_counter_key("booking", year))?;
                let reference = utils::format_reference(prefix, year, sequence, 4);

                let booking = match details.clone().validate_and_finalise(id.clone(), reference) {
                    Ok(booking) => booking,
                    Err(err) => return abort(err),
                };

                write_record(bookings, booking.id.as_bytes(), &booking)?;
                references.insert(booking.reference.as_bytes(), booking.id.as_bytes())?;
                emit(
                    events,
                    counters,
                    &booking.id,
                    BookingEvent::BookingCreated {
                        reference: booking.reference.clone(),
                    },
                )?;

                Ok(booking)
            })?;

        info!(booking_id = %booking.id, reference = %booking.reference, "booking created");
        Ok(booking)
    }

    pub fn get_booking(&self, booking_id: &str) -> BookingResult<Booking> {
        match self.bookings.get(booking_id.as_bytes())? {
            Some(bytes) => Ok(minicbor::decode(&bytes)?),
            None => Err(BookingError::not_found_booking(booking_id)),
        }
    }

    pub fn find_by_reference(&self, reference: &str) -> BookingResult<Booking> {
        match self.references.get(reference.as_bytes())? {
            Some(id) => self.get_booking(&String::from_utf8_lossy(&id)),
            None => Err(BookingError::not_found_booking(reference)),
        }
    }

    /// Bookings where `party` is the requester or the vendor, oldest first
    pub fn list_bookings_for(&self, party: &PartyId) -> BookingResult<Vec<Booking>> {
        let mut found = vec![];
        for item in self.bookings.iter() {
            let (_, bytes) = item?;
            let booking: Booking = minicbor::decode(&bytes)?;
            if &booking.requester_id == party || &booking.vendor_id == party {
                found.push(booking);
            }
        }
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    /// Move a booking along the lifecycle graph
    ///
    /// Re-requesting the current status is a successful no-op.
    #[tracing::instrument(skip(self))]
    pub fn request_status_change(
        &self,
        booking_id: &str,
        target: BookingStatus,
        reason: Option<&str>,
    ) -> BookingResult<Booking> {
        let (booking, from) = (&self.bookings, &self.counters, &self.events).transaction(
            |(bookings, counters, events)| -> TxResult<(Booking, BookingStatus)> {
                let mut booking: Booking = read_booking(bookings, booking_id)?;
                let from = booking.status;

                match from.check_transition(target) {
                    TransitionCheck::Unchanged => return Ok((booking, from)),
                    TransitionCheck::Terminal => {
                        return abort(BookingError::TerminalStateViolation {
                            booking_id: booking.id.clone(),
                            status: from,
                        });
                    }
                    TransitionCheck::Disallowed => {
                        let detail = (target == BookingStatus::Completed)
                            .then(|| "completion requires both parties to confirm".to_string());
                        return abort(BookingError::InvalidTransition {
                            booking_id: booking.id.clone(),
                            from,
                            to: target,
                            detail,
                        });
                    }
                    TransitionCheck::Allowed => {}
                }

                if target == BookingStatus::QuoteAccepted && booking.total_amount == 0 {
                    return abort(BookingError::MissingQuoteAmount(booking.id.clone()));
                }
                if target == BookingStatus::PaidInFull && !booking.is_settled() {
                    return abort(BookingError::InvalidTransition {
                        booking_id: booking.id.clone(),
                        from,
                        to: target,
                        detail: Some(format!(
                            "remaining balance is {}",
                            booking.remaining_balance
                        )),
                    });
                }

                booking.status = target;
                if let Some(reason) = reason {
                    booking.status_reason = Some(reason.to_string());
                }
                booking.touch();

                write_record(bookings, booking.id.as_bytes(), &booking)?;
                emit(
                    events,
                    counters,
                    &booking.id,
                    BookingEvent::BookingStatusChanged {
                        from,
                        to: target,
                        reason: reason.map(str::to_string),
                    },
                )?;

                Ok((booking, from))
            },
        )?;

        if from == booking.status {
            debug!(status = %from, "status unchanged");
        } else {
            info!(from = %from, to = %booking.status, "booking status changed");
        }
        Ok(booking)
    }

    /// Vendor quote: fixes the contracted amounts and moves to `quote_sent`
    #[tracing::instrument(skip(self))]
    pub fn send_quote(
        &self,
        booking_id: &str,
        total_amount: u64,
        deposit_amount: u64,
    ) -> BookingResult<Booking> {
        if total_amount == 0 {
            return Err(BookingError::InvalidQuote {
                booking_id: booking_id.to_string(),
                detail: "total amount must be greater than zero".into(),
            });
        }
        if deposit_amount > total_amount {
            return Err(BookingError::InvalidQuote {
                booking_id: booking_id.to_string(),
                detail: format!("deposit {deposit_amount} exceeds total {total_amount}"),
            });
        }

        let booking = (&self.bookings, &self.counters, &self.events).transaction(
            |(bookings, counters, events)| -> TxResult<Booking> {
                let mut booking: Booking = read_booking(bookings, booking_id)?;
                let from = booking.status;

                if from.is_terminal() {
                    return abort(BookingError::TerminalStateViolation {
                        booking_id: booking.id.clone(),
                        status: from,
                    });
                }
                if !from.accepts_quote() {
                    return abort(BookingError::InvalidTransition {
                        booking_id: booking.id.clone(),
                        from,
                        to: BookingStatus::QuoteSent,
                        detail: Some("the quote can only change before it is accepted".into()),
                    });
                }

                booking.total_amount = total_amount;
                booking.deposit_amount = deposit_amount;
                booking.apply_ledger(booking.total_paid);
                booking.status = BookingStatus::QuoteSent;
                booking.touch();

                write_record(bookings, booking.id.as_bytes(), &booking)?;
                emit(
                    events,
                    counters,
                    &booking.id,
                    BookingEvent::QuoteSent {
                        total_amount,
                        deposit_amount,
                    },
                )?;
                if from != BookingStatus::QuoteSent {
                    emit(
                        events,
                        counters,
                        &booking.id,
                        BookingEvent::BookingStatusChanged {
                            from,
                            to: BookingStatus::QuoteSent,
                            reason: None,
                        },
                    )?;
                }

                Ok(booking)
            },
        )?;

        info!(total_amount, deposit_amount, "quote sent");
        Ok(booking)
    }

    /// Record one side's confirmation that the service was delivered
    #[tracing::instrument(skip(self, proof))]
    pub fn confirm_completion(
        &self,
        booking_id: &str,
        side: Side,
        proof: &[String],
        notes: Option<&str>,
    ) -> BookingResult<Booking> {
        let policy = self.config.completion_policy;

        let (booking, outcome) = (&self.bookings, &self.counters, &self.events).transaction(
            |(bookings, counters, events)| -> TxResult<(Booking, CompletionOutcome)> {
                let mut booking: Booking = read_booking(bookings, booking_id)?;
                let from = booking.status;

                let outcome = match completion::confirm(&mut booking, side, proof, notes, policy) {
                    Ok(outcome) => outcome,
                    Err(err) => return abort(err),
                };
                if outcome == CompletionOutcome::AlreadyConfirmed {
                    return Ok((booking, outcome));
                }

                write_record(bookings, booking.id.as_bytes(), &booking)?;
                emit(
                    events,
                    counters,
                    &booking.id,
                    BookingEvent::CompletionConfirmed { side },
                )?;
                if outcome == CompletionOutcome::FullyCompleted {
                    emit(
                        events,
                        counters,
                        &booking.id,
                        BookingEvent::BookingStatusChanged {
                            from,
                            to: BookingStatus::Completed,
                            reason: None,
                        },
                    )?;
                    emit(
                        events,
                        counters,
                        &booking.id,
                        BookingEvent::BookingFullyCompleted,
                    )?;
                }

                Ok((booking, outcome))
            },
        )?;

        match outcome {
            CompletionOutcome::AlreadyConfirmed => debug!(%side, "completion already confirmed"),
            CompletionOutcome::Confirmed => info!(%side, "completion confirmed"),
            CompletionOutcome::FullyCompleted => info!(%side, "booking fully completed"),
        }
        Ok(booking)
    }

    /// Append a confirmed payment to the ledger and refresh the booking's aggregates
    ///
    /// Does not change the booking status. A repeated `external_reference`
    /// with the same booking, amount, method and type returns the receipt
    /// already on file, even once the booking is closed. Any other reuse of
    /// a processor reference is rejected.
    #[tracing::instrument(skip(self))]
    pub fn record_payment(
        &self,
        booking_id: &str,
        amount: u64,
        method: PaymentMethod,
        external_reference: &str,
        payment_type: PaymentType,
    ) -> BookingResult<Receipt> {
        if amount == 0 {
            return Err(BookingError::InvalidPaymentAmount {
                booking_id: booking_id.to_string(),
                amount,
            });
        }
        let external_reference = external_reference.trim();
        if external_reference.is_empty() {
            return Err(BookingError::InvalidDetails(
                "payment is missing its transaction reference".into(),
            ));
        }
        let prefix = self.config.receipt_prefix.as_str();
        let vat_rate_bps = self.config.vat_rate_bps;

        let (receipt, booking, appended) = (
            &self.bookings,
            &self.receipts,
            &self.payment_refs,
            &self.counters,
            &self.events,
        )
            .transaction(
                |(bookings, receipts, payment_refs, counters, events)| -> TxResult<(Receipt, Booking, bool)> {
                    let mut booking: Booking = read_booking(bookings, booking_id)?;

                    if let Some(number) = payment_refs.get(external_reference.as_bytes())? {
                        let number = String::from_utf8_lossy(&number).into_owned();
                        let stored = read_receipt(receipts, &number)?.receipt;
                        if let Some(detail) =
                            retry_mismatch(&stored, booking_id, amount, method, payment_type)
                        {
                            return abort(BookingError::ConflictingPaymentReference {
                                reference: external_reference.to_string(),
                                receipt_number: number,
                                detail,
                            });
                        }
                        return Ok((stored, booking, false));
                    }

                    if matches!(
                        booking.status,
                        BookingStatus::Cancelled | BookingStatus::Refunded
                    ) {
                        return abort(BookingError::TerminalStateViolation {
                            booking_id: booking.id.clone(),
                            status: booking.status,
                        });
                    }

                    let now = TimeStamp::new();
                    let year = now.year();
                    let sequence =
                        next_sequence(counters, &utils::year_counter_key("receipt", year))?;
                    let receipt_number = utils::format_reference(prefix, year, sequence, 6);

                    let receipt = Receipt {
                        receipt_number: receipt_number.clone(),
                        booking_id: booking.id.clone(),
                        payer_id: booking.requester_id.clone(),
                        vendor_id: booking.vendor_id.clone(),
                        amount_paid: amount,
                        total_amount: booking.total_amount,
                        tax_amount: ledger::inclusive_tax(amount, vat_rate_bps),
                        payment_method: method,
                        payment_status: PaymentStatus::Completed,
                        transaction_reference: external_reference.to_string(),
                        description: format!(
                            "{payment_type} payment for booking {}",
                            booking.reference
                        ),
                        payment_type,
                        origin: PAYMENT_ORIGIN.to_string(),
                        payment_date: now.clone(),
                        created_at: now,
                    };

                    let mut entries = load_ledger(receipts, &booking.receipt_numbers)?;
                    entries.push(receipt.clone());
                    let total_paid = ledger::ledger_total(&entries);

                    let stored = match StoredReceipt::seal(receipt.clone()) {
                        Ok(stored) => stored,
                        Err(err) => return abort(err),
                    };
                    write_record(receipts, receipt_number.as_bytes(), &stored)?;
                    payment_refs.insert(external_reference.as_bytes(), receipt_number.as_bytes())?;

                    booking.receipt_numbers.push(receipt_number.clone());
                    booking.apply_ledger(total_paid);
                    booking.touch();
                    write_record(bookings, booking.id.as_bytes(), &booking)?;

                    emit(
                        events,
                        counters,
                        &booking.id,
                        BookingEvent::PaymentRecorded {
                            receipt_number,
                            amount,
                            payment_type,
                            remaining_balance: booking.remaining_balance,
                        },
                    )?;

                    Ok((receipt, booking, true))
                },
            )?;

        if !appended {
            debug!(receipt_number = %receipt.receipt_number, "duplicate payment reference, returning existing receipt");
        } else {
            info!(
                receipt_number = %receipt.receipt_number,
                total_paid = booking.total_paid,
                remaining_balance = booking.remaining_balance,
                "payment recorded"
            );
            if booking.is_settled() && booking.status != BookingStatus::PaidInFull {
                debug!(status = %booking.status, "balance settled, status left for the caller");
            }
        }
        Ok(receipt)
    }

    /// All receipts recorded against a booking, ordered by payment date
    pub fn get_receipts(&self, booking_id: &str) -> BookingResult<Vec<Receipt>> {
        let booking = self.get_booking(booking_id)?;
        let mut receipts = booking
            .receipt_numbers
            .iter()
            .map(|number| self.get_receipt(number))
            .collect::<BookingResult<Vec<_>>>()?;
        receipts.sort_by(|a, b| a.payment_date.cmp(&b.payment_date));
        Ok(receipts)
    }

    pub fn get_receipt(&self, receipt_number: &str) -> BookingResult<Receipt> {
        Ok(self.get_stored_receipt(receipt_number)?.receipt)
    }

    fn get_stored_receipt(&self, receipt_number: &str) -> BookingResult<StoredReceipt> {
        match self.receipts.get(receipt_number.as_bytes())? {
            Some(bytes) => Ok(minicbor::decode(&bytes)?),
            None => Err(BookingError::not_found_receipt(receipt_number)),
        }
    }

    /// Recompute a booking's payment aggregates from its ledger, repairing drift
    #[tracing::instrument(skip(self))]
    pub fn reconcile(&self, booking_id: &str) -> BookingResult<Booking> {
        let (booking, previous_total) = (
            &self.bookings,
            &self.receipts,
            &self.counters,
            &self.events,
        )
            .transaction(
                |(bookings, receipts, counters, events)| -> TxResult<(Booking, u64)> {
                    let mut booking: Booking = read_booking(bookings, booking_id)?;
                    let previous_total = booking.total_paid;

                    let entries = load_ledger(receipts, &booking.receipt_numbers)?;
                    let mut projected = booking.clone();
                    projected.apply_ledger(ledger::ledger_total(&entries));
                    if projected == booking {
                        return Ok((booking, previous_total));
                    }

                    booking = projected;
                    booking.touch();
                    write_record(bookings, booking.id.as_bytes(), &booking)?;
                    emit(
                        events,
                        counters,
                        &booking.id,
                        BookingEvent::LedgerReconciled {
                            previous_total,
                            ledger_total: booking.total_paid,
                        },
                    )?;

                    Ok((booking, previous_total))
                },
            )?;

        if previous_total != booking.total_paid {
            warn!(
                previous_total,
                ledger_total = booking.total_paid,
                "cached payment totals drifted from the ledger and were repaired"
            );
        }
        Ok(booking)
    }

    /// Check receipt digests and compare cached totals with the ledger
    pub fn audit_ledger(&self, booking_id: &str) -> BookingResult<LedgerAudit> {
        let booking = self.get_booking(booking_id)?;
        let mut receipts = vec![];
        let mut tampered_receipts = vec![];

        for number in &booking.receipt_numbers {
            let stored = self.get_stored_receipt(number)?;
            if !stored.is_intact()? {
                tampered_receipts.push(number.clone());
            }
            receipts.push(stored.receipt);
        }

        let audit = LedgerAudit {
            booking_id: booking.id.clone(),
            receipt_count: receipts.len(),
            ledger_total: ledger::ledger_total(&receipts),
            cached_total: booking.total_paid,
            tampered_receipts,
        };
        if !audit.is_consistent() {
            warn!(booking_id = %audit.booking_id, ?audit, "ledger audit failed");
        }
        Ok(audit)
    }

    /// Undelivered events, oldest first
    pub fn pending_events(&self) -> BookingResult<Vec<EventEnvelope>> {
        self.events
            .iter()
            .map(|item| -> BookingResult<EventEnvelope> {
                let (_, bytes) = item?;
                Ok(minicbor::decode(&bytes)?)
            })
            .collect()
    }

    /// Hand outbox events to `handler` in order, removing each once handled
    ///
    /// Stops at the first handler failure; that event and everything after
    /// it stay queued for the next drain.
    pub fn drain_events<F>(&self, mut handler: F) -> BookingResult<usize>
    where
        F: FnMut(&EventEnvelope) -> anyhow::Result<()>,
    {
        let mut delivered = 0;
        for item in self.events.iter() {
            let (key, bytes) = item?;
            let envelope: EventEnvelope = minicbor::decode(&bytes)?;
            if let Err(err) = handler(&envelope) {
                warn!(sequence = envelope.sequence, event = envelope.event.name(), %err, "event delivery failed");
                break;
            }
            self.events.remove(key)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    pub fn flush(&self) -> BookingResult<usize> {
        Ok(self.instance.flush()?)
    }
}

fn read_booking(tree: &TransactionalTree, booking_id: &str) -> TxResult<Booking> {
    match tree.get(booking_id.as_bytes())? {
        Some(bytes) => decode_record(&bytes),
        None => abort(BookingError::not_found_booking(booking_id)),
    }
}

fn read_receipt(tree: &TransactionalTree, receipt_number: &str) -> TxResult<StoredReceipt> {
    match tree.get(receipt_number.as_bytes())? {
        Some(bytes) => decode_record(&bytes),
        None => abort(BookingError::not_found_receipt(receipt_number)),
    }
}

// Describes how a receipt on file differs from a payment replayed under its
// processor reference, or None when the replay is identical.
fn retry_mismatch(
    stored: &Receipt,
    booking_id: &str,
    amount: u64,
    method: PaymentMethod,
    payment_type: PaymentType,
) -> Option<String> {
    if stored.booking_id != booking_id {
        Some(format!("receipted against booking {}", stored.booking_id))
    } else if stored.amount_paid != amount {
        Some(format!("recorded amount {} differs from {amount}", stored.amount_paid))
    } else if stored.payment_method != method {
        Some(format!("recorded method {:?} differs from {method:?}", stored.payment_method))
    } else if stored.payment_type != payment_type {
        Some(format!("recorded type {} differs from {payment_type}", stored.payment_type))
    } else {
        None
    }
}

fn load_ledger(tree: &TransactionalTree, numbers: &[String]) -> TxResult<Vec<Receipt>> {
    numbers
        .iter()
        .map(|number| read_receipt(tree, number).map(|stored| stored.receipt))
        .collect()
}

fn decode_record<T>(bytes: &[u8]) -> TxResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).or_else(|err| abort(BookingError::from(err)))
}

fn write_record<T>(tree: &TransactionalTree, key: &[u8], value: &T) -> TxResult<()>
where
    T: minicbor::Encode<()>,
{
    let bytes = minicbor::to_vec(value).or_else(|err| abort(BookingError::from(err)))?;
    tree.insert(key, bytes)?;
    Ok(())
}

fn next_sequence(counters: &TransactionalTree, key: &[u8]) -> TxResult<u64> {
    let current = match counters.get(key)? {
        Some(bytes) => match <[u8; 8]>::try_from(bytes.as_ref()) {
            Ok(raw) => u64::from_be_bytes(raw),
            Err(_) => return abort(BookingError::Codec("corrupt sequence counter".into())),
        },
        None => 0,
    };
    let next = current + 1;
    counters.insert(key, next.to_be_bytes().to_vec())?;
    Ok(next)
}

fn emit(
    events: &TransactionalTree,
    counters: &TransactionalTree,
    booking_id: &str,
    event: BookingEvent,
) -> TxResult<()> {
    let sequence = next_sequence(counters, EVENT_COUNTER)?;
    let envelope = EventEnvelope {
        sequence,
        booking_id: booking_id.to_string(),
        occurred_at: TimeStamp::new(),
        event,
    };
    write_record(events, &sequence.to_be_bytes(), &envelope)
}
