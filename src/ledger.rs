//! Receipt ledger entries and the projections derived from them
//!
//! Receipts are append-only. A booking's `total_paid`, `remaining_balance`
//! and `payment_progress` are always recomputed from the receipts recorded
//! against it; all money is in minor currency units.
use super::booking::{PartyId, TimeStamp};
use super::error::BookingResult;
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    #[n(0)]
    Card,
    #[n(1)]
    EWallet,
    #[n(2)]
    BankTransfer,
    #[n(3)]
    Cash,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    #[n(0)]
    Completed,
    #[n(1)]
    Pending,
    #[n(2)]
    Failed,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentType {
    #[n(0)]
    Deposit,
    #[n(1)]
    Balance,
    #[n(2)]
    Full,
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentType::Deposit => f.write_str("deposit"),
            PaymentType::Balance => f.write_str("balance"),
            PaymentType::Full => f.write_str("full"),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    #[n(0)]
    pub receipt_number: String, // e.g. RCPT-2026-000001
    #[n(1)]
    pub booking_id: String,
    #[n(2)]
    pub payer_id: PartyId,
    #[n(3)]
    pub vendor_id: PartyId,
    #[n(4)]
    pub amount_paid: u64,
    #[n(5)]
    pub total_amount: u64, // booking total at the time of payment
    #[n(6)]
    pub tax_amount: u64,
    #[n(7)]
    pub payment_method: PaymentMethod,
    #[n(8)]
    pub payment_status: PaymentStatus,
    #[n(9)]
    pub transaction_reference: String, // issued by the payment processor
    #[n(10)]
    pub description: String,
    #[n(11)]
    pub payment_type: PaymentType,
    #[n(12)]
    pub origin: String,
    #[n(13)]
    pub payment_date: TimeStamp<Utc>,
    #[n(14)]
    pub created_at: TimeStamp<Utc>,
}

impl Receipt {
    pub fn counts_toward_balance(&self) -> bool {
        self.payment_status == PaymentStatus::Completed
    }
}

/// Ledger entry as persisted: the receipt plus a digest of its encoding.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone)]
pub struct StoredReceipt {
    #[n(0)]
    pub receipt: Receipt,
    #[n(1)]
    pub digest: String,
}

impl StoredReceipt {
    pub fn seal(receipt: Receipt) -> BookingResult<Self> {
        let digest = receipt_digest(&receipt)?;
        Ok(Self { receipt, digest })
    }
    pub fn is_intact(&self) -> BookingResult<bool> {
        Ok(receipt_digest(&self.receipt)? == self.digest)
    }
}

fn receipt_digest(receipt: &Receipt) -> BookingResult<String> {
    let cbor = minicbor::to_vec(receipt)?;
    Ok(sha256::digest(&cbor))
}

/// Result of comparing a booking's cached aggregates against its ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAudit {
    pub booking_id: String,
    pub receipt_count: usize,
    pub ledger_total: u64,
    pub cached_total: u64,
    pub tampered_receipts: Vec<String>,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.ledger_total == self.cached_total && self.tampered_receipts.is_empty()
    }
}

pub fn ledger_total<'a>(receipts: impl IntoIterator<Item = &'a Receipt>) -> u64 {
    receipts
        .into_iter()
        .filter(|r| r.counts_toward_balance())
        .fold(0u64, |acc, r| acc.saturating_add(r.amount_paid))
}

pub fn remaining_balance(total_amount: u64, total_paid: u64) -> u64 {
    total_amount.saturating_sub(total_paid)
}

/// Percentage paid, rounded half up and clamped to 100. Zero when unquoted.
pub fn payment_progress(total_amount: u64, total_paid: u64) -> u8 {
    if total_amount == 0 {
        return 0;
    }
    let total = u128::from(total_amount);
    let scaled = (u128::from(total_paid) * 200 + total) / (total * 2);
    scaled.min(100) as u8
}

/// VAT portion already included in `amount`, rounded half up.
pub fn inclusive_tax(amount: u64, rate_bps: u32) -> u64 {
    if rate_bps == 0 {
        return 0;
    }
    let rate = u128::from(rate_bps);
    let denominator = 10_000 + rate;
    let tax = (u128::from(amount) * rate * 2 + denominator) / (denominator * 2);
    tax as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(amount: u64, status: PaymentStatus) -> Receipt {
        Receipt {
            receipt_number: format!("RCPT-2026-{amount:06}"),
            booking_id: "booking_t".into(),
            payer_id: PartyId::new("couple-1").unwrap(),
            vendor_id: PartyId::new("vendor-1").unwrap(),
            amount_paid: amount,
            total_amount: 100_000,
            tax_amount: 0,
            payment_method: PaymentMethod::EWallet,
            payment_status: status,
            transaction_reference: format!("txn_{amount}"),
            description: String::new(),
            payment_type: PaymentType::Deposit,
            origin: "test".into(),
            payment_date: TimeStamp::new(),
            created_at: TimeStamp::new(),
        }
    }

    #[test]
    fn progress_rounds_and_clamps() {
        assert_eq!(payment_progress(100_000, 30_000), 30);
        assert_eq!(payment_progress(3, 1), 33);
        assert_eq!(payment_progress(3, 2), 67);
        assert_eq!(payment_progress(200, 1), 1); // 0.5 rounds up
        assert_eq!(payment_progress(100, 250), 100);
        assert_eq!(payment_progress(0, 5_000), 0);
    }

    #[test]
    fn remaining_never_underflows() {
        assert_eq!(remaining_balance(100_000, 30_000), 70_000);
        assert_eq!(remaining_balance(100_000, 120_000), 0);
        assert_eq!(remaining_balance(0, 0), 0);
    }

    #[test]
    fn only_completed_receipts_count() {
        let receipts = [
            receipt(30_000, PaymentStatus::Completed),
            receipt(5_000, PaymentStatus::Failed),
            receipt(20_000, PaymentStatus::Completed),
            receipt(1_000, PaymentStatus::Pending),
        ];
        assert_eq!(ledger_total(&receipts), 50_000);
    }

    #[test]
    fn twelve_percent_vat_inclusive() {
        // 11_200 gross at 12% carries 1_200 of VAT
        assert_eq!(inclusive_tax(11_200, 1_200), 1_200);
        assert_eq!(inclusive_tax(11_200, 0), 0);
    }

    #[test]
    fn sealed_receipt_detects_edits() {
        let mut stored = StoredReceipt::seal(receipt(30_000, PaymentStatus::Completed)).unwrap();
        assert!(stored.is_intact().unwrap());

        stored.receipt.amount_paid = 1;
        assert!(!stored.is_intact().unwrap());
    }
}
