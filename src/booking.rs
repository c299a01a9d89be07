//! Booking record, draft details and the identity/time primitives they carry
use super::completion::CompletionRecord;
use super::error::{BookingError, BookingResult};
use super::ledger;
use super::status::BookingStatus;
use chrono::{DateTime, Datelike, TimeZone, Utc};

#[derive(Debug, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// Compared through the inner instant. Derives would demand `T: Ord`, which no
// chrono zone implements.
impl<T: TimeZone> PartialEq for TimeStamp<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: TimeZone> Eq for TimeStamp<T> {}

impl<T: TimeZone> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn year(&self) -> i32 {
        self.0.year()
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Opaque reference to a requester, vendor or service owned by an external
/// identity or catalog system. Only equality is meaningful.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Hash)]
#[cbor(array)]
pub struct PartyId(#[n(0)] String);

impl PartyId {
    pub fn new(raw: impl AsRef<str>) -> BookingResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(BookingError::InvalidDetails(
                "identity reference is empty".into(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which party is confirming delivery of the service.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    #[n(0)]
    Vendor,
    #[n(1)]
    Couple,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Vendor => f.write_str("vendor"),
            Side::Couple => f.write_str("couple"),
        }
    }
}

// Aggregate root. Payment fields 13..=15 are a projection of the receipt
// ledger and are only written through `apply_ledger`.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub reference: String, // human facing, e.g. WB-2026-0001
    #[n(2)]
    pub requester_id: PartyId,
    #[n(3)]
    pub vendor_id: PartyId,
    #[n(4)]
    pub service_id: PartyId,
    #[n(5)]
    pub service_name: Option<String>,
    #[n(6)]
    pub service_type: Option<String>,
    #[n(7)]
    pub event_date: Option<TimeStamp<Utc>>,
    #[n(8)]
    pub event_location: Option<String>,
    #[n(9)]
    pub guest_count: Option<u32>,
    #[n(10)]
    pub special_requests: Option<String>,
    #[n(11)]
    pub total_amount: u64, // minor units, zero until quoted
    #[n(12)]
    pub deposit_amount: u64,
    #[n(13)]
    pub total_paid: u64,
    #[n(14)]
    pub remaining_balance: u64,
    #[n(15)]
    pub payment_progress: u8,
    #[n(16)]
    pub status: BookingStatus,
    #[n(17)]
    pub status_reason: Option<String>,
    #[n(18)]
    pub vendor: CompletionRecord,
    #[n(19)]
    pub couple: CompletionRecord,
    #[n(20)]
    pub fully_completed: bool,
    #[n(21)]
    pub fully_completed_at: Option<TimeStamp<Utc>>,
    #[n(22)]
    pub receipt_numbers: Vec<String>, // ledger index, in recording order
    #[n(23)]
    pub created_at: TimeStamp<Utc>,
    #[n(24)]
    pub updated_at: TimeStamp<Utc>,
}

impl Booking {
    pub fn vendor_completed(&self) -> bool {
        self.vendor.confirmed
    }
    pub fn couple_completed(&self) -> bool {
        self.couple.confirmed
    }
    pub fn completion(&self, side: Side) -> &CompletionRecord {
        match side {
            Side::Vendor => &self.vendor,
            Side::Couple => &self.couple,
        }
    }
    pub(crate) fn completion_mut(&mut self, side: Side) -> &mut CompletionRecord {
        match side {
            Side::Vendor => &mut self.vendor,
            Side::Couple => &mut self.couple,
        }
    }
    /// Project a ledger sum onto the cached payment fields.
    pub fn apply_ledger(&mut self, total_paid: u64) {
        self.total_paid = total_paid;
        self.remaining_balance = ledger::remaining_balance(self.total_amount, total_paid);
        self.payment_progress = ledger::payment_progress(self.total_amount, total_paid);
    }
    pub fn touch(&mut self) {
        self.updated_at = TimeStamp::new();
    }
    pub fn is_settled(&self) -> bool {
        self.total_amount > 0 && self.remaining_balance == 0
    }
}

/// Draft of a booking request, validated before it is persisted.
#[derive(Debug, Default, Clone)]
pub struct BookingDetails {
    requester_id: Option<String>,
    vendor_id: Option<String>,
    service_id: Option<String>,
    service_name: Option<String>,
    service_type: Option<String>,
    event_date: Option<TimeStamp<Utc>>,
    event_location: Option<String>,
    guest_count: Option<u32>,
    special_requests: Option<String>,
    total_amount: u64,
    deposit_amount: u64,
}

impl BookingDetails {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_requester(mut self, id: &str) -> Self {
        self.requester_id = Some(id.to_string());
        self
    }
    pub fn set_vendor(mut self, id: &str) -> Self {
        self.vendor_id = Some(id.to_string());
        self
    }
    pub fn set_service(mut self, id: &str) -> Self {
        self.service_id = Some(id.to_string());
        self
    }
    pub fn set_service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }
    pub fn set_service_type(mut self, kind: &str) -> Self {
        self.service_type = Some(kind.to_string());
        self
    }
    pub fn set_event_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.event_date = Some(date);
        self
    }
    pub fn set_event_location(mut self, location: &str) -> Self {
        self.event_location = Some(location.to_string());
        self
    }
    pub fn set_guest_count(mut self, count: u32) -> Self {
        self.guest_count = Some(count);
        self
    }
    pub fn set_special_requests(mut self, notes: &str) -> Self {
        self.special_requests = Some(notes.to_string());
        self
    }
    pub fn set_total_amount(mut self, amount: u64) -> Self {
        self.total_amount = amount;
        self
    }
    pub fn set_deposit_amount(mut self, amount: u64) -> Self {
        self.deposit_amount = amount;
        self
    }
    /// Checks the draft and turns it into a `pending` booking.
    pub fn validate_and_finalise(self, id: String, reference: String) -> BookingResult<Booking> {
        let requester_id = required_party(self.requester_id, "requester")?;
        let vendor_id = required_party(self.vendor_id, "vendor")?;
        let service_id = required_party(self.service_id, "service")?;

        if requester_id == vendor_id {
            return Err(BookingError::InvalidDetails(
                "requester and vendor must be different parties".into(),
            ));
        }
        if self.guest_count == Some(0) {
            return Err(BookingError::InvalidDetails(
                "guest count must be greater than zero".into(),
            ));
        }
        if let Some(date) = &self.event_date {
            if date.0.timestamp_nanos_opt().is_none() {
                return Err(BookingError::InvalidDetails(format!(
                    "event date {} is outside the supported range",
                    date.0.date_naive()
                )));
            }
        }
        if self.deposit_amount > self.total_amount {
            return Err(BookingError::InvalidDetails(format!(
                "deposit {} exceeds total amount {}",
                self.deposit_amount, self.total_amount
            )));
        }

        let now = TimeStamp::new();
        let mut booking = Booking {
            id,
            reference,
            requester_id,
            vendor_id,
            service_id,
            service_name: self.service_name,
            service_type: self.service_type,
            event_date: self.event_date,
            event_location: self.event_location,
            guest_count: self.guest_count,
            special_requests: self.special_requests,
            total_amount: self.total_amount,
            deposit_amount: self.deposit_amount,
            total_paid: 0,
            remaining_balance: 0,
            payment_progress: 0,
            status: BookingStatus::Pending,
            status_reason: None,
            vendor: CompletionRecord::default(),
            couple: CompletionRecord::default(),
            fully_completed: false,
            fully_completed_at: None,
            receipt_numbers: vec![],
            created_at: now.clone(),
            updated_at: now,
        };
        booking.apply_ledger(0);

        Ok(booking)
    }
}

fn required_party(value: Option<String>, field: &str) -> BookingResult<PartyId> {
    match value {
        Some(raw) => PartyId::new(raw)
            .map_err(|_| BookingError::InvalidDetails(format!("{field} id is empty"))),
        None => Err(BookingError::InvalidDetails(format!("{field} id is not set"))),
    }
}
