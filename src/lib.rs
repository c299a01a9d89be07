//! Booking lifecycle and settlement core for the Wedding Bazaar marketplace.
//!
//! A booking moves through the status graph in [`status`], collects
//! payments as append-only receipts in [`ledger`], and finishes once both
//! the vendor and the couple confirm delivery through [`completion`].
//! [`service::BookingService`] ties these together over sled.

pub mod booking;
pub mod completion;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod service;
pub mod status;
pub mod utils;

pub use booking::{Booking, BookingDetails, PartyId, Side, TimeStamp};
pub use config::{BookingConfig, CompletionPolicy};
pub use error::{BookingError, BookingResult};
pub use ledger::{PaymentMethod, PaymentType, Receipt};
pub use service::BookingService;
pub use status::BookingStatus;
