//! Business policy knobs for the booking core
use super::error::BookingResult;
use serde::Deserialize;

/// Whether a side may confirm completion before any payment is on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    #[default]
    RequirePayment,
    AllowUnpaid,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    pub completion_policy: CompletionPolicy,
    pub reference_prefix: String,
    pub receipt_prefix: String,
    pub vat_rate_bps: u32,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            completion_policy: CompletionPolicy::default(),
            reference_prefix: "WB".into(),
            receipt_prefix: "RCPT".into(),
            vat_rate_bps: 0,
        }
    }
}

impl BookingConfig {
    /// Reads `BAZAAR_*` environment variables over the defaults.
    pub fn load() -> BookingResult<Self> {
        Self::from_source(config::Environment::with_prefix("BAZAAR").try_parsing(true))
    }

    pub fn from_source<S>(source: S) -> BookingResult<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder().add_source(source).build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn with_completion_policy(mut self, policy: CompletionPolicy) -> Self {
        self.completion_policy = policy;
        self
    }

    pub fn with_vat_rate_bps(mut self, bps: u32) -> Self {
        self.vat_rate_bps = bps;
        self
    }
}
