//! Identifier and human reference generation

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id from a uuid7 then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Formats a sequence-backed reference such as `WB-2026-0001`.
pub fn format_reference(prefix: &str, year: i32, sequence: u64, width: usize) -> String {
    format!("{prefix}-{year}-{sequence:0width$}")
}

/// Counter key scoping a sequence to one calendar year.
pub fn year_counter_key(name: &str, year: i32) -> Vec<u8> {
    format!("{name}:{year}").into_bytes()
}
