//! Component A: wall-clock timestamp ↔ fixed-precision decimal conversion.
//!
//! The decimal form is seconds-since-epoch with a six-digit microsecond
//! fraction (`<unix_seconds>.<ffffff>`), so that adding `Decimal::ONE` always
//! advances exactly one second regardless of where in the minute/hour it
//! lands. This is what makes the verifier's one-second match window (§4.F,
//! §4.H) and `date_equals_second` well defined.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::error::DomainError;

/// Convert a UTC timestamp to its decimal representation.
pub fn to_decimal(dt: DateTime<Utc>) -> Decimal {
    let secs = dt.timestamp();
    let micros = dt.timestamp_subsec_micros();
    Decimal::new(secs * 1_000_000 + i64::from(micros), 6)
}

/// Invert `to_decimal`. Exact for any value it produced.
pub fn from_decimal(d: Decimal) -> Result<DateTime<Utc>, DomainError> {
    let micros = (d * Decimal::new(1_000_000, 0))
        .to_string()
        .parse::<i64>()
        .map_err(|_| DomainError::InvalidDecimalTime(d.to_string()))?;
    let secs = micros.div_euclid(1_000_000);
    let subsec_micros = micros.rem_euclid(1_000_000) as u32;
    Utc.timestamp_opt(secs, subsec_micros * 1_000)
        .single()
        .ok_or_else(|| DomainError::InvalidDecimalTime(d.to_string()))
}

/// Parse the two timestamp forms the external envelope accepts:
/// `YYYY-MM-DD HH:MM:SS[.ffffff]` and `YYYY-MM-DDTHH:MM:SS[.ffffff]`.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DomainError> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    for fmt in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(DomainError::InvalidTimestamp(s.to_string()))
}

/// Truncate both sides to whole seconds before comparing. The source
/// tolerates sub-second clock drift between independently-recorded
/// timestamps; never compare `DateTime<Utc>` values for equality directly
/// in verification code.
pub fn date_equals_second(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.timestamp() == b.timestamp()
}

/// `(launched_at, launched_at + 0.999999s)` — the inclusive-start,
/// inclusive-end match window used by `_process_exists` and
/// `_verify_for_launch`. Exactly 999999 microseconds wide, not a full second:
/// a row landing exactly on the next whole second must not match.
pub fn second_window(launched_at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.timestamp_opt(launched_at.timestamp(), 0).single().unwrap();
    (start, start + chrono::Duration::microseconds(999_999))
}
