//! Message store timestamps.
//!
//! The store counts time from 2001-01-01 00:00:00 UTC. Current releases write
//! nanoseconds, older databases microseconds or whole seconds; the unit is
//! inferred from magnitude.

use chrono::{DateTime, Duration, TimeZone, Utc};
use thiserror::Error;

/// Seconds between the Unix epoch and 2001-01-01 00:00:00 UTC.
pub const STORE_EPOCH_UNIX_SECS: i64 = 978_307_200;

/// Raw values at or above this magnitude are nanoseconds.
const NANOS_THRESHOLD: i64 = 10_000_000_000_000_000;
/// Raw values at or above this magnitude (and below `NANOS_THRESHOLD`) are microseconds.
const MICROS_THRESHOLD: i64 = 10_000_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("message has no timestamp")]
    Missing,
    #[error("timestamp {0} is outside the representable range")]
    OutOfRange(i64),
}

pub fn store_epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(STORE_EPOCH_UNIX_SECS, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Convert a raw store timestamp to an absolute time.
pub fn from_store_time(raw: Option<i64>) -> Result<DateTime<Utc>, TimestampError> {
    let raw = raw.ok_or(TimestampError::Missing)?;
    let magnitude = raw.checked_abs().ok_or(TimestampError::OutOfRange(raw))?;

    let offset = if magnitude >= NANOS_THRESHOLD {
        Duration::nanoseconds(raw)
    } else if magnitude >= MICROS_THRESHOLD {
        Duration::microseconds(raw)
    } else {
        Duration::try_seconds(raw).ok_or(TimestampError::OutOfRange(raw))?
    };

    store_epoch()
        .checked_add_signed(offset)
        .ok_or(TimestampError::OutOfRange(raw))
}

/// Convert an absolute time to the store's nanosecond representation.
/// Used to build the lower bound of the lookback query.
pub fn to_store_nanos(time: DateTime<Utc>) -> i64 {
    let since = time.signed_duration_since(store_epoch());
    since
        .num_nanoseconds()
        .unwrap_or(if since < Duration::zero() { i64::MIN } else { i64::MAX })
}
