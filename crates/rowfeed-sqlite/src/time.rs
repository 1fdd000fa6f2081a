//! Timestamp encoding used by the message store.
//!
//! Timestamps are signed nanoseconds since 2001-01-01T00:00:00Z. A stored
//! value of zero (or NULL) means "never happened".

use chrono::{DateTime, Utc};

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z.
pub const REFERENCE_EPOCH_UNIX_SECS: i64 = 978_307_200;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Encode a timestamp for comparison against stored values.
///
/// Out-of-range values saturate, so a window starting at the earliest
/// representable time still matches every row.
pub fn to_store_time(at: DateTime<Utc>) -> i64 {
    let secs = at.timestamp().saturating_sub(REFERENCE_EPOCH_UNIX_SECS);
    secs.saturating_mul(NANOS_PER_SEC)
        .saturating_add(i64::from(at.timestamp_subsec_nanos()))
}

/// Decode a stored value. Zero and NULL decode to `None`.
pub fn from_store_time(value: Option<i64>) -> Option<DateTime<Utc>> {
    let value = value.filter(|v| *v != 0)?;
    let secs = value.div_euclid(NANOS_PER_SEC) + REFERENCE_EPOCH_UNIX_SECS;
    let nanos = value.rem_euclid(NANOS_PER_SEC) as u32;
    DateTime::from_timestamp(secs, nanos)
}
