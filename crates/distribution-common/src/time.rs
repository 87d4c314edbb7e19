//! Time handling for epoch-second record timestamps.

use chrono::{DateTime, SecondsFormat};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Align an epoch timestamp to the start of its UTC epoch day.
///
/// Uses euclidean division so pre-1970 timestamps still floor downwards.
pub fn day_floor(timestamp: i64) -> i64 {
    timestamp.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY
}

/// Format an epoch timestamp as an ISO 8601 instant, e.g. `2024-01-15T12:00:00+00:00`.
///
/// Returns `None` for timestamps outside the representable range.
pub fn iso_instant(timestamp: i64) -> Option<String> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, false))
}
