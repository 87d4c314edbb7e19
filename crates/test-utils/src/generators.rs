//! Record series generators for synthetic weather-like data.
//!
//! Values follow predictable patterns so tests can verify which record ended
//! up in which message.

use distribution_common::Record;

/// One record per `step` seconds starting at `start`.
///
/// Each value is `base + index`, so the n-th record of a series has value `base + n`.
///
/// ```
/// use test_utils::record_series;
///
/// let records = record_series(7, 0, 3600, 3, 10.0);
/// assert_eq!(records.len(), 3);
/// assert_eq!(records[2].date, 7200);
/// assert_eq!(records[2].value, 12.0);
/// ```
pub fn record_series(element_id: i64, start: i64, step: i64, count: usize, base: f64) -> Vec<Record> {
    (0..count)
        .map(|i| Record::new(element_id, start + step * i as i64, base + i as f64))
        .collect()
}

/// Hourly records spanning `days` whole UTC days from `day_start`.
pub fn hourly_days(element_id: i64, day_start: i64, days: usize) -> Vec<Record> {
    record_series(element_id, day_start, 3600, days * 24, 0.0)
}

/// A temperature-like series (Celsius) with a diurnal cycle and three decimals.
pub fn temperature_series(element_id: i64, start: i64, hours: usize) -> Vec<Record> {
    (0..hours)
        .map(|h| {
            let phase = (h % 24) as f64 / 24.0 * std::f64::consts::TAU;
            let value = 15.0 + 8.0 * phase.sin() + 0.123;
            Record::new(element_id, start + 3600 * h as i64, value)
        })
        .collect()
}
