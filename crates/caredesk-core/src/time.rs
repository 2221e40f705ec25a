//! Epoch-millisecond time helpers.
//!
//! Everything the scheduler persists is an `i64` UTC epoch-millisecond
//! timestamp; chrono is used only at the edges for calendar math and for the
//! compact `yyyyMMddTHHmmssZ` form recurrence expressions carry in `DTSTART`
//! and `UNTIL`.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Milliseconds in one UTC day.
pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

const COMPACT_UTC: &str = "%Y%m%dT%H%M%SZ";

/// Current UTC time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Midnight (00:00:00 UTC) of the day containing `ts`.
pub fn start_of_utc_day(ts: i64) -> i64 {
    ts.div_euclid(MS_PER_DAY) * MS_PER_DAY
}

/// Midnight UTC of the day containing `ts`, shifted by `days` whole days.
pub fn start_of_utc_day_plus(ts: i64, days: i64) -> i64 {
    start_of_utc_day(ts) + days * MS_PER_DAY
}

/// Render a timestamp in the compact UTC form, e.g. `20250101T060000Z`.
pub fn format_utc_compact(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts)
        .unwrap_or_default()
        .format(COMPACT_UTC)
        .to_string()
}

/// Parse the compact UTC form back to epoch milliseconds.
pub fn parse_utc_compact(text: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(text.trim(), COMPACT_UTC)
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}
