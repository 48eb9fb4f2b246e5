//! Timestamp and calendar-date utilities
//!
//! The local date of a recording is established once (by the store, or by the
//! fallback here) and then carried through every downstream message.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a timestamp as returned by the store or carried in a message
///
/// Accepts RFC 3339 with any offset, and the offset-less form
/// `YYYY-MM-DDTHH:MM:SS[.fff]` / `YYYY-MM-DD HH:MM:SS` interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(Error::InvalidInput(format!("Unparseable timestamp: {}", raw)))
}

/// Parse a fixed UTC offset such as `+09:00`, `-05:30` or `Z`
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| Error::Internal("zero offset".to_string()));
    }

    raw.parse::<FixedOffset>()
        .map_err(|e| Error::Config(format!("Invalid UTC offset {}: {}", raw, e)))
}

/// Calendar date of `recorded_at` at the given offset
///
/// Only used when the store has no local date for the recording.
pub fn fallback_local_date(recorded_at: &DateTime<Utc>, offset: &FixedOffset) -> NaiveDate {
    recorded_at.with_timezone(offset).date_naive()
}

/// Monday of the week containing the day before `today`
pub fn week_start_for(today: NaiveDate) -> NaiveDate {
    let yesterday = today - Duration::days(1);
    yesterday - Duration::days(yesterday.weekday().num_days_from_monday() as i64)
}

/// Reconstruct a recording instant from object path segments
///
/// `date` is `YYYY-MM-DD` and `time_slot` is `HH-MM`, both in the device's
/// local time at `offset`.
pub fn instant_from_path_segments(date: &str, time_slot: &str, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time_slot, "%H-%M").ok()?;
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|ts| ts.with_timezone(&Utc))
}
