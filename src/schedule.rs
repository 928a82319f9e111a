//! Scheduler trigger: wall-clock HH:mm matching in a fixed timezone
//!
//! The trigger fires when the current minute in the reference timezone equals
//! a monitor's configured schedule time. The scan tick granularity (a few
//! seconds) guarantees the matching minute is seen at least once while the
//! process is up; there is no catch-up for minutes missed during downtime.

use chrono::{DateTime, FixedOffset, NaiveTime, Timelike, Utc};

/// Current time in the configured fixed UTC offset.
pub fn local_now(offset_hours: i32) -> DateTime<FixedOffset> {
    // Offset comes from config; fall back to UTC on a nonsensical value.
    let offset = FixedOffset::east_opt(offset_hours * 3600)
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    Utc::now().with_timezone(&offset)
}

/// Whether a "HH:mm" schedule matches the given local time's minute.
///
/// Unparsable schedule strings never fire.
pub fn due(schedule_time: &str, now_local: DateTime<FixedOffset>) -> bool {
    match NaiveTime::parse_from_str(schedule_time.trim(), "%H:%M") {
        Ok(t) => now_local.hour() == t.hour() && now_local.minute() == t.minute(),
        Err(_) => false,
    }
}

/// Validate a user-supplied schedule string, normalizing to "HH:mm".
pub fn normalize(input: &str) -> Option<String> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .ok()
        .map(|t| format!("{:02}:{:02}", t.hour(), t.minute()))
}
