//! Wall-clock helpers in milliseconds since the Unix epoch.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds in one day.
pub const MS_PER_DAY: u128 = 24 * 60 * 60 * 1000;

/// Current time in milliseconds since the Unix epoch.
///
/// Returns 0 if the system clock is set before the epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Convert a day count into milliseconds.
#[must_use]
pub fn days_to_ms(days: u64) -> u128 {
    u128::from(days) * MS_PER_DAY
}

/// Whole milliseconds in `duration` for log fields, saturating at
/// `u64::MAX`.
#[must_use]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Milliseconds elapsed since `start`, saturating at `u64::MAX`.
#[must_use]
pub fn elapsed_ms(start: Instant) -> u64 {
    duration_ms(start.elapsed())
}
