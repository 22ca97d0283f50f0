//! Timestamp helpers bridging `std::time::Duration` and chrono.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Adds a std duration to a timestamp, saturating at the maximum representable time.
#[must_use]
pub fn add_duration(at: Timestamp, duration: Duration) -> Timestamp {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Converts fractional seconds from configuration into a duration.
///
/// Negative and NaN values map to zero; values too large to represent saturate.
#[must_use]
pub fn secs_to_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// Milliseconds elapsed since `start`, saturating.
#[must_use]
pub fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
