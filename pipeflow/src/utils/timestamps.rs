//! Timestamp helpers.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

/// Timestamps kept in sessions and events.
pub type Timestamp = DateTime<Utc>;

/// Formats a timestamp as RFC 3339 with millisecond precision.
///
/// ```
/// use chrono::TimeZone;
/// use pipeflow::utils::format_timestamp;
///
/// let ts = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
/// assert_eq!(format_timestamp(&ts), "2024-03-01T12:30:00.000Z");
/// ```
#[must_use]
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
#[must_use]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_timestamp_millis() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-01T12:30:00.000Z");
    }

    #[test]
    fn test_duration_millis() {
        assert_eq!(duration_millis(Duration::from_secs(2)), 2000);
        assert_eq!(duration_millis(Duration::from_micros(1500)), 1);
    }
}
