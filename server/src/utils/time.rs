//! Time utility functions

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Floor a timestamp to the start of its fixed-width bucket.
///
/// Buckets are aligned to the Unix epoch, so all callers agree on bucket
/// boundaries regardless of when aggregation runs. A zero-width bucket is
/// treated as one second to avoid a division by zero on misconfiguration.
pub fn floor_to_bucket(ts: DateTime<Utc>, width: Duration) -> DateTime<Utc> {
    let width_secs = (width.as_secs() as i64).max(1);
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(width_secs);
    Utc.timestamp_opt(floored, 0).single().unwrap_or_else(|| {
        tracing::warn!(secs, "Invalid bucket timestamp, using epoch");
        DateTime::UNIX_EPOCH
    })
}

/// Convert microseconds since Unix epoch to DateTime<Utc>
pub fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_else(|| {
        tracing::warn!(micros, "Invalid timestamp, using epoch");
        DateTime::UNIX_EPOCH
    })
}

/// Parse ISO 8601 / RFC 3339 timestamp string to DateTime<Utc>
pub fn parse_iso_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_floor_to_bucket_hour() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 37, 21).unwrap();
        let floored = floor_to_bucket(ts, Duration::from_secs(3600));
        assert_eq!(floored, Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_floor_to_bucket_already_aligned() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap();
        let floored = floor_to_bucket(ts, Duration::from_secs(3600));
        assert_eq!(floored, ts);
    }

    #[test]
    fn test_floor_to_bucket_pre_epoch() {
        // rem_euclid floors toward negative infinity, not toward zero
        let ts = Utc.with_ymd_and_hms(1969, 12, 31, 23, 30, 0).unwrap();
        let floored = floor_to_bucket(ts, Duration::from_secs(3600));
        assert_eq!(
            floored,
            Utc.with_ymd_and_hms(1969, 12, 31, 23, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_floor_to_bucket_zero_width() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 37, 21).unwrap();
        let floored = floor_to_bucket(ts, Duration::from_secs(0));
        assert_eq!(floored.second(), 21);
    }

    #[test]
    fn test_micros_to_datetime_known_value() {
        // 2024-01-01 00:00:00 UTC = 1704067200 seconds
        let micros = 1704067200_i64 * 1_000_000;
        let dt = micros_to_datetime(micros);
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_iso_timestamp_valid() {
        let dt = parse_iso_timestamp("2024-01-15T10:30:00Z").unwrap();
        assert_eq!(dt.hour(), 10);
        assert_eq!(dt.minute(), 30);
    }

    #[test]
    fn test_parse_iso_timestamp_with_offset() {
        let dt = parse_iso_timestamp("2024-01-15T10:30:00+05:00").unwrap();
        assert_eq!(dt.hour(), 5);
    }

    #[test]
    fn test_parse_iso_timestamp_invalid() {
        assert!(parse_iso_timestamp("not-a-timestamp").is_none());
    }
}
