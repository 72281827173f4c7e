//! Timestamp utilities
//!
//! Timestamps are persisted as UTC milliseconds in INTEGER columns so that
//! keyset pagination and timeline ordering compare plain integers.

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC time as milliseconds since the epoch
pub fn now_millis() -> i64 {
    now().timestamp_millis()
}

/// Convert stored milliseconds back to a UTC timestamp
///
/// Out-of-range values clamp to the epoch rather than failing the read.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
    }

    #[tokio::test]
    async fn test_now_millis_successive_calls_advance() {
        let t1 = now_millis();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let t2 = now_millis();
        assert!(t2 > t1);
    }

    #[test]
    fn test_from_millis_roundtrip() {
        let ts = now();
        let millis = ts.timestamp_millis();
        assert_eq!(from_millis(millis).timestamp_millis(), millis);
    }

    #[test]
    fn test_from_millis_out_of_range_clamps_to_epoch() {
        assert_eq!(from_millis(i64::MAX), DateTime::<Utc>::default());
    }
}
