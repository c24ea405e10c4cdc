//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Whole days elapsed between `since` and `now`
///
/// Timestamps in the future count as zero days old.
pub fn age_in_days(since: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let days = (now - since).num_days();
    if days <= 0 {
        0
    } else {
        u32::try_from(days).unwrap_or(u32::MAX)
    }
}

/// Mean of a set of durations, `None` when empty
pub fn mean_duration(samples: &[std::time::Duration]) -> Option<std::time::Duration> {
    if samples.is_empty() {
        return None;
    }
    let total: std::time::Duration = samples.iter().sum();
    Some(total / samples.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_age_in_days() {
        let now = now();
        assert_eq!(age_in_days(now, now), 0);
        assert_eq!(age_in_days(now - ChronoDuration::hours(23), now), 0);
        assert_eq!(age_in_days(now - ChronoDuration::days(8), now), 8);
    }

    #[test]
    fn test_future_timestamp_is_zero_days_old() {
        let now = now();
        assert_eq!(age_in_days(now + ChronoDuration::days(3), now), 0);
    }

    #[test]
    fn test_mean_duration() {
        assert_eq!(mean_duration(&[]), None);
        let samples = [Duration::from_millis(100), Duration::from_millis(300)];
        assert_eq!(mean_duration(&samples), Some(Duration::from_millis(200)));
    }
}
