// SPDX-License-Identifier: MIT

//! Shared helpers for date/time formatting and conversion.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Epoch milliseconds for a UTC timestamp (wire timestamps are millis).
pub fn to_epoch_millis(date: DateTime<Utc>) -> i64 {
    date.timestamp_millis()
}

/// Parse epoch milliseconds into a UTC timestamp. Out-of-range values
/// clamp to the epoch rather than panicking on hostile input.
pub fn from_epoch_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_round_trip() {
        let now = Utc::now();
        let millis = to_epoch_millis(now);
        let back = from_epoch_millis(millis);
        assert_eq!(back.timestamp_millis(), millis);
    }

    #[test]
    fn test_hostile_millis_does_not_panic() {
        let clamped = from_epoch_millis(i64::MAX);
        assert_eq!(clamped.timestamp_millis(), 0);
    }
}
