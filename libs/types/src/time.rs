//! Wall-clock helpers
//!
//! Recordings store arrival times as `f64` seconds since the Unix epoch, so
//! every layer uses the same conversion.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in seconds since the Unix epoch.
///
/// A clock set before 1970 yields `0.0` rather than an error.
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Convert a wait expressed in seconds to a `Duration`.
///
/// Negative, NaN or infinite inputs clamp to zero.
pub fn duration_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_seconds_is_recent() {
        // 2020-01-01
        assert!(epoch_seconds() > 1_577_836_800.0);
    }

    #[test]
    fn test_duration_clamps() {
        assert_eq!(duration_from_secs(-1.0), Duration::ZERO);
        assert_eq!(duration_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(duration_from_secs(0.5), Duration::from_millis(500));
    }
}
