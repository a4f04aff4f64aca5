//! Timestamp type used for message and session expiration.
//!
//! Timestamps are Unix epoch milliseconds (UTC), i.e. seconds in
//! fixed-point with three decimals. Expiration checks across nodes assume
//! roughly synchronized clocks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A Unix timestamp in milliseconds since epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch (time zero).
    pub const EPOCH: Self = Self(0);

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Get the current system time as a `Timestamp`.
    ///
    /// A clock set before the epoch reads as [`Timestamp::EPOCH`].
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / 1000
    }

    /// This timestamp moved forward by `duration`, saturating at the maximum.
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// This timestamp moved back by `duration`, saturating at the epoch.
    pub fn saturating_sub(&self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_sub(millis))
    }

    /// Time remaining until this timestamp, zero if it has passed.
    pub fn remaining_from(&self, now: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(now.0))
    }

    /// Whether this deadline has been reached at `now` (`self <= now`).
    pub fn has_passed(&self, now: Timestamp) -> bool {
        self.0 <= now.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.0 / 1000, self.0 % 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_reached_at_equality() {
        let t = Timestamp::from_millis(5_000);
        assert!(t.has_passed(Timestamp::from_millis(5_000)));
        assert!(t.has_passed(Timestamp::from_millis(5_001)));
        assert!(!t.has_passed(Timestamp::from_millis(4_999)));
    }

    #[test]
    fn arithmetic_saturates() {
        let t = Timestamp::from_millis(500);
        assert_eq!(t.saturating_sub(Duration::from_secs(1)), Timestamp::EPOCH);
        assert_eq!(
            Timestamp::from_millis(u64::MAX).saturating_add(Duration::from_secs(1)),
            Timestamp::from_millis(u64::MAX)
        );
    }

    #[test]
    fn remaining_time() {
        let deadline = Timestamp::from_secs(10);
        assert_eq!(
            deadline.remaining_from(Timestamp::from_secs(7)),
            Duration::from_secs(3)
        );
        assert_eq!(
            deadline.remaining_from(Timestamp::from_secs(11)),
            Duration::ZERO
        );
    }

    #[test]
    fn display_has_millisecond_precision() {
        assert_eq!(Timestamp::from_millis(1_234_005).to_string(), "1234.005s");
    }
}
