use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A UTC Unix timestamp representing seconds since January 1, 1970.
///
/// Locktimes in spending conditions are expressed as timestamps of this form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a new Timestamp from seconds since Unix epoch.
    pub fn new(seconds: u64) -> Self {
        Self(seconds)
    }

    /// Returns the current UTC time as a Timestamp.
    pub fn now() -> Self {
        Self(Utc::now().timestamp() as u64)
    }

    /// Creates a Timestamp that is `duration` time from now.
    pub fn from_now(duration: Duration) -> Self {
        Self(Utc::now().timestamp() as u64 + duration.as_secs())
    }

    /// Returns the underlying seconds value.
    pub fn as_secs(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(secs: u64) -> Self {
        Self(secs)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_current_time() {
        let before = Utc::now().timestamp() as u64;
        let ts = Timestamp::now();
        let after = Utc::now().timestamp() as u64;
        assert!(ts.as_secs() >= before && ts.as_secs() <= after);
    }

    #[test]
    fn from_now_offsets_by_duration() {
        let ts = Timestamp::from_now(Duration::from_secs(60));
        assert!(ts > Timestamp::now());
    }

    #[test]
    fn ordering_and_conversion() {
        let ts1 = Timestamp::new(100);
        let ts2: Timestamp = 200u64.into();
        assert!(ts1 < ts2);
        assert_eq!(u64::from(ts2), 200);
    }

    #[test]
    fn serde_is_transparent() {
        let ts = Timestamp::new(1234567890);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1234567890");
        let parsed: Timestamp = serde_json::from_str("1234567890").unwrap();
        assert_eq!(parsed, ts);
    }
}
