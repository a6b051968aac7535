use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long read results may be cached by callers.
///
/// Read requests are stamped with the backend's policy when one is
/// configured; the location cache itself is invalidated by mutations, not
/// by age.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Time to live, in seconds.
    pub time_to_live_secs: u64,
}

impl CachePolicy {
    pub fn new(time_to_live: Duration) -> Self {
        Self {
            time_to_live_secs: time_to_live.as_secs(),
        }
    }

    pub fn time_to_live(&self) -> Duration {
        Duration::from_secs(self.time_to_live_secs)
    }

    /// Whether a result read `age` ago is past its time to live.
    pub fn is_expired(&self, age: Duration) -> bool {
        age >= self.time_to_live()
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry() {
        let policy = CachePolicy::new(Duration::from_secs(30));
        assert!(!policy.is_expired(Duration::from_secs(29)));
        assert!(policy.is_expired(Duration::from_secs(30)));
    }

    #[test]
    fn serde_roundtrip() {
        let policy = CachePolicy::default();
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(json, r#"{"time_to_live_secs":60}"#);
        let back: CachePolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
