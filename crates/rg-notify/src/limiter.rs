use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Minimum spacing between two alerts of the same kind.
///
/// Explicit state owned by the orchestrator; kinds not configured use the
/// default interval.
#[derive(Clone, Debug)]
pub struct AlertLimiter {
    default_interval: Duration,
    per_kind: BTreeMap<String, Duration>,
    last_sent: BTreeMap<String, DateTime<Utc>>,
}

impl AlertLimiter {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            per_kind: BTreeMap::new(),
            last_sent: BTreeMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: &str, interval: Duration) -> Self {
        self.per_kind.insert(kind.to_string(), interval);
        self
    }

    pub fn interval_for(&self, kind: &str) -> Duration {
        self.per_kind
            .get(kind)
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Returns true (and records `now`) when an alert of `kind` may go out.
    pub fn allow(&mut self, kind: &str, now: DateTime<Utc>) -> bool {
        let interval = self.interval_for(kind);
        if let Some(prev) = self.last_sent.get(kind) {
            if now - *prev < interval {
                return false;
            }
        }
        self.last_sent.insert(kind.to_string(), now);
        true
    }
}

impl Default for AlertLimiter {
    fn default() -> Self {
        Self::new(Duration::seconds(5))
    }
}
