//! Per-node retry delays
//!
//! Consecutive failures for a node double the requeue delay from `base` up
//! to `cap`. A successful pass or a finished deletion resets the node.

use std::time::Duration;

use dashmap::DashMap;

/// Smallest delay ever handed out
const MIN_DELAY: Duration = Duration::from_secs(1);

/// Tracks consecutive failures per node key
#[derive(Debug)]
pub struct FailureBackoff {
    failures: DashMap<String, u32>,
    base: Duration,
    cap: Duration,
}

impl FailureBackoff {
    /// Create a tracker; `base` is clamped into `MIN_DELAY..=cap`
    pub fn new(base: Duration, cap: Duration) -> Self {
        let cap = cap.max(MIN_DELAY);
        Self {
            failures: DashMap::new(),
            base: base.clamp(MIN_DELAY, cap),
            cap,
        }
    }

    /// Record a failure for `key` and return the delay before the next try
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut entry = self.failures.entry(key.to_string()).or_insert(0);
        let attempt = *entry;
        *entry = attempt.saturating_add(1);

        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Forget the failure history of `key`
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Consecutive failures recorded for `key`
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map(|f| *f).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_up_to_cap() {
        let backoff = FailureBackoff::new(Duration::from_secs(5), Duration::from_secs(30));
        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.next_delay("ns/leaf1").as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 30, 30, 30]);
        assert_eq!(backoff.failures("ns/leaf1"), 6);
    }

    #[test]
    fn keys_are_independent_and_reset() {
        let backoff = FailureBackoff::new(Duration::from_secs(5), Duration::from_secs(30));
        backoff.next_delay("ns/a");
        backoff.next_delay("ns/a");
        assert_eq!(backoff.next_delay("ns/b"), Duration::from_secs(5));

        backoff.reset("ns/a");
        assert_eq!(backoff.failures("ns/a"), 0);
        assert_eq!(backoff.next_delay("ns/a"), Duration::from_secs(5));
    }

    #[test]
    fn many_failures_never_overflow() {
        let backoff = FailureBackoff::new(Duration::from_secs(5), Duration::from_secs(30));
        for _ in 0..200 {
            let delay = backoff.next_delay("ns/leaf1");
            assert!(delay > Duration::ZERO && delay <= Duration::from_secs(30));
        }
    }

    #[test]
    fn base_is_clamped_into_range() {
        let backoff = FailureBackoff::new(Duration::ZERO, Duration::from_secs(30));
        assert_eq!(backoff.next_delay("k"), MIN_DELAY);

        let backoff = FailureBackoff::new(Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(backoff.next_delay("k"), Duration::from_secs(30));
    }
}
