//! Per-workload token bucket used to damp retry storms before they reach
//! the lease backend. Rate is always `1 / lease-duration` with burst 1,
//! per the rate-limiter entry in the data model — there is no general
//! configuration surface here because the core only ever needs this one
//! shape.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    refill_rate_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(duration: Duration) -> Self {
        Self {
            tokens: 1.0,
            refill_rate_per_sec: 1.0 / duration.as_secs_f64().max(f64::EPSILON),
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate_per_sec).min(1.0);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// A map of per-workload token buckets, keyed by `"{org}-{repo}-{runID}"`.
/// Lives only in process memory — a fresh process starts with no history.
#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one unit of work for `key`, creating its bucket on first use.
    /// `duration` is the lease duration that determines this key's refill
    /// rate; an existing bucket keeps its original rate even if called
    /// again with a different duration.
    #[allow(clippy::unwrap_used)]
    pub fn try_admit(&self, key: &str, duration: Duration) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        buckets
            .entry(key.to_owned())
            .or_insert_with(|| Bucket::new(duration))
            .try_consume()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn first_admission_succeeds() {
        let limiter = RateLimiter::new();
        assert!(limiter.try_admit("gravitational-teleport-1", Duration::from_secs(60)));
    }

    #[test]
    fn second_admission_within_duration_is_refused() {
        let limiter = RateLimiter::new();
        assert!(limiter.try_admit("gravitational-teleport-1", Duration::from_secs(60)));
        assert!(!limiter.try_admit("gravitational-teleport-1", Duration::from_secs(60)));
    }

    #[test]
    fn admission_returns_after_duration_elapses() {
        let limiter = RateLimiter::new();
        assert!(limiter.try_admit("gravitational-teleport-1", Duration::from_millis(20)));
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.try_admit("gravitational-teleport-1", Duration::from_millis(20)));
    }

    #[test]
    fn distinct_keys_are_independent() {
        let limiter = RateLimiter::new();
        assert!(limiter.try_admit("gravitational-teleport-1", Duration::from_secs(60)));
        assert!(limiter.try_admit("gravitational-teleport-2", Duration::from_secs(60)));
    }
}
