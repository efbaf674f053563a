// SPDX-License-Identifier: Apache-2.0

//! Per-path token buckets gating alert dispatch.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    /// One token is added every `refill_interval`.
    refill_interval: Duration,
    capacity: u32,
    buckets: Mutex<HashMap<PathBuf, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(refill_interval: Duration, capacity: u32) -> Self {
        Self {
            refill_interval,
            capacity: capacity.max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `path`. A bucket is created full on first use.
    pub fn try_consume(&self, path: &Path) -> bool {
        self.try_consume_at(path, Instant::now())
    }

    pub(crate) fn try_consume_at(&self, path: &Path, now: Instant) -> bool {
        let capacity = f64::from(self.capacity);
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.entry(path.to_path_buf()).or_insert(TokenBucket {
            tokens: capacity,
            last_refill: now,
        });

        if !self.refill_interval.is_zero() {
            let elapsed = now.saturating_duration_since(bucket.last_refill);
            let refill = elapsed.as_secs_f64() / self.refill_interval.as_secs_f64();
            bucket.tokens = (bucket.tokens + refill).min(capacity);
        } else {
            bucket.tokens = capacity;
        }
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets for paths that are no longer tailed.
    pub fn retain_live(&self, live: &HashSet<PathBuf>) {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let before = buckets.len();
        buckets.retain(|path, _| live.contains(path));
        debug!(removed = before - buckets.len(), "Swept rate limiter buckets.");
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_token_refills_after_interval() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let path = Path::new("/var/log/app.log");
        let start = Instant::now();

        assert!(limiter.try_consume_at(path, start));
        assert!(!limiter.try_consume_at(path, start + Duration::from_millis(500)));
        assert!(!limiter.try_consume_at(path, start + Duration::from_secs(30)));
        assert!(limiter.try_consume_at(path, start + Duration::from_secs(61)));
    }

    #[test]
    fn buckets_are_per_path() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        let a = Path::new("/a.log");
        let b = Path::new("/b.log");

        assert!(limiter.try_consume_at(a, now));
        assert!(limiter.try_consume_at(a, now));
        assert!(!limiter.try_consume_at(a, now));
        assert!(limiter.try_consume_at(b, now));
    }

    #[test]
    fn sweep_removes_dead_paths() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        limiter.try_consume(Path::new("/a.log"));
        limiter.try_consume(Path::new("/b.log"));

        let live = HashSet::from([PathBuf::from("/b.log")]);
        limiter.retain_live(&live);

        assert_eq!(1, limiter.len());
        // A recreated bucket starts full again.
        assert!(limiter.try_consume(Path::new("/a.log")));
    }
}
