//! Per-visitor token buckets
//!
//! A visitor is an `(identifier, path)` pair, where the identifier is a
//! client address or a user id. Pairs are keyed by their BLAKE3 digest so
//! raw addresses are never held in memory. Each bucket holds `attempts`
//! tokens and regains one every `period`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

struct Visitor {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

pub struct VisitorLimiter {
    period: Duration,
    attempts: u32,
    visitors: Mutex<HashMap<[u8; 32], Visitor>>,
}

impl VisitorLimiter {
    pub fn new(period: Duration, attempts: u32) -> Self {
        Self {
            period,
            attempts: attempts.max(1),
            visitors: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_seconds(seconds: u64, attempts: u32) -> Self {
        Self::new(Duration::from_secs(seconds.max(1)), attempts)
    }

    fn key(identifier: &str, path: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(identifier.as_bytes());
        hasher.update(path.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Take one token for this visitor, returning whether the request may proceed.
    pub fn allow(&self, identifier: &str, path: &str) -> bool {
        self.allow_at(identifier, path, Instant::now())
    }

    pub fn allow_at(&self, identifier: &str, path: &str, now: Instant) -> bool {
        let capacity = self.attempts as f64;
        let mut visitors = self.visitors.lock().unwrap_or_else(PoisonError::into_inner);
        let visitor = visitors
            .entry(Self::key(identifier, path))
            .or_insert_with(|| Visitor {
                tokens: capacity,
                last_refill: now,
                last_seen: now,
            });

        let elapsed = now.saturating_duration_since(visitor.last_refill);
        let refill = elapsed.as_secs_f64() / self.period.as_secs_f64();
        visitor.tokens = (visitor.tokens + refill).min(capacity);
        visitor.last_refill = now;
        visitor.last_seen = now;

        if visitor.tokens >= 1.0 {
            visitor.tokens -= 1.0;
            true
        } else {
            tracing::debug!(path, "visitor rate limited");
            false
        }
    }

    /// Drop visitors idle for longer than `idle`. Returns how many were removed.
    pub fn sweep(&self, idle: Duration) -> usize {
        self.sweep_at(idle, Instant::now())
    }

    pub fn sweep_at(&self, idle: Duration, now: Instant) -> usize {
        let mut visitors = self.visitors.lock().unwrap_or_else(PoisonError::into_inner);
        let before = visitors.len();
        visitors.retain(|_, v| now.saturating_duration_since(v.last_seen) <= idle);
        before - visitors.len()
    }

    /// Idle time after which a bucket would be full again anyway.
    pub fn refill_window(&self) -> Duration {
        self.period * self.attempts
    }

    pub fn tracked(&self) -> usize {
        self.visitors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let limiter = VisitorLimiter::from_seconds(30, 6);
        let now = Instant::now();
        for _ in 0..6 {
            assert!(limiter.allow_at("10.0.0.1", "/send/download", now));
        }
        assert!(!limiter.allow_at("10.0.0.1", "/send/download", now));
    }

    #[test]
    fn test_one_token_per_period() {
        let limiter = VisitorLimiter::from_seconds(30, 2);
        let start = Instant::now();
        assert!(limiter.allow_at("u", "/p", start));
        assert!(limiter.allow_at("u", "/p", start));
        assert!(!limiter.allow_at("u", "/p", start + Duration::from_secs(10)));
        assert!(limiter.allow_at("u", "/p", start + Duration::from_secs(31)));
        assert!(!limiter.allow_at("u", "/p", start + Duration::from_secs(32)));
    }

    #[test]
    fn test_paths_are_limited_separately() {
        let limiter = VisitorLimiter::from_seconds(30, 1);
        let now = Instant::now();
        assert!(limiter.allow_at("u", "/a", now));
        assert!(!limiter.allow_at("u", "/a", now));
        assert!(limiter.allow_at("u", "/b", now));
        assert_eq!(limiter.tracked(), 2);
    }

    #[test]
    fn test_sweep_drops_idle_visitors() {
        let limiter = VisitorLimiter::from_seconds(1, 1);
        let start = Instant::now();
        limiter.allow_at("old", "/p", start);
        limiter.allow_at("new", "/p", start + Duration::from_secs(100));

        let removed = limiter.sweep_at(Duration::from_secs(10), start + Duration::from_secs(105));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked(), 1);
    }
}
