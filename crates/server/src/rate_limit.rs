//! Per-client token bucket rate limiting (§6: "a token bucket at the
//! external boundary"). One bucket per client key (remote IP or API key),
//! refilled lazily on each check rather than by a background task.

use std::time::Instant;

use dashmap::DashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("rate limit exceeded")]
    Exceeded,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    requests_per_minute: u32,
    burst: u32,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, burst: u32, enabled: bool) -> Self {
        Self {
            buckets: DashMap::new(),
            requests_per_minute,
            burst,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Consumes one token for `client_key`, refilling the bucket for the
    /// elapsed time since its last check. Returns `Err` if no token is
    /// available.
    pub fn check(&self, client_key: &str) -> Result<(), RateLimitError> {
        let refill_rate = self.requests_per_minute as f64 / 60.0;
        let capacity = self.burst.max(1) as f64;
        let now = Instant::now();

        let mut bucket = self.buckets.entry(client_key.to_string()).or_insert_with(|| Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_rate).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(RateLimitError::Exceeded)
        }
    }

    pub fn client_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_within_burst() {
        let limiter = RateLimiter::new(60, 5, true);
        for _ in 0..5 {
            assert!(limiter.check("client-a").is_ok());
        }
        assert!(limiter.check("client-a").is_err());
    }

    #[test]
    fn distinct_clients_have_independent_buckets() {
        let limiter = RateLimiter::new(60, 1, true);
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("b").is_ok());
        assert!(limiter.check("a").is_err());
    }
}
