//! Token-bucket rate limiting for outbound service calls.
//!
//! One limiter is meant to be shared (via `Arc`) by every run talking to the
//! same service. Tokens refill at a fixed rate, so `acquire` always returns
//! eventually.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::{RateLimitConfig, MIN_REQUESTS_PER_SECOND};

#[derive(Debug)]
struct BucketState {
    qps: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl BucketState {
    fn new(config: RateLimitConfig, now: Instant) -> Self {
        let burst = f64::from(config.burst.max(1));
        Self {
            qps: config.requests_per_second.max(MIN_REQUESTS_PER_SECOND),
            burst,
            tokens: burst,
            last: now,
        }
    }

    /// Takes `need` tokens, returning how long the caller must wait first.
    fn reserve(&mut self, need: f64, now: Instant) -> Duration {
        let dt = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + dt * self.qps).min(self.burst);

        if self.tokens >= need {
            self.tokens -= need;
            Duration::ZERO
        } else {
            // Going negative reserves the deficit for this caller, so later
            // callers queue behind it.
            let deficit = need - self.tokens;
            self.tokens -= need;
            Duration::try_from_secs_f64(deficit / self.qps).unwrap_or(Duration::MAX)
        }
    }
}

/// Async token-bucket limiter.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Creates a limiter with a full bucket.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(BucketState::new(config, Instant::now())),
        }
    }

    /// Waits until one token is available and takes it.
    pub async fn acquire(&self) {
        let wait = self.state.lock().reserve(1.0, Instant::now());
        if !wait.is_zero() {
            tracing::debug!(
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "Rate limited, waiting for token"
            );
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rps: f64, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: rps,
            burst,
        }
    }

    #[test]
    fn test_burst_is_free() {
        let now = Instant::now();
        let mut bucket = BucketState::new(config(1.0, 3), now);
        for _ in 0..3 {
            assert_eq!(bucket.reserve(1.0, now), Duration::ZERO);
        }
        assert!(bucket.reserve(1.0, now) > Duration::ZERO);
    }

    #[test]
    fn test_waiters_queue_up() {
        let now = Instant::now();
        let mut bucket = BucketState::new(config(10.0, 1), now);
        assert_eq!(bucket.reserve(1.0, now), Duration::ZERO);

        let first = bucket.reserve(1.0, now);
        let second = bucket.reserve(1.0, now);
        assert!((first.as_secs_f64() - 0.1).abs() < 1e-9);
        assert!((second.as_secs_f64() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_refill_caps_at_burst() {
        let start = Instant::now();
        let mut bucket = BucketState::new(config(100.0, 2), start);
        bucket.reserve(1.0, start);
        bucket.reserve(1.0, start);

        let later = start + Duration::from_secs(10);
        assert_eq!(bucket.reserve(1.0, later), Duration::ZERO);
        assert_eq!(bucket.reserve(1.0, later), Duration::ZERO);
        assert!(bucket.reserve(1.0, later) > Duration::ZERO);
    }

    #[test]
    fn test_tiny_rate_is_floored() {
        let now = Instant::now();
        let mut bucket = BucketState::new(config(1e-300, 1), now);
        assert_eq!(bucket.reserve(1.0, now), Duration::ZERO);

        let wait = bucket.reserve(1.0, now);
        assert!((wait.as_secs_f64() - 1.0 / MIN_REQUESTS_PER_SECOND).abs() < 1e-6);
    }

    #[test]
    fn test_acquire_completes() {
        let limiter = RateLimiter::new(config(1000.0, 1));
        tokio_test::block_on(async {
            limiter.acquire().await;
            limiter.acquire().await;
        });
    }
}
