//! Token-bucket rate limiter with fractional tokens and lazy refill.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::ClientError;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket tracking fractional tokens.
///
/// The bucket refills continuously at `requests_per_second` and is capped
/// at `burst_size`. Refill happens lazily on access; there is no timer
/// task. Clones share the same bucket.
#[derive(Debug)]
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimitConfig,
    state: Arc<Mutex<BucketState>>,
    clock: C,
}

impl<C: Clock + Clone> Clone for RateLimiter<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            clock: self.clock.clone(),
        }
    }
}

impl RateLimiter<SystemClock> {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(config: RateLimitConfig, clock: C) -> Self {
        let state = BucketState { tokens: config.burst_size, last_refill: clock.now() };
        Self { config, state: Arc::new(Mutex::new(state)), clock }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        if !elapsed.is_zero() {
            let refilled = elapsed.as_secs_f64() * self.config.requests_per_second;
            state.tokens = (state.tokens + refilled).min(self.config.burst_size);
            state.last_refill = now;
        }
    }

    /// Take one token if available; otherwise return the wait until one
    /// will have accumulated.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.config.requests_per_second))
        }
    }

    /// Acquire one token, waiting when the bucket is empty.
    ///
    /// With `queue_on_excess` disabled the call fails immediately with
    /// [`ClientError::RateLimited`] carrying the wait a caller would have
    /// incurred. The lock is never held across the sleep.
    pub async fn acquire(&self) -> Result<(), ClientError> {
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    if !self.config.queue_on_excess {
                        debug!(?wait, "rate limit exceeded, failing fast");
                        return Err(ClientError::RateLimited { retry_after: wait });
                    }
                    debug!(?wait, "rate limit exceeded, queueing");
                    tokio::time::sleep(wait).await;
                    // loop: another waiter may have taken the token first
                }
            }
        }
    }

    /// Current token count after a refresh. Diagnostic only.
    pub fn available_tokens(&self) -> f64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn limiter(rps: f64, burst: f64, queue: bool) -> (RateLimiter<MockClock>, MockClock) {
        let clock = MockClock::new();
        let config =
            RateLimitConfig { requests_per_second: rps, burst_size: burst, queue_on_excess: queue };
        (RateLimiter::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn bucket_starts_full_and_allows_a_burst() {
        let (limiter, _clock) = limiter(1.0, 5.0, true);

        for _ in 0..5 {
            assert!(limiter.try_acquire().is_ok());
        }
        let wait = limiter.try_acquire().expect_err("bucket should be empty");
        assert_eq!(wait, Duration::from_secs(1));
    }

    #[test]
    fn refills_fractionally_over_time() {
        let (limiter, clock) = limiter(2.0, 2.0, true);
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());

        // 2 rps for 250ms accumulates half a token
        clock.advance(Duration::from_millis(250));
        let wait = limiter.try_acquire().expect_err("half a token is not enough");
        assert_eq!(wait, Duration::from_millis(250));

        clock.advance(Duration::from_millis(250));
        assert!(limiter.try_acquire().is_ok());
    }

    #[test]
    fn refill_is_clamped_to_burst_size() {
        let (limiter, clock) = limiter(10.0, 3.0, true);

        clock.advance(Duration::from_secs(60));
        assert!((limiter.available_tokens() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn clones_drain_the_same_bucket() {
        let (limiter, _clock) = limiter(1.0, 2.0, true);
        let clone = limiter.clone();

        assert!(limiter.try_acquire().is_ok());
        assert!(clone.try_acquire().is_ok());
        assert!(clone.try_acquire().is_err());
    }

    #[tokio::test]
    async fn acquire_fails_fast_when_queueing_is_disabled() {
        let (limiter, _clock) = limiter(1.0, 1.0, false);

        assert!(limiter.acquire().await.is_ok());
        match limiter.acquire().await {
            Err(ClientError::RateLimited { retry_after }) => {
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn acquire_queues_until_a_token_accumulates() {
        let config = RateLimitConfig {
            requests_per_second: 50.0,
            burst_size: 1.0,
            queue_on_excess: true,
        };
        let limiter = RateLimiter::new(config);

        let started = Instant::now();
        assert!(limiter.acquire().await.is_ok());
        assert!(limiter.acquire().await.is_ok());

        // the second acquire had to wait ~20ms for the refill
        assert!(started.elapsed() >= Duration::from_millis(15));
    }
}
