//! Circuit breaker guarding calls to a single provider.
//!
//! The breaker trips after a run of consecutive failures, fails fast while
//! open, and probes the provider through a half-open phase before fully
//! closing again. All transition logic lives in [`BreakerCore`], a plain
//! state machine driven by explicit timestamps, so every path is testable
//! without timers.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::BreakerConfig;
use crate::error::ClientError;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally; failures are counted.
    Closed,
    /// Requests are rejected without touching the network.
    Open,
    /// A limited probe phase after the reset timeout.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Snapshot of breaker internals for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    /// Consecutive failures observed while closed.
    pub failure_count: u32,
    /// Consecutive successes observed while half-open.
    pub success_count: u32,
    /// Requests rejected because the circuit was open.
    pub blocked_requests: u64,
    /// Time since the most recent recorded failure, if any.
    pub last_failure_age: Option<Duration>,
}

/// Pure transition logic. Mutated only under the breaker's mutex.
#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    blocked_requests: u64,
}

impl BreakerCore {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            blocked_requests: 0,
        }
    }

    /// Decide whether a request may proceed at `now`.
    ///
    /// An open circuit whose reset timeout has elapsed transitions to
    /// half-open and admits the request as a probe. Otherwise an open
    /// circuit rejects with the remaining wait.
    fn admit(&mut self, now: Instant, config: &BreakerConfig) -> Result<(), Duration> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let since_failure = self
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(config.reset_timeout);
                if since_failure >= config.reset_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    Ok(())
                } else {
                    self.blocked_requests += 1;
                    Err(config.reset_timeout - since_failure)
                }
            }
        }
    }

    /// Record a successful call.
    fn on_success(&mut self, config: &BreakerConfig) -> Option<CircuitState> {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= config.half_open_requests {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    self.last_failure = None;
                    Some(CircuitState::Closed)
                } else {
                    None
                }
            }
            // A success landing after the circuit re-opened is ignored.
            CircuitState::Open => None,
        }
    }

    /// Record a failed call.
    fn on_failure(&mut self, now: Instant, config: &BreakerConfig) -> Option<CircuitState> {
        self.last_failure = Some(now);
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= config.failure_threshold {
                    self.state = CircuitState::Open;
                    Some(CircuitState::Open)
                } else {
                    None
                }
            }
            // A single failed probe re-opens the circuit.
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.success_count = 0;
                Some(CircuitState::Open)
            }
            CircuitState::Open => None,
        }
    }

    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.last_failure = None;
    }
}

/// Thread-safe circuit breaker. Clones share state.
#[derive(Debug)]
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: BreakerConfig,
    core: Arc<Mutex<BreakerCore>>,
    clock: C,
}

impl<C: Clock + Clone> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            core: Arc::clone(&self.core),
            clock: self.clock.clone(),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_clock(config: BreakerConfig, clock: C) -> Self {
        Self { config, core: Arc::new(Mutex::new(BreakerCore::new())), clock }
    }

    /// Check whether a request may proceed right now.
    ///
    /// Returns [`ClientError::CircuitOpen`] carrying the estimated wait
    /// until the next probe window when the circuit is open.
    pub fn check_admission(&self) -> Result<(), ClientError> {
        let now = self.clock.now();
        let mut core = self.core.lock();
        let was_open = core.state == CircuitState::Open;
        match core.admit(now, &self.config) {
            Ok(()) => {
                if was_open && core.state == CircuitState::HalfOpen {
                    info!("circuit transitioning to half-open, probing provider");
                }
                Ok(())
            }
            Err(retry_after) => {
                debug!(?retry_after, "circuit open, rejecting request");
                Err(ClientError::CircuitOpen { retry_after })
            }
        }
    }

    /// Record a successful provider call.
    pub fn record_success(&self) {
        let mut core = self.core.lock();
        if core.on_success(&self.config) == Some(CircuitState::Closed) {
            info!("circuit closed after successful probes");
        }
    }

    /// Record a provider failure (timeout, transport fault, or 5xx).
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut core = self.core.lock();
        if core.on_failure(now, &self.config) == Some(CircuitState::Open) {
            warn!(
                failure_count = core.failure_count,
                reset_timeout = ?self.config.reset_timeout,
                "circuit opened"
            );
        }
    }

    /// Current state, with the open-to-half-open edge applied lazily.
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    /// Force the breaker back to closed, clearing all counters.
    pub fn reset(&self) {
        self.core.lock().reset();
        info!("circuit breaker manually reset");
    }

    /// Snapshot of counters for diagnostics.
    pub fn metrics(&self) -> BreakerMetrics {
        let now = self.clock.now();
        let core = self.core.lock();
        BreakerMetrics {
            state: core.state,
            failure_count: core.failure_count,
            success_count: core.success_count,
            blocked_requests: core.blocked_requests,
            last_failure_age: core.last_failure.map(|at| now.saturating_duration_since(at)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_requests: 2,
        }
    }

    fn breaker() -> (CircuitBreaker<MockClock>, MockClock) {
        let clock = MockClock::new();
        (CircuitBreaker::with_clock(config(), clock.clone()), clock)
    }

    #[test]
    fn opens_after_consecutive_failures_reach_threshold() {
        let (breaker, _clock) = breaker();

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_failure_run_while_closed() {
        let (breaker, _clock) = breaker();

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        // run was broken, so four non-consecutive failures never tripped it
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn open_circuit_rejects_with_remaining_wait() {
        let (breaker, clock) = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }

        clock.advance(Duration::from_secs(10));
        let err = breaker.check_admission().expect_err("circuit should be open");
        assert_eq!(
            err,
            ClientError::CircuitOpen { retry_after: Duration::from_secs(20) }
        );
        assert_eq!(breaker.metrics().blocked_requests, 1);
    }

    #[test]
    fn transitions_to_half_open_after_reset_timeout() {
        let (breaker, clock) = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }

        clock.advance(Duration::from_secs(30));
        assert!(breaker.check_admission().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn closes_after_enough_half_open_successes() {
        let (breaker, clock) = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(30));
        assert!(breaker.check_admission().is_ok());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_count, 0);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let (breaker, clock) = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(30));
        assert!(breaker.check_admission().is_ok());

        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // the reopen restarted the reset timeout from the probe failure
        clock.advance(Duration::from_secs(29));
        assert!(breaker.check_admission().is_err());
        clock.advance(Duration::from_secs(1));
        assert!(breaker.check_admission().is_ok());
    }

    #[test]
    fn manual_reset_closes_and_clears_counters() {
        let (breaker, _clock) = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        let metrics = breaker.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.success_count, 0);
        assert!(metrics.last_failure_age.is_none());
        assert!(breaker.check_admission().is_ok());
    }

    #[test]
    fn clones_share_breaker_state() {
        let (breaker, _clock) = breaker();
        let clone = breaker.clone();

        for _ in 0..3 {
            clone.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
