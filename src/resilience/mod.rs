//! Overload protection: circuit breaker and token-bucket rate limiter.

mod breaker;
mod limiter;

pub use breaker::{BreakerMetrics, CircuitBreaker, CircuitState};
pub use limiter::RateLimiter;
