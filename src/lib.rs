//! Resilient outbound client for property-risk data providers.
//!
//! Risk assessments fan out to third-party providers (flood scores,
//! wildfire exposure, historical claims) that are slow, rate limited, and
//! intermittently unavailable. This crate wraps one provider behind a
//! single client that layers validation, response caching with
//! stale-while-revalidate, coalescing of concurrent identical requests,
//! token-bucket rate limiting, a circuit breaker, and retries with
//! jittered exponential backoff around a [`reqwest`] transport.
//!
//! # Example
//!
//! ```no_run
//! use riskfetch::{ClientConfig, ProviderClient};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ClientConfig::builder("https://risk.example.com")
//!     .header("x-api-key", "secret")
//!     .requests_per_second(5.0)
//!     .build()?;
//! let client = ProviderClient::new(config)?;
//!
//! let response = client
//!     .get("/v1/flood/score", &[("parcel".into(), "1234".into())])
//!     .await?;
//! println!("{} (cached: {})", response.data, response.from_cache);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod resilience;

// Re-export the types most callers need
// ------------------------------------------------------------------
pub use cache::{CacheLookup, CacheStats, CacheStore};
pub use client::{ApiResponse, ProviderClient, RequestLog, RequestLogEntry};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{
    BreakerConfig, CacheConfig, ClientConfig, ClientConfigBuilder, ConfigError, RateLimitConfig,
    RequestOptions,
};
pub use error::ClientError;
pub use resilience::{BreakerMetrics, CircuitBreaker, CircuitState, RateLimiter};
