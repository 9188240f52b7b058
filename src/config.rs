//! Client configuration with validated builders and per-call overrides.

use std::time::Duration;

use thiserror::Error;

/// Configuration error raised by [`ClientConfig::validate`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid { message: message.into() }
    }
}

/// Response cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether idempotent responses are cached at all.
    pub enabled: bool,
    /// Default freshness window for cached responses.
    pub ttl: Duration,
    /// Maximum number of cached entries before eviction.
    pub max_entries: usize,
    /// Optional window after expiry during which a stale entry may still
    /// be served while a background refresh runs.
    pub stale_while_revalidate: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            max_entries: 512,
            stale_while_revalidate: None,
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time the circuit stays open before probing the provider again.
    pub reset_timeout: Duration,
    /// Consecutive half-open successes needed to close the circuit.
    pub half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_requests: 2,
        }
    }
}

/// Token-bucket rate limiter settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained refill rate in requests per second.
    pub requests_per_second: f64,
    /// Bucket capacity; bounds the size of a burst.
    pub burst_size: f64,
    /// When true, callers over the limit wait for a token; when false they
    /// fail immediately with a rate-limit error.
    pub queue_on_excess: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { requests_per_second: 10.0, burst_size: 10.0, queue_on_excess: true }
    }
}

/// Top-level client configuration.
///
/// `ClientConfig::default()` is usable as-is apart from `base_url`, which
/// has no sensible default and must be supplied through the builder.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Provider origin every request path is resolved against.
    pub base_url: String,
    /// Headers attached to every outgoing request.
    pub default_headers: Vec<(String, String)>,
    /// Per-attempt deadline covering connect, send, and body read.
    pub timeout: Duration,
    /// Total attempts per request (initial try plus retries).
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub base_delay: Duration,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            default_headers: Vec::new(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Start building a configuration for the given provider origin.
    pub fn builder(base_url: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder { config: ClientConfig { base_url: base_url.into(), ..Default::default() } }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|err| ConfigError::invalid(format!("base_url is not a valid URL: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::invalid("base_url must use http or https"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout must be greater than zero"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be at least 1"));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::invalid("cache.max_entries must be at least 1"));
        }
        if self.cache.ttl.is_zero() {
            return Err(ConfigError::invalid("cache.ttl must be greater than zero"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid("breaker.failure_threshold must be at least 1"));
        }
        if self.breaker.half_open_requests == 0 {
            return Err(ConfigError::invalid("breaker.half_open_requests must be at least 1"));
        }
        let rps = self.rate_limit.requests_per_second;
        if rps.is_nan() || rps <= 0.0 {
            return Err(ConfigError::invalid("rate_limit.requests_per_second must be positive"));
        }
        let burst = self.rate_limit.burst_size;
        if burst.is_nan() || burst < 1.0 {
            return Err(ConfigError::invalid("rate_limit.burst_size must be at least 1"));
        }
        Ok(())
    }
}

/// Fluent builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Total number of attempts (initial try + retries).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.ttl = ttl;
        self
    }

    pub fn cache_max_entries(mut self, max_entries: usize) -> Self {
        self.config.cache.max_entries = max_entries;
        self
    }

    pub fn stale_while_revalidate(mut self, window: Duration) -> Self {
        self.config.cache.stale_while_revalidate = Some(window);
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.breaker.failure_threshold = threshold;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.breaker.reset_timeout = timeout;
        self
    }

    pub fn half_open_requests(mut self, requests: u32) -> Self {
        self.config.breaker.half_open_requests = requests;
        self
    }

    pub fn requests_per_second(mut self, rps: f64) -> Self {
        self.config.rate_limit.requests_per_second = rps;
        self
    }

    pub fn burst_size(mut self, burst: f64) -> Self {
        self.config.rate_limit.burst_size = burst;
        self
    }

    pub fn queue_on_excess(mut self, queue: bool) -> Self {
        self.config.rate_limit.queue_on_excess = queue;
        self
    }

    /// Validate and produce the final configuration.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-call overrides for a single request.
///
/// Every field defaults to "use the client configuration". Overrides apply
/// to one call only and never mutate the shared config.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Override the per-attempt deadline.
    pub timeout: Option<Duration>,
    /// Override the total attempt count.
    pub max_attempts: Option<u32>,
    /// Override the backoff base delay.
    pub base_delay: Option<Duration>,
    /// Override the cache TTL for the response produced by this call.
    pub cache_ttl: Option<Duration>,
    /// Skip the cache for this call (both lookup and store).
    pub bypass_cache: bool,
}

impl RequestOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}
