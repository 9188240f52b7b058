//! Provider client: validation, caching, coalescing, rate limiting,
//! circuit breaking, and retry around a reqwest transport.

mod inflight;
mod log;
mod signature;

pub use log::{RequestLog, RequestLogEntry};
pub use signature::canonical_signature;

use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CacheLookup, CacheStats, CacheStore};
use crate::config::{ClientConfig, ConfigError, RequestOptions};
use crate::error::ClientError;
use crate::resilience::{BreakerMetrics, CircuitBreaker, CircuitState, RateLimiter};
use inflight::{await_leader, Flight, InFlightRegistry};

/// Entries retained by the diagnostic request log.
const REQUEST_LOG_CAPACITY: usize = 256;

/// Fallback when a 429 response carries no usable Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Exponent cap keeping backoff delays bounded for long retry budgets.
const MAX_BACKOFF_SHIFT: u32 = 8;

/// Response returned to callers.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Parsed JSON body; non-JSON bodies are wrapped as a JSON string.
    pub data: Value,
    pub status: u16,
    /// Whether the payload came from the cache rather than the network.
    pub from_cache: bool,
    /// Wall time this call spent inside the client.
    pub latency: Duration,
    pub request_id: Uuid,
}

/// Payload stored in the response cache.
#[derive(Debug, Clone)]
struct CachedValue {
    status: u16,
    data: Value,
}

/// Outcome shared between the leader and coalesced waiters.
#[derive(Debug, Clone, PartialEq)]
struct Fetched {
    status: u16,
    data: Value,
    request_id: Uuid,
}

/// Effective settings for one call after per-call overrides are applied.
#[derive(Debug, Clone)]
struct CallPlan {
    timeout: Duration,
    max_attempts: u32,
    base_delay: Duration,
    cache_ttl: Duration,
    use_cache: bool,
}

impl CallPlan {
    fn resolve(config: &ClientConfig, options: &RequestOptions, idempotent: bool) -> Self {
        Self {
            timeout: options.timeout.unwrap_or(config.timeout),
            max_attempts: options.max_attempts.unwrap_or(config.max_attempts).max(1),
            base_delay: options.base_delay.unwrap_or(config.base_delay),
            cache_ttl: options.cache_ttl.unwrap_or(config.cache.ttl),
            use_cache: idempotent && config.cache.enabled && !options.bypass_cache,
        }
    }
}

struct Executed {
    outcome: Result<Fetched, ClientError>,
    retries: u32,
}

/// Resilient client for a single upstream data provider.
///
/// Cheap to clone; clones share the cache, breaker, limiter, in-flight
/// registry, and request log.
#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    config: ClientConfig,
    cache: CacheStore<CachedValue>,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    inflight: InFlightRegistry<Fetched>,
    log: RequestLog,
}

impl ProviderClient {
    /// Build a client from a validated configuration.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::invalid(format!("invalid header name: {name}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| ConfigError::invalid(format!("invalid value for header {name}")))?;
            headers.insert(header_name, header_value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .no_proxy()
            .build()
            .map_err(|err| ConfigError::invalid(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            http,
            cache: CacheStore::new(config.cache.max_entries, config.cache.stale_while_revalidate),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            inflight: InFlightRegistry::new(),
            log: RequestLog::new(REQUEST_LOG_CAPACITY),
            config,
        })
    }

    /// GET with default options.
    pub async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<ApiResponse, ClientError> {
        self.request(Method::GET, path, query, None, RequestOptions::default()).await
    }

    /// GET with per-call overrides.
    pub async fn get_with(
        &self,
        path: &str,
        query: &[(String, String)],
        options: RequestOptions,
    ) -> Result<ApiResponse, ClientError> {
        self.request(Method::GET, path, query, None, options).await
    }

    /// POST with default options.
    pub async fn post(&self, path: &str, body: Value) -> Result<ApiResponse, ClientError> {
        self.request(Method::POST, path, &[], Some(body), RequestOptions::default()).await
    }

    /// POST with per-call overrides.
    pub async fn post_with(
        &self,
        path: &str,
        body: Value,
        options: RequestOptions,
    ) -> Result<ApiResponse, ClientError> {
        self.request(Method::POST, path, &[], Some(body), options).await
    }

    /// Execute a request through the full pipeline.
    ///
    /// Only GET requests participate in caching and in-flight coalescing;
    /// every method shares the breaker, rate limiter, retry loop, and log.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, ClientError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let idempotent = method == Method::GET;
        let plan = CallPlan::resolve(&self.config, &options, idempotent);

        if let Err(err) = validate_request(path, query, idempotent, body.as_ref()) {
            self.log_outcome(request_id, &method, path, None, started, false, 0, Some(&err));
            return Err(err);
        }

        if let Err(err) = self.breaker.check_admission() {
            self.log_outcome(request_id, &method, path, None, started, false, 0, Some(&err));
            return Err(err);
        }

        let sig = canonical_signature(&method, path, query, body.as_ref());

        if plan.use_cache {
            match self.cache.get(&sig) {
                CacheLookup::Hit(cached) => {
                    debug!(%method, path, "serving fresh cached response");
                    self.log_outcome(
                        request_id, &method, path, Some(cached.status), started, true, 0, None,
                    );
                    return Ok(ApiResponse {
                        data: cached.data,
                        status: cached.status,
                        from_cache: true,
                        latency: started.elapsed(),
                        request_id,
                    });
                }
                CacheLookup::Stale(cached) => {
                    debug!(%method, path, "serving stale response, refreshing in background");
                    self.spawn_refresh(method.clone(), path.to_string(), query.to_vec(), plan, sig);
                    self.log_outcome(
                        request_id, &method, path, Some(cached.status), started, true, 0, None,
                    );
                    return Ok(ApiResponse {
                        data: cached.data,
                        status: cached.status,
                        from_cache: true,
                        latency: started.elapsed(),
                        request_id,
                    });
                }
                CacheLookup::Miss => {}
            }
        }

        let executed = if idempotent {
            self.fetch_coalesced(&method, path, query, body.as_ref(), &plan, &sig, request_id)
                .await
        } else {
            self.execute(&method, path, query, body.as_ref(), &plan, request_id).await
        };

        match executed.outcome {
            Ok(fetched) => {
                self.log_outcome(
                    request_id,
                    &method,
                    path,
                    Some(fetched.status),
                    started,
                    false,
                    executed.retries,
                    None,
                );
                Ok(ApiResponse {
                    data: fetched.data,
                    status: fetched.status,
                    from_cache: false,
                    latency: started.elapsed(),
                    request_id: fetched.request_id,
                })
            }
            Err(err) => {
                self.log_outcome(
                    request_id,
                    &method,
                    path,
                    remote_status(&err),
                    started,
                    false,
                    executed.retries,
                    Some(&err),
                );
                Err(err)
            }
        }
    }

    /// Run the request as in-flight leader, or attach to an existing one.
    async fn fetch_coalesced(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        plan: &CallPlan,
        sig: &str,
        request_id: Uuid,
    ) -> Executed {
        match self.inflight.join(sig) {
            Flight::Waiter(receiver) => {
                Executed { outcome: await_leader(receiver).await, retries: 0 }
            }
            Flight::Leader(guard) => {
                let executed = self.execute(method, path, query, body, plan, request_id).await;
                if plan.use_cache {
                    if let Ok(fetched) = &executed.outcome {
                        self.store_response(sig, fetched, plan.cache_ttl);
                    }
                }
                guard.complete(executed.outcome.clone());
                executed
            }
        }
    }

    /// Retry loop around a single network operation.
    async fn execute(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        plan: &CallPlan,
        request_id: Uuid,
    ) -> Executed {
        let mut attempt: u32 = 0;
        loop {
            // the first attempt was already admitted by the caller
            if attempt > 0 {
                if let Err(err) = self.breaker.check_admission() {
                    return Executed { outcome: Err(err), retries: attempt };
                }
            }

            if let Err(err) = self.limiter.acquire().await {
                return Executed { outcome: Err(err), retries: attempt };
            }

            match self.perform(method, path, query, body, plan.timeout, request_id).await {
                Ok(fetched) => {
                    self.breaker.record_success();
                    return Executed { outcome: Ok(fetched), retries: attempt };
                }
                Err(err) => {
                    if err.counts_as_breaker_failure() {
                        self.breaker.record_failure();
                    }

                    let next_attempt = attempt + 1;
                    if !err.is_retryable() || next_attempt >= plan.max_attempts {
                        return Executed { outcome: Err(err), retries: attempt };
                    }

                    let mut delay = backoff_delay(plan.base_delay, attempt);
                    if let Some(hint) = err.retry_after() {
                        delay = delay.max(hint);
                    }
                    warn!(
                        %method, path, attempt = next_attempt, ?delay, error = %err,
                        "attempt failed, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                }
            }
        }
    }

    /// One network attempt: send, enforce the deadline, classify the result.
    async fn perform(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        timeout: Duration,
        request_id: Uuid,
    ) -> Result<Fetched, ClientError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut builder = self.http.request(method.clone(), &url).timeout(timeout);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        debug!(%method, %url, %request_id, "sending provider request");
        let response = match tokio::time::timeout(timeout, builder.send()).await {
            Err(_) => return Err(ClientError::Timeout { timeout }),
            Ok(Err(err)) => return Err(classify_transport_error(&err, timeout)),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        debug!(%method, %url, %status, "received provider response");

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers()).unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(ClientError::RateLimited { retry_after });
        }
        if status.is_client_error() || status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Remote { status: status.as_u16(), message });
        }

        let text = response.text().await.map_err(|err| ClientError::Network {
            message: format!("failed to read response body: {err}"),
        })?;
        let data = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(Fetched { status: status.as_u16(), data, request_id })
    }

    fn store_response(&self, sig: &str, fetched: &Fetched, ttl: Duration) {
        let value = CachedValue { status: fetched.status, data: fetched.data.clone() };
        let size_bytes = fetched.data.to_string().len();
        self.cache.insert(sig, value, ttl, size_bytes);
    }

    /// Refresh a stale cache entry without blocking the caller.
    ///
    /// The refresh goes through the same admission pipeline as a
    /// foreground call, so an open circuit or an empty token bucket
    /// applies to it as well.
    fn spawn_refresh(
        &self,
        method: Method,
        path: String,
        query: Vec<(String, String)>,
        plan: CallPlan,
        sig: String,
    ) {
        let client = self.clone();
        tokio::spawn(async move {
            if client.breaker.check_admission().is_err() {
                debug!(%path, "skipping background refresh, circuit open");
                return;
            }
            match client.inflight.join(&sig) {
                // a foreground call is already fetching this signature
                Flight::Waiter(_) => {}
                Flight::Leader(guard) => {
                    let request_id = Uuid::new_v4();
                    let executed =
                        client.execute(&method, &path, &query, None, &plan, request_id).await;
                    match &executed.outcome {
                        Ok(fetched) => client.store_response(&sig, fetched, plan.cache_ttl),
                        Err(err) => {
                            debug!(%path, error = %err, "background refresh failed");
                        }
                    }
                    guard.complete(executed.outcome);
                }
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn log_outcome(
        &self,
        request_id: Uuid,
        method: &Method,
        path: &str,
        status: Option<u16>,
        started: Instant,
        cached: bool,
        retries: u32,
        error: Option<&ClientError>,
    ) {
        self.log.push(RequestLogEntry {
            request_id,
            method: method.to_string(),
            endpoint: path.to_string(),
            timestamp: Utc::now(),
            status,
            latency_ms: started.elapsed().as_millis() as u64,
            cached,
            retries,
            error: error.map(|err| err.to_string()),
        });
    }

    // Diagnostics surface
    // -----------------------------------------------------------------

    /// Cache occupancy and hit/miss counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Current circuit breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Full breaker counters for diagnostics.
    pub fn breaker_metrics(&self) -> BreakerMetrics {
        self.breaker.metrics()
    }

    /// Force the circuit closed, clearing its counters.
    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }

    /// Drop every cached response whose key contains `pattern`; returns
    /// the number removed. An empty pattern clears the cache.
    pub fn invalidate_cache(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern)
    }

    /// Snapshot of recent request outcomes, oldest first.
    pub fn recent_log(&self) -> Vec<RequestLogEntry> {
        self.log.recent()
    }
}

fn validate_request(
    path: &str,
    query: &[(String, String)],
    idempotent: bool,
    body: Option<&Value>,
) -> Result<(), ClientError> {
    if path.is_empty() {
        return Err(ClientError::Validation { message: "path must not be empty".into() });
    }
    if !path.starts_with('/') {
        return Err(ClientError::Validation { message: "path must start with '/'".into() });
    }
    if path.contains(char::is_whitespace) {
        return Err(ClientError::Validation { message: "path must not contain whitespace".into() });
    }
    if query.iter().any(|(key, _)| key.is_empty()) {
        return Err(ClientError::Validation {
            message: "query parameter names must not be empty".into(),
        });
    }
    if idempotent && body.is_some() {
        return Err(ClientError::Validation { message: "GET requests must not carry a body".into() });
    }
    Ok(())
}

/// Exponential backoff: `base × 2^attempt` plus jitter in `[0, 25%)` of
/// the undithered delay.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.min(MAX_BACKOFF_SHIFT);
    let delay = base.saturating_mul(1u32 << shift);
    let jitter = delay.mul_f64(rand::thread_rng().gen_range(0.0..0.25));
    delay.saturating_add(jitter)
}

fn classify_transport_error(err: &reqwest::Error, timeout: Duration) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout { timeout }
    } else {
        ClientError::Network { message: err.to_string() }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn remote_status(err: &ClientError) -> Option<u16> {
    match err {
        ClientError::Remote { status, .. } => Some(*status),
        _ => None,
    }
}
