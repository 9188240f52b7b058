//! Error taxonomy for provider calls.
//!
//! Every failure surfaced to callers is a [`ClientError`]. The variants are
//! deliberately `Clone`: when concurrent identical requests are coalesced,
//! every waiter receives its own copy of the single shared outcome.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while executing a provider request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    /// The caller's input was rejected before any network activity.
    #[error("invalid request: {message}")]
    Validation { message: String },

    /// Transport-level failure (connection refused, DNS, broken stream).
    #[error("network failure: {message}")]
    Network { message: String },

    /// The request exceeded its deadline.
    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Rejected by the local rate limiter or a provider 429.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The circuit breaker is open and the call was not attempted.
    #[error("circuit open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// The provider answered with a non-success HTTP status.
    #[error("provider returned status {status}: {message}")]
    Remote { status: u16, message: String },
}

impl ClientError {
    /// Whether the retry loop may attempt this request again.
    ///
    /// Network faults, timeouts, 5xx responses, and provider 429s are
    /// transient. Validation errors, 4xx responses, and an open circuit
    /// are not: repeating the identical request cannot succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network { .. } | ClientError::Timeout { .. } => true,
            ClientError::RateLimited { .. } => true,
            ClientError::Remote { status, .. } => *status >= 500,
            ClientError::Validation { .. } | ClientError::CircuitOpen { .. } => false,
        }
    }

    /// Provider- or limiter-suggested minimum delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClientError::RateLimited { retry_after } => Some(*retry_after),
            ClientError::CircuitOpen { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether this outcome should count against the circuit breaker.
    ///
    /// Any answer that required a network round trip is recorded:
    /// timeouts, transport failures, and remote statuses (4xx included).
    /// Validation errors, throttling, and breaker rejections are not;
    /// no provider fault was observed for them.
    pub fn counts_as_breaker_failure(&self) -> bool {
        match self {
            ClientError::Network { .. }
            | ClientError::Timeout { .. }
            | ClientError::Remote { .. } => true,
            ClientError::Validation { .. }
            | ClientError::RateLimited { .. }
            | ClientError::CircuitOpen { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let server = ClientError::Remote { status: 503, message: "unavailable".into() };
        let client = ClientError::Remote { status: 404, message: "not found".into() };

        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        // both reflect a real answer from the provider
        assert!(server.counts_as_breaker_failure());
        assert!(client.counts_as_breaker_failure());
    }

    #[test]
    fn transport_faults_are_retryable_and_count_against_breaker() {
        let network = ClientError::Network { message: "connection refused".into() };
        let timeout = ClientError::Timeout { timeout: Duration::from_secs(5) };

        assert!(network.is_retryable() && network.counts_as_breaker_failure());
        assert!(timeout.is_retryable() && timeout.counts_as_breaker_failure());
    }

    #[test]
    fn rate_limited_is_retryable_but_not_a_breaker_failure() {
        let err = ClientError::RateLimited { retry_after: Duration::from_secs(2) };

        assert!(err.is_retryable());
        assert!(!err.counts_as_breaker_failure());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn circuit_open_short_circuits_the_retry_loop() {
        let err = ClientError::CircuitOpen { retry_after: Duration::from_secs(12) };

        assert!(!err.is_retryable());
        assert!(!err.counts_as_breaker_failure());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn validation_errors_never_reach_the_network_machinery() {
        let err = ClientError::Validation { message: "empty path".into() };

        assert!(!err.is_retryable());
        assert!(!err.counts_as_breaker_failure());
        assert_eq!(err.retry_after(), None);
    }
}
