//! Error types for envlayers
//!
//! Defines the error taxonomy shared by the cache, rate limiter, repository and
//! provider gateways. Uses thiserror for ergonomic error handling.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for envlayers operations
pub type Result<T> = std::result::Result<T, LayerError>;

/// Comprehensive error type for envlayers operations
#[derive(Error, Debug)]
pub enum LayerError {
    /// Missing or unreadable configuration (fatal at construction)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider switched off in configuration
    #[error("Service disabled: {0} provider is not enabled")]
    Disabled(String),

    /// Per-provider call budget exhausted for the current minute
    #[error("Rate limit exceeded for {provider}, retry after {retry_after_secs} seconds")]
    RateLimited {
        provider: String,
        retry_after_secs: u64,
    },

    /// Network failure or timeout reaching the upstream provider
    #[error("Upstream transport error: {0}")]
    UpstreamTransport(String),

    /// Upstream responded with something we could not decode
    #[error("Upstream format error: {0}")]
    UpstreamFormat(String),

    /// Bad coordinates or request parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation not offered by this layer
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Storage errors that are not raw SQLite failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

/// Retry classification for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation
    Retry,
    /// Retry after a specific duration (e.g. once the rate-limit window rolls over)
    RetryAfter(Duration),
    /// Don't retry, the error is permanent
    NoRetry,
}

impl LayerError {
    /// Stable taxonomy name exposed in error envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            LayerError::Config(_) | LayerError::Yaml(_) => "ConfigurationError",
            LayerError::Disabled(_) => "DisabledServiceError",
            LayerError::RateLimited { .. } => "RateLimitExceeded",
            LayerError::UpstreamTransport(_) => "UpstreamTransportError",
            LayerError::UpstreamFormat(_) => "UpstreamFormatError",
            LayerError::Validation(_) => "ValidationError",
            LayerError::Unsupported(_) => "UnsupportedOperation",
            LayerError::Storage(_) | LayerError::Database(_) | LayerError::Io(_) => {
                "StorageError"
            }
            LayerError::Json(_) | LayerError::Http(_) | LayerError::Other(_) => "InternalError",
        }
    }

    /// Determine whether a caller may retry the failed request
    pub fn retry_decision(&self) -> RetryDecision {
        match self {
            LayerError::RateLimited {
                retry_after_secs, ..
            } => RetryDecision::RetryAfter(Duration::from_secs(*retry_after_secs)),
            LayerError::UpstreamTransport(_) | LayerError::UpstreamFormat(_) => {
                RetryDecision::Retry
            }
            LayerError::Storage(_) | LayerError::Database(_) | LayerError::Io(_) => {
                RetryDecision::Retry
            }
            LayerError::Config(_)
            | LayerError::Disabled(_)
            | LayerError::Validation(_)
            | LayerError::Unsupported(_)
            | LayerError::Json(_)
            | LayerError::Yaml(_)
            | LayerError::Http(_)
            | LayerError::Other(_) => RetryDecision::NoRetry,
        }
    }

    /// Whether the error is worth retrying at all
    pub fn is_retryable(&self) -> bool {
        !matches!(self.retry_decision(), RetryDecision::NoRetry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_follow_taxonomy() {
        assert_eq!(
            LayerError::Disabled("crime".into()).kind(),
            "DisabledServiceError"
        );
        assert_eq!(
            LayerError::Validation("lat".into()).kind(),
            "ValidationError"
        );
        assert_eq!(
            LayerError::UpstreamFormat("bad json".into()).kind(),
            "UpstreamFormatError"
        );
    }

    #[test]
    fn test_rate_limited_retries_after_window() {
        let err = LayerError::RateLimited {
            provider: "weather".into(),
            retry_after_secs: 17,
        };
        assert_eq!(
            err.retry_decision(),
            RetryDecision::RetryAfter(Duration::from_secs(17))
        );
        assert!(err.is_retryable());
        assert!(err.to_string().contains("17 seconds"));
    }

    #[test]
    fn test_permanent_errors_are_not_retryable() {
        assert!(!LayerError::Config("missing".into()).is_retryable());
        assert!(!LayerError::Disabled("weather".into()).is_retryable());
        assert!(LayerError::UpstreamTransport("timeout".into()).is_retryable());
    }
}
