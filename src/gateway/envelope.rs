//! Response envelopes returned across the API boundary

use crate::error::RetryDecision;
use crate::LayerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured description of a failed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Taxonomy name, e.g. `RateLimitExceeded`
    pub kind: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl From<&LayerError> for ErrorBody {
    fn from(err: &LayerError) -> Self {
        let (retryable, retry_after_secs) = match err.retry_decision() {
            RetryDecision::Retry => (true, None),
            RetryDecision::RetryAfter(after) => (true, Some(after.as_secs())),
            RetryDecision::NoRetry => (false, None),
        };
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            retryable,
            retry_after_secs,
        }
    }
}

/// `{success, data|error, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn success(data: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp,
        }
    }

    pub fn failure(err: &LayerError, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody::from(err)),
            timestamp,
        }
    }

    /// Wrap any serializable result; serialization failures become error envelopes
    pub fn from_result<T: Serialize>(result: crate::Result<T>, timestamp: DateTime<Utc>) -> Self {
        match result.and_then(|data| serde_json::to_value(data).map_err(LayerError::from)) {
            Ok(data) => Self::success(data, timestamp),
            Err(err) => Self::failure(&err, timestamp),
        }
    }

    /// Taxonomy name of the error, if this is a failure
    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }
}
