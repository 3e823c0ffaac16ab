//! Upstream transport
//!
//! Gateways reach third-party providers through [`UpstreamTransport`], which returns a
//! decoded JSON payload or a transport/format failure. [`HttpTransport`] is the reqwest
//! implementation used in production; tests script their own.

use crate::config::ProviderConfig;
use crate::{LayerError, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Query parameter carrying the provider API key
const API_KEY_PARAM: &str = "appid";

/// Longest error body echoed back into an error message
const MAX_ERROR_BODY: usize = 200;

/// A provider request, relative to the provider's base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl UpstreamRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Query parameters as a JSON object, used for cache keys
    pub fn params_json(&self) -> Value {
        let map: Map<String, Value> = self
            .query
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }
}

/// Failure reaching or decoding an upstream provider
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Network failure, timeout or non-success status
    #[error("{0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("{0}")]
    Format(String),
}

impl From<TransportError> for LayerError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Transport(msg) => LayerError::UpstreamTransport(msg),
            TransportError::Format(msg) => LayerError::UpstreamFormat(msg),
        }
    }
}

/// Fetches decoded JSON payloads from a provider
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn fetch(&self, request: &UpstreamRequest) -> std::result::Result<Value, TransportError>;
}

/// reqwest-backed transport for one provider
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for a base URL
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::USER_AGENT,
                    header::HeaderValue::from_static(concat!("envlayers/", env!("CARGO_PKG_VERSION"))),
                );
                headers.insert(
                    header::ACCEPT,
                    header::HeaderValue::from_static("application/json"),
                );
                headers
            })
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    /// Transport for a configured provider, resolving `$VAR` API keys
    pub fn for_provider(config: &ProviderConfig, timeout: Duration) -> Result<Self> {
        Self::new(config.base_url.clone(), config.resolved_api_key(), timeout)
    }

    pub fn url_for(&self, request: &UpstreamRequest) -> String {
        format!("{}{}", self.base_url, request.path)
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[async_trait]
impl UpstreamTransport for HttpTransport {
    async fn fetch(&self, request: &UpstreamRequest) -> std::result::Result<Value, TransportError> {
        let url = self.url_for(request);
        let mut query = request.query.clone();
        if let Some(ref key) = self.api_key {
            query.push((API_KEY_PARAM.to_string(), key.clone()));
        }

        debug!(url = %url, "Fetching upstream payload");

        let response = self
            .client
            .get(&url)
            .query(&query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Transport(format!("request to {} timed out", url))
                } else {
                    TransportError::Transport(format!("request to {} failed: {}", url, e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Transport(format!("reading response body failed: {}", e)))?;

        if !status.is_success() {
            return Err(TransportError::Transport(format!(
                "HTTP {} from {}: {}",
                status,
                url,
                truncate(&body)
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| TransportError::Format(format!("undecodable JSON from {}: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerType;
    use serde_json::json;

    #[test]
    fn test_request_params_json() {
        let request = UpstreamRequest::new("/weather")
            .param("lat", 44.42)
            .param("lon", 26.1)
            .param("units", "metric");

        assert_eq!(
            request.params_json(),
            json!({"lat": "44.42", "lon": "26.1", "units": "metric"})
        );
    }

    #[test]
    fn test_transport_error_mapping() {
        let err: LayerError = TransportError::Transport("timed out".into()).into();
        assert_eq!(err.kind(), "UpstreamTransportError");

        let err: LayerError = TransportError::Format("bad json".into()).into();
        assert_eq!(err.kind(), "UpstreamFormatError");
    }

    #[test]
    fn test_url_building() {
        let config = ProviderConfig::for_layer(LayerType::Crime);
        let transport = HttpTransport::for_provider(&config, Duration::from_secs(5)).unwrap();
        let url = transport.url_for(&UpstreamRequest::new("/crimes-street/all-crime"));
        assert_eq!(url, "https://data.police.uk/api/crimes-street/all-crime");
    }

    #[test]
    fn test_truncate_error_body() {
        let long = "x".repeat(500);
        assert_eq!(truncate(&long).len(), MAX_ERROR_BODY);
        assert_eq!(truncate("short"), "short");
    }
}
