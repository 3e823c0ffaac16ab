//! Per-layer provider behaviour plugged into the shared gateway pipeline

use super::query::LayerQuery;
use super::transport::UpstreamRequest;
use crate::layer::{Bounds, LayerType};
use crate::normalizer::NormalizedLayer;
use crate::{LayerError, Result};
use serde_json::{Map, Value};

/// Which upstream endpoint a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Current,
    Forecast,
}

impl RequestKind {
    /// Endpoint name used in cache keys
    pub fn endpoint(&self) -> &'static str {
        match self {
            RequestKind::Current => "current",
            RequestKind::Forecast => "forecast",
        }
    }
}

/// What differs between the weather, pollution and crime gateways
pub trait LayerProvider: Send + Sync {
    fn layer_type(&self) -> LayerType;

    /// Upstream request for current conditions
    fn current_request(&self, query: &LayerQuery) -> UpstreamRequest;

    /// Upstream request for a forecast
    fn forecast_request(&self, _query: &LayerQuery) -> Result<UpstreamRequest> {
        Err(LayerError::Unsupported(format!(
            "{} data has no forecast",
            self.layer_type()
        )))
    }

    /// Parameters identifying a request in the cache
    ///
    /// Defaults to the upstream query; providers add options that change the normalized
    /// result without reaching the provider.
    fn cache_params(&self, _kind: RequestKind, request: &UpstreamRequest, _query: &LayerQuery) -> Value {
        request.params_json()
    }

    /// Derived analysis attached to a normalized current reading
    fn analyze(&self, _normalized: &NormalizedLayer) -> Option<Value> {
        None
    }

    /// Synthetic area statistics used when nothing is stored for an area
    fn mock_area_stats(&self, _bounds: &Bounds) -> Option<Value> {
        None
    }
}

/// Add one entry to a JSON object value
pub(crate) fn with_param(mut params: Value, key: &str, value: impl Into<Value>) -> Value {
    if let Value::Object(ref mut map) = params {
        map.insert(key.to_string(), value.into());
    } else {
        let mut map = Map::new();
        map.insert(key.to_string(), value.into());
        params = Value::Object(map);
    }
    params
}
