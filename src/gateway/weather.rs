//! Weather gateway behaviour (OpenWeatherMap current + 5 day / 3 hour forecast)

use super::provider::{with_param, LayerProvider, RequestKind};
use super::query::LayerQuery;
use super::transport::UpstreamRequest;
use crate::layer::LayerType;
use crate::Result;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct WeatherProvider;

impl LayerProvider for WeatherProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::Weather
    }

    fn current_request(&self, query: &LayerQuery) -> UpstreamRequest {
        UpstreamRequest::new("/weather")
            .param("lat", query.point.lat)
            .param("lon", query.point.lon)
            .param("units", query.units)
    }

    fn forecast_request(&self, query: &LayerQuery) -> Result<UpstreamRequest> {
        Ok(UpstreamRequest::new("/forecast")
            .param("lat", query.point.lat)
            .param("lon", query.point.lon)
            .param("units", query.units))
    }

    fn cache_params(&self, kind: RequestKind, request: &UpstreamRequest, query: &LayerQuery) -> Value {
        match kind {
            RequestKind::Current => request.params_json(),
            RequestKind::Forecast => with_param(request.params_json(), "days", query.days),
        }
    }
}
