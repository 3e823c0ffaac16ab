//! Air pollution gateway behaviour and health analysis

use super::provider::{with_param, LayerProvider, RequestKind};
use super::query::LayerQuery;
use super::transport::UpstreamRequest;
use crate::layer::LayerType;
use crate::normalizer::{LayerData, NormalizedLayer, PollutionReading};
use crate::Result;
use serde_json::{json, Value};

/// Reference concentrations (µg/m³) used to weight pollutants against each other
const REFERENCE_LEVELS: [(&str, f64); 6] = [
    ("pm2_5", 25.0),
    ("pm10", 50.0),
    ("no2", 200.0),
    ("o3", 100.0),
    ("so2", 20.0),
    ("co", 10000.0),
];

/// Fixed advice per AQI bucket
pub fn health_recommendations(aqi: i64) -> Vec<&'static str> {
    match aqi {
        1 => vec!["Air quality is good. Outdoor activities are safe for everyone."],
        2 => vec![
            "Air quality is acceptable.",
            "Unusually sensitive people should consider limiting prolonged outdoor exertion.",
        ],
        3 => vec![
            "Sensitive groups should reduce prolonged or heavy outdoor exertion.",
            "Keep windows closed during peak traffic hours.",
        ],
        4 => vec![
            "Everyone should reduce prolonged outdoor exertion.",
            "Sensitive groups should avoid outdoor activity.",
            "Use an air purifier indoors if available.",
        ],
        5 => vec![
            "Avoid all outdoor physical activity.",
            "Keep windows closed and run air filtration.",
            "Sensitive groups should remain indoors.",
        ],
        _ => Vec::new(),
    }
}

/// `(aqi - 1) * 25`, so 1 maps to 0 and 5 to 100
pub fn severity_score(aqi: i64) -> i64 {
    (aqi.clamp(1, 5) - 1) * 25
}

/// Up to three pollutants with the highest concentration relative to their reference level
pub fn main_pollutants(reading: &PollutionReading) -> Vec<Value> {
    let mut weighted: Vec<(&str, f64, f64)> = reading
        .concentrations()
        .into_iter()
        .filter_map(|(name, concentration)| {
            let reference = REFERENCE_LEVELS.iter().find(|(n, _)| *n == name)?.1;
            Some((name, concentration, concentration / reference))
        })
        .collect();

    weighted.sort_by(|a, b| b.2.total_cmp(&a.2));
    weighted
        .into_iter()
        .take(3)
        .map(|(name, concentration, ratio)| {
            json!({
                "name": name,
                "concentration": concentration,
                "relative_level": (ratio * 100.0).round() / 100.0,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PollutionProvider;

impl LayerProvider for PollutionProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::Pollution
    }

    fn current_request(&self, query: &LayerQuery) -> UpstreamRequest {
        UpstreamRequest::new("/air_pollution")
            .param("lat", query.point.lat)
            .param("lon", query.point.lon)
    }

    fn forecast_request(&self, query: &LayerQuery) -> Result<UpstreamRequest> {
        Ok(UpstreamRequest::new("/air_pollution/forecast")
            .param("lat", query.point.lat)
            .param("lon", query.point.lon))
    }

    fn cache_params(&self, kind: RequestKind, request: &UpstreamRequest, query: &LayerQuery) -> Value {
        match kind {
            RequestKind::Current => request.params_json(),
            RequestKind::Forecast => with_param(request.params_json(), "hours", query.hours),
        }
    }

    fn analyze(&self, normalized: &NormalizedLayer) -> Option<Value> {
        let Some(LayerData::Pollution(reading)) = &normalized.data else {
            return None;
        };
        let aqi = reading.aqi.value;

        Some(json!({
            "health_recommendations": aqi.map(health_recommendations).unwrap_or_default(),
            "severity_score": aqi.map(severity_score),
            "main_pollutants": main_pollutants(reading),
        }))
    }
}
