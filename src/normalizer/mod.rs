//! Layer Normalizer
//!
//! Maps raw provider payloads into one canonical schema per layer type and scores
//! their completeness. Normalization never fails: malformed upstream data yields an
//! error-shaped [`NormalizedLayer`] (`source: "error"`, `data: null`) so callers always
//! get a typed result back.

pub mod crime;
pub mod forecast;
pub mod pollution;
pub mod quality;
pub mod weather;

pub use crime::CrimeSummary;
pub use forecast::{DailyWeather, HourlyPollution, PollutionForecast, WeatherForecast};
pub use pollution::{aqi_label, PollutionReading};
pub use quality::{assess_quality, payload_quality};
pub use weather::{Units, WeatherReading};

use crate::layer::{LayerType, Quality};
use crate::Result;
use serde::Serialize;
use serde_json::Value;

/// Source label carried by error-shaped results
pub const ERROR_SOURCE: &str = "error";

/// Numeric field lookup that also accepts numeric strings
pub(crate) fn field_f64(value: &Value, key: &str) -> Option<f64> {
    let field = value.get(key)?;
    field
        .as_f64()
        .or_else(|| field.as_str().and_then(|s| s.trim().parse().ok()))
}

pub(crate) fn field_str(value: &Value, key: &str) -> Option<String> {
    value.get(key)?.as_str().map(str::to_string)
}

/// Canonical data for one layer reading or forecast
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LayerData {
    Weather(WeatherReading),
    Pollution(PollutionReading),
    Crime(CrimeSummary),
    WeatherForecast(WeatherForecast),
    PollutionForecast(PollutionForecast),
}

/// Knobs that shape normalization for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub units: Units,
    /// Days kept in a weather forecast
    pub days: usize,
    /// Hours kept in a pollution forecast
    pub hours: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            units: Units::Metric,
            days: 5,
            hours: 24,
        }
    }
}

/// Normalized payload, or the error shape when the raw payload was unusable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedLayer {
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    pub source: String,
    pub data: Option<LayerData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
}

impl NormalizedLayer {
    fn success(layer_type: LayerType, source: &str, data: LayerData) -> Self {
        Self {
            layer_type,
            source: source.to_string(),
            data: Some(data),
            error: None,
            analysis: None,
        }
    }

    /// `{type, source: "error", error, data: null}`
    pub fn failure(layer_type: LayerType, message: impl Into<String>) -> Self {
        Self {
            layer_type,
            source: ERROR_SOURCE.to_string(),
            data: None,
            error: Some(message.into()),
            analysis: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.data.is_none()
    }

    /// The `data` portion as JSON (`null` for error shapes)
    pub fn data_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.data)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Completeness rating of the `data` portion
    pub fn quality(&self) -> Result<Quality> {
        Ok(assess_quality(&self.data_value()?))
    }
}

/// Normalize a current-conditions payload with default options
pub fn standardize(raw: &Value, source: &str, layer_type: LayerType) -> NormalizedLayer {
    standardize_with(raw, source, layer_type, &NormalizeOptions::default())
}

/// Normalize a current-conditions payload
pub fn standardize_with(
    raw: &Value,
    source: &str,
    layer_type: LayerType,
    options: &NormalizeOptions,
) -> NormalizedLayer {
    let data = match layer_type {
        LayerType::Weather => WeatherReading::from_raw(raw, options.units).map(LayerData::Weather),
        LayerType::Pollution => PollutionReading::from_raw(raw).map(LayerData::Pollution),
        LayerType::Crime => CrimeSummary::from_raw(raw).map(LayerData::Crime),
    };
    finish(layer_type, source, data)
}

/// Normalize a time-bucketed forecast payload into daily or hourly summaries
pub fn standardize_forecast(
    raw: &Value,
    source: &str,
    layer_type: LayerType,
    options: &NormalizeOptions,
) -> NormalizedLayer {
    let data = match layer_type {
        LayerType::Weather => forecast::daily_weather(raw, options.units, options.days)
            .map(LayerData::WeatherForecast),
        LayerType::Pollution => {
            forecast::hourly_pollution(raw, options.hours).map(LayerData::PollutionForecast)
        }
        LayerType::Crime => Err("crime data has no forecast".to_string()),
    };
    finish(layer_type, source, data)
}

fn finish(
    layer_type: LayerType,
    source: &str,
    data: std::result::Result<LayerData, String>,
) -> NormalizedLayer {
    match data {
        Ok(data) => NormalizedLayer::success(layer_type, source, data),
        Err(message) => {
            tracing::warn!(layer = %layer_type, source, error = %message, "Malformed upstream payload");
            NormalizedLayer::failure(layer_type, message)
        }
    }
}
