//! Weather payload normalization
//!
//! Consumes OpenWeatherMap-style current-conditions payloads:
//! `main.{temp,humidity,pressure}`, `wind.{speed,deg}`, `weather[0].{description,icon}`.

use super::{field_f64, field_str};
use crate::LayerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Unit system requested from the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl Units {
    /// Query-string value understood by the provider
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
            Units::Standard => "standard",
        }
    }

    /// Unit label attached to temperatures
    pub fn temperature_unit(&self) -> &'static str {
        match self {
            Units::Metric => "celsius",
            Units::Imperial => "fahrenheit",
            Units::Standard => "kelvin",
        }
    }

    /// Convert a temperature in these units to Celsius, rounded to 2 decimals
    pub fn to_celsius(&self, value: f64) -> f64 {
        let celsius = match self {
            Units::Metric => value,
            Units::Imperial => (value - 32.0) * 5.0 / 9.0,
            Units::Standard => value - 273.15,
        };
        (celsius * 100.0).round() / 100.0
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            "standard" => Ok(Units::Standard),
            other => Err(LayerError::Validation(format!(
                "Invalid units '{}'. Must be one of: metric, imperial, standard",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Temperature {
    pub value: Option<f64>,
    pub unit: String,
    pub derived_celsius: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wind {
    pub speed: Option<f64>,
    pub direction: Option<f64>,
}

/// Canonical weather reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReading {
    pub temperature: Temperature,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub wind: Wind,
    pub description: Option<String>,
    pub icon: Option<String>,
}

impl WeatherReading {
    pub fn from_raw(raw: &Value, units: Units) -> Result<Self, String> {
        let object = raw
            .as_object()
            .ok_or_else(|| "weather payload is not a JSON object".to_string())?;

        if let Some(message) = provider_error(raw) {
            return Err(message);
        }

        let main = object
            .get("main")
            .filter(|m| m.is_object())
            .ok_or_else(|| "weather payload has no 'main' block".to_string())?;

        let temperature = field_f64(main, "temp");
        let condition = raw.get("weather").and_then(|w| w.get(0));

        Ok(Self {
            temperature: Temperature {
                value: temperature,
                unit: units.temperature_unit().to_string(),
                derived_celsius: temperature.map(|t| units.to_celsius(t)),
            },
            humidity: field_f64(main, "humidity"),
            pressure: field_f64(main, "pressure"),
            wind: Wind {
                speed: raw.get("wind").and_then(|w| field_f64(w, "speed")),
                direction: raw.get("wind").and_then(|w| field_f64(w, "deg")),
            },
            description: condition.and_then(|c| field_str(c, "description")),
            icon: condition.and_then(|c| field_str(c, "icon")),
        })
    }
}

/// Error message carried by a provider error body (`{"cod": "401", "message": ...}`)
pub(crate) fn provider_error(raw: &Value) -> Option<String> {
    let code = raw.get("cod")?;
    let ok = match code {
        Value::Number(n) => n.as_i64() == Some(200),
        Value::String(s) => s == "200",
        _ => false,
    };
    if ok {
        return None;
    }
    let message = field_str(raw, "message").unwrap_or_else(|| "unknown provider error".into());
    Some(format!("provider error {}: {}", code, message))
}
