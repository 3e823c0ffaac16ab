//! Air pollution payload normalization
//!
//! Consumes OpenWeatherMap air-pollution payloads: `list[0].main.aqi` on the 1–5 scale
//! and `list[0].components` concentrations in µg/m³.

use super::field_f64;
use super::weather::provider_error;
use serde::Serialize;
use serde_json::Value;

/// Label for the provider's 1–5 AQI scale
pub fn aqi_label(aqi: i64) -> &'static str {
    match aqi {
        1 => "Good",
        2 => "Fair",
        3 => "Moderate",
        4 => "Poor",
        5 => "Very Poor",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AirQualityIndex {
    pub value: Option<i64>,
    pub level: String,
    pub scale: String,
}

impl AirQualityIndex {
    pub fn new(value: Option<i64>) -> Self {
        Self {
            value,
            level: value.map(aqi_label).unwrap_or("Unknown").to_string(),
            scale: "1-5".to_string(),
        }
    }
}

/// Canonical pollution reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollutionReading {
    pub aqi: AirQualityIndex,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub co: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
}

impl PollutionReading {
    pub fn from_raw(raw: &Value) -> Result<Self, String> {
        if let Some(message) = provider_error(raw) {
            return Err(message);
        }

        let entry = raw
            .get("list")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .ok_or_else(|| "pollution payload has no 'list' entries".to_string())?;

        Ok(Self::from_entry(entry))
    }

    /// Map a single time-bucketed entry
    pub fn from_entry(entry: &Value) -> Self {
        let aqi = entry
            .get("main")
            .and_then(|m| m.get("aqi"))
            .and_then(Value::as_i64);
        let components = entry.get("components").unwrap_or(&Value::Null);

        Self {
            aqi: AirQualityIndex::new(aqi),
            pm2_5: field_f64(components, "pm2_5"),
            pm10: field_f64(components, "pm10"),
            co: field_f64(components, "co"),
            no2: field_f64(components, "no2"),
            o3: field_f64(components, "o3"),
            so2: field_f64(components, "so2"),
        }
    }

    /// (name, concentration) pairs for the pollutants that were reported
    pub fn concentrations(&self) -> Vec<(&'static str, f64)> {
        [
            ("pm2_5", self.pm2_5),
            ("pm10", self.pm10),
            ("co", self.co),
            ("no2", self.no2),
            ("o3", self.o3),
            ("so2", self.so2),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_maps_first_entry() {
        let raw = json!({
            "coord": {"lon": 26.1, "lat": 44.42},
            "list": [{
                "main": {"aqi": 3},
                "components": {"co": 230.3, "no": 0.1, "no2": 12.5, "o3": 68.0,
                               "so2": 3.2, "pm2_5": 18.4, "pm10": 25.0, "nh3": 1.1},
                "dt": 1714564800
            }]
        });

        let reading = PollutionReading::from_raw(&raw).unwrap();
        assert_eq!(reading.aqi.value, Some(3));
        assert_eq!(reading.aqi.level, "Moderate");
        assert_eq!(reading.aqi.scale, "1-5");
        assert_eq!(reading.pm2_5, Some(18.4));
        assert_eq!(reading.so2, Some(3.2));
        assert_eq!(reading.concentrations().len(), 6);
    }

    #[test]
    fn test_label_mapping() {
        assert_eq!(aqi_label(1), "Good");
        assert_eq!(aqi_label(5), "Very Poor");
        assert_eq!(aqi_label(9), "Unknown");
    }

    #[test]
    fn test_rejects_empty_list() {
        assert!(PollutionReading::from_raw(&json!({"list": []})).is_err());
        assert!(PollutionReading::from_raw(&json!("nope")).is_err());
    }

    #[test]
    fn test_missing_components_are_null() {
        let reading = PollutionReading::from_raw(&json!({"list": [{"main": {"aqi": 1}}]})).unwrap();
        assert_eq!(reading.pm10, None);
        assert!(reading.concentrations().is_empty());
    }
}
