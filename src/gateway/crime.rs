//! Crime gateway behaviour (street-level crime listings)

use super::provider::LayerProvider;
use super::query::LayerQuery;
use super::transport::UpstreamRequest;
use crate::layer::{Bounds, LayerType};
use crate::normalizer::crime::{crime_rate, safety_level};
use crate::normalizer::{LayerData, NormalizedLayer};
use serde_json::{json, Value};

/// Crimes per km² per month assumed by the synthetic area estimate
const MOCK_CRIMES_PER_KM2: f64 = 8.5;

/// Points subtracted from a perfect safety score per reported crime
const SAFETY_PENALTY_PER_CRIME: i64 = 2;

/// `max(0, 100 - total * 2)`
pub fn safety_score(total_crimes: u64) -> i64 {
    let total = i64::try_from(total_crimes).unwrap_or(i64::MAX);
    100_i64
        .saturating_sub(total.saturating_mul(SAFETY_PENALTY_PER_CRIME))
        .max(0)
}

pub fn risk_level(safety_score: i64) -> &'static str {
    match safety_score {
        s if s >= 80 => "low",
        s if s >= 60 => "moderate",
        s if s >= 40 => "high",
        _ => "very_high",
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CrimeProvider;

impl LayerProvider for CrimeProvider {
    fn layer_type(&self) -> LayerType {
        LayerType::Crime
    }

    fn current_request(&self, query: &LayerQuery) -> UpstreamRequest {
        let request = UpstreamRequest::new("/crimes-street/all-crime")
            .param("lat", query.point.lat)
            .param("lng", query.point.lon);
        match query.date {
            Some(ref date) => request.param("date", date),
            None => request,
        }
    }

    fn analyze(&self, normalized: &NormalizedLayer) -> Option<Value> {
        let Some(LayerData::Crime(summary)) = &normalized.data else {
            return None;
        };
        let score = safety_score(summary.total_crimes);
        Some(json!({
            "safety_score": score,
            "risk_level": risk_level(score),
        }))
    }

    /// Deterministic estimate scaled by the area of the bounds
    fn mock_area_stats(&self, bounds: &Bounds) -> Option<Value> {
        let area_km2 = bounds.area_km2();
        let estimated = (area_km2 * MOCK_CRIMES_PER_KM2).round() as u64;
        let score = safety_score(estimated);

        Some(json!({
            "estimated_area_km2": (area_km2 * 100.0).round() / 100.0,
            "estimated_total_crimes": estimated,
            "crime_rate": crime_rate(estimated),
            "safety_level": safety_level(estimated),
            "safety_score": score,
            "risk_level": risk_level(score),
            "note": "Synthetic estimate: no stored crime data for this area",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::standardize;

    #[test]
    fn test_safety_score_and_risk() {
        assert_eq!(safety_score(0), 100);
        assert_eq!(safety_score(10), 80);
        assert_eq!(safety_score(60), 0);
        assert_eq!(risk_level(80), "low");
        assert_eq!(risk_level(79), "moderate");
        assert_eq!(risk_level(40), "high");
        assert_eq!(risk_level(0), "very_high");
    }

    #[test]
    fn test_request_includes_optional_date() {
        let query = LayerQuery::new(51.5, -0.12).unwrap();
        let request = CrimeProvider.current_request(&query);
        assert_eq!(request.path, "/crimes-street/all-crime");
        assert!(request.query.iter().any(|(k, v)| k == "lng" && v == "-0.12"));
        assert!(!request.query.iter().any(|(k, _)| k == "date"));

        let dated = CrimeProvider.current_request(&query.with_date("2024-02").unwrap());
        assert!(dated.query.iter().any(|(k, v)| k == "date" && v == "2024-02"));
    }

    #[test]
    fn test_no_forecast() {
        let query = LayerQuery::new(51.5, -0.12).unwrap();
        let err = CrimeProvider.forecast_request(&query).unwrap_err();
        assert_eq!(err.kind(), "UnsupportedOperation");
    }

    #[test]
    fn test_analysis() {
        let crimes: Vec<Value> = (0..15).map(|_| json!({"category": "burglary"})).collect();
        let normalized = standardize(&Value::Array(crimes), "police_uk", LayerType::Crime);
        let analysis = CrimeProvider.analyze(&normalized).unwrap();
        assert_eq!(analysis["safety_score"], 70);
        assert_eq!(analysis["risk_level"], "moderate");
    }

    #[test]
    fn test_mock_stats_are_deterministic() {
        let bounds = Bounds::new(51.52, 51.50, -0.10, -0.14).unwrap();
        let first = CrimeProvider.mock_area_stats(&bounds).unwrap();
        let second = CrimeProvider.mock_area_stats(&bounds).unwrap();
        assert_eq!(first, second);
        assert!(first["estimated_total_crimes"].as_u64().unwrap() > 0);

        let bigger = Bounds::new(51.60, 51.40, 0.0, -0.3).unwrap();
        let larger = CrimeProvider.mock_area_stats(&bigger).unwrap();
        assert!(
            larger["estimated_total_crimes"].as_u64().unwrap()
                > first["estimated_total_crimes"].as_u64().unwrap()
        );
    }
}
