//! Crime payload normalization
//!
//! Consumes street-level crime listings: a JSON array of crimes (or an object with a
//! `crimes` array), each carrying a `category`.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Canonical crime summary for a point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrimeSummary {
    pub total_crimes: u64,
    pub categories: BTreeMap<String, u64>,
    pub crime_rate: String,
    pub safety_level: String,
}

impl CrimeSummary {
    pub fn from_raw(raw: &Value) -> Result<Self, String> {
        let crimes = match raw {
            Value::Array(items) => items,
            Value::Object(map) => map
                .get("crimes")
                .and_then(Value::as_array)
                .ok_or_else(|| "crime payload has no 'crimes' array".to_string())?,
            _ => return Err("crime payload is neither a list nor an object".to_string()),
        };

        let mut categories = BTreeMap::new();
        for crime in crimes {
            let category = crime
                .get("category")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .unwrap_or("other");
            *categories.entry(category.to_string()).or_insert(0) += 1;
        }

        Ok(Self::from_counts(crimes.len() as u64, categories))
    }

    pub fn from_counts(total_crimes: u64, categories: BTreeMap<String, u64>) -> Self {
        Self {
            total_crimes,
            categories,
            crime_rate: crime_rate(total_crimes).to_string(),
            safety_level: safety_level(total_crimes).to_string(),
        }
    }
}

/// Coarse rate bucket by count
pub fn crime_rate(total: u64) -> &'static str {
    match total {
        0..=4 => "low",
        5..=14 => "medium",
        _ => "high",
    }
}

/// Five-step safety bucket by count
pub fn safety_level(total: u64) -> &'static str {
    match total {
        0..=4 => "very_safe",
        5..=9 => "safe",
        10..=19 => "moderate",
        20..=34 => "unsafe",
        _ => "very_unsafe",
    }
}
