//! Shared domain types for environmental layers

use crate::{LayerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Kilometres per degree of latitude
const KM_PER_DEGREE: f64 = 111.32;

/// A class of external geospatial dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Weather,
    Pollution,
    Crime,
}

impl LayerType {
    pub const ALL: [LayerType; 3] = [LayerType::Weather, LayerType::Pollution, LayerType::Crime];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerType::Weather => "weather",
            LayerType::Pollution => "pollution",
            LayerType::Crime => "crime",
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "weather" => Ok(LayerType::Weather),
            "pollution" | "air_pollution" => Ok(LayerType::Pollution),
            "crime" => Ok(LayerType::Crime),
            other => Err(LayerError::Validation(format!(
                "Unknown layer '{}'. Must be one of: weather, pollution, crime",
                other
            ))),
        }
    }
}

/// Completeness rating of a normalized payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    High,
    Medium,
    Low,
    Unknown,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::High => "high",
            Quality::Medium => "medium",
            Quality::Low => "low",
            Quality::Unknown => "unknown",
        }
    }

    /// Parse a stored label; anything unrecognised is `Unknown`
    pub fn from_label(label: &str) -> Self {
        match label {
            "high" => Quality::High,
            "medium" => Quality::Medium,
            "low" => Quality::Low,
            _ => Quality::Unknown,
        }
    }

    /// Numeric weight used when averaging area statistics
    pub fn score(&self) -> f64 {
        match self {
            Quality::High => 1.0,
            Quality::Medium => 0.7,
            Quality::Low => 0.4,
            Quality::Unknown => 0.0,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Build coordinates, rejecting non-finite or out-of-range values
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(LayerError::Validation(format!(
                "Latitude must be between -90 and 90, got {}",
                lat
            )));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(LayerError::Validation(format!(
                "Longitude must be between -180 and 180, got {}",
                lon
            )));
        }
        Ok(Self { lat, lon })
    }
}

/// Rectangular latitude/longitude range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Bounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self> {
        // Corners go through the same range checks as single points
        Coordinates::new(north, east)?;
        Coordinates::new(south, west)?;
        if south > north {
            return Err(LayerError::Validation(format!(
                "South bound {} is above north bound {}",
                south, north
            )));
        }
        if west > east {
            return Err(LayerError::Validation(format!(
                "West bound {} is east of east bound {}",
                west, east
            )));
        }
        Ok(Self {
            north,
            south,
            east,
            west,
        })
    }

    /// Square window of `half_span` degrees around a point
    pub fn around(point: Coordinates, half_span: f64) -> Self {
        Self {
            north: point.lat + half_span,
            south: point.lat - half_span,
            east: point.lon + half_span,
            west: point.lon - half_span,
        }
    }

    /// Approximate surface area in km², shrinking longitude spans by the cosine of the mid latitude
    pub fn area_km2(&self) -> f64 {
        let lat_km = (self.north - self.south) * KM_PER_DEGREE;
        let lon_km = (self.east - self.west) * KM_PER_DEGREE * self.center().lat.to_radians().cos();
        (lat_km * lon_km).abs()
    }

    pub fn center(&self) -> Coordinates {
        Coordinates {
            lat: (self.north + self.south) / 2.0,
            lon: (self.east + self.west) / 2.0,
        }
    }
}

/// A named point used by bulk requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedLocation {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl NamedLocation {
    pub fn new(name: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            name: name.into(),
            lat,
            lon,
        }
    }

    /// Parse `name:lat:lon` entries separated by `;`
    pub fn parse_list(input: &str) -> Result<Vec<Self>> {
        input
            .split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let parts: Vec<&str> = entry.rsplitn(3, ':').collect();
                // rsplitn yields [lon, lat, name]
                if parts.len() != 3 || parts[2].trim().is_empty() {
                    return Err(LayerError::Validation(format!(
                        "Invalid location '{}', expected name:lat:lon",
                        entry
                    )));
                }
                let lat = parse_coordinate(parts[1], "lat")?;
                let lon = parse_coordinate(parts[0], "lon")?;
                Ok(Self::new(parts[2].trim(), lat, lon))
            })
            .collect()
    }

    /// Reject a batch in which two locations share a name
    pub fn ensure_unique(locations: &[Self]) -> Result<()> {
        let mut seen = HashSet::new();
        for location in locations {
            if !seen.insert(location.name.as_str()) {
                return Err(LayerError::Validation(format!(
                    "Duplicate location name '{}'",
                    location.name
                )));
            }
        }
        Ok(())
    }
}

fn parse_coordinate(raw: &str, field: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| LayerError::Validation(format!("Invalid {} value '{}'", field, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_type_parse() {
        assert_eq!("Weather".parse::<LayerType>().unwrap(), LayerType::Weather);
        assert_eq!("air_pollution".parse::<LayerType>().unwrap(), LayerType::Pollution);
        assert!("traffic".parse::<LayerType>().is_err());
    }

    #[test]
    fn test_quality_labels() {
        assert_eq!(Quality::from_label("medium"), Quality::Medium);
        assert_eq!(Quality::from_label("garbage"), Quality::Unknown);
        assert_eq!(
            serde_json::to_string(&Quality::High).unwrap(),
            "\"high\""
        );
    }

    #[test]
    fn test_coordinates_validation() {
        assert!(Coordinates::new(44.42, 26.10).is_ok());
        assert!(Coordinates::new(91.0, 0.0).is_err());
        assert!(Coordinates::new(0.0, -181.0).is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_bounds_validation_and_area() {
        let equator = Bounds::new(0.5, -0.5, 0.5, -0.5).unwrap();
        assert!((equator.area_km2() - 111.32 * 111.32).abs() < 1.0);

        let north = Bounds::new(60.5, 59.5, 0.5, -0.5).unwrap();
        assert!((north.area_km2() - equator.area_km2() / 2.0).abs() < 1.0);

        assert!(Bounds::new(44.0, 45.0, 27.0, 26.0).is_err());
        assert!(Bounds::new(45.0, 44.0, 26.0, 27.0).is_err());
    }

    #[test]
    fn test_parse_location_list() {
        let locations = NamedLocation::parse_list("Bucharest:44.42:26.10; London:51.5:-0.12").unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].name, "Bucharest");
        assert_eq!(locations[1].lon, -0.12);

        assert!(NamedLocation::parse_list("nowhere:abc:1").is_err());
        assert!(NamedLocation::parse_list("44.0:26.0").is_err());
    }

    #[test]
    fn test_duplicate_location_names() {
        let unique = NamedLocation::parse_list("a:1:1;b:1:1").unwrap();
        assert!(NamedLocation::ensure_unique(&unique).is_ok());

        let repeated = NamedLocation::parse_list("a:1:1;b:2:2;a:3:3").unwrap();
        let err = NamedLocation::ensure_unique(&repeated).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert!(err.to_string().contains("'a'"));
    }
}
