//! Request parameters for gateway calls

use crate::layer::{Bounds, Coordinates, LayerType, NamedLocation};
use crate::normalizer::{NormalizeOptions, Units};
use crate::{LayerError, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Days a weather forecast may span
pub const MAX_FORECAST_DAYS: u32 = 5;

/// Hours a pollution forecast may span
pub const MAX_FORECAST_HOURS: u32 = 96;

/// Radius (km) used when a request does not name one
pub const DEFAULT_RADIUS_KM: f64 = 1.0;

/// Validated parameters for a single-point gateway call
#[derive(Debug, Clone, PartialEq)]
pub struct LayerQuery {
    pub point: Coordinates,
    pub radius: f64,
    pub units: Units,
    pub days: u32,
    pub hours: u32,
    /// Crime month in `YYYY-MM` form
    pub date: Option<String>,
}

impl LayerQuery {
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        Ok(Self {
            point: Coordinates::new(lat, lon)?,
            radius: DEFAULT_RADIUS_KM,
            units: Units::default(),
            days: MAX_FORECAST_DAYS,
            hours: 24,
            date: None,
        })
    }

    pub fn with_radius(mut self, radius: f64) -> Result<Self> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(LayerError::Validation(format!(
                "Radius must be a positive number of kilometres, got {}",
                radius
            )));
        }
        self.radius = radius;
        Ok(self)
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.units = units;
        self
    }

    pub fn with_days(mut self, days: u32) -> Result<Self> {
        if !(1..=MAX_FORECAST_DAYS).contains(&days) {
            return Err(LayerError::Validation(format!(
                "Days must be between 1 and {}, got {}",
                MAX_FORECAST_DAYS, days
            )));
        }
        self.days = days;
        Ok(self)
    }

    pub fn with_hours(mut self, hours: u32) -> Result<Self> {
        if !(1..=MAX_FORECAST_HOURS).contains(&hours) {
            return Err(LayerError::Validation(format!(
                "Hours must be between 1 and {}, got {}",
                MAX_FORECAST_HOURS, hours
            )));
        }
        self.hours = hours;
        Ok(self)
    }

    /// Restrict crime lookups to a month given as `YYYY-MM`
    pub fn with_date(mut self, date: &str) -> Result<Self> {
        let date = date.trim();
        let valid = date.len() == 7
            && NaiveDate::parse_from_str(&format!("{}-01", date), "%Y-%m-%d").is_ok();
        if !valid {
            return Err(LayerError::Validation(format!(
                "Date must be in YYYY-MM form, got '{}'",
                date
            )));
        }
        self.date = Some(date.to_string());
        Ok(self)
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            units: self.units,
            days: self.days as usize,
            hours: self.hours as usize,
        }
    }
}

/// Operation requested on the inbound query surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    GetCurrent,
    GetForecast,
    GetBulk,
    GetAreaStats,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::GetCurrent => "get_current",
            Action::GetForecast => "get_forecast",
            Action::GetBulk => "get_bulk",
            Action::GetAreaStats => "get_area_stats",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "get_current" => Ok(Action::GetCurrent),
            "get_forecast" => Ok(Action::GetForecast),
            "get_bulk" => Ok(Action::GetBulk),
            "get_area_stats" => Ok(Action::GetAreaStats),
            other => Err(LayerError::Validation(format!(
                "Unknown action '{}'. Must be one of: get_current, get_forecast, get_bulk, get_area_stats",
                other
            ))),
        }
    }
}

/// Raw inbound parameters, as they arrive in a query string
///
/// Values stay strings so that malformed numbers surface as validation envelopes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayerParams {
    pub action: Option<String>,
    pub layer: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub units: Option<String>,
    pub days: Option<String>,
    pub hours: Option<String>,
    pub date: Option<String>,
    pub radius: Option<String>,
    pub north: Option<String>,
    pub south: Option<String>,
    pub east: Option<String>,
    pub west: Option<String>,
    pub timeframe: Option<String>,
    pub locations: Option<String>,
}

fn present(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_number<T: FromStr>(field: &str, raw: &Option<String>) -> Result<Option<T>> {
    match present(raw) {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| LayerError::Validation(format!("Invalid {} value '{}'", field, value))),
    }
}

fn required<T>(field: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| LayerError::Validation(format!("Missing required parameter '{}'", field)))
}

impl LayerParams {
    pub fn action(&self) -> Result<Action> {
        required("action", present(&self.action))?.parse()
    }

    pub fn layer(&self) -> Result<LayerType> {
        required("layer", present(&self.layer))?.parse()
    }

    /// Build a point query; `default_radius` applies when none is given
    pub fn query(&self, default_radius: f64) -> Result<LayerQuery> {
        let lat = required("lat", parse_number::<f64>("lat", &self.lat)?)?;
        let lon = required("lon", parse_number::<f64>("lon", &self.lon)?)?;
        let mut query = LayerQuery::new(lat, lon)?
            .with_radius(parse_number("radius", &self.radius)?.unwrap_or(default_radius))?;

        if let Some(units) = present(&self.units) {
            query = query.with_units(units.parse()?);
        }
        if let Some(days) = parse_number("days", &self.days)? {
            query = query.with_days(days)?;
        }
        if let Some(hours) = parse_number("hours", &self.hours)? {
            query = query.with_hours(hours)?;
        }
        if let Some(date) = present(&self.date) {
            query = query.with_date(date)?;
        }
        Ok(query)
    }

    pub fn bounds(&self) -> Result<Bounds> {
        Bounds::new(
            required("north", parse_number("north", &self.north)?)?,
            required("south", parse_number("south", &self.south)?)?,
            required("east", parse_number("east", &self.east)?)?,
            required("west", parse_number("west", &self.west)?)?,
        )
    }

    pub fn timeframe(&self) -> &str {
        present(&self.timeframe).unwrap_or("24h")
    }

    pub fn locations(&self) -> Result<Vec<NamedLocation>> {
        let locations = NamedLocation::parse_list(required("locations", present(&self.locations))?)?;
        if locations.is_empty() {
            return Err(LayerError::Validation(
                "At least one location is required".to_string(),
            ));
        }
        Ok(locations)
    }
}
