//! Forecast aggregation
//!
//! Upstream forecasts arrive as `list[]` entries stamped with `dt` (Unix seconds).
//! Weather entries are folded into per-day summaries, pollution entries into per-hour ones.

use super::field_f64;
use super::pollution::{aqi_label, PollutionReading};
use super::weather::{provider_error, Units};
use chrono::{DateTime, NaiveDate, SecondsFormat, Timelike, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyWeather {
    pub date: String,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub temp_avg: Option<f64>,
    pub humidity_avg: Option<f64>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub precipitation_probability: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherForecast {
    pub temperature_unit: String,
    pub days: Vec<DailyWeather>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyAqi {
    pub value: Option<i64>,
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyPollution {
    pub time: String,
    pub aqi: HourlyAqi,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollutionForecast {
    pub hours: Vec<HourlyPollution>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(round2(values.iter().sum::<f64>() / values.len() as f64))
    }
}

fn entries(raw: &Value) -> Result<&Vec<Value>, String> {
    if let Some(message) = provider_error(raw) {
        return Err(message);
    }
    raw.get("list")
        .and_then(Value::as_array)
        .ok_or_else(|| "forecast payload has no 'list' array".to_string())
}

fn timestamp(entry: &Value) -> Option<DateTime<Utc>> {
    entry
        .get("dt")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Most frequent value, earliest occurrence wins ties
fn most_frequent(values: &[String]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value.as_str()).or_insert(0) += 1;
    }
    let best = counts.values().copied().max()?;
    values
        .iter()
        .find(|v| counts.get(v.as_str()) == Some(&best))
        .cloned()
}

/// Fold 3-hour weather buckets into at most `days` calendar-day summaries
pub fn daily_weather(raw: &Value, units: Units, days: usize) -> Result<WeatherForecast, String> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&Value>> = BTreeMap::new();
    for entry in entries(raw)? {
        if let Some(ts) = timestamp(entry) {
            by_day.entry(ts.date_naive()).or_default().push(entry);
        }
    }

    let summaries = by_day
        .into_iter()
        .take(days)
        .map(|(date, bucket)| {
            let main = |e: &&Value| e.get("main").cloned().unwrap_or(Value::Null);
            let temps: Vec<f64> = bucket.iter().filter_map(|e| field_f64(&main(e), "temp")).collect();
            let lows: Vec<f64> = bucket
                .iter()
                .filter_map(|e| field_f64(&main(e), "temp_min").or_else(|| field_f64(&main(e), "temp")))
                .collect();
            let highs: Vec<f64> = bucket
                .iter()
                .filter_map(|e| field_f64(&main(e), "temp_max").or_else(|| field_f64(&main(e), "temp")))
                .collect();
            let humidity: Vec<f64> = bucket
                .iter()
                .filter_map(|e| field_f64(&main(e), "humidity"))
                .collect();
            let conditions: Vec<(String, Option<String>)> = bucket
                .iter()
                .filter_map(|e| e.get("weather").and_then(|w| w.get(0)))
                .filter_map(|c| {
                    let description = c.get("description")?.as_str()?.to_string();
                    let icon = c.get("icon").and_then(Value::as_str).map(str::to_string);
                    Some((description, icon))
                })
                .collect();
            let descriptions: Vec<String> = conditions.iter().map(|(d, _)| d.clone()).collect();
            let description = most_frequent(&descriptions);
            let icon = description.as_ref().and_then(|d| {
                conditions
                    .iter()
                    .find(|(desc, _)| desc == d)
                    .and_then(|(_, icon)| icon.clone())
            });
            let precipitation_probability = bucket
                .iter()
                .filter_map(|e| field_f64(e, "pop"))
                .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))));

            DailyWeather {
                date: date.format("%Y-%m-%d").to_string(),
                temp_min: lows.iter().copied().reduce(f64::min),
                temp_max: highs.iter().copied().reduce(f64::max),
                temp_avg: mean(&temps),
                humidity_avg: mean(&humidity),
                description,
                icon,
                precipitation_probability,
            }
        })
        .collect();

    Ok(WeatherForecast {
        temperature_unit: units.temperature_unit().to_string(),
        days: summaries,
    })
}

/// Fold pollution entries into at most `hours` hourly summaries
pub fn hourly_pollution(raw: &Value, hours: usize) -> Result<PollutionForecast, String> {
    let mut by_hour: BTreeMap<DateTime<Utc>, Vec<PollutionReading>> = BTreeMap::new();
    for entry in entries(raw)? {
        let Some(ts) = timestamp(entry) else { continue };
        let Some(hour) = ts
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
        else {
            continue;
        };
        by_hour
            .entry(hour)
            .or_default()
            .push(PollutionReading::from_entry(entry));
    }

    let summaries = by_hour
        .into_iter()
        .take(hours)
        .map(|(hour, readings)| {
            let aqi = readings.iter().filter_map(|r| r.aqi.value).max();
            let pm2_5: Vec<f64> = readings.iter().filter_map(|r| r.pm2_5).collect();
            let pm10: Vec<f64> = readings.iter().filter_map(|r| r.pm10).collect();
            HourlyPollution {
                time: hour.to_rfc3339_opts(SecondsFormat::Secs, true),
                aqi: HourlyAqi {
                    value: aqi,
                    level: aqi.map(aqi_label).unwrap_or("Unknown").to_string(),
                },
                pm2_5: mean(&pm2_5),
                pm10: mean(&pm10),
            }
        })
        .collect();

    Ok(PollutionForecast { hours: summaries })
}
