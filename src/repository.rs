//! Layer Repository
//!
//! Persists normalized layer payloads keyed by (layer type, source, latitude, longitude,
//! radius) and answers bounding-box and aggregate queries. Only the latest value per key
//! is kept: every store is an upsert.

use crate::clock::{self, Clock};
use crate::layer::{Bounds, Coordinates, LayerType, Quality};
use crate::normalizer::payload_quality;
use crate::{db, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Half-width in degrees of the proximity window used by [`LayerRepository::get`] (~1 km)
pub const SEARCH_WINDOW_DEGREES: f64 = 0.01;

/// Maximum records returned by a point query
pub const MAX_RESULTS: usize = 10;

/// Timeframe used when the requested one cannot be parsed
pub const DEFAULT_TIMEFRAME_HOURS: u32 = 24;

/// Parse a timeframe such as `"24h"`, `"7d"`, `"2w"` or `"1m"` into hours.
///
/// A bare number is taken as hours; anything unparseable falls back to 24h.
pub fn parse_timeframe_hours(timeframe: &str) -> u32 {
    let trimmed = timeframe.trim().to_lowercase();
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('h') => (&trimmed[..trimmed.len() - 1], 1),
        Some('d') => (&trimmed[..trimmed.len() - 1], 24),
        Some('w') => (&trimmed[..trimmed.len() - 1], 24 * 7),
        Some('m') => (&trimmed[..trimmed.len() - 1], 24 * 30),
        Some(c) if c.is_ascii_digit() => (trimmed.as_str(), 1),
        _ => return DEFAULT_TIMEFRAME_HOURS,
    };

    match digits.parse::<u32>() {
        Ok(n) if n > 0 => n.saturating_mul(multiplier),
        _ => DEFAULT_TIMEFRAME_HOURS,
    }
}

/// One stored, normalized layer reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerRecord {
    pub id: i64,
    pub layer_type: LayerType,
    pub source: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
    pub payload: Value,
    pub quality: Quality,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Aggregate over the records inside a bounding box
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaStats {
    pub layer_type: LayerType,
    pub bounds: Bounds,
    pub timeframe_hours: u32,
    pub data_points: u64,
    /// Mean per-record quality weight, `None` without data points
    pub quality_score: Option<f64>,
    pub oldest_data: Option<DateTime<Utc>>,
    pub newest_data: Option<DateTime<Utc>>,
}

type RawRow = (i64, String, String, f64, f64, f64, String, String, i64, i64, i64);

/// SQLite-backed store of normalized layer records
pub struct LayerRepository {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl LayerRepository {
    /// Open or create the repository in a database file
    pub fn open(path: &Path, wal_mode: bool, clock: Arc<dyn Clock>) -> Result<Self> {
        tracing::info!(path = %path.display(), "Opening layer repository");
        Self::with_connection(db::open(path, wal_mode)?, clock)
    }

    /// Create a repository backed by an in-memory database
    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, clock)
    }

    pub fn with_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        let repo = Self {
            conn: Mutex::new(conn),
            clock,
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> Result<()> {
        db::lock(&self.conn)?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS layer_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                layer_type TEXT NOT NULL,
                source TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                radius REAL NOT NULL,
                payload TEXT NOT NULL,
                quality TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                UNIQUE (layer_type, source, latitude, longitude, radius)
            );

            CREATE INDEX IF NOT EXISTS idx_layer_position ON layer_records(layer_type, latitude, longitude);
            CREATE INDEX IF NOT EXISTS idx_layer_updated ON layer_records(updated_at);
            CREATE INDEX IF NOT EXISTS idx_layer_expires ON layer_records(expires_at);
            "#,
        )?;
        Ok(())
    }

    /// Upsert a record, recomputing its quality from the payload
    pub fn store(
        &self,
        layer_type: LayerType,
        source: &str,
        point: Coordinates,
        payload: &Value,
        radius: f64,
        expires_at: DateTime<Utc>,
    ) -> Result<Quality> {
        let now = self.clock.now_millis();
        let quality = payload_quality(payload);
        let body = serde_json::to_string(payload)?;

        db::lock(&self.conn)?.execute(
            r#"
            INSERT INTO layer_records
                (layer_type, source, latitude, longitude, radius, payload, quality,
                 created_at, updated_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)
            ON CONFLICT (layer_type, source, latitude, longitude, radius) DO UPDATE SET
                payload = excluded.payload,
                quality = excluded.quality,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at
            "#,
            params![
                layer_type.as_str(),
                source,
                point.lat,
                point.lon,
                radius,
                body,
                quality.as_str(),
                now,
                expires_at.timestamp_millis()
            ],
        )?;

        tracing::debug!(layer = %layer_type, source, lat = point.lat, lon = point.lon, %quality, "Stored layer record");
        Ok(quality)
    }

    /// Live records near a point, newest first
    ///
    /// Uses a fixed ±[`SEARCH_WINDOW_DEGREES`] box; `radius` narrows to an exact radius match.
    pub fn get(
        &self,
        layer_type: LayerType,
        point: Coordinates,
        radius: Option<f64>,
    ) -> Result<Vec<LayerRecord>> {
        let window = Bounds::around(point, SEARCH_WINDOW_DEGREES);
        let now = self.clock.now_millis();

        let conn = db::lock(&self.conn)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, layer_type, source, latitude, longitude, radius, payload, quality,
                   created_at, updated_at, expires_at
            FROM layer_records
            WHERE layer_type = ?1
              AND latitude BETWEEN ?2 AND ?3
              AND longitude BETWEEN ?4 AND ?5
              AND expires_at >= ?6
              AND (?7 IS NULL OR radius = ?7)
            ORDER BY updated_at DESC, id DESC
            LIMIT ?8
            "#,
        )?;

        let rows = stmt
            .query_map(
                params![
                    layer_type.as_str(),
                    window.south,
                    window.north,
                    window.west,
                    window.east,
                    now,
                    radius,
                    MAX_RESULTS as i64
                ],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                        row.get(10)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<RawRow>>>()?;

        Ok(rows.into_iter().filter_map(decode_record).collect())
    }

    /// Aggregate records inside `bounds` updated within `timeframe`
    pub fn get_area_stats(
        &self,
        layer_type: LayerType,
        bounds: &Bounds,
        timeframe: &str,
    ) -> Result<AreaStats> {
        let hours = parse_timeframe_hours(timeframe);
        let since = self.clock.now_millis() - i64::from(hours) * 60 * 60 * 1000;

        let conn = db::lock(&self.conn)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT quality, updated_at
            FROM layer_records
            WHERE layer_type = ?1
              AND latitude BETWEEN ?2 AND ?3
              AND longitude BETWEEN ?4 AND ?5
              AND updated_at >= ?6
            "#,
        )?;

        let rows = stmt
            .query_map(
                params![
                    layer_type.as_str(),
                    bounds.south,
                    bounds.north,
                    bounds.west,
                    bounds.east,
                    since
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let data_points = rows.len() as u64;
        let quality_score = if rows.is_empty() {
            None
        } else {
            let total: f64 = rows
                .iter()
                .map(|(label, _)| Quality::from_label(label).score())
                .sum();
            Some((total / rows.len() as f64 * 100.0).round() / 100.0)
        };
        let oldest = rows.iter().map(|(_, ts)| *ts).min();
        let newest = rows.iter().map(|(_, ts)| *ts).max();

        Ok(AreaStats {
            layer_type,
            bounds: *bounds,
            timeframe_hours: hours,
            data_points,
            quality_score,
            oldest_data: oldest.and_then(clock::from_millis),
            newest_data: newest.and_then(clock::from_millis),
        })
    }

    /// Delete records past their expiry, returning how many were removed
    pub fn cleanup(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let removed = db::lock(&self.conn)?.execute(
            "DELETE FROM layer_records WHERE expires_at < ?1",
            params![now],
        )?;
        if removed > 0 {
            tracing::info!(removed, "Removed expired layer records");
        }
        Ok(removed)
    }

    /// Number of stored records, live or expired
    pub fn count(&self) -> Result<u64> {
        let count: i64 = db::lock(&self.conn)?.query_row(
            "SELECT COUNT(*) FROM layer_records",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn decode_record(row: RawRow) -> Option<LayerRecord> {
    let (id, layer, source, latitude, longitude, radius, payload, quality, created, updated, expires) =
        row;

    let layer_type = match layer.parse::<LayerType>() {
        Ok(layer_type) => layer_type,
        Err(e) => {
            tracing::warn!(id, error = %e, "Skipping record with unknown layer type");
            return None;
        }
    };
    let payload: Value = match serde_json::from_str(&payload) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(id, error = %e, "Skipping record with unreadable payload");
            return None;
        }
    };

    Some(LayerRecord {
        id,
        layer_type,
        source,
        latitude,
        longitude,
        radius,
        quality: Quality::from_label(&quality),
        payload,
        created_at: clock::from_millis(created)?,
        updated_at: clock::from_millis(updated)?,
        expires_at: clock::from_millis(expires)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn repo() -> (LayerRepository, MockClock) {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let repo = LayerRepository::in_memory(Arc::new(clock.clone())).unwrap();
        (repo, clock)
    }

    fn point(lat: f64, lon: f64) -> Coordinates {
        Coordinates::new(lat, lon).unwrap()
    }

    fn in_hours(clock: &MockClock, hours: i64) -> DateTime<Utc> {
        clock.now() + Duration::hours(hours)
    }

    #[test]
    fn test_parse_timeframe() {
        assert_eq!(parse_timeframe_hours("24h"), 24);
        assert_eq!(parse_timeframe_hours("7d"), 168);
        assert_eq!(parse_timeframe_hours("2w"), 336);
        assert_eq!(parse_timeframe_hours("1m"), 720);
        assert_eq!(parse_timeframe_hours("6"), 6);
        assert_eq!(parse_timeframe_hours("soon"), 24);
        assert_eq!(parse_timeframe_hours("0h"), 24);
        assert_eq!(parse_timeframe_hours(""), 24);
    }

    #[test]
    fn test_store_is_upsert() {
        let (repo, clock) = repo();
        let here = point(44.42, 26.10);

        repo.store(LayerType::Weather, "owm", here, &json!({"data": {"t": 1}}), 1.0, in_hours(&clock, 1))
            .unwrap();
        clock.advance_secs(60);
        repo.store(LayerType::Weather, "owm", here, &json!({"data": {"t": 2}}), 1.0, in_hours(&clock, 1))
            .unwrap();

        assert_eq!(repo.count().unwrap(), 1);
        let records = repo.get(LayerType::Weather, here, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload["data"]["t"], 2);
        assert!(records[0].updated_at > records[0].created_at);

        // A different radius is a different key
        repo.store(LayerType::Weather, "owm", here, &json!({"data": {"t": 3}}), 2.0, in_hours(&clock, 1))
            .unwrap();
        assert_eq!(repo.count().unwrap(), 2);
        assert_eq!(repo.get(LayerType::Weather, here, Some(2.0)).unwrap().len(), 1);
    }

    #[test]
    fn test_quality_recomputed_from_data() {
        let (repo, clock) = repo();
        let quality = repo
            .store(
                LayerType::Pollution,
                "owm",
                point(10.0, 10.0),
                &json!({"type": "pollution", "data": {"a": 1, "b": null}}),
                1.0,
                in_hours(&clock, 1),
            )
            .unwrap();
        assert_eq!(quality, Quality::Low);

        let records = repo.get(LayerType::Pollution, point(10.0, 10.0), None).unwrap();
        assert_eq!(records[0].quality, Quality::Low);
    }

    #[test]
    fn test_get_uses_window_and_excludes_expired() {
        let (repo, clock) = repo();
        let center = point(50.0, 8.0);

        repo.store(LayerType::Crime, "police", point(50.005, 8.005), &json!({"data": {"n": 1}}), 1.0, in_hours(&clock, 2))
            .unwrap();
        repo.store(LayerType::Crime, "police", point(50.05, 8.0), &json!({"data": {"n": 2}}), 1.0, in_hours(&clock, 2))
            .unwrap();
        repo.store(LayerType::Crime, "police", point(50.0, 8.0), &json!({"data": {"n": 3}}), 1.0, in_hours(&clock, 0) + Duration::seconds(30))
            .unwrap();
        repo.store(LayerType::Weather, "owm", center, &json!({"data": {"n": 4}}), 1.0, in_hours(&clock, 2))
            .unwrap();

        assert_eq!(repo.get(LayerType::Crime, center, None).unwrap().len(), 2);

        clock.advance_secs(31);
        let records = repo.get(LayerType::Crime, center, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload["data"]["n"], 1);
    }

    #[test]
    fn test_get_limits_and_orders_by_recency() {
        let (repo, clock) = repo();
        for i in 0..12 {
            let offset = i as f64 * 0.0005;
            repo.store(LayerType::Weather, "owm", point(1.0 + offset, 1.0), &json!({"data": {"i": i}}), 1.0, in_hours(&clock, 5))
                .unwrap();
            clock.advance_secs(1);
        }

        let records = repo.get(LayerType::Weather, point(1.0, 1.0), None).unwrap();
        assert_eq!(records.len(), MAX_RESULTS);
        assert_eq!(records[0].payload["data"]["i"], 11);
        assert!(records.windows(2).all(|w| w[0].updated_at >= w[1].updated_at));
    }

    #[test]
    fn test_area_stats_counts_records_in_bounds() {
        let (repo, clock) = repo();
        let bounds = Bounds::new(45.0, 44.0, 27.0, 26.0).unwrap();

        for i in 0..4 {
            repo.store(
                LayerType::Weather,
                "owm",
                point(44.1 + i as f64 * 0.2, 26.5),
                &json!({"data": {"t": i}}),
                1.0,
                in_hours(&clock, 1),
            )
            .unwrap();
        }
        repo.store(LayerType::Weather, "owm", point(40.0, 20.0), &json!({"data": {"t": 9}}), 1.0, in_hours(&clock, 1))
            .unwrap();

        let stats = repo.get_area_stats(LayerType::Weather, &bounds, "24h").unwrap();
        assert_eq!(stats.data_points, 4);
        assert_eq!(stats.quality_score, Some(1.0));
        assert_eq!(stats.timeframe_hours, 24);
        assert_eq!(stats.oldest_data, Some(clock.now()));
    }

    #[test]
    fn test_area_stats_respects_timeframe() {
        let (repo, clock) = repo();
        let bounds = Bounds::new(1.0, -1.0, 1.0, -1.0).unwrap();
        repo.store(LayerType::Crime, "police", point(0.0, 0.0), &json!({"data": {"a": 1}}), 1.0, in_hours(&clock, 100))
            .unwrap();
        repo.store(LayerType::Crime, "police", point(0.5, 0.5), &json!({"data": {"a": null, "b": 1}}), 1.0, in_hours(&clock, 100))
            .unwrap();

        let stats = repo.get_area_stats(LayerType::Crime, &bounds, "1h").unwrap();
        assert_eq!(stats.data_points, 2);
        // (1.0 + 0.4) / 2
        assert_eq!(stats.quality_score, Some(0.7));

        clock.advance_secs(2 * 60 * 60);
        let stats = repo.get_area_stats(LayerType::Crime, &bounds, "1h").unwrap();
        assert_eq!(stats.data_points, 0);
        assert_eq!(stats.quality_score, None);
        assert_eq!(stats.newest_data, None);

        assert_eq!(repo.get_area_stats(LayerType::Crime, &bounds, "7d").unwrap().data_points, 2);
    }

    #[test]
    fn test_cleanup_removes_expired_only() {
        let (repo, clock) = repo();
        repo.store(LayerType::Weather, "owm", point(0.0, 0.0), &json!({"data": {}}), 1.0, in_hours(&clock, 1))
            .unwrap();
        repo.store(LayerType::Weather, "owm", point(1.0, 1.0), &json!({"data": {}}), 1.0, in_hours(&clock, 3))
            .unwrap();

        clock.advance_secs(2 * 60 * 60);
        assert_eq!(repo.cleanup().unwrap(), 1);
        assert_eq!(repo.cleanup().unwrap(), 0);
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layers.db");
        let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

        {
            let repo = LayerRepository::open(&path, true, Arc::new(clock.clone())).unwrap();
            repo.store(LayerType::Weather, "owm", point(2.0, 2.0), &json!({"data": {"x": 1}}), 1.0, in_hours(&clock, 1))
                .unwrap();
        }

        let repo = LayerRepository::open(&path, true, Arc::new(clock)).unwrap();
        assert_eq!(repo.get(LayerType::Weather, point(2.0, 2.0), None).unwrap().len(), 1);
    }
}
