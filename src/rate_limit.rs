//! Per-provider fixed-window rate limiting
//!
//! Each identifier (provider name) owns a list of call timestamps persisted in SQLite
//! and retained for 24 hours. A call is admitted while the number of timestamps in the
//! current calendar minute is below the identifier's per-minute cap.
//!
//! Reads fail open: an unreadable or corrupted window counts as zero usage, favouring
//! availability over strict enforcement.

use crate::clock::Clock;
use crate::config::ProvidersConfig;
use crate::{db, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Length of a fixed window in milliseconds
const WINDOW_MILLIS: i64 = 60 * 1000;

/// How long call timestamps are retained
const RETENTION_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Cap applied to identifiers without an explicit limit
pub const DEFAULT_LIMIT_PER_MINUTE: u32 = 60;

/// Snapshot of an identifier's budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateUsage {
    pub identifier: String,
    pub limit_per_minute: u32,
    pub calls_this_minute: u32,
    pub calls_last_24h: u32,
    pub remaining: u32,
    pub resets_in_secs: u64,
}

/// Fixed-window call budget tracker
pub struct RateLimiter {
    conn: Mutex<Connection>,
    limits: HashMap<String, u32>,
    default_limit: u32,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Open or create the rate window table in a database file
    pub fn open(path: &Path, wal_mode: bool, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_connection(db::open(path, wal_mode)?, clock)
    }

    /// Create a limiter backed by an in-memory database
    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, clock)
    }

    pub fn with_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        let limiter = Self {
            conn: Mutex::new(conn),
            limits: HashMap::new(),
            default_limit: DEFAULT_LIMIT_PER_MINUTE,
            clock,
        };
        limiter.init_schema()?;
        Ok(limiter)
    }

    fn init_schema(&self) -> Result<()> {
        db::lock(&self.conn)?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rate_windows (
                identifier TEXT PRIMARY KEY,
                timestamps TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Set the per-minute cap for one identifier
    pub fn with_limit(mut self, identifier: impl Into<String>, per_minute: u32) -> Self {
        self.limits.insert(identifier.into(), per_minute);
        self
    }

    /// Register every provider's cap under its layer name
    pub fn with_provider_limits(mut self, providers: &ProvidersConfig) -> Self {
        for (layer, provider) in providers.iter() {
            self.limits
                .insert(layer.as_str().to_string(), provider.rate_limit_per_minute);
        }
        self
    }

    /// Per-minute cap for an identifier
    pub fn limit_for(&self, identifier: &str) -> u32 {
        self.limits
            .get(identifier)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Whether another call is admitted in the current minute. Does not record the call.
    pub fn check_rate_limit(&self, identifier: &str) -> bool {
        let now = self.clock.now_millis();
        let limit = self.limit_for(identifier);
        let used = count_in_bucket(&self.load_window(identifier), now);

        let allowed = used < limit;
        if !allowed {
            tracing::warn!(identifier, used, limit, "Rate limit reached for current minute");
        }
        allowed
    }

    /// Record a successful upstream call and prune timestamps older than 24h
    pub fn record_call(&self, identifier: &str) -> Result<()> {
        let now = self.clock.now_millis();
        let mut window = self.load_window(identifier);
        window.push(now);
        window.retain(|&ts| ts > now - RETENTION_MILLIS);

        let encoded = serde_json::to_string(&window)?;
        db::lock(&self.conn)?.execute(
            r#"
            INSERT OR REPLACE INTO rate_windows (identifier, timestamps, updated_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![identifier, encoded, now],
        )?;

        tracing::trace!(identifier, retained = window.len(), "Recorded upstream call");
        Ok(())
    }

    /// Seconds until the current minute window rolls over
    pub fn seconds_until_reset(&self) -> u64 {
        let now = self.clock.now_millis();
        let into_window = now.rem_euclid(WINDOW_MILLIS);
        ((WINDOW_MILLIS - into_window + 999) / 1000) as u64
    }

    /// Current usage for an identifier
    pub fn usage(&self, identifier: &str) -> RateUsage {
        let now = self.clock.now_millis();
        let window = self.load_window(identifier);
        let limit = self.limit_for(identifier);
        let calls_this_minute = count_in_bucket(&window, now);
        let calls_last_24h = window
            .iter()
            .filter(|&&ts| ts > now - RETENTION_MILLIS)
            .count() as u32;

        RateUsage {
            identifier: identifier.to_string(),
            limit_per_minute: limit,
            calls_this_minute,
            calls_last_24h,
            remaining: limit.saturating_sub(calls_this_minute),
            resets_in_secs: self.seconds_until_reset(),
        }
    }

    /// Load an identifier's timestamps, treating any failure as an empty window
    fn load_window(&self, identifier: &str) -> Vec<i64> {
        let stored = db::lock(&self.conn).and_then(|conn| {
            conn.query_row(
                "SELECT timestamps FROM rate_windows WHERE identifier = ?1",
                params![identifier],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(Into::into)
        });

        match stored {
            Ok(Some(raw)) => serde_json::from_str::<Vec<i64>>(&raw).unwrap_or_else(|e| {
                tracing::warn!(identifier, error = %e, "Corrupted rate window, treating as empty");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(identifier, error = %e, "Rate window unreadable, failing open");
                Vec::new()
            }
        }
    }

    /// Overwrite an identifier's raw stored window (tests only)
    #[cfg(test)]
    fn store_raw(&self, identifier: &str, raw: &str) -> Result<()> {
        db::lock(&self.conn)?.execute(
            "INSERT OR REPLACE INTO rate_windows (identifier, timestamps, updated_at) VALUES (?1, ?2, 0)",
            params![identifier, raw],
        )?;
        Ok(())
    }
}

fn count_in_bucket(window: &[i64], now: i64) -> u32 {
    let bucket = now.div_euclid(WINDOW_MILLIS);
    window
        .iter()
        .filter(|&&ts| ts.div_euclid(WINDOW_MILLIS) == bucket)
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::{TimeZone, Utc};

    fn limiter_at(h: u32, m: u32, s: u32) -> (RateLimiter, MockClock) {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap());
        let limiter = RateLimiter::in_memory(Arc::new(clock.clone()))
            .unwrap()
            .with_limit("weather", 3)
            .with_limit("crime", 1);
        (limiter, clock)
    }

    #[test]
    fn test_cap_rejects_extra_call_then_next_minute_allows() {
        let (limiter, clock) = limiter_at(12, 0, 5);

        for _ in 0..3 {
            assert!(limiter.check_rate_limit("weather"));
            limiter.record_call("weather").unwrap();
        }
        assert!(!limiter.check_rate_limit("weather"));

        clock.advance_secs(60);
        assert!(limiter.check_rate_limit("weather"));
    }

    #[test]
    fn test_window_is_calendar_minute_not_sliding() {
        let (limiter, clock) = limiter_at(12, 0, 58);
        limiter.record_call("crime").unwrap();
        assert!(!limiter.check_rate_limit("crime"));

        // Two seconds later is a new minute even though the call is recent
        clock.advance_secs(2);
        assert!(limiter.check_rate_limit("crime"));
    }

    #[test]
    fn test_check_does_not_record() {
        let (limiter, _clock) = limiter_at(12, 0, 0);
        for _ in 0..10 {
            assert!(limiter.check_rate_limit("crime"));
        }
        assert_eq!(limiter.usage("crime").calls_this_minute, 0);
    }

    #[test]
    fn test_providers_are_independent() {
        let (limiter, _clock) = limiter_at(12, 0, 0);
        limiter.record_call("crime").unwrap();

        assert!(!limiter.check_rate_limit("crime"));
        assert!(limiter.check_rate_limit("weather"));
    }

    #[test]
    fn test_old_timestamps_pruned_on_write() {
        let (limiter, clock) = limiter_at(12, 0, 0);
        limiter.record_call("weather").unwrap();
        limiter.record_call("weather").unwrap();

        clock.advance_secs(24 * 60 * 60 + 1);
        limiter.record_call("weather").unwrap();

        let usage = limiter.usage("weather");
        assert_eq!(usage.calls_last_24h, 1);
        assert_eq!(usage.calls_this_minute, 1);
        assert_eq!(usage.remaining, 2);
    }

    #[test]
    fn test_corrupted_window_fails_open() {
        let (limiter, _clock) = limiter_at(12, 0, 0);
        limiter.store_raw("crime", "not a list").unwrap();

        assert!(limiter.check_rate_limit("crime"));
        limiter.record_call("crime").unwrap();
        assert_eq!(limiter.usage("crime").calls_last_24h, 1);
    }

    #[test]
    fn test_default_and_provider_limits() {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let mut providers = ProvidersConfig::default();
        providers.crime.rate_limit_per_minute = 7;

        let limiter = RateLimiter::in_memory(Arc::new(clock))
            .unwrap()
            .with_provider_limits(&providers);

        assert_eq!(limiter.limit_for("crime"), 7);
        assert_eq!(limiter.limit_for("unknown"), DEFAULT_LIMIT_PER_MINUTE);
    }

    #[test]
    fn test_seconds_until_reset() {
        let (limiter, _clock) = limiter_at(12, 0, 45);
        assert_eq!(limiter.seconds_until_reset(), 15);
        assert_eq!(limiter.usage("weather").resets_in_secs, 15);
    }
}
