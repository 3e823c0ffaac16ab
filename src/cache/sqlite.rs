//! SQLite-backed durable cache implementation

use super::key::{cache_key, canonical_json};
use crate::clock::{self, Clock};
use crate::config::CacheSettings;
use crate::{db, LayerError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A stored cache entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub service: String,
    pub endpoint: String,
    pub params: Value,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub size: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size: u64,
    pub expired_count: usize,
    pub per_service_counts: BTreeMap<String, usize>,
    pub max_size: u64,
}

/// Generic TTL key-value cache persisted in SQLite
///
/// Entries are keyed by a hash of (service, endpoint, params); `set` overwrites.
/// Missing, expired and corrupted entries all read back as `None`.
pub struct DurableCache {
    conn: Mutex<Connection>,
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
}

impl DurableCache {
    /// Open or create a cache in a database file
    pub fn open(
        path: &Path,
        wal_mode: bool,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        tracing::info!(path = %path.display(), "Opening durable cache");
        Self::with_connection(db::open(path, wal_mode)?, settings, clock)
    }

    /// Create a cache in an in-memory database
    pub fn in_memory(settings: CacheSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, settings, clock)
    }

    /// Wrap an existing connection, initialise the schema and maybe sweep expired entries
    pub fn with_connection(
        conn: Connection,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let cache = Self {
            conn: Mutex::new(conn),
            settings,
            clock,
        };
        cache.init_schema()?;

        if rand::random::<f64>() < cache.settings.cleanup_probability {
            let removed = cache.cleanup()?;
            tracing::debug!(removed, "Opportunistic cache cleanup on open");
        }

        Ok(cache)
    }

    fn init_schema(&self) -> Result<()> {
        db::lock(&self.conn)?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                service TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                params TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                size INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at);
            CREATE INDEX IF NOT EXISTS idx_cache_created ON cache_entries(created_at);
            CREATE INDEX IF NOT EXISTS idx_cache_service ON cache_entries(service);
            "#,
        )?;
        Ok(())
    }

    /// Store a payload, replacing any entry under the same key
    ///
    /// `ttl` falls back to the configured default when omitted.
    pub fn set(
        &self,
        service: &str,
        endpoint: &str,
        params: &Value,
        payload: &Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let ttl = ttl.unwrap_or_else(|| self.settings.default_ttl());
        let key = cache_key(service, endpoint, params);
        let now = self.clock.now_millis();
        // A zero TTL still has to satisfy expires_at > created_at
        let expires_at = i64::try_from(ttl.as_millis())
            .ok()
            .and_then(|millis| now.checked_add(millis.max(1)))
            .ok_or_else(|| {
                LayerError::Config(format!("Cache TTL of {}s is out of range", ttl.as_secs()))
            })?;
        let body = serde_json::to_string(payload)?;
        let size = body.len() as i64;

        db::lock(&self.conn)?.execute(
            r#"
            INSERT OR REPLACE INTO cache_entries
                (key, service, endpoint, params, payload, created_at, expires_at, size)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                key,
                service,
                endpoint,
                canonical_json(params),
                body,
                now,
                expires_at,
                size
            ],
        )?;

        tracing::debug!(service, endpoint, key = %key, size, ttl_secs = ttl.as_secs(), "Cache set");
        Ok(())
    }

    /// Fetch a live payload
    pub fn get(&self, service: &str, endpoint: &str, params: &Value) -> Result<Option<Value>> {
        Ok(self
            .get_entry(service, endpoint, params)?
            .map(|entry| entry.payload))
    }

    /// Fetch a live entry with its metadata
    ///
    /// Expired and unreadable rows are deleted on the way out.
    pub fn get_entry(
        &self,
        service: &str,
        endpoint: &str,
        params: &Value,
    ) -> Result<Option<CacheEntry>> {
        let key = cache_key(service, endpoint, params);
        let now = self.clock.now_millis();
        let conn = db::lock(&self.conn)?;

        let row = conn
            .query_row(
                r#"
                SELECT service, endpoint, params, payload, created_at, expires_at, size
                FROM cache_entries WHERE key = ?1
                "#,
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional();

        let (service, endpoint, params_json, payload, created_at, expires_at, size) = match row {
            Ok(Some(row)) => row,
            Ok(None) => {
                tracing::trace!(key = %key, "Cache miss");
                return Ok(None);
            }
            Err(e @ rusqlite::Error::InvalidColumnType(..))
            | Err(e @ rusqlite::Error::FromSqlConversionFailure(..))
            | Err(e @ rusqlite::Error::IntegralValueOutOfRange(..)) => {
                tracing::warn!(key = %key, error = %e, "Dropping corrupted cache entry");
                conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if expires_at < now {
            tracing::debug!(key = %key, service = %service, "Cache entry expired");
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            return Ok(None);
        }

        let decoded = serde_json::from_str::<Value>(&payload)
            .ok()
            .zip(serde_json::from_str::<Value>(&params_json).ok())
            .zip(clock::from_millis(created_at).zip(clock::from_millis(expires_at)));

        match decoded {
            Some(((payload, params), (created_at, expires_at))) => Ok(Some(CacheEntry {
                key,
                service,
                endpoint,
                params,
                payload,
                created_at,
                expires_at,
                size: size.max(0) as u64,
            })),
            None => {
                tracing::warn!(key = %key, "Dropping unparseable cache entry");
                conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                Ok(None)
            }
        }
    }

    /// Whether a live payload exists
    pub fn has(&self, service: &str, endpoint: &str, params: &Value) -> Result<bool> {
        Ok(self.get(service, endpoint, params)?.is_some())
    }

    /// Remove a single entry; returns whether anything was deleted
    pub fn delete(&self, service: &str, endpoint: &str, params: &Value) -> Result<bool> {
        let key = cache_key(service, endpoint, params);
        let removed = db::lock(&self.conn)?
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    /// Remove every entry; returns the number deleted
    pub fn clear(&self) -> Result<usize> {
        tracing::info!("Clearing durable cache");
        Ok(db::lock(&self.conn)?.execute("DELETE FROM cache_entries", [])?)
    }

    /// Delete entries whose expiry has passed; returns the number deleted
    pub fn cleanup(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let removed = db::lock(&self.conn)?.execute(
            "DELETE FROM cache_entries WHERE expires_at < ?1",
            params![now],
        )?;
        if removed > 0 {
            tracing::info!(removed, "Removed expired cache entries");
        }
        Ok(removed)
    }

    /// Sum of stored payload sizes in bytes
    pub fn total_size(&self) -> Result<u64> {
        let total: i64 = db::lock(&self.conn)?.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM cache_entries",
            [],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    /// Enforce the size budget
    ///
    /// Over budget: sweep expired entries first, then evict the oldest quarter of what
    /// remains (by creation time) if still over. Returns whether the budget was exceeded.
    pub fn check_size_limit(&self) -> Result<bool> {
        let max = self.settings.max_size_bytes;
        let size = self.total_size()?;
        if size <= max {
            return Ok(false);
        }

        tracing::info!(size, max, "Cache over size budget");
        self.cleanup()?;

        let size = self.total_size()?;
        if size <= max {
            return Ok(true);
        }

        let conn = db::lock(&self.conn)?;
        let remaining: i64 =
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        let evict = (remaining + 3) / 4;
        let evicted = conn.execute(
            r#"
            DELETE FROM cache_entries WHERE key IN (
                SELECT key FROM cache_entries ORDER BY created_at ASC, rowid ASC LIMIT ?1
            )
            "#,
            params![evict],
        )?;

        tracing::info!(evicted, remaining, "Evicted oldest cache entries");
        Ok(true)
    }

    /// Get cache statistics
    pub fn stats(&self) -> Result<CacheStats> {
        let now = self.clock.now_millis();
        let conn = db::lock(&self.conn)?;

        let (total_entries, total_size): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM cache_entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let expired_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE expires_at < ?1",
            params![now],
            |row| row.get(0),
        )?;

        let mut stmt =
            conn.prepare("SELECT service, COUNT(*) FROM cache_entries GROUP BY service")?;
        let per_service_counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        Ok(CacheStats {
            total_entries: total_entries as usize,
            total_size: total_size.max(0) as u64,
            expired_count: expired_count as usize,
            per_service_counts,
            max_size: self.settings.max_size_bytes,
        })
    }

    /// Run a raw statement against the cache table (tests only)
    #[cfg(test)]
    fn execute_raw(&self, sql: &str) -> Result<usize> {
        Ok(db::lock(&self.conn)?.execute(sql, [])?)
    }
}
