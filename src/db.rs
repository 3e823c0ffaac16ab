//! SQLite connection handling shared by the cache, rate limiter and repository

use crate::{LayerError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Open or create a database file, creating parent directories as needed
pub fn open(path: &Path, wal_mode: bool) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    tracing::debug!(path = %path.display(), wal_mode, "Opening database");

    let conn = Connection::open(path)?;

    // Enable WAL mode for better concurrency
    if wal_mode {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    // Each store holds its own connection to the same file
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    Ok(conn)
}

/// Lock a store's connection, surfacing a poisoned mutex as a storage error
pub fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| LayerError::Storage("database connection mutex poisoned".to_string()))
}
