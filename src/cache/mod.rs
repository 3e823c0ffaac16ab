//! Durable cache layer
//!
//! Shields rate-limited providers behind a SQLite-backed TTL key-value store. Keys are
//! deterministic hashes of (service, endpoint, params); expired or corrupted entries
//! read back as misses and are removed on the spot.

mod key;
mod sqlite;

pub use key::{cache_key, canonical_json};
pub use sqlite::{CacheEntry, CacheStats, DurableCache};
