//! envlayers configuration file handling
//!
//! Loads and manages the ~/.config/envlayers/config.yaml file.

use super::provider::ProvidersConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SQLite storage location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Database file shared by the cache, rate windows and layer records
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Enable WAL mode for better concurrency
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

fn default_database_path() -> PathBuf {
    config_dir().join("layers.db")
}

fn default_wal_mode() -> bool {
    true
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

/// Durable cache sizing and cleanup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// TTL used when `set` is called without one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Size budget for stored payloads in bytes
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Probability of running a cleanup sweep when the cache is opened
    #[serde(default = "default_cleanup_probability")]
    pub cleanup_probability: f64,
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_size_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_cleanup_probability() -> f64 {
    0.1
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            max_size_bytes: default_max_size_bytes(),
            cleanup_probability: default_cleanup_probability(),
        }
    }
}

/// Layer repository settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySettings {
    /// Radius (km) recorded for point queries that don't specify one
    #[serde(default = "default_radius_km")]
    pub default_radius_km: f64,
}

fn default_radius_km() -> f64 {
    1.0
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            default_radius_km: default_radius_km(),
        }
    }
}

/// HTTP surface and gateway pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address the HTTP server binds to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Pause between locations in a bulk request
    #[serde(default = "default_bulk_delay_ms")]
    pub bulk_delay_ms: u64,

    /// Timeout for a single upstream call
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    /// Interval between cache/repository maintenance sweeps
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_bulk_delay_ms() -> u64 {
    250
}

fn default_upstream_timeout_secs() -> u64 {
    15
}

fn default_maintenance_interval_secs() -> u64 {
    600
}

impl ServerSettings {
    pub fn bulk_delay(&self) -> Duration {
        Duration::from_millis(self.bulk_delay_ms)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            bulk_delay_ms: default_bulk_delay_ms(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

/// envlayers configuration
///
/// Represents the complete ~/.config/envlayers/config.yaml file. Constructed once at
/// startup and handed to every store and gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayersConfig {
    /// One block per layer provider
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub repository: RepositorySettings,

    #[serde(default)]
    pub server: ServerSettings,
}

impl LayersConfig {
    /// Create a configuration with default providers and settings
    pub fn new() -> Self {
        Self {
            providers: ProvidersConfig::default(),
            storage: StorageSettings::default(),
            cache: CacheSettings::default(),
            repository: RepositorySettings::default(),
            server: ServerSettings::default(),
        }
    }

    /// Load configuration from the default path (~/.config/envlayers/config.yaml)
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::LayerError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading envlayers configuration");

        let content = fs::read_to_string(path).map_err(|e| {
            crate::LayerError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            weather_enabled = config.providers.weather.enabled,
            pollution_enabled = config.providers.pollution.enabled,
            crime_enabled = config.providers.crime.enabled,
            database = %config.storage.path.display(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving envlayers configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/envlayers/config.yaml)
    pub fn default_path() -> PathBuf {
        config_dir().join("config.yaml")
    }
}

impl Default for LayersConfig {
    fn default() -> Self {
        Self::new()
    }
}

// Always use ~/.config for consistency across platforms (macOS, Linux)
fn config_dir() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("envlayers");
    path
}
