//! Configuration system
//!
//! Loads ~/.config/envlayers/config.yaml with:
//! - One typed block per layer provider (enabled flag, API key, base URL, TTL, call budget)
//! - Durable cache sizing and cleanup settings
//! - SQLite storage location
//! - HTTP server and maintenance settings

mod layers_config;
mod provider;
pub mod validation;

pub use layers_config::{
    CacheSettings, LayersConfig, RepositorySettings, ServerSettings, StorageSettings,
};
pub use provider::{ProviderConfig, ProvidersConfig, MAX_TTL_SECS};
pub use validation::{
    validate_config, validate_config_result, validate_local_config, validate_local_config_result,
    ValidationError,
};
