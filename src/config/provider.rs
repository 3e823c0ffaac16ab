//! Per-provider configuration
//!
//! One block per layer type. The enabled flag, credentials, endpoint, cache TTL and
//! call budget all live here instead of being scattered across the gateways.

use crate::layer::LayerType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest TTL a provider or the cache default may be configured with (10 years)
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Settings for a single upstream provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Feature flag; a disabled provider answers every request with a disabled-service error
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// API key, or `$VAR` to read it from the environment at call time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the provider's HTTP JSON API
    pub base_url: String,

    /// Cache and repository TTL in seconds
    pub cache_ttl: u64,

    /// Upstream calls admitted per calendar minute
    pub rate_limit_per_minute: u32,

    /// Provider id recorded as the `source` of stored layer records
    pub source: String,
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    /// Default settings for a layer's well-known provider
    pub fn for_layer(layer: LayerType) -> Self {
        match layer {
            LayerType::Weather => Self {
                enabled: true,
                api_key: Some("$OPENWEATHER_API_KEY".to_string()),
                base_url: "https://api.openweathermap.org/data/2.5".to_string(),
                cache_ttl: 1800,
                rate_limit_per_minute: 60,
                source: "openweathermap".to_string(),
            },
            LayerType::Pollution => Self {
                enabled: true,
                api_key: Some("$OPENWEATHER_API_KEY".to_string()),
                base_url: "https://api.openweathermap.org/data/2.5".to_string(),
                cache_ttl: 3600,
                rate_limit_per_minute: 60,
                source: "openweathermap".to_string(),
            },
            LayerType::Crime => Self {
                enabled: true,
                api_key: None,
                base_url: "https://data.police.uk/api".to_string(),
                cache_ttl: 86400,
                rate_limit_per_minute: 15,
                source: "police_uk".to_string(),
            },
        }
    }

    /// The configured TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    /// Resolve the API key, expanding `$VAR` references from the environment
    pub fn resolved_api_key(&self) -> Option<String> {
        let raw = self.api_key.as_deref()?;
        match raw.strip_prefix('$') {
            Some(var) => std::env::var(var).ok().filter(|v| !v.is_empty()),
            None if raw.is_empty() => None,
            None => Some(raw.to_string()),
        }
    }

    /// Name of the environment variable the key refers to, if any
    pub fn api_key_env_var(&self) -> Option<&str> {
        self.api_key.as_deref().and_then(|k| k.strip_prefix('$'))
    }
}

/// Provider settings for every layer type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub weather: ProviderConfig,
    pub pollution: ProviderConfig,
    pub crime: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get(&self, layer: LayerType) -> &ProviderConfig {
        match layer {
            LayerType::Weather => &self.weather,
            LayerType::Pollution => &self.pollution,
            LayerType::Crime => &self.crime,
        }
    }

    /// (layer, config) pairs in a fixed order
    pub fn iter(&self) -> impl Iterator<Item = (LayerType, &ProviderConfig)> {
        LayerType::ALL.into_iter().map(move |layer| (layer, self.get(layer)))
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            weather: ProviderConfig::for_layer(LayerType::Weather),
            pollution: ProviderConfig::for_layer(LayerType::Pollution),
            crime: ProviderConfig::for_layer(LayerType::Crime),
        }
    }
}
