//! Configuration validation
//!
//! Validates envlayers configuration for correctness:
//! - Provider endpoints are HTTP(S) URLs
//! - TTLs and call budgets are non-zero
//! - Cache budget and cleanup probability are sane
//! - API keys referenced through `$VAR` are present for enabled providers
//!
//! Commands that only touch the local stores use [`validate_local_config`], which
//! skips the API key check.

use super::layers_config::LayersConfig;
use super::provider::{ProviderConfig, MAX_TTL_SECS};
use crate::layer::LayerType;
use crate::LayerError;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub provider: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref provider) = self.provider {
            write!(f, "[{}] {}: {}", provider, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate an envlayers configuration, including provider credentials
pub fn validate_config(config: &LayersConfig) -> ValidationResult {
    validate(config, true)
}

/// Validate everything except provider credentials
pub fn validate_local_config(config: &LayersConfig) -> ValidationResult {
    validate(config, false)
}

fn validate(config: &LayersConfig, require_keys: bool) -> ValidationResult {
    let mut errors = Vec::new();

    for (layer, provider) in config.providers.iter() {
        if let Err(mut provider_errors) = validate_provider(layer, provider, require_keys) {
            errors.append(&mut provider_errors);
        }
    }

    if config.cache.default_ttl_secs == 0 {
        errors.push(ValidationError::new(
            "cache.default_ttl_secs",
            "Default TTL must be greater than 0",
        ));
    } else if config.cache.default_ttl_secs > MAX_TTL_SECS {
        errors.push(ValidationError::new(
            "cache.default_ttl_secs",
            format!(
                "Default TTL must be at most {} seconds, got {}",
                MAX_TTL_SECS, config.cache.default_ttl_secs
            ),
        ));
    }

    if config.cache.max_size_bytes == 0 {
        errors.push(ValidationError::new(
            "cache.max_size_bytes",
            "Cache size budget must be greater than 0",
        ));
    }

    if !(0.0..=1.0).contains(&config.cache.cleanup_probability) {
        errors.push(ValidationError::new(
            "cache.cleanup_probability",
            format!(
                "Cleanup probability must be between 0 and 1, got {}",
                config.cache.cleanup_probability
            ),
        ));
    }

    if !(config.repository.default_radius_km > 0.0) {
        errors.push(ValidationError::new(
            "repository.default_radius_km",
            "Default radius must be positive",
        ));
    }

    if config.server.upstream_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "server.upstream_timeout_secs",
            "Upstream timeout must be greater than 0",
        ));
    }

    if config.server.maintenance_interval_secs == 0 {
        errors.push(ValidationError::new(
            "server.maintenance_interval_secs",
            "Maintenance interval must be greater than 0",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a single provider block
fn validate_provider(
    layer: LayerType,
    provider: &ProviderConfig,
    require_keys: bool,
) -> ValidationResult {
    let mut errors = Vec::new();
    let name = layer.as_str();

    if !provider.base_url.starts_with("http://") && !provider.base_url.starts_with("https://") {
        errors.push(
            ValidationError::new(
                "base_url",
                format!("Invalid provider URL: '{}'", provider.base_url),
            )
            .with_provider(name),
        );
    }

    if provider.cache_ttl == 0 {
        errors.push(
            ValidationError::new("cache_ttl", "Cache TTL must be greater than 0")
                .with_provider(name),
        );
    } else if provider.cache_ttl > MAX_TTL_SECS {
        errors.push(
            ValidationError::new(
                "cache_ttl",
                format!(
                    "Cache TTL must be at most {} seconds, got {}",
                    MAX_TTL_SECS, provider.cache_ttl
                ),
            )
            .with_provider(name),
        );
    }

    if provider.rate_limit_per_minute == 0 {
        errors.push(
            ValidationError::new(
                "rate_limit_per_minute",
                "Rate limit must admit at least one call per minute",
            )
            .with_provider(name),
        );
    }

    if provider.source.trim().is_empty() {
        errors.push(
            ValidationError::new("source", "Source id cannot be empty").with_provider(name),
        );
    }

    if require_keys && provider.enabled {
        if let Some(env_var) = provider.api_key_env_var() {
            if std::env::var(env_var).is_err() {
                errors.push(
                    ValidationError::new(
                        "api_key",
                        format!("Environment variable {} is not set", env_var),
                    )
                    .with_provider(name),
                );
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &LayersConfig) -> crate::Result<()> {
    into_result(validate_config(config))
}

/// [`validate_local_config`] as a Result
pub fn validate_local_config_result(config: &LayersConfig) -> crate::Result<()> {
    into_result(validate_local_config(config))
}

fn into_result(result: ValidationResult) -> crate::Result<()> {
    result.map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        LayerError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
