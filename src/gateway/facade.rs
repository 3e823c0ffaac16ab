//! Layer service: one gateway per layer type over shared stores

use super::crime::CrimeProvider;
use super::envelope::Envelope;
use super::pipeline::{Gateway, Stores};
use super::pollution::PollutionProvider;
use super::provider::LayerProvider;
use super::query::{Action, LayerParams, LayerQuery};
use super::transport::{HttpTransport, UpstreamTransport};
use super::weather::WeatherProvider;
use crate::cache::DurableCache;
use crate::clock::Clock;
use crate::config::LayersConfig;
use crate::layer::{LayerType, NamedLocation};
use crate::rate_limit::RateLimiter;
use crate::repository::LayerRepository;
use crate::{LayerError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of one maintenance sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired_cache_entries: usize,
    pub size_limit_triggered: bool,
    pub expired_records: usize,
}

impl Stores {
    /// Open all three stores in the configured database file
    pub fn open(config: &LayersConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = &config.storage.path;
        let wal = config.storage.wal_mode;
        Ok(Self {
            cache: Arc::new(DurableCache::open(path, wal, config.cache.clone(), clock.clone())?),
            limiter: Arc::new(
                RateLimiter::open(path, wal, clock.clone())?.with_provider_limits(&config.providers),
            ),
            repository: Arc::new(LayerRepository::open(path, wal, clock)?),
        })
    }

    /// In-memory stores honouring the configured limits
    pub fn in_memory(config: &LayersConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            cache: Arc::new(DurableCache::in_memory(config.cache.clone(), clock.clone())?),
            limiter: Arc::new(
                RateLimiter::in_memory(clock.clone())?.with_provider_limits(&config.providers),
            ),
            repository: Arc::new(LayerRepository::in_memory(clock)?),
        })
    }

    /// Sweep expired cache entries, enforce the cache size budget and drop expired records
    pub fn maintain(&self) -> Result<MaintenanceReport> {
        let report = MaintenanceReport {
            expired_cache_entries: self.cache.cleanup()?,
            size_limit_triggered: self.cache.check_size_limit()?,
            expired_records: self.repository.cleanup()?,
        };
        tracing::debug!(?report, "Maintenance sweep finished");
        Ok(report)
    }
}

fn provider_for(layer: LayerType) -> Arc<dyn LayerProvider> {
    match layer {
        LayerType::Weather => Arc::new(WeatherProvider),
        LayerType::Pollution => Arc::new(PollutionProvider),
        LayerType::Crime => Arc::new(CrimeProvider),
    }
}

/// Entry point for every layer request
///
/// Stores are built once and shared by reference with each gateway; nothing here is global.
pub struct LayerService {
    gateways: BTreeMap<LayerType, Gateway>,
    stores: Stores,
    clock: Arc<dyn Clock>,
    default_radius: f64,
}

impl LayerService {
    /// Build gateways using HTTP transports for every provider
    pub fn new(config: &LayersConfig, stores: Stores, clock: Arc<dyn Clock>) -> Result<Self> {
        let timeout = config.server.upstream_timeout();
        let mut transports: BTreeMap<LayerType, Arc<dyn UpstreamTransport>> = BTreeMap::new();
        for (layer, provider) in config.providers.iter() {
            transports.insert(layer, Arc::new(HttpTransport::for_provider(provider, timeout)?));
        }
        Self::with_transports(config, stores, clock, transports)
    }

    /// Build gateways over caller-supplied transports (one per layer type)
    pub fn with_transports(
        config: &LayersConfig,
        stores: Stores,
        clock: Arc<dyn Clock>,
        mut transports: BTreeMap<LayerType, Arc<dyn UpstreamTransport>>,
    ) -> Result<Self> {
        let mut gateways = BTreeMap::new();
        for (layer, provider_config) in config.providers.iter() {
            let transport = transports.remove(&layer).ok_or_else(|| {
                LayerError::Config(format!("No upstream transport for {} provider", layer))
            })?;
            let gateway = Gateway::new(
                provider_for(layer),
                provider_config.clone(),
                transport,
                stores.clone(),
                clock.clone(),
            )
            .with_bulk_delay(config.server.bulk_delay());
            gateways.insert(layer, gateway);
        }

        Ok(Self {
            gateways,
            stores,
            clock,
            default_radius: config.repository.default_radius_km,
        })
    }

    /// Open stores from configuration and wire up HTTP gateways
    pub fn from_config(config: &LayersConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let stores = Stores::open(config, clock.clone())?;
        Self::new(config, stores, clock)
    }

    pub fn gateway(&self, layer: LayerType) -> Result<&Gateway> {
        self.gateways
            .get(&layer)
            .ok_or_else(|| LayerError::Config(format!("No gateway configured for {}", layer)))
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn default_radius(&self) -> f64 {
        self.default_radius
    }

    /// Run an inbound request and wrap the outcome in an envelope
    pub async fn handle(&self, params: &LayerParams) -> Envelope {
        let result = self.dispatch(params).await;
        if let Err(ref e) = result {
            tracing::debug!(error = %e, kind = e.kind(), "Layer request failed");
        }
        Envelope::from_result(result, self.clock.now())
    }

    async fn dispatch(&self, params: &LayerParams) -> Result<Value> {
        let action = params.action()?;
        let layer = params.layer()?;
        let gateway = self.gateway(layer)?;

        let value = match action {
            Action::GetCurrent => {
                serde_json::to_value(gateway.get_current(&params.query(self.default_radius)?).await?)?
            }
            Action::GetForecast => {
                serde_json::to_value(gateway.get_forecast(&params.query(self.default_radius)?).await?)?
            }
            Action::GetBulk => {
                let template = bulk_template(params, self.default_radius)?;
                serde_json::to_value(self.bulk(layer, &params.locations()?, &template).await?)?
            }
            Action::GetAreaStats => {
                serde_json::to_value(gateway.get_area_stats(&params.bounds()?, params.timeframe())?)?
            }
        };
        Ok(value)
    }

    /// Bulk request for explicit locations, returning one envelope per location name
    pub async fn bulk(
        &self,
        layer: LayerType,
        locations: &[NamedLocation],
        template: &LayerQuery,
    ) -> Result<BTreeMap<String, Envelope>> {
        if locations.is_empty() {
            return Err(LayerError::Validation(
                "At least one location is required".to_string(),
            ));
        }
        NamedLocation::ensure_unique(locations)?;
        Ok(self.gateway(layer)?.get_bulk(locations, template).await)
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

/// Shared per-location options for a bulk request; coordinates come from each location
fn bulk_template(params: &LayerParams, default_radius: f64) -> Result<LayerQuery> {
    let point_params = LayerParams {
        lat: Some("0".to_string()),
        lon: Some("0".to_string()),
        ..params.clone()
    };
    point_params.query(default_radius)
}
