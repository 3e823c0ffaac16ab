//! Shared gateway pipeline
//!
//! Every layer runs the same state machine:
//! enabled check → rate limit → cache → upstream fetch → record call → normalize →
//! write-through (cache + repository) → response. A failed fetch or an unusable payload
//! ends the request with an error and nothing is cached or stored.

use super::envelope::Envelope;
use super::provider::{LayerProvider, RequestKind};
use super::query::LayerQuery;
use super::transport::{UpstreamRequest, UpstreamTransport};
use crate::cache::DurableCache;
use crate::clock::Clock;
use crate::config::ProviderConfig;
use crate::layer::{Bounds, LayerType, NamedLocation, Quality};
use crate::normalizer::{payload_quality, standardize_forecast, standardize_with};
use crate::rate_limit::RateLimiter;
use crate::repository::{AreaStats, LayerRepository};
use crate::{LayerError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stores shared by every gateway
#[derive(Clone)]
pub struct Stores {
    pub cache: Arc<DurableCache>,
    pub limiter: Arc<RateLimiter>,
    pub repository: Arc<LayerRepository>,
}

/// Where a response payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Api,
    Cache,
}

/// Successful gateway result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerResponse {
    pub source: ResponseSource,
    pub quality: Quality,
    /// Normalized layer: `{type, source, data, analysis}`
    pub payload: Value,
}

/// Area statistics labelled as real (`aggregated`) or synthetic (`mock`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaSummary {
    #[serde(flatten)]
    pub stats: AreaStats,
    pub quality: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mock_statistics: Option<Value>,
}

/// One provider gateway
pub struct Gateway {
    provider: Arc<dyn LayerProvider>,
    config: ProviderConfig,
    transport: Arc<dyn UpstreamTransport>,
    stores: Stores,
    clock: Arc<dyn Clock>,
    bulk_delay: Duration,
}

impl Gateway {
    pub fn new(
        provider: Arc<dyn LayerProvider>,
        config: ProviderConfig,
        transport: Arc<dyn UpstreamTransport>,
        stores: Stores,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            config,
            transport,
            stores,
            clock,
            bulk_delay: Duration::ZERO,
        }
    }

    /// Pause between locations in [`Gateway::get_bulk`]
    pub fn with_bulk_delay(mut self, delay: Duration) -> Self {
        self.bulk_delay = delay;
        self
    }

    pub fn layer_type(&self) -> LayerType {
        self.provider.layer_type()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.config.enabled {
            Ok(())
        } else {
            debug!(layer = %self.layer_type(), "Request for disabled provider");
            Err(LayerError::Disabled(self.layer_type().to_string()))
        }
    }

    /// Current conditions at a point
    pub async fn get_current(&self, query: &LayerQuery) -> Result<LayerResponse> {
        self.ensure_enabled()?;
        let request = self.provider.current_request(query);
        self.execute(RequestKind::Current, query, request).await
    }

    /// Daily (weather) or hourly (pollution) forecast summaries at a point
    pub async fn get_forecast(&self, query: &LayerQuery) -> Result<LayerResponse> {
        self.ensure_enabled()?;
        let request = self.provider.forecast_request(query)?;
        self.execute(RequestKind::Forecast, query, request).await
    }

    async fn execute(
        &self,
        kind: RequestKind,
        query: &LayerQuery,
        request: UpstreamRequest,
    ) -> Result<LayerResponse> {
        let layer = self.layer_type();
        let service = layer.as_str();
        let endpoint = kind.endpoint();
        let expires_at = record_ttl(self.config.cache_ttl)
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
            .ok_or_else(|| {
                LayerError::Config(format!(
                    "cache_ttl of {}s for {} is out of range",
                    self.config.cache_ttl, layer
                ))
            })?;

        if !self.stores.limiter.check_rate_limit(service) {
            return Err(LayerError::RateLimited {
                provider: service.to_string(),
                retry_after_secs: self.stores.limiter.seconds_until_reset(),
            });
        }

        let params = self.provider.cache_params(kind, &request, query);
        match self.stores.cache.get(service, endpoint, &params) {
            Ok(Some(payload)) => {
                debug!(layer = %layer, endpoint, "Cache hit");
                return Ok(LayerResponse {
                    source: ResponseSource::Cache,
                    quality: payload_quality(&payload),
                    payload,
                });
            }
            Ok(None) => debug!(layer = %layer, endpoint, "Cache miss"),
            Err(e) => warn!(layer = %layer, endpoint, error = %e, "Cache read failed, fetching upstream"),
        }

        let raw = self.transport.fetch(&request).await.map_err(|e| {
            warn!(layer = %layer, path = %request.path, error = %e, "Upstream fetch failed");
            LayerError::from(e)
        })?;

        if let Err(e) = self.stores.limiter.record_call(service) {
            warn!(layer = %layer, error = %e, "Failed to record upstream call");
        }

        let options = query.normalize_options();
        let mut normalized = match kind {
            RequestKind::Current => standardize_with(&raw, &self.config.source, layer, &options),
            RequestKind::Forecast => standardize_forecast(&raw, &self.config.source, layer, &options),
        };
        if let Some(message) = normalized.error.take() {
            return Err(LayerError::UpstreamFormat(message));
        }
        if kind == RequestKind::Current {
            normalized.analysis = self.provider.analyze(&normalized);
        }

        let payload = normalized.to_value()?;
        let quality = payload_quality(&payload);
        let ttl = self.config.ttl();

        if let Err(e) = self.stores.cache.set(service, endpoint, &params, &payload, Some(ttl)) {
            warn!(layer = %layer, endpoint, error = %e, "Cache write failed");
        }

        // Forecasts are cache-only; the repository keeps one current reading per key
        if kind == RequestKind::Current {
            if let Err(e) = self.stores.repository.store(
                layer,
                &self.config.source,
                query.point,
                &payload,
                query.radius,
                expires_at,
            ) {
                warn!(layer = %layer, error = %e, "Repository write failed");
            }
        }

        info!(layer = %layer, endpoint, %quality, "Fetched fresh layer data");
        Ok(LayerResponse {
            source: ResponseSource::Api,
            quality,
            payload,
        })
    }

    /// Current conditions for several named locations, one at a time
    ///
    /// Each location gets its own envelope; a failure never aborts the batch.
    pub async fn get_bulk(
        &self,
        locations: &[NamedLocation],
        template: &LayerQuery,
    ) -> BTreeMap<String, Envelope> {
        let mut results = BTreeMap::new();

        for (index, location) in locations.iter().enumerate() {
            if index > 0 && !self.bulk_delay.is_zero() {
                tokio::time::sleep(self.bulk_delay).await;
            }

            let result = match LayerQuery::new(location.lat, location.lon) {
                Ok(point) => {
                    let query = LayerQuery {
                        point: point.point,
                        ..template.clone()
                    };
                    self.get_current(&query).await
                }
                Err(e) => Err(e),
            };

            if let Err(ref e) = result {
                debug!(location = %location.name, error = %e, "Bulk location failed");
            }
            results.insert(
                location.name.clone(),
                Envelope::from_result(result, self.clock.now()),
            );
        }

        results
    }

    /// Aggregate stored records inside `bounds`
    ///
    /// When nothing is stored, providers with a synthetic estimate return it flagged
    /// `quality: "mock"`.
    pub fn get_area_stats(&self, bounds: &Bounds, timeframe: &str) -> Result<AreaSummary> {
        let stats = self
            .stores
            .repository
            .get_area_stats(self.layer_type(), bounds, timeframe)?;

        if stats.data_points == 0 {
            if let Some(mock) = self.provider.mock_area_stats(bounds) {
                info!(layer = %self.layer_type(), "No stored data for area, returning synthetic estimate");
                return Ok(AreaSummary {
                    stats,
                    quality: "mock",
                    mock_statistics: Some(mock),
                });
            }
        }

        Ok(AreaSummary {
            stats,
            quality: "aggregated",
            mock_statistics: None,
        })
    }
}

fn record_ttl(ttl_secs: u64) -> Option<chrono::Duration> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::config::CacheSettings;
    use crate::gateway::transport::TransportError;
    use crate::gateway::{CrimeProvider, PollutionProvider, WeatherProvider};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays queued responses and counts fetches
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<Vec<std::result::Result<Value, TransportError>>>,
        calls: Mutex<Vec<UpstreamRequest>>,
    }

    impl ScriptedTransport {
        fn with(responses: Vec<std::result::Result<Value, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl UpstreamTransport for ScriptedTransport {
        async fn fetch(&self, request: &UpstreamRequest) -> std::result::Result<Value, TransportError> {
            self.calls.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(TransportError::Transport("no scripted response".into())))
        }
    }

    fn weather_payload() -> Value {
        json!({
            "main": {"temp": 18.5, "humidity": 60, "pressure": 1010},
            "wind": {"speed": 2.0, "deg": 90},
            "weather": [{"description": "overcast clouds", "icon": "04d"}],
            "cod": 200
        })
    }

    fn stores(clock: &MockClock) -> Stores {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let settings = CacheSettings {
            cleanup_probability: 0.0,
            ..CacheSettings::default()
        };
        Stores {
            cache: Arc::new(DurableCache::in_memory(settings, clock.clone()).unwrap()),
            limiter: Arc::new(
                RateLimiter::in_memory(clock.clone())
                    .unwrap()
                    .with_limit("weather", 2)
                    .with_limit("crime", 5),
            ),
            repository: Arc::new(LayerRepository::in_memory(clock).unwrap()),
        }
    }

    fn build_gateway(
        provider: Arc<dyn LayerProvider>,
        transport: Arc<ScriptedTransport>,
        clock: &MockClock,
    ) -> (Gateway, Stores) {
        let stores = stores(clock);
        let config = ProviderConfig::for_layer(provider.layer_type());
        let gateway = Gateway::new(provider, config, transport, stores.clone(), Arc::new(clock.clone()));
        (gateway, stores)
    }

    fn clock() -> MockClock {
        MockClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let clock = clock();
        let transport = ScriptedTransport::with(vec![Ok(weather_payload())]);
        let (gateway, stores) = build_gateway(Arc::new(WeatherProvider), transport.clone(), &clock);
        let query = LayerQuery::new(44.42, 26.10).unwrap();

        let first = gateway.get_current(&query).await.unwrap();
        let second = gateway.get_current(&query).await.unwrap();

        assert_eq!(first.source, ResponseSource::Api);
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(first.payload, second.payload);
        assert_eq!(first.quality, Quality::High);
        assert_eq!(transport.calls(), 1);

        assert_eq!(stores.limiter.usage("weather").calls_this_minute, 1);
        let records = stores
            .repository
            .get(LayerType::Weather, query.point, None)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "openweathermap");
    }

    #[tokio::test]
    async fn test_refetch_after_ttl() {
        let clock = clock();
        let transport = ScriptedTransport::with(vec![Ok(weather_payload()), Ok(weather_payload())]);
        let (gateway, stores) = build_gateway(Arc::new(WeatherProvider), transport.clone(), &clock);
        let query = LayerQuery::new(44.42, 26.10).unwrap();

        gateway.get_current(&query).await.unwrap();
        clock.advance_secs(1801);
        let again = gateway.get_current(&query).await.unwrap();

        assert_eq!(again.source, ResponseSource::Api);
        assert_eq!(transport.calls(), 2);
        // Upsert, not append
        assert_eq!(stores.repository.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_disabled_provider_makes_no_call() {
        let clock = clock();
        let transport = ScriptedTransport::with(vec![Ok(weather_payload())]);
        let stores = stores(&clock);
        let mut config = ProviderConfig::for_layer(LayerType::Weather);
        config.enabled = false;
        let gateway = Gateway::new(
            Arc::new(WeatherProvider),
            config,
            transport.clone(),
            stores,
            Arc::new(clock.clone()),
        );

        let err = gateway
            .get_current(&LayerQuery::new(1.0, 1.0).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "DisabledServiceError");
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_fails_before_fetch() {
        let clock = clock();
        let transport = ScriptedTransport::with(vec![Ok(weather_payload())]);
        let stores = stores(&clock);
        let mut config = ProviderConfig::for_layer(LayerType::Weather);
        config.cache_ttl = 10_000_000_000_000;
        let gateway = Gateway::new(
            Arc::new(WeatherProvider),
            config,
            transport.clone(),
            stores.clone(),
            Arc::new(clock.clone()),
        );

        let err = gateway
            .get_current(&LayerQuery::new(1.0, 1.0).unwrap())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "ConfigurationError");
        assert_eq!(transport.calls(), 0);
        assert_eq!(stores.cache.stats().unwrap().total_entries, 0);
        assert_eq!(stores.limiter.usage("weather").calls_this_minute, 0);
        assert_eq!(stores.repository.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_before_fetch() {
        let clock = clock();
        let transport = ScriptedTransport::with(vec![Ok(weather_payload()), Ok(weather_payload())]);
        let (gateway, _stores) = build_gateway(Arc::new(WeatherProvider), transport.clone(), &clock);

        gateway.get_current(&LayerQuery::new(1.0, 1.0).unwrap()).await.unwrap();
        gateway.get_current(&LayerQuery::new(2.0, 2.0).unwrap()).await.unwrap();
        let err = gateway
            .get_current(&LayerQuery::new(3.0, 3.0).unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, LayerError::RateLimited { retry_after_secs: 60, .. }));
        assert_eq!(transport.calls(), 2);

        clock.advance_secs(60);
        assert!(gateway.get_current(&LayerQuery::new(3.0, 3.0).unwrap()).await.is_err());
        // The call above reached the transport (and failed there) rather than the limiter
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_failure_caches_nothing() {
        let clock = clock();
        let transport = ScriptedTransport::with(vec![
            Err(TransportError::Transport("timed out".into())),
            Ok(weather_payload()),
        ]);
        let (gateway, stores) = build_gateway(Arc::new(WeatherProvider), transport.clone(), &clock);
        let query = LayerQuery::new(44.42, 26.10).unwrap();

        let err = gateway.get_current(&query).await.unwrap_err();
        assert_eq!(err.kind(), "UpstreamTransportError");
        assert_eq!(stores.cache.stats().unwrap().total_entries, 0);
        assert_eq!(stores.repository.count().unwrap(), 0);
        assert_eq!(stores.limiter.usage("weather").calls_this_minute, 0);

        let ok = gateway.get_current(&query).await.unwrap();
        assert_eq!(ok.source, ResponseSource::Api);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_format_error() {
        let clock = clock();
        let transport = ScriptedTransport::with(vec![Ok(json!({"unexpected": true}))]);
        let (gateway, stores) = build_gateway(Arc::new(WeatherProvider), transport.clone(), &clock);

        let err = gateway
            .get_current(&LayerQuery::new(1.0, 1.0).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UpstreamFormatError");
        assert_eq!(stores.cache.stats().unwrap().total_entries, 0);
        // The provider did answer, so the call still counts
        assert_eq!(stores.limiter.usage("weather").calls_this_minute, 1);
    }

    #[tokio::test]
    async fn test_pollution_analysis_attached() {
        let clock = clock();
        let transport = ScriptedTransport::with(vec![Ok(json!({"list": [{
            "main": {"aqi": 2},
            "components": {"pm2_5": 12.0, "pm10": 20.0, "no2": 15.0, "o3": 60.0, "so2": 1.0, "co": 200.0}
        }]}))]);
        let (gateway, _stores) = build_gateway(Arc::new(PollutionProvider), transport, &clock);

        let response = gateway
            .get_current(&LayerQuery::new(44.42, 26.10).unwrap())
            .await
            .unwrap();
        assert_eq!(response.payload["analysis"]["severity_score"], 25);
        assert_eq!(response.payload["data"]["aqi"]["level"], "Fair");
    }

    #[tokio::test]
    async fn test_forecast_is_cached_but_not_stored() {
        let clock = clock();
        let transport = ScriptedTransport::with(vec![Ok(json!({"list": [
            {"dt": 1714564800, "main": {"temp": 20.0, "humidity": 50}, "weather": [{"description": "clear sky", "icon": "01d"}], "pop": 0.1}
        ]}))]);
        let (gateway, stores) = build_gateway(Arc::new(WeatherProvider), transport.clone(), &clock);
        let query = LayerQuery::new(44.42, 26.10).unwrap();

        let first = gateway.get_forecast(&query).await.unwrap();
        assert_eq!(first.payload["data"]["days"][0]["date"], "2024-05-01");
        let second = gateway.get_forecast(&query).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(transport.calls(), 1);
        assert_eq!(stores.repository.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_crime_forecast_unsupported() {
        let clock = clock();
        let transport = ScriptedTransport::with(vec![]);
        let (gateway, _stores) = build_gateway(Arc::new(CrimeProvider), transport.clone(), &clock);

        let err = gateway
            .get_forecast(&LayerQuery::new(51.5, -0.12).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UnsupportedOperation");
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_bulk_isolates_failures() {
        let clock = clock();
        let transport = ScriptedTransport::with(vec![
            Ok(json!([{"category": "burglary"}])),
            Err(TransportError::Transport("connection reset".into())),
            Ok(json!([])),
        ]);
        let (gateway, _stores) = build_gateway(Arc::new(CrimeProvider), transport.clone(), &clock);
        let gateway = gateway.with_bulk_delay(Duration::from_millis(1));

        let locations = vec![
            NamedLocation::new("a", 51.50, -0.12),
            NamedLocation::new("b", 51.51, -0.13),
            NamedLocation::new("bad", 123.0, 0.0),
            NamedLocation::new("c", 51.52, -0.14),
        ];
        let template = LayerQuery::new(0.0, 0.0).unwrap();
        let results = gateway.get_bulk(&locations, &template).await;

        assert_eq!(results.len(), 4);
        assert!(results["a"].success);
        assert_eq!(results["b"].error_kind(), Some("UpstreamTransportError"));
        assert_eq!(results["bad"].error_kind(), Some("ValidationError"));
        assert!(results["c"].success);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_area_stats_real_and_mock() {
        let clock = clock();
        let transport = ScriptedTransport::with(vec![Ok(json!([{"category": "drugs"}]))]);
        let (gateway, _stores) = build_gateway(Arc::new(CrimeProvider), transport, &clock);
        let bounds = Bounds::new(51.6, 51.4, 0.0, -0.3).unwrap();

        let mock = gateway.get_area_stats(&bounds, "24h").unwrap();
        assert_eq!(mock.quality, "mock");
        assert!(mock.mock_statistics.is_some());
        assert_eq!(mock.stats.data_points, 0);

        gateway
            .get_current(&LayerQuery::new(51.5, -0.12).unwrap())
            .await
            .unwrap();
        let real = gateway.get_area_stats(&bounds, "24h").unwrap();
        assert_eq!(real.quality, "aggregated");
        assert_eq!(real.stats.data_points, 1);

        let value = serde_json::to_value(&real).unwrap();
        assert_eq!(value["data_points"], 1);
        assert!(value.get("mock_statistics").is_none());
    }

    #[tokio::test]
    async fn test_weather_area_stats_never_mocked() {
        let clock = clock();
        let (gateway, _stores) = build_gateway(Arc::new(WeatherProvider), ScriptedTransport::with(vec![]), &clock);
        let bounds = Bounds::new(1.0, 0.0, 1.0, 0.0).unwrap();

        let stats = gateway.get_area_stats(&bounds, "7d").unwrap();
        assert_eq!(stats.quality, "aggregated");
        assert_eq!(stats.stats.quality_score, None);
    }
}
