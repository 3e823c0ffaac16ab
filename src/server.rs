//! HTTP query surface for layer data
//!
//! # Routes
//!
//! - `GET /health` - Liveness check
//! - `GET /api/layers?action=...&layer=...` - Run one layer action (`get_current`,
//!   `get_forecast`, `get_bulk`, `get_area_stats`)
//! - `POST /api/layers/bulk` - Bulk current conditions
//!   (body: `{"layer": "...", "locations": [{"name", "lat", "lon"}], "units": "..."}`)
//!
//! Every layer response is an envelope `{success, data|error, timestamp}`. The HTTP status
//! follows the error kind: 400 validation/unsupported, 429 rate limited (with
//! `Retry-After`), 502 upstream, 503 disabled, 500 otherwise.
//!
//! While running, a background task sweeps the cache and repository on a fixed interval.

use crate::gateway::{Envelope, LayerParams, LayerQuery, LayerService, Stores};
use crate::layer::{LayerType, NamedLocation};
use crate::normalizer::Units;
use crate::{LayerError, Result};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Shared server state
struct AppState {
    service: LayerService,
}

/// HTTP server over a [`LayerService`]
pub struct LayerServer {
    state: Arc<AppState>,
}

impl LayerServer {
    pub fn new(service: LayerService) -> Self {
        Self {
            state: Arc::new(AppState { service }),
        }
    }

    fn router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/api/layers", get(layer_action))
            .route("/api/layers/bulk", post(bulk_layers))
            .with_state(state)
    }

    /// Serve on `addr` until Ctrl-C, sweeping stores every `maintenance_interval`
    pub async fn run(self, addr: &str, maintenance_interval: Duration) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LayerError::Other(format!("Failed to bind {}: {}", addr, e)))?;

        let maintenance = tokio::spawn(maintenance_loop(
            self.state.service.stores().clone(),
            maintenance_interval,
        ));

        tracing::info!(
            addr = addr,
            maintenance_interval_secs = maintenance_interval.as_secs(),
            "Layer server listening"
        );

        let served = axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                tracing::info!("Shutdown signal received");
            })
            .await;

        maintenance.abort();
        served.map_err(LayerError::Io)
    }
}

/// Run [`Stores::maintain`] on every tick; failures are logged and the loop continues
async fn maintenance_loop(stores: Stores, every: Duration) {
    let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
    loop {
        interval.tick().await;
        match stores.maintain() {
            Ok(report) => tracing::info!(
                expired_cache_entries = report.expired_cache_entries,
                size_limit_triggered = report.size_limit_triggered,
                expired_records = report.expired_records,
                "Maintenance sweep"
            ),
            Err(e) => tracing::warn!(error = %e, "Maintenance sweep failed"),
        }
    }
}

/// HTTP status for an envelope
fn status_for(envelope: &Envelope) -> StatusCode {
    match envelope.error_kind() {
        None => StatusCode::OK,
        Some("ValidationError") | Some("UnsupportedOperation") => StatusCode::BAD_REQUEST,
        Some("RateLimitExceeded") => StatusCode::TOO_MANY_REQUESTS,
        Some("UpstreamTransportError") | Some("UpstreamFormatError") => StatusCode::BAD_GATEWAY,
        Some("DisabledServiceError") => StatusCode::SERVICE_UNAVAILABLE,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn envelope_response(envelope: Envelope) -> Response {
    let status = status_for(&envelope);
    let retry_after = envelope
        .error
        .as_ref()
        .and_then(|e| e.retry_after_secs)
        .filter(|_| status == StatusCode::TOO_MANY_REQUESTS);

    match retry_after {
        Some(secs) => (
            status,
            [(header::RETRY_AFTER, secs.to_string())],
            Json(envelope),
        )
            .into_response(),
        None => (status, Json(envelope)).into_response(),
    }
}

/// Body of `POST /api/layers/bulk`
#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub layer: String,
    pub locations: Vec<NamedLocation>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub radius: Option<f64>,
}

impl BulkRequest {
    fn template(&self, default_radius: f64) -> Result<LayerQuery> {
        let mut query = LayerQuery::new(0.0, 0.0)?.with_radius(self.radius.unwrap_or(default_radius))?;
        if let Some(ref units) = self.units {
            query = query.with_units(units.parse::<Units>()?);
        }
        Ok(query)
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn layer_action(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LayerParams>,
) -> Response {
    envelope_response(state.service.handle(&params).await)
}

async fn bulk_layers(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<BulkRequest>, JsonRejection>,
) -> Response {
    let result = match payload {
        Ok(Json(req)) => run_bulk(&state.service, &req).await,
        Err(rejection) => Err(LayerError::Validation(rejection.body_text())),
    };
    envelope_response(Envelope::from_result(result, state.service.now()))
}

async fn run_bulk(service: &LayerService, req: &BulkRequest) -> Result<BTreeMap<String, Envelope>> {
    let layer: LayerType = req.layer.parse()?;
    let template = req.template(service.default_radius())?;
    service.bulk(layer, &req.locations, &template).await
}
