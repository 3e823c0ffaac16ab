//! Provider gateways
//!
//! One gateway per layer type (weather, pollution, crime), all running the same
//! pipeline over shared stores:
//!
//! - **pipeline**: enabled check, rate limit, cache, upstream fetch, normalization,
//!   write-through
//! - **provider**: the per-layer differences (request shapes, derived analysis,
//!   synthetic area fallback)
//! - **transport**: the upstream HTTP client seam
//! - **envelope**: `{success, data|error, timestamp}` responses
//! - **facade**: `LayerService`, which dispatches inbound requests by layer

mod crime;
mod envelope;
mod facade;
mod pipeline;
mod pollution;
mod provider;
mod query;
pub mod transport;
mod weather;

pub use crime::{risk_level, safety_score, CrimeProvider};
pub use envelope::{Envelope, ErrorBody};
pub use facade::{LayerService, MaintenanceReport};
pub use pipeline::{AreaSummary, Gateway, LayerResponse, ResponseSource, Stores};
pub use pollution::{health_recommendations, main_pollutants, severity_score, PollutionProvider};
pub use provider::{LayerProvider, RequestKind};
pub use query::{Action, LayerParams, LayerQuery, MAX_FORECAST_DAYS, MAX_FORECAST_HOURS};
pub use transport::{HttpTransport, TransportError, UpstreamRequest, UpstreamTransport};
pub use weather::WeatherProvider;
