//! envlayers - Cached, rate-limited environmental layer data
//!
//! envlayers shields rate-limited, unreliable third-party providers (weather, air
//! pollution, street crime) behind a durable cache and per-provider call budgets,
//! normalizes their payloads into one schema per layer type, and persists the
//! latest normalized value per coordinate for bounding-box queries.
//!
//! # Architecture
//!
//! - **cache**: Durable TTL cache keyed by a hash of (service, endpoint, params)
//! - **rate_limit**: Per-provider fixed-window call budgets
//! - **normalizer**: Canonical layer schemas and quality scoring
//! - **repository**: Latest-value store with area aggregation
//! - **gateway**: Per-layer pipelines composing the stores with an upstream transport
//! - **server**: HTTP query surface (axum)
//! - **config**: YAML configuration
//!
//! # Example
//!
//! ```ignore
//! use envlayers::clock::SystemClock;
//! use envlayers::config::LayersConfig;
//! use envlayers::gateway::{LayerQuery, LayerService};
//! use envlayers::layer::LayerType;
//!
//! let config = LayersConfig::load_default()?;
//! let service = LayerService::from_config(&config, SystemClock::shared())?;
//! let response = service
//!     .gateway(LayerType::Weather)?
//!     .get_current(&LayerQuery::new(44.43, 26.10)?)
//!     .await?;
//! ```

// Core modules
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod layer;
pub mod logging;

// Stores
pub mod cache;
pub mod rate_limit;
pub mod repository;

// Pipeline
pub mod gateway;
pub mod normalizer;
pub mod server;

// Re-exports
pub use error::{LayerError, Result};
