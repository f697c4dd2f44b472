//! # Almanac - Hybrid Enclosure Forecasting
//!
//! Almanac predicts the next hours of temperature and humidity inside a
//! monitored enclosure. It aggregates noisy, irregular sensor readings into
//! hourly series and serves forecasts from a pluggable primary model. When
//! that model fails or its accuracy drifts, it switches to a self-contained
//! seasonal fallback without dropping a request.
//!
//! ## 🎯 Core Philosophy
//!
//! - **Degrade quality before availability**: every stream with at least one
//!   reading gets an answer, and each answer says which method produced it
//! - **Bring your own model**: the primary forecaster is a trait object
//! - **Per-stream isolation**: each metric stream has its own lock, so unrelated
//!   streams never contend
//! - **Atomic model swaps**: refits run off the request path and are installed whole
//!
//! ## 📊 Architecture Overview
//!
//! ```text
//! raw samples ──► Aggregator ──► hourly series ──┬──► SeasonalityAnalyzer (periodic)
//!                                                │              │
//!                                                │              ▼
//!                                                ├──► FallbackForecastModel (refit, swap)
//!                                                │              │
//!  ┌──────────────────────┐                      │              ▼
//!  │  PrimaryForecaster   │◄── ForecastController ◄── ExogenousCorrector (humidity)
//!  │  (your model)        │          │
//!  └──────────────────────┘          ├──► ErrorTracker (moving MAE, per method family)
//!                                    ▼
//!                             ForecastResult { method_used, horizon, current_mae }
//! ```
//!
//! ## 🔀 Mode Switching
//!
//! | From | To | When |
//! |------|----|------|
//! | primary | fallback | primary errors, times out, returns garbage, or its MAE exceeds the threshold |
//! | fallback | primary | health re-check succeeds after the cool-down and recent MAE is below threshold |
//!
//! ## 🎛️ Usage
//!
//! ```rust,no_run
//! use almanac::{presets, AggregatedPoint, AlmanacResult, ControllerCallbacks, ForecastController, PrimaryForecaster};
//! use std::sync::Arc;
//!
//! struct ModelService;
//!
//! #[async_trait::async_trait]
//! impl PrimaryForecaster for ModelService {
//!     async fn predict(
//!         &self,
//!         _metric_key: &str,
//!         horizon: usize,
//!         recent_history: &[AggregatedPoint],
//!     ) -> AlmanacResult<Vec<f64>> {
//!         let last = recent_history.last().map(|p| p.mean_value).unwrap_or_default();
//!         Ok(vec![last; horizon])
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> AlmanacResult<()> {
//!     let config = presets::enclosure_config(&["rack-01"], 5.0);
//!     let callbacks = ControllerCallbacks::new(Arc::new(ModelService));
//!     let controller = ForecastController::new(config, callbacks)?;
//!     controller.start().await?;
//!
//!     controller.ingest("rack-01/temperature", 1_700_000_000, 23.4).await?;
//!     let forecast = controller.forecast("rack-01/temperature", 24).await?;
//!     println!("{} hours via {}", forecast.horizon.len(), forecast.method_used);
//!
//!     controller.shutdown().await
//! }
//! ```
//!
//! ## Features
//!
//! - `config-toml`: load [`ForecastConfig`] from TOML files
//! - Environment configuration through `FORECAST_*` variables is always available

pub mod error;
pub mod utils;
pub mod types;
pub mod stats;
pub mod config;
pub mod aggregator;
pub mod seasonality;
pub mod model;
pub mod exogenous;
pub mod tracker;
pub mod callbacks;
pub mod controller;
pub mod presets;
mod scheduler;
pub mod tests;

// Re-export common types for convenience
pub use types::{
    AggregatedPoint, ControllerMode, ErrorRecord, FallbackInfo, ForecastMethod, ForecastPoint,
    ForecastResult, MetricKey, MetricValue, RawSample, SwitchReason, Timestamp, SECONDS_PER_HOUR,
};

pub use error::{AlmanacError, AlmanacResult};

pub use config::{ForecastConfig, ForecastConfigBuilder};

pub use aggregator::{AggregationSettings, Aggregator, GapFillPolicy};

pub use seasonality::{
    ClimateAdjustment, HarmonicComponent, SeasonalProfile, SeasonalSummary, SeasonalityAnalyzer,
    SeasonalitySettings,
};

pub use model::{
    forecast_confidence, FallbackForecastModel, FittedModel, ModelOrder, ModelSettings, ModelState, OrderSelection,
    SarimaCoefficients, SmoothingSettings,
};

pub use exogenous::{ExogenousCorrector, ExogenousSettings};

pub use tracker::ErrorTracker;

pub use callbacks::{ControllerCallbacks, ForecastObserver, HistorySource, PrimaryForecaster};

pub use controller::{ControllerStatus, ForecastController};
