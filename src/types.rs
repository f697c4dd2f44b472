// src/types.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ModelOrder;
use crate::seasonality::SeasonalSummary;

/// Identifier of one metric stream (e.g., "rack-01/temperature")
pub type MetricKey = String;

/// A metric value (°C, %RH, ...)
pub type MetricValue = f64;

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Width of one aggregation bucket
pub const SECONDS_PER_HOUR: u64 = 3600;

/// One reading as delivered by the ingestion transport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// When the reading was taken
    pub timestamp: Timestamp,
    /// The reading itself
    pub value: MetricValue,
}

impl RawSample {
    pub fn new(timestamp: Timestamp, value: MetricValue) -> Self {
        Self { timestamp, value }
    }
}

/// One hourly point of an aggregated series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPoint {
    /// Start of the hour this point covers (aligned to 3600s)
    pub hour_timestamp: Timestamp,
    /// Arithmetic mean of the samples that fell in the hour
    pub mean_value: MetricValue,
    /// Number of raw samples behind the mean; 0 marks a gap-filled hour
    pub sample_count: u32,
}

impl AggregatedPoint {
    pub fn new(hour_timestamp: Timestamp, mean_value: MetricValue, sample_count: u32) -> Self {
        Self {
            hour_timestamp,
            mean_value,
            sample_count,
        }
    }

    /// Whether this hour was synthesised by the gap-fill policy
    pub fn is_filled(&self) -> bool {
        self.sample_count == 0
    }
}

/// A single future value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// Hour this value is predicted for
    pub timestamp: Timestamp,
    /// Predicted value
    pub value: MetricValue,
}

/// Which strategy produced a forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForecastMethod {
    /// The injected external forecaster
    #[serde(rename = "primary")]
    Primary,
    /// Locally fitted seasonal ARIMA
    #[serde(rename = "fallback-sarima")]
    FallbackSarima,
    /// Damped exponential smoothing with the daily harmonic
    #[serde(rename = "fallback-smoothing")]
    FallbackSmoothing,
}

impl ForecastMethod {
    pub fn is_fallback(&self) -> bool {
        !matches!(self, Self::Primary)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::FallbackSarima => "fallback-sarima",
            Self::FallbackSmoothing => "fallback-smoothing",
        }
    }
}

impl std::fmt::Display for ForecastMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A forecast returned to callers. Never stored by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResult {
    /// Stream this forecast applies to
    pub metric_key: MetricKey,
    /// Predicted values, one per future hour, contiguous and increasing
    pub horizon: Vec<ForecastPoint>,
    /// Strategy that produced every value in `horizon`
    pub method_used: ForecastMethod,
    /// When this forecast was generated
    pub generated_at: DateTime<Utc>,
    /// Moving MAE of the strategy family that produced the values
    pub current_mae: Option<f64>,
    /// Generation of the fallback model used (None for primary forecasts)
    pub model_generation: Option<u64>,
    /// Whether a humidity correction was applied
    pub exogenous_corrected: bool,
    /// Whether the annual climate cycle was applied
    pub climate_adjusted: bool,
    /// Stability-based confidence in `[0.5, 0.95]`, fallback forecasts only
    pub confidence: Option<f64>,
}

impl ForecastResult {
    /// Just the predicted values
    pub fn values(&self) -> Vec<MetricValue> {
        self.horizon.iter().map(|p| p.value).collect()
    }
}

/// A predicted/observed pair once ground truth is known
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub predicted_value: MetricValue,
    pub observed_value: MetricValue,
    pub absolute_error: f64,
    pub timestamp: Timestamp,
}

impl ErrorRecord {
    pub fn new(predicted_value: MetricValue, observed_value: MetricValue, timestamp: Timestamp) -> Self {
        Self {
            predicted_value,
            observed_value,
            absolute_error: (predicted_value - observed_value).abs(),
            timestamp,
        }
    }
}

/// Forecasting mode of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerMode {
    /// Forecasts come from the primary forecaster
    UsingPrimary,
    /// Forecasts come from the local fallback model
    UsingFallback,
}

impl Default for ControllerMode {
    fn default() -> Self {
        Self::UsingPrimary
    }
}

/// Why a stream changed mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SwitchReason {
    /// Primary call failed or timed out
    PrimaryFailure(String),
    /// Primary MAE exceeded the threshold
    MaeAboveThreshold { mae: f64, threshold: f64 },
    /// Health re-check succeeded after the cool-down
    PrimaryRecovered,
}

/// Diagnostic snapshot of one stream's fallback machinery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackInfo {
    pub metric_key: MetricKey,
    pub mode: ControllerMode,
    /// Moving MAE of the primary forecaster
    pub current_mae: Option<f64>,
    /// Moving MAE of fallback forecasts
    pub fallback_mae: Option<f64>,
    pub mae_threshold: f64,
    pub error_window_len: usize,
    pub last_fit_timestamp: Option<DateTime<Utc>>,
    pub model_method: Option<ForecastMethod>,
    pub model_order: Option<ModelOrder>,
    pub model_generation: Option<u64>,
    /// Set when the last fit degraded to smoothing
    pub degradation: Option<String>,
    pub seasonal_profile_summary: Option<SeasonalSummary>,
    pub aggregated_points: usize,
}

impl FallbackInfo {
    /// Render as pretty JSON for dashboards and logs
    pub fn to_json(&self) -> crate::error::AlmanacResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
