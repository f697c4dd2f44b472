// src/config.rs

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregator::{AggregationSettings, GapFillPolicy};
use crate::error::{AlmanacError, AlmanacResult};
use crate::exogenous::ExogenousSettings;
use crate::model::{ModelSettings, OrderSelection};
use crate::seasonality::{ClimateAdjustment, SeasonalitySettings};
use crate::types::MetricKey;

/// Environment variable holding the MAE switch threshold (required)
pub const ENV_MAE_THRESHOLD: &str = "FORECAST_MAE_THRESHOLD";
pub const ENV_SEASONAL_PERIOD: &str = "FORECAST_SEASONAL_PERIOD";
pub const ENV_RETENTION_HOURS: &str = "FORECAST_RETENTION_HOURS";
pub const ENV_ERROR_WINDOW: &str = "FORECAST_ERROR_WINDOW";
pub const ENV_PRIMARY_TIMEOUT_MS: &str = "FORECAST_PRIMARY_TIMEOUT_MS";
pub const ENV_SWITCH_COOLDOWN_SECS: &str = "FORECAST_SWITCH_COOLDOWN_SECS";

/// Main configuration for the forecast controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Moving MAE above which the primary forecaster is abandoned
    pub mae_threshold: f64,
    /// Force a seasonal period instead of detecting one (hours)
    pub seasonal_period_override: Option<usize>,
    /// ErrorTracker window size N
    pub error_window_size: usize,
    /// Records required before MAE may trigger a switch
    pub min_error_records: usize,
    pub primary_timeout_ms: u64,
    /// Minimum time between two attempts to return to the primary
    pub switch_cooldown_secs: u64,
    pub health_check_interval_secs: u64,
    /// How often open buckets are flushed for silent streams
    pub flush_interval_secs: u64,
    /// Error records older than this don't count as switch-back evidence
    pub evidence_max_age_secs: u64,
    pub max_horizon: usize,
    /// Streams to warm-start from the history source at startup
    pub warm_start_keys: Vec<MetricKey>,
    pub aggregation: AggregationSettings,
    pub seasonality: SeasonalitySettings,
    pub model: ModelSettings,
    pub exogenous: ExogenousSettings,
    pub climate: ClimateAdjustment,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            mae_threshold: 5.0,
            seasonal_period_override: None,
            error_window_size: 168,
            min_error_records: 10,
            primary_timeout_ms: 5_000,
            switch_cooldown_secs: 300,
            health_check_interval_secs: 60,
            flush_interval_secs: 60,
            evidence_max_age_secs: 86_400,
            max_horizon: 72,
            warm_start_keys: Vec::new(),
            aggregation: AggregationSettings::default(),
            seasonality: SeasonalitySettings::default(),
            model: ModelSettings::default(),
            exogenous: ExogenousSettings::default(),
            climate: ClimateAdjustment::default(),
        }
    }
}

impl ForecastConfig {
    pub fn builder() -> ForecastConfigBuilder {
        ForecastConfigBuilder::new()
    }

    pub fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.primary_timeout_ms)
    }

    pub fn switch_cooldown(&self) -> Duration {
        Duration::from_secs(self.switch_cooldown_secs)
    }

    /// Check every option; the message names the offending one
    pub fn validate(&self) -> AlmanacResult<()> {
        fn ensure(ok: bool, message: &str) -> AlmanacResult<()> {
            if ok {
                Ok(())
            } else {
                Err(AlmanacError::config(message))
            }
        }

        ensure(
            self.mae_threshold.is_finite() && self.mae_threshold > 0.0,
            "mae_threshold must be a positive number",
        )?;
        ensure(
            self.seasonal_period_override.map_or(true, |p| p >= 2),
            "seasonal_period_override must be at least 2 hours",
        )?;
        ensure(self.error_window_size > 0, "error_window_size must be greater than 0")?;
        ensure(
            self.min_error_records <= self.error_window_size,
            "min_error_records cannot exceed error_window_size",
        )?;
        ensure(self.primary_timeout_ms > 0, "primary_timeout_ms must be greater than 0")?;
        ensure(self.health_check_interval_secs > 0, "health_check_interval_secs must be greater than 0")?;
        ensure(self.flush_interval_secs > 0, "flush_interval_secs must be greater than 0")?;
        ensure(self.max_horizon > 0, "max_horizon must be greater than 0")?;

        ensure(self.aggregation.retention_hours > 0, "aggregation.retention_hours must be greater than 0")?;
        if let GapFillPolicy::SeasonalNaive { period_hours } = self.aggregation.gap_fill {
            ensure(period_hours > 0, "aggregation.gap_fill.period_hours must be greater than 0")?;
            ensure(
                period_hours <= self.aggregation.retention_hours as u64,
                "aggregation.gap_fill.period_hours must not exceed aggregation.retention_hours",
            )?;
        }

        ensure(
            self.seasonality.significance > 0.0 && self.seasonality.significance < 1.0,
            "seasonality.significance must be between 0 and 1",
        )?;
        ensure(
            self.seasonality.refresh_interval_secs > 0,
            "seasonality.refresh_interval_secs must be greater than 0",
        )?;

        let smoothing = &self.model.smoothing;
        ensure(
            smoothing.alpha > 0.0 && smoothing.alpha <= 1.0,
            "model.smoothing.alpha must be in (0, 1]",
        )?;
        ensure(
            (0.0..=1.0).contains(&smoothing.beta),
            "model.smoothing.beta must be in [0, 1]",
        )?;
        ensure(
            smoothing.damping > 0.0 && smoothing.damping <= 1.0,
            "model.smoothing.damping must be in (0, 1]",
        )?;
        ensure(self.model.refit_interval_secs > 0, "model.refit_interval_secs must be greater than 0")?;
        if let OrderSelection::Grid { p, q } = &self.model.order_selection {
            ensure(!p.is_empty() && !q.is_empty(), "model.order_selection grid cannot be empty")?;
        }

        ensure(
            (0.0..=100.0).contains(&self.exogenous.baseline),
            "exogenous.baseline must be a humidity between 0 and 100",
        )?;
        ensure(
            self.exogenous.coefficient.is_finite() && self.exogenous.coefficient >= 0.0,
            "exogenous.coefficient must be non-negative",
        )?;
        ensure(self.exogenous.window_hours > 0, "exogenous.window_hours must be greater than 0")?;

        Ok(())
    }

    /// Build from `FORECAST_*` values provided by `lookup`
    pub fn from_lookup<F>(lookup: F) -> AlmanacResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(name: &str, raw: String) -> AlmanacResult<T> {
            raw.trim()
                .parse()
                .map_err(|_| AlmanacError::config(format!("{} has an invalid value '{}'", name, raw)))
        }

        let mut config = Self::default();

        let threshold = lookup(ENV_MAE_THRESHOLD)
            .ok_or_else(|| AlmanacError::config(format!("missing required option {}", ENV_MAE_THRESHOLD)))?;
        config.mae_threshold = parse(ENV_MAE_THRESHOLD, threshold)?;

        if let Some(raw) = lookup(ENV_SEASONAL_PERIOD) {
            config.seasonal_period_override = Some(parse(ENV_SEASONAL_PERIOD, raw)?);
        }
        if let Some(raw) = lookup(ENV_RETENTION_HOURS) {
            config.aggregation.retention_hours = parse(ENV_RETENTION_HOURS, raw)?;
        }
        if let Some(raw) = lookup(ENV_ERROR_WINDOW) {
            config.error_window_size = parse(ENV_ERROR_WINDOW, raw)?;
            config.min_error_records = config.min_error_records.min(config.error_window_size);
        }
        if let Some(raw) = lookup(ENV_PRIMARY_TIMEOUT_MS) {
            config.primary_timeout_ms = parse(ENV_PRIMARY_TIMEOUT_MS, raw)?;
        }
        if let Some(raw) = lookup(ENV_SWITCH_COOLDOWN_SECS) {
            config.switch_cooldown_secs = parse(ENV_SWITCH_COOLDOWN_SECS, raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Build from the process environment
    pub fn from_env() -> AlmanacResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Parse a TOML document; `mae_threshold` is required
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(source: &str) -> AlmanacResult<Self> {
        let table: toml::Table = toml::from_str(source)
            .map_err(|e| AlmanacError::config(format!("invalid TOML: {}", e)))?;
        if !table.contains_key("mae_threshold") {
            return Err(AlmanacError::config("missing required option mae_threshold"));
        }

        let config: Self = toml::Value::Table(table)
            .try_into()
            .map_err(|e| AlmanacError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "config-toml")]
    pub fn from_toml_file<P: AsRef<std::path::Path>>(path: P) -> AlmanacResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}

/// Builder for creating forecast configurations easily
#[derive(Debug)]
pub struct ForecastConfigBuilder {
    config: ForecastConfig,
}

impl ForecastConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ForecastConfig::default(),
        }
    }

    pub fn mae_threshold(mut self, threshold: f64) -> Self {
        self.config.mae_threshold = threshold;
        self
    }

    pub fn seasonal_period(mut self, hours: usize) -> Self {
        self.config.seasonal_period_override = Some(hours);
        self
    }

    pub fn retention_hours(mut self, hours: usize) -> Self {
        self.config.aggregation.retention_hours = hours;
        self
    }

    pub fn gap_fill(mut self, policy: GapFillPolicy) -> Self {
        self.config.aggregation.gap_fill = policy;
        self
    }

    pub fn late_tolerance_hours(mut self, hours: u64) -> Self {
        self.config.aggregation.late_tolerance_hours = hours;
        self
    }

    pub fn error_window(mut self, size: usize, min_records: usize) -> Self {
        self.config.error_window_size = size;
        self.config.min_error_records = min_records;
        self
    }

    pub fn primary_timeout_ms(mut self, millis: u64) -> Self {
        self.config.primary_timeout_ms = millis;
        self
    }

    pub fn switch_cooldown_secs(mut self, seconds: u64) -> Self {
        self.config.switch_cooldown_secs = seconds;
        self
    }

    pub fn health_check_interval_secs(mut self, seconds: u64) -> Self {
        self.config.health_check_interval_secs = seconds;
        self
    }

    pub fn flush_interval_secs(mut self, seconds: u64) -> Self {
        self.config.flush_interval_secs = seconds;
        self
    }

    pub fn evidence_max_age_secs(mut self, seconds: u64) -> Self {
        self.config.evidence_max_age_secs = seconds;
        self
    }

    pub fn max_horizon(mut self, hours: usize) -> Self {
        self.config.max_horizon = hours;
        self
    }

    pub fn warm_start(mut self, metric_key: &str) -> Self {
        self.config.warm_start_keys.push(metric_key.to_string());
        self
    }

    pub fn order_selection(mut self, selection: OrderSelection) -> Self {
        self.config.model.order_selection = selection;
        self
    }

    pub fn min_fit_points(mut self, points: usize) -> Self {
        self.config.model.min_fit_points = points;
        self
    }

    pub fn refit_interval_secs(mut self, seconds: u64) -> Self {
        self.config.model.refit_interval_secs = seconds;
        self
    }

    pub fn seasonality(mut self, settings: SeasonalitySettings) -> Self {
        self.config.seasonality = settings;
        self
    }

    /// Correct `temperature_key` forecasts with the `humidity_key` trend
    pub fn link_humidity(mut self, temperature_key: &str, humidity_key: &str) -> Self {
        self.config
            .exogenous
            .links
            .insert(temperature_key.to_string(), humidity_key.to_string());
        self
    }

    pub fn exogenous_links(mut self, links: HashMap<MetricKey, MetricKey>) -> Self {
        self.config.exogenous.links = links;
        self
    }

    pub fn climate(mut self, climate: ClimateAdjustment) -> Self {
        self.config.climate = climate;
        self
    }

    pub fn build(self) -> ForecastConfig {
        self.config
    }
}

impl Default for ForecastConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
