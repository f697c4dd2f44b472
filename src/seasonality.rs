//! # Seasonality Detection
//!
//! Finds the periodic structure of an hourly series with the sample
//! autocorrelation function and describes each significant cycle with a
//! fitted sinusoid. The daily cycle (24 hours) is always a candidate; a
//! longer climate-scale lag is tried once enough history is retained.
//!
//! The result, a [`SeasonalProfile`], is cheap to clone and is refreshed on
//! a slower cadence than forecasts are served.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stats::{autocorrelation, harmonic_fit};
use crate::types::{AggregatedPoint, ForecastPoint, Timestamp};
use crate::utils::hour_index;

/// Hours in the daily cycle
pub const DAILY_PERIOD: usize = 24;

/// Tunables for the autocorrelation analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonalitySettings {
    /// Hourly points required before any period is reported
    pub min_history: usize,
    /// Autocorrelation a lag must reach to count as seasonal
    pub significance: f64,
    /// Longer candidate lag standing in for the climate cycle
    pub climate_lag_hours: usize,
    /// How often the scheduler recomputes profiles
    pub refresh_interval_secs: u64,
}

impl Default for SeasonalitySettings {
    fn default() -> Self {
        Self {
            min_history: 7 * DAILY_PERIOD,
            significance: 0.3,
            climate_lag_hours: 7 * DAILY_PERIOD,
            refresh_interval_secs: 6 * 3600,
        }
    }
}

/// One fitted cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HarmonicComponent {
    pub period: usize,
    pub amplitude: f64,
    /// Radians; the cycle peaks when `2π·hour/period == phase`
    pub phase: f64,
    /// Autocorrelation at `period`
    pub strength: f64,
}

impl HarmonicComponent {
    fn value_at(&self, hour: f64) -> f64 {
        self.amplitude * (2.0 * std::f64::consts::PI * hour / self.period as f64 - self.phase).cos()
    }
}

/// Periodic structure detected in one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalProfile {
    pub daily_period: usize,
    pub daily: Option<HarmonicComponent>,
    /// Non-daily cycle, either the climate lag or a forced period
    pub secondary_period: Option<usize>,
    pub secondary: Option<HarmonicComponent>,
    /// Period with the strongest significant autocorrelation
    pub dominant_period: Option<usize>,
    pub detected_at: DateTime<Utc>,
    pub history_points: usize,
}

impl SeasonalProfile {
    /// Profile used when there is too little history or no cycle stands out
    pub fn disabled(history_points: usize) -> Self {
        Self {
            daily_period: DAILY_PERIOD,
            daily: None,
            secondary_period: None,
            secondary: None,
            dominant_period: None,
            detected_at: Utc::now(),
            history_points,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dominant_period.is_some()
    }

    /// Combined seasonal offset at `timestamp`, zero when disabled
    pub fn value_at(&self, timestamp: Timestamp) -> f64 {
        let hour = hour_index(timestamp);
        self.daily.iter().chain(self.secondary.iter()).map(|c| c.value_at(hour)).sum()
    }

    pub fn summary(&self) -> SeasonalSummary {
        SeasonalSummary {
            enabled: self.is_enabled(),
            dominant_period: self.dominant_period,
            daily_amplitude: self.daily.map(|c| c.amplitude),
            daily_phase: self.daily.map(|c| c.phase),
            daily_strength: self.daily.map(|c| c.strength),
            secondary_period: self.secondary_period,
            secondary_amplitude: self.secondary.map(|c| c.amplitude),
            detected_at: self.detected_at,
        }
    }
}

/// Flattened view of a profile for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalSummary {
    pub enabled: bool,
    pub dominant_period: Option<usize>,
    pub daily_amplitude: Option<f64>,
    pub daily_phase: Option<f64>,
    pub daily_strength: Option<f64>,
    pub secondary_period: Option<usize>,
    pub secondary_amplitude: Option<f64>,
    pub detected_at: DateTime<Utc>,
}

/// Autocorrelation-based period detector
#[derive(Debug, Clone)]
pub struct SeasonalityAnalyzer {
    settings: SeasonalitySettings,
    period_override: Option<usize>,
}

impl SeasonalityAnalyzer {
    pub fn new(settings: SeasonalitySettings, period_override: Option<usize>) -> Self {
        Self { settings, period_override }
    }

    /// Lags worth testing for a series of `len` points. A forced period
    /// takes the place of the climate lag; the daily cycle is always tested.
    fn candidate_lags(&self, len: usize) -> Vec<usize> {
        let mut lags = vec![DAILY_PERIOD];
        match self.period_override {
            Some(period) if period != DAILY_PERIOD => lags.push(period),
            Some(_) => {}
            None => {
                let climate = self.settings.climate_lag_hours;
                if climate > DAILY_PERIOD && len >= 2 * climate {
                    lags.push(climate);
                }
            }
        }
        lags
    }

    pub fn analyze(&self, series: &[AggregatedPoint]) -> SeasonalProfile {
        let len = series.len();
        if len < self.settings.min_history {
            debug!(points = len, required = self.settings.min_history, "too little history for seasonality");
            return SeasonalProfile::disabled(len);
        }

        let values: Vec<f64> = series.iter().map(|p| p.mean_value).collect();
        let hours: Vec<f64> = series.iter().map(|p| hour_index(p.hour_timestamp)).collect();

        let mut profile = SeasonalProfile::disabled(len);
        let mut best: Option<(usize, f64)> = None;

        for lag in self.candidate_lags(len) {
            if lag < 2 || lag >= len {
                continue;
            }
            let strength = autocorrelation(&values, lag);
            debug!(lag, strength, "autocorrelation");
            if strength < self.settings.significance {
                continue;
            }

            let Some(fit) = harmonic_fit(&hours, &values, lag as f64) else {
                continue;
            };
            let component = HarmonicComponent {
                period: lag,
                amplitude: fit.amplitude,
                phase: fit.phase,
                strength,
            };
            if lag == DAILY_PERIOD {
                profile.daily = Some(component);
            } else {
                profile.secondary_period = Some(lag);
                profile.secondary = Some(component);
            }

            if best.map_or(true, |(_, s)| strength > s) {
                best = Some((lag, strength));
            }
        }

        // a forced period wins whenever it is significant
        profile.dominant_period = match self.period_override {
            Some(period) if profile.daily.map(|c| c.period) == Some(period) || profile.secondary_period == Some(period) => {
                Some(period)
            }
            _ => best.map(|(lag, _)| lag),
        };
        profile
    }
}

/// Annual temperature cycle applied on top of fallback forecasts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateAdjustment {
    pub enabled: bool,
    /// Half the peak-to-trough swing, in metric units
    pub amplitude: f64,
    /// Day of year with the highest value
    pub peak_day: f64,
}

impl Default for ClimateAdjustment {
    fn default() -> Self {
        Self {
            enabled: false,
            amplitude: 3.0,
            peak_day: 355.0,
        }
    }
}

impl ClimateAdjustment {
    fn cycle(&self, timestamp: Timestamp) -> f64 {
        let Some(at) = DateTime::<Utc>::from_timestamp(timestamp as i64, 0) else {
            return 0.0;
        };
        let day = at.ordinal0() as f64 + at.hour() as f64 / 24.0;
        self.amplitude * (2.0 * std::f64::consts::PI * (day - self.peak_day) / 365.25).cos()
    }

    /// Shift every point by how far the annual cycle moved since `last_observed`
    pub fn apply(&self, last_observed: Timestamp, points: &mut [ForecastPoint]) {
        if !self.enabled {
            return;
        }
        let base = self.cycle(last_observed);
        for point in points.iter_mut() {
            point.value += self.cycle(point.timestamp) - base;
        }
    }
}
