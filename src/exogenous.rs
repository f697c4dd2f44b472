//! Humidity-driven correction of temperature forecasts.
//!
//! Humid air carries heat away from equipment less effectively, so every
//! percentage point of projected humidity above the baseline adds a fixed
//! amount to the forecast temperature.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stats::linear_fit;
use crate::types::{AggregatedPoint, ForecastPoint, MetricKey, Timestamp, SECONDS_PER_HOUR};

/// Settings for the humidity correction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExogenousSettings {
    /// Temperature stream key -> humidity stream key
    pub links: HashMap<MetricKey, MetricKey>,
    /// Relative humidity (%) above which the correction applies
    pub baseline: f64,
    /// Degrees added per percentage point above the baseline
    pub coefficient: f64,
    /// Recent hours used for the humidity trend
    pub window_hours: usize,
}

impl Default for ExogenousSettings {
    fn default() -> Self {
        Self {
            links: HashMap::new(),
            baseline: 50.0,
            coefficient: 0.05,
            window_hours: 24,
        }
    }
}

impl ExogenousSettings {
    /// Humidity stream linked to `temperature_key`, if any
    pub fn humidity_for(&self, temperature_key: &str) -> Option<&MetricKey> {
        self.links.get(temperature_key)
    }
}

#[derive(Debug, Clone)]
pub struct ExogenousCorrector {
    baseline: f64,
    coefficient: f64,
    window_hours: usize,
}

impl ExogenousCorrector {
    pub fn new(settings: &ExogenousSettings) -> Self {
        Self {
            baseline: settings.baseline,
            coefficient: settings.coefficient,
            window_hours: settings.window_hours.max(1),
        }
    }

    /// Linear-trend projection of humidity at each timestamp, clamped to 0..=100
    pub fn project_humidity(&self, humidity: &[AggregatedPoint], timestamps: &[Timestamp]) -> Option<Vec<f64>> {
        let recent = &humidity[humidity.len().saturating_sub(self.window_hours)..];
        let last = recent.last()?.hour_timestamp;

        let offset = |ts: Timestamp| (ts as f64 - last as f64) / SECONDS_PER_HOUR as f64;
        let xs: Vec<f64> = recent.iter().map(|p| offset(p.hour_timestamp)).collect();
        let ys: Vec<f64> = recent.iter().map(|p| p.mean_value).collect();
        let fit = linear_fit(&xs, &ys)?;

        Some(timestamps.iter().map(|&ts| fit.at(offset(ts)).clamp(0.0, 100.0)).collect())
    }

    /// Temperature added for one projected humidity value
    pub fn correction_for(&self, humidity: f64) -> f64 {
        self.coefficient * (humidity - self.baseline).max(0.0)
    }

    /// Corrected copy of `forecast`, and whether humidity data was available.
    ///
    /// The input forecast is left untouched.
    pub fn correct(&self, forecast: &[ForecastPoint], humidity: &[AggregatedPoint]) -> (Vec<ForecastPoint>, bool) {
        let timestamps: Vec<Timestamp> = forecast.iter().map(|p| p.timestamp).collect();
        let Some(projected) = self.project_humidity(humidity, &timestamps) else {
            return (forecast.to_vec(), false);
        };

        let corrected: Vec<ForecastPoint> = forecast
            .iter()
            .zip(projected)
            .map(|(point, rh)| ForecastPoint {
                timestamp: point.timestamp,
                value: point.value + self.correction_for(rh),
            })
            .collect();

        debug!(points = corrected.len(), "applied humidity correction");
        (corrected, true)
    }
}
