//! Convenience builders for common enclosure setups

use crate::config::ForecastConfig;
use crate::model::{ModelOrder, OrderSelection};
use crate::seasonality::ClimateAdjustment;
use crate::types::MetricKey;

/// Stream key for an enclosure's temperature sensor
pub fn temperature_key(enclosure: &str) -> MetricKey {
    format!("{}/temperature", enclosure)
}

/// Stream key for an enclosure's humidity sensor
pub fn humidity_key(enclosure: &str) -> MetricKey {
    format!("{}/humidity", enclosure)
}

/// Configuration for a set of enclosures, each with a temperature and a
/// humidity stream. Temperature forecasts are humidity-corrected and both
/// streams are warm-started.
pub fn enclosure_config(enclosures: &[&str], mae_threshold: f64) -> ForecastConfig {
    let mut builder = ForecastConfig::builder().mae_threshold(mae_threshold);
    for enclosure in enclosures {
        let temperature = temperature_key(enclosure);
        let humidity = humidity_key(enclosure);
        builder = builder
            .link_humidity(&temperature, &humidity)
            .warm_start(&temperature)
            .warm_start(&humidity);
    }
    builder.build()
}

/// Fixed SARIMA(2,1,1)(1,1,1)24 instead of the order search, plus the
/// annual climate cycle, for outdoor enclosures
pub fn outdoor_enclosure_config(enclosures: &[&str], mae_threshold: f64) -> ForecastConfig {
    let mut config = enclosure_config(enclosures, mae_threshold);
    config.model.order_selection = OrderSelection::Fixed(ModelOrder::default());
    config.climate = ClimateAdjustment {
        enabled: true,
        ..ClimateAdjustment::default()
    };
    config
}
