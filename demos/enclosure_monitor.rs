// demos/enclosure_monitor.rs
//! Enclosure monitoring example
//!
//! This example demonstrates:
//! - Warm-starting streams from persisted hourly history
//! - Serving forecasts from a primary model service
//! - Surviving a primary outage with the seasonal fallback
//! - Humidity-corrected temperature forecasts and diagnostics
//!
//! Run with: cargo run --example enclosure_monitor

use almanac::{
    presets, utils, AggregatedPoint, AlmanacError, AlmanacResult, ControllerCallbacks, ControllerMode,
    ForecastController, ForecastObserver, HistorySource, PrimaryForecaster, SwitchReason, SECONDS_PER_HOUR,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const ENCLOSURE: &str = "cabinet-7";

/// Stand-in for a remote model service that can be taken offline
struct ModelService {
    online: AtomicBool,
}

#[async_trait]
impl PrimaryForecaster for ModelService {
    async fn predict(&self, _metric_key: &str, horizon: usize, recent_history: &[AggregatedPoint]) -> AlmanacResult<Vec<f64>> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(AlmanacError::primary_unavailable("connection refused"));
        }
        let last = recent_history.last().map(|p| p.mean_value).unwrap_or_default();
        Ok(vec![last; horizon])
    }

    async fn health_check(&self) -> AlmanacResult<bool> {
        Ok(self.online.load(Ordering::SeqCst))
    }
}

/// Ten days of synthetic hourly history ending at the previous hour
struct SyntheticHistory {
    end_hour: u64,
}

#[async_trait]
impl HistorySource for SyntheticHistory {
    async fn load_history(&self, metric_key: &str) -> AlmanacResult<Vec<AggregatedPoint>> {
        let humidity = metric_key.ends_with("/humidity");
        let points = (1..=240u64)
            .rev()
            .map(|ago| {
                let hour = self.end_hour - ago * SECONDS_PER_HOUR;
                let phase = 2.0 * std::f64::consts::PI * (hour / SECONDS_PER_HOUR % 24) as f64 / 24.0;
                let value = if humidity {
                    62.0 + 8.0 * phase.sin()
                } else {
                    24.0 + 2.5 * phase.cos()
                };
                AggregatedPoint::new(hour, value, 12)
            })
            .collect();
        Ok(points)
    }
}

struct ConsoleObserver;

#[async_trait]
impl ForecastObserver for ConsoleObserver {
    async fn on_mode_change(&self, metric_key: &str, from: ControllerMode, to: ControllerMode, reason: &SwitchReason) -> AlmanacResult<()> {
        println!("🔀 {}: {:?} -> {:?} ({:?})", metric_key, from, to, reason);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let now = utils::current_timestamp();
    let service = Arc::new(ModelService { online: AtomicBool::new(true) });
    let callbacks = ControllerCallbacks::new(service.clone())
        .with_history(Arc::new(SyntheticHistory { end_hour: utils::hour_floor(now) }))
        .add_observer(Arc::new(ConsoleObserver));

    let config = presets::enclosure_config(&[ENCLOSURE], 1.5);
    let controller = ForecastController::new(config, callbacks)?;
    controller.start().await?;

    let temperature = presets::temperature_key(ENCLOSURE);
    let humidity = presets::humidity_key(ENCLOSURE);
    controller.ingest(&temperature, now, 24.8).await?;
    controller.ingest(&humidity, now, 71.0).await?;

    let forecast = controller.forecast(&temperature, 6).await?;
    println!("📈 {} forecast: {:?}", forecast.method_used, forecast.values());

    println!("🔌 Taking the model service offline");
    service.online.store(false, Ordering::SeqCst);
    let forecast = controller.forecast(&temperature, 6).await?;
    println!(
        "📉 {} forecast (humidity corrected: {}, confidence: {:.2}): {:?}",
        forecast.method_used,
        forecast.exogenous_corrected,
        forecast.confidence.unwrap_or_default(),
        forecast.values()
    );

    println!("{}", controller.fallback_info(&temperature).await?.to_json()?);

    controller.shutdown().await?;
    Ok(())
}
