// src/scheduler.rs

use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::controller::ForecastController;
use crate::types::MetricKey;
use crate::utils::current_timestamp;

/// Background loop driving seasonality refreshes, refits, health re-checks
/// and bucket flushes until the controller's shutdown token fires.
pub(crate) struct Scheduler {
    controller: ForecastController,
    refit_rx: mpsc::UnboundedReceiver<MetricKey>,
}

impl Scheduler {
    pub(crate) fn new(controller: ForecastController, refit_rx: mpsc::UnboundedReceiver<MetricKey>) -> Self {
        Self { controller, refit_rx }
    }

    pub(crate) async fn run(mut self) {
        let config = self.controller.config().clone();
        let shutdown = self.controller.shutdown_token();

        let mut seasonality_timer = interval(Duration::from_secs(config.seasonality.refresh_interval_secs));
        let mut refit_timer = interval(Duration::from_secs(config.model.refit_interval_secs));
        let mut health_timer = interval(Duration::from_secs(config.health_check_interval_secs));
        let mut flush_timer = interval(Duration::from_secs(config.flush_interval_secs));
        for timer in [&mut seasonality_timer, &mut refit_timer, &mut health_timer, &mut flush_timer] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        info!("Scheduler starting...");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping scheduler");
                    break;
                }

                // Refits requested by the MAE tracker
                Some(metric_key) = self.refit_rx.recv() => {
                    match self.controller.refit_stream(&metric_key).await {
                        Ok(installed) => debug!(metric_key = %metric_key, installed, "Requested refit finished"),
                        Err(e) if e.is_cancelled() => break,
                        Err(e) => error!(metric_key = %metric_key, "Requested refit failed: {}", e),
                    }
                }

                _ = seasonality_timer.tick() => {
                    let refreshed = self.controller.refresh_seasonality().await;
                    debug!(streams = refreshed, "Seasonality refresh complete");
                }

                _ = refit_timer.tick() => {
                    match self.controller.refit_all().await {
                        Ok(installed) => debug!(installed, "Scheduled refit complete"),
                        Err(e) if e.is_cancelled() => break,
                        Err(e) => error!("Error during scheduled refit: {}", e),
                    }
                }

                _ = health_timer.tick() => {
                    match self.controller.check_primary_health().await {
                        Ok(0) => {}
                        Ok(recovered) => info!(recovered, "Streams returned to primary"),
                        Err(e) => error!("Error during health check: {}", e),
                    }
                }

                _ = flush_timer.tick() => {
                    let closed = self.controller.flush(current_timestamp()).await;
                    if closed > 0 {
                        debug!(closed, "Flushed idle buckets");
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }
}
