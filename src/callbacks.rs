// src/callbacks.rs

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{AlmanacError, AlmanacResult};
use crate::model::ModelState;
use crate::types::{AggregatedPoint, ControllerMode, SwitchReason};

/// The primary (external) forecaster
///
/// Implement this to plug any model service into the controller. Calls are
/// bounded by the configured timeout; a timeout, an error, or an answer of
/// the wrong shape all count as the primary being unavailable.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrimaryForecaster: Send + Sync {
    /// Predict the next `horizon` hourly values
    ///
    /// # Arguments
    /// * `metric_key` - Stream being forecast
    /// * `horizon` - Number of hourly values requested
    /// * `recent_history` - The stream's aggregated series, oldest first
    ///
    /// # Returns
    /// * `Ok(values)` - Exactly `horizon` finite values
    /// * `Err(error)` - The forecaster could not answer
    async fn predict(
        &self,
        metric_key: &str,
        horizon: usize,
        recent_history: &[AggregatedPoint],
    ) -> AlmanacResult<Vec<f64>>;

    /// Cheap reachability probe used before switching back from the fallback
    async fn health_check(&self) -> AlmanacResult<bool> {
        // Default implementation: assume reachable
        Ok(true)
    }
}

/// Read access to persisted hourly history, used for warm starts
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Previously aggregated points for a stream, in any order
    async fn load_history(&self, metric_key: &str) -> AlmanacResult<Vec<AggregatedPoint>>;
}

/// Trait for receiving controller events
///
/// Useful for alerting, dashboards, or audit logs.
#[async_trait]
pub trait ForecastObserver: Send + Sync {
    /// Called after a stream switched between primary and fallback
    async fn on_mode_change(
        &self,
        _metric_key: &str,
        _from: ControllerMode,
        _to: ControllerMode,
        _reason: &SwitchReason,
    ) -> AlmanacResult<()> {
        Ok(())
    }

    /// Called after a new fallback model has been swapped in
    async fn on_model_installed(&self, _state: &ModelState) -> AlmanacResult<()> {
        Ok(())
    }

    /// Called when a raw sample was dropped
    async fn on_sample_rejected(&self, _metric_key: &str, _error: &AlmanacError) -> AlmanacResult<()> {
        Ok(())
    }
}

/// Combine all callbacks into a single struct for easier management
#[derive(Clone)]
pub struct ControllerCallbacks {
    pub primary: Arc<dyn PrimaryForecaster>,
    pub history: Option<Arc<dyn HistorySource>>,
    pub observers: Vec<Arc<dyn ForecastObserver>>,
}

impl ControllerCallbacks {
    pub fn new(primary: Arc<dyn PrimaryForecaster>) -> Self {
        Self {
            primary,
            history: None,
            observers: Vec::new(),
        }
    }

    /// Source of persisted history for warm starts
    pub fn with_history(mut self, history: Arc<dyn HistorySource>) -> Self {
        self.history = Some(history);
        self
    }

    /// Add an observer to receive controller events
    pub fn add_observer(mut self, observer: Arc<dyn ForecastObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}
