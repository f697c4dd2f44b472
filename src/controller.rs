// src/controller.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::callbacks::ControllerCallbacks;
use crate::config::ForecastConfig;
use crate::error::{AlmanacError, AlmanacResult};
use crate::exogenous::ExogenousCorrector;
use crate::model::{forecast_confidence, FallbackForecastModel, ModelState};
use crate::scheduler::Scheduler;
use crate::seasonality::{SeasonalProfile, SeasonalityAnalyzer};
use crate::tracker::ErrorTracker;
use crate::types::{
    AggregatedPoint, ControllerMode, FallbackInfo, ForecastMethod, ForecastPoint, ForecastResult,
    MetricKey, MetricValue, RawSample, SwitchReason, Timestamp, SECONDS_PER_HOUR,
};
use crate::utils::following_hours;

/// Streams refitted in parallel by `refit_all`
const REFIT_CONCURRENCY: usize = 4;

/// Status information about the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub is_running: bool,
    pub streams_tracked: usize,
    pub total_forecasts: u64,
    pub last_refit: Option<DateTime<Utc>>,
}

/// A mode transition to report to observers once the stream lock is released
#[derive(Debug)]
struct ModeChange {
    metric_key: MetricKey,
    from: ControllerMode,
    to: ControllerMode,
    reason: SwitchReason,
}

/// Everything the controller knows about one metric stream
struct StreamState {
    metric_key: MetricKey,
    aggregator: Aggregator,
    mode: ControllerMode,
    /// Last switch to fallback or health re-check, for the cool-down
    last_switch_attempt: Option<Instant>,
    primary_errors: ErrorTracker,
    fallback_errors: ErrorTracker,
    /// Served predictions awaiting ground truth, by hour
    pending: BTreeMap<Timestamp, (ForecastMethod, MetricValue)>,
    model: Option<Arc<ModelState>>,
    profile: Arc<SeasonalProfile>,
    refit_requested: bool,
}

impl StreamState {
    fn new(metric_key: &str, config: &ForecastConfig) -> Self {
        Self {
            metric_key: metric_key.to_string(),
            aggregator: Aggregator::new(metric_key, config.aggregation.clone()),
            mode: ControllerMode::UsingPrimary,
            last_switch_attempt: None,
            primary_errors: ErrorTracker::new(config.error_window_size, config.min_error_records),
            fallback_errors: ErrorTracker::new(config.error_window_size, config.min_error_records),
            pending: BTreeMap::new(),
            model: None,
            profile: Arc::new(SeasonalProfile::disabled(0)),
            refit_requested: false,
        }
    }

    /// Closed hourly series, or the open bucket alone while nothing has closed
    fn history(&self) -> Vec<AggregatedPoint> {
        let series = self.aggregator.snapshot();
        if series.is_empty() {
            self.aggregator.open_bucket().into_iter().collect()
        } else {
            series
        }
    }

    fn tracker_for(&self, method: ForecastMethod) -> &ErrorTracker {
        if method.is_fallback() {
            &self.fallback_errors
        } else {
            &self.primary_errors
        }
    }

    fn switch_mode(&mut self, to: ControllerMode, reason: SwitchReason) -> Option<ModeChange> {
        let from = self.mode;
        if from == to {
            return None;
        }

        self.mode = to;
        if to == ControllerMode::UsingFallback {
            self.last_switch_attempt = Some(Instant::now());
            warn!(metric_key = %self.metric_key, ?reason, "switching to fallback forecasting");
        } else {
            info!(metric_key = %self.metric_key, ?reason, "switching back to primary forecasting");
        }

        Some(ModeChange {
            metric_key: self.metric_key.clone(),
            from,
            to,
            reason,
        })
    }

    /// Score pending predictions against newly closed hours
    fn settle(&mut self, closed: &[AggregatedPoint]) {
        for point in closed {
            let Some((method, predicted)) = self.pending.remove(&point.hour_timestamp) else {
                continue;
            };
            if point.is_filled() {
                continue;
            }

            let tracker = if method.is_fallback() {
                &mut self.fallback_errors
            } else {
                &mut self.primary_errors
            };
            let error = tracker.record(predicted, point.mean_value, point.hour_timestamp);
            debug!(metric_key = %self.metric_key, %method, error, hour = point.hour_timestamp, "scored prediction");
        }

        if let Some(last) = closed.last() {
            let last_hour = last.hour_timestamp;
            self.pending.retain(|&hour, _| hour > last_hour);
        }
    }

    /// Apply MAE rules; returns a mode change and whether a refit is due
    fn evaluate_mae(&mut self, threshold: f64) -> (Option<ModeChange>, bool) {
        let mut change = None;
        if self.mode == ControllerMode::UsingPrimary && self.primary_errors.should_use_fallback(threshold) {
            let mae = self.primary_errors.current_mae().unwrap_or_default();
            change = self.switch_mode(
                ControllerMode::UsingFallback,
                SwitchReason::MaeAboveThreshold { mae, threshold },
            );
        }

        let refit = !self.refit_requested && self.fallback_errors.should_use_fallback(threshold);
        if refit {
            self.refit_requested = true;
        }
        (change, refit)
    }
}

type StreamSlot = Arc<Mutex<StreamState>>;

struct ControllerInner {
    config: ForecastConfig,
    callbacks: ControllerCallbacks,
    analyzer: SeasonalityAnalyzer,
    model: FallbackForecastModel,
    corrector: ExogenousCorrector,
    streams: RwLock<HashMap<MetricKey, StreamSlot>>,
    generation: AtomicU64,
    total_forecasts: AtomicU64,
    running: AtomicBool,
    last_refit: RwLock<Option<DateTime<Utc>>>,
    shutdown: CancellationToken,
    refit_tx: mpsc::UnboundedSender<MetricKey>,
    refit_rx: Mutex<Option<mpsc::UnboundedReceiver<MetricKey>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

/// Hybrid forecast controller
///
/// Cheap to clone; all clones share the same streams.
#[derive(Clone)]
pub struct ForecastController {
    inner: Arc<ControllerInner>,
}

impl ForecastController {
    /// Create a controller; fails if the configuration is invalid
    pub fn new(config: ForecastConfig, callbacks: ControllerCallbacks) -> AlmanacResult<Self> {
        config.validate()?;
        let (refit_tx, refit_rx) = mpsc::unbounded_channel();

        Ok(Self {
            inner: Arc::new(ControllerInner {
                analyzer: SeasonalityAnalyzer::new(config.seasonality.clone(), config.seasonal_period_override),
                model: FallbackForecastModel::new(config.model.clone()),
                corrector: ExogenousCorrector::new(&config.exogenous),
                config,
                callbacks,
                streams: RwLock::new(HashMap::new()),
                generation: AtomicU64::new(0),
                total_forecasts: AtomicU64::new(0),
                running: AtomicBool::new(false),
                last_refit: RwLock::new(None),
                shutdown: CancellationToken::new(),
                refit_tx,
                refit_rx: Mutex::new(Some(refit_rx)),
                scheduler: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.inner.config
    }

    /// Token cancelled when shutdown is requested
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Warm-start configured streams and launch the background scheduler
    pub async fn start(&self) -> AlmanacResult<()> {
        let refit_rx = self
            .inner
            .refit_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| AlmanacError::unexpected("controller already started"))?;

        for key in self.inner.config.warm_start_keys.clone() {
            if let Err(e) = self.warm_start(&key).await {
                warn!(metric_key = %key, "Warm start failed: {}", e);
            }
        }

        self.inner.running.store(true, Ordering::SeqCst);
        let scheduler = Scheduler::new(self.clone(), refit_rx);
        *self.inner.scheduler.lock().await = Some(tokio::spawn(scheduler.run()));

        info!("Forecast controller started");
        Ok(())
    }

    /// Cooperative shutdown: in-flight fits stop at their next checkpoint and
    /// are discarded, then the scheduler is awaited
    pub async fn shutdown(&self) -> AlmanacResult<()> {
        info!("Forecast controller shutting down");
        self.inner.shutdown.cancel();

        let handle = self.inner.scheduler.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Scheduler task failed: {}", e);
            }
        }

        self.inner.running.store(false, Ordering::SeqCst);
        info!("Forecast controller stopped");
        Ok(())
    }

    /// Wait for Ctrl-C, then shut down
    pub async fn shutdown_on_ctrl_c(&self) -> AlmanacResult<()> {
        tokio::signal::ctrl_c().await?;
        info!("Interrupt received");
        self.shutdown().await
    }

    /// Feed one raw reading into its stream.
    ///
    /// A rejected sample is dropped and reported; the stream keeps going.
    pub async fn ingest(&self, metric_key: &str, timestamp: Timestamp, value: MetricValue) -> AlmanacResult<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(AlmanacError::cancelled("controller is shut down"));
        }

        let slot = self.slot_or_insert(metric_key).await;
        let mut state = slot.lock().await;

        let closed = match state.aggregator.push(RawSample::new(timestamp, value)) {
            Ok(closed) => closed,
            Err(e) => {
                drop(state);
                warn!(metric_key, "Dropped sample: {}", e);
                for observer in &self.inner.callbacks.observers {
                    if let Err(err) = observer.on_sample_rejected(metric_key, &e).await {
                        warn!("Observer error on sample rejected: {}", err);
                    }
                }
                return Err(e);
            }
        };

        let (change, refit) = self.after_close(&mut state, &closed);
        drop(state);

        if refit {
            self.request_refit(metric_key);
        }
        self.notify_mode_changes(change.into_iter().collect()).await;
        Ok(())
    }

    /// Close past hours of every stream, filling gaps for silent sensors
    pub async fn flush(&self, now: Timestamp) -> usize {
        let mut closed_total = 0;
        let mut changes = Vec::new();

        for (key, slot) in self.streams().await {
            let mut state = slot.lock().await;
            let closed = state.aggregator.flush(now);
            closed_total += closed.len();
            let (change, refit) = self.after_close(&mut state, &closed);
            drop(state);

            changes.extend(change);
            if refit {
                self.request_refit(&key);
            }
        }

        self.notify_mode_changes(changes).await;
        closed_total
    }

    /// Merge persisted history for `metric_key`; returns the retained length
    pub async fn warm_start(&self, metric_key: &str) -> AlmanacResult<usize> {
        let Some(history) = self.inner.callbacks.history.clone() else {
            return Ok(0);
        };

        let points = history.load_history(metric_key).await?;
        let loaded = points.len();
        let slot = self.slot_or_insert(metric_key).await;
        let retained = slot.lock().await.aggregator.warm_start(points);

        info!(metric_key, loaded, retained, "Warm-started stream");
        Ok(retained)
    }

    /// Forecast the next `horizon` hours of `metric_key`.
    ///
    /// Fails only for an unknown stream, an invalid horizon, a stream with
    /// no value yet, or after shutdown. Primary failures are absorbed by
    /// switching to the fallback for this very call.
    pub async fn forecast(&self, metric_key: &str, horizon: usize) -> AlmanacResult<ForecastResult> {
        let max = self.inner.config.max_horizon;
        if horizon == 0 || horizon > max {
            return Err(AlmanacError::InvalidHorizon { requested: horizon, max });
        }

        let slot = self
            .slot(metric_key)
            .await
            .ok_or_else(|| AlmanacError::unknown_metric(metric_key))?;

        let threshold = self.inner.config.mae_threshold;
        let mut changes = Vec::new();
        let (history, open_hour, mode, model, profile) = {
            let mut state = slot.lock().await;
            let history = state.history();
            if history.is_empty() {
                return Err(AlmanacError::insufficient_history(metric_key, 0, 1));
            }
            let open_hour = state.aggregator.open_bucket().map(|b| b.hour_timestamp);
            let (change, refit) = state.evaluate_mae(threshold);
            changes.extend(change);
            if refit {
                self.request_refit(metric_key);
            }
            (history, open_hour, state.mode, state.model.clone(), state.profile.clone())
        };

        // The horizon starts after the newest ingested hour; hours between the
        // last closed point and that one are forecast and then dropped.
        let last_hour = history.last().map(|p| p.hour_timestamp).unwrap_or_default();
        let anchor = open_hour.map_or(last_hour, |open| open.max(last_hour));
        let lead = ((anchor - last_hour) / SECONDS_PER_HOUR) as usize;
        let timestamps = following_hours(last_hour, lead + horizon);

        let mut primary_values = None;
        if mode == ControllerMode::UsingPrimary {
            match self.call_primary(metric_key, lead + horizon, &history).await {
                Ok(values) => primary_values = Some(values),
                Err(e) => {
                    let mut state = slot.lock().await;
                    if state.mode == ControllerMode::UsingPrimary {
                        changes.extend(state.switch_mode(
                            ControllerMode::UsingFallback,
                            SwitchReason::PrimaryFailure(e.to_string()),
                        ));
                    }
                }
            }
        }

        let climate_enabled = self.inner.config.climate.enabled;
        let (points, method, generation, corrected, confidence) = match primary_values {
            Some(values) => {
                let points = zip_points(&timestamps[lead..], &values[lead..]);
                (points, ForecastMethod::Primary, None, false, None)
            }
            None => {
                let model = match model {
                    Some(model) => model,
                    None => {
                        let analyze = self.needs_analysis(&profile, history.len());
                        let fitted = self.fit_model(metric_key, history.clone(), profile, analyze).await?;
                        self.install(&slot, fitted).await
                    }
                };

                let (values, method) = self.inner.model.forecast(&model, &history, &timestamps);
                let mut points = zip_points(&timestamps, &values);
                self.inner.config.climate.apply(last_hour, &mut points);
                let points = points.split_off(lead);
                let (points, corrected) = self.correct_for_humidity(metric_key, points).await;
                let confidence = forecast_confidence(&history);
                (points, method, Some(model.generation), corrected, Some(confidence))
            }
        };

        let current_mae = {
            let mut state = slot.lock().await;
            for point in &points {
                state.pending.insert(point.timestamp, (method, point.value));
            }
            state.tracker_for(method).current_mae()
        };

        self.notify_mode_changes(changes).await;
        self.inner.total_forecasts.fetch_add(1, Ordering::Relaxed);
        debug!(metric_key, horizon, %method, ?generation, "Forecast served");

        Ok(ForecastResult {
            metric_key: metric_key.to_string(),
            horizon: points,
            method_used: method,
            generated_at: Utc::now(),
            current_mae,
            model_generation: generation,
            exogenous_corrected: corrected,
            climate_adjusted: climate_enabled && method.is_fallback(),
            confidence,
        })
    }

    /// Record an externally observed error of the primary forecaster.
    ///
    /// Returns the primary's moving MAE after the update.
    pub async fn record_error(
        &self,
        metric_key: &str,
        predicted: MetricValue,
        observed: MetricValue,
        timestamp: Timestamp,
    ) -> AlmanacResult<Option<f64>> {
        let slot = self
            .slot(metric_key)
            .await
            .ok_or_else(|| AlmanacError::unknown_metric(metric_key))?;

        let (mae, change) = {
            let mut state = slot.lock().await;
            state.primary_errors.record(predicted, observed, timestamp);
            let (change, refit) = state.evaluate_mae(self.inner.config.mae_threshold);
            if refit {
                self.request_refit(metric_key);
            }
            (state.primary_errors.current_mae(), change)
        };

        self.notify_mode_changes(change.into_iter().collect()).await;
        Ok(mae)
    }

    /// Clear the primary's error window for a stream
    pub async fn reset_error_tracking(&self, metric_key: &str) -> AlmanacResult<()> {
        let slot = self
            .slot(metric_key)
            .await
            .ok_or_else(|| AlmanacError::unknown_metric(metric_key))?;
        slot.lock().await.primary_errors.reset();
        info!(metric_key, "Primary error tracking reset");
        Ok(())
    }

    /// Diagnostic snapshot of one stream
    pub async fn fallback_info(&self, metric_key: &str) -> AlmanacResult<FallbackInfo> {
        let slot = self
            .slot(metric_key)
            .await
            .ok_or_else(|| AlmanacError::unknown_metric(metric_key))?;
        let state = slot.lock().await;
        let model = state.model.as_deref();

        Ok(FallbackInfo {
            metric_key: metric_key.to_string(),
            mode: state.mode,
            current_mae: state.primary_errors.current_mae(),
            fallback_mae: state.fallback_errors.current_mae(),
            mae_threshold: self.inner.config.mae_threshold,
            error_window_len: state.primary_errors.len(),
            last_fit_timestamp: model.map(|m| m.fit_timestamp),
            model_method: model.map(ModelState::method),
            model_order: model.and_then(|m| m.order),
            model_generation: model.map(|m| m.generation),
            degradation: model.and_then(|m| m.degradation.clone()),
            seasonal_profile_summary: Some(state.profile.summary()),
            aggregated_points: state.aggregator.len(),
        })
    }

    /// Current mode of a stream
    pub async fn mode(&self, metric_key: &str) -> AlmanacResult<ControllerMode> {
        let slot = self
            .slot(metric_key)
            .await
            .ok_or_else(|| AlmanacError::unknown_metric(metric_key))?;
        let mode = slot.lock().await.mode;
        Ok(mode)
    }

    /// Copy of a stream's retained hourly series
    pub async fn series(&self, metric_key: &str) -> AlmanacResult<Vec<AggregatedPoint>> {
        let slot = self
            .slot(metric_key)
            .await
            .ok_or_else(|| AlmanacError::unknown_metric(metric_key))?;
        let series = slot.lock().await.aggregator.snapshot();
        Ok(series)
    }

    pub async fn status(&self) -> ControllerStatus {
        ControllerStatus {
            is_running: self.inner.running.load(Ordering::SeqCst),
            streams_tracked: self.inner.streams.read().await.len(),
            total_forecasts: self.inner.total_forecasts.load(Ordering::Relaxed),
            last_refit: *self.inner.last_refit.read().await,
        }
    }

    /// Try to return fallback streams to the primary.
    ///
    /// Streams still inside their cool-down are skipped. Returns how many
    /// switched back.
    pub async fn check_primary_health(&self) -> AlmanacResult<usize> {
        let cooldown = self.inner.config.switch_cooldown();
        let mut eligible = Vec::new();

        for (key, slot) in self.streams().await {
            let mut state = slot.lock().await;
            if state.mode != ControllerMode::UsingFallback {
                continue;
            }
            if state.last_switch_attempt.map_or(false, |at| at.elapsed() < cooldown) {
                debug!(metric_key = %key, "Switch-back skipped due to cooldown");
                continue;
            }
            state.last_switch_attempt = Some(Instant::now());
            drop(state);
            eligible.push(slot);
        }

        if eligible.is_empty() {
            return Ok(0);
        }

        let probe = timeout(self.inner.config.primary_timeout(), self.inner.callbacks.primary.health_check()).await;
        if !matches!(probe, Ok(Ok(true))) {
            warn!(streams = eligible.len(), "Primary forecaster still unavailable");
            return Ok(0);
        }

        let threshold = self.inner.config.mae_threshold;
        let mut changes = Vec::new();
        for slot in eligible {
            let mut state = slot.lock().await;
            if state.mode != ControllerMode::UsingFallback {
                continue;
            }

            let reference = state.aggregator.series().back().map(|p| p.hour_timestamp).unwrap_or_default();
            let since = reference.saturating_sub(self.inner.config.evidence_max_age_secs);
            if let Some((mae, records)) = state.primary_errors.recent_mae(since) {
                if mae >= threshold {
                    info!(metric_key = %state.metric_key, mae, records, "Primary reachable but MAE still above threshold");
                    continue;
                }
            }

            state.primary_errors.reset();
            changes.extend(state.switch_mode(ControllerMode::UsingPrimary, SwitchReason::PrimaryRecovered));
        }

        let recovered = changes.len();
        self.notify_mode_changes(changes).await;
        Ok(recovered)
    }

    /// Fit a new fallback model for one stream off the request path and swap it in.
    ///
    /// Returns `false` when there is nothing to fit or a newer model won the race.
    pub async fn refit_stream(&self, metric_key: &str) -> AlmanacResult<bool> {
        let slot = self
            .slot(metric_key)
            .await
            .ok_or_else(|| AlmanacError::unknown_metric(metric_key))?;

        let (history, profile) = {
            let state = slot.lock().await;
            (state.history(), state.profile.clone())
        };
        if history.is_empty() {
            return Ok(false);
        }

        let analyze = self.needs_analysis(&profile, history.len());
        let fitted = self.fit_model(metric_key, history, profile, analyze).await?;
        if self.inner.shutdown.is_cancelled() {
            return Err(AlmanacError::cancelled("refit finished after shutdown; discarded"));
        }

        let generation = fitted.generation;
        let installed = self.install(&slot, fitted).await;
        Ok(installed.generation == generation)
    }

    /// Refit every stream, a few at a time; returns how many new models were installed
    pub async fn refit_all(&self) -> AlmanacResult<usize> {
        let keys: Vec<MetricKey> = self.streams().await.into_iter().map(|(key, _)| key).collect();
        let outcomes: Vec<(MetricKey, AlmanacResult<bool>)> = stream::iter(keys)
            .map(|key| async move {
                let outcome = self.refit_stream(&key).await;
                (key, outcome)
            })
            .buffer_unordered(REFIT_CONCURRENCY)
            .collect()
            .await;

        let mut installed = 0;
        for (key, outcome) in outcomes {
            match outcome {
                Ok(true) => installed += 1,
                Ok(false) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => error!(metric_key = %key, "Refit failed: {}", e),
            }
        }
        Ok(installed)
    }

    /// Recompute every stream's seasonal profile
    pub async fn refresh_seasonality(&self) -> usize {
        let mut refreshed = 0;
        for (key, slot) in self.streams().await {
            if self.inner.shutdown.is_cancelled() {
                break;
            }
            let history = slot.lock().await.aggregator.snapshot();
            let profile = Arc::new(self.inner.analyzer.analyze(&history));
            debug!(metric_key = %key, dominant_period = ?profile.dominant_period, "Seasonality refreshed");

            slot.lock().await.profile = profile;
            refreshed += 1;
        }
        refreshed
    }

    async fn slot(&self, metric_key: &str) -> Option<StreamSlot> {
        self.inner.streams.read().await.get(metric_key).cloned()
    }

    async fn slot_or_insert(&self, metric_key: &str) -> StreamSlot {
        if let Some(slot) = self.slot(metric_key).await {
            return slot;
        }

        let mut streams = self.inner.streams.write().await;
        streams
            .entry(metric_key.to_string())
            .or_insert_with(|| {
                debug!(metric_key, "Tracking new stream");
                Arc::new(Mutex::new(StreamState::new(metric_key, &self.inner.config)))
            })
            .clone()
    }

    async fn streams(&self) -> Vec<(MetricKey, StreamSlot)> {
        self.inner
            .streams
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn after_close(&self, state: &mut StreamState, closed: &[AggregatedPoint]) -> (Option<ModeChange>, bool) {
        if closed.is_empty() {
            return (None, false);
        }
        state.settle(closed);
        state.evaluate_mae(self.inner.config.mae_threshold)
    }

    fn request_refit(&self, metric_key: &str) {
        info!(metric_key, "Fallback MAE above threshold, requesting refit");
        if self.inner.refit_tx.send(metric_key.to_string()).is_err() {
            debug!(metric_key, "Scheduler gone, refit request dropped");
        }
    }

    fn needs_analysis(&self, profile: &SeasonalProfile, points: usize) -> bool {
        !profile.is_enabled() && points >= self.inner.config.seasonality.min_history
    }

    async fn call_primary(&self, metric_key: &str, horizon: usize, history: &[AggregatedPoint]) -> AlmanacResult<Vec<f64>> {
        let limit = self.inner.config.primary_timeout();
        let values = match timeout(limit, self.inner.callbacks.primary.predict(metric_key, horizon, history)).await {
            Ok(Ok(values)) => values,
            Ok(Err(e)) => return Err(AlmanacError::primary_unavailable(e.to_string())),
            Err(_) => {
                return Err(AlmanacError::primary_unavailable(format!(
                    "no answer within {}ms",
                    limit.as_millis()
                )))
            }
        };

        if values.len() != horizon {
            return Err(AlmanacError::primary_unavailable(format!(
                "expected {} values, got {}",
                horizon,
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AlmanacError::primary_unavailable("non-finite value in forecast"));
        }
        Ok(values)
    }

    async fn fit_model(
        &self,
        metric_key: &str,
        history: Vec<AggregatedPoint>,
        profile: Arc<SeasonalProfile>,
        analyze: bool,
    ) -> AlmanacResult<ModelState> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let model = self.inner.model.clone();
        let analyzer = self.inner.analyzer.clone();
        let cancel = self.inner.shutdown.child_token();
        let key = metric_key.to_string();

        let fitted = tokio::task::spawn_blocking(move || {
            let profile = if analyze { Arc::new(analyzer.analyze(&history)) } else { profile };
            model.fit(&key, &history, profile, generation, &cancel)
        })
        .await??;

        Ok(fitted)
    }

    /// Swap `fitted` in unless a newer generation is already installed.
    ///
    /// Returns the model that is live afterwards.
    async fn install(&self, slot: &StreamSlot, fitted: ModelState) -> Arc<ModelState> {
        let fitted = Arc::new(fitted);
        let live = {
            let mut state = slot.lock().await;
            let newer = state.model.as_ref().map_or(true, |m| m.generation < fitted.generation);
            if newer {
                if fitted.profile.detected_at >= state.profile.detected_at {
                    state.profile = fitted.profile.clone();
                }
                state.model = Some(fitted.clone());
                state.fallback_errors.reset();
                state.refit_requested = false;
            }
            state.model.clone().unwrap_or_else(|| fitted.clone())
        };

        if live.generation != fitted.generation {
            debug!(metric_key = %fitted.metric_key, generation = fitted.generation, "Model superseded, not installed");
            return live;
        }

        *self.inner.last_refit.write().await = Some(fitted.fit_timestamp);
        info!(
            metric_key = %fitted.metric_key,
            generation = fitted.generation,
            method = %fitted.method(),
            degradation = ?fitted.degradation,
            "Installed fallback model"
        );
        for observer in &self.inner.callbacks.observers {
            if let Err(e) = observer.on_model_installed(&fitted).await {
                warn!("Observer error on model installed: {}", e);
            }
        }
        live
    }

    async fn correct_for_humidity(&self, metric_key: &str, points: Vec<ForecastPoint>) -> (Vec<ForecastPoint>, bool) {
        let Some(humidity_key) = self.inner.config.exogenous.humidity_for(metric_key) else {
            return (points, false);
        };
        let Some(slot) = self.slot(humidity_key).await else {
            debug!(metric_key, humidity_key = %humidity_key, "No humidity stream yet");
            return (points, false);
        };

        let humidity = slot.lock().await.history();
        self.inner.corrector.correct(&points, &humidity)
    }

    async fn notify_mode_changes(&self, changes: Vec<ModeChange>) {
        for change in changes {
            for observer in &self.inner.callbacks.observers {
                if let Err(e) = observer
                    .on_mode_change(&change.metric_key, change.from, change.to, &change.reason)
                    .await
                {
                    warn!("Observer error on mode change: {}", e);
                }
            }
        }
    }
}

fn zip_points(timestamps: &[Timestamp], values: &[f64]) -> Vec<ForecastPoint> {
    timestamps
        .iter()
        .zip(values)
        .map(|(&timestamp, &value)| ForecastPoint { timestamp, value })
        .collect()
}
