#[cfg(test)]
mod tests {
	use crate::*;
	use crate::utils::current_timestamp;
	use async_trait::async_trait;
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
	use std::sync::{Arc, Mutex};
	use tokio::time::Duration;
	use tokio_test::{assert_err, assert_ok};

	const H: u64 = SECONDS_PER_HOUR;

	/// Always answers with a flat line at `value`
	struct DummyPrimary {
		value: f64,
	}
	#[async_trait]
	impl PrimaryForecaster for DummyPrimary {
		async fn predict(&self, _metric_key: &str, horizon: usize, _recent_history: &[AggregatedPoint]) -> AlmanacResult<Vec<f64>> {
			Ok(vec![self.value; horizon])
		}
	}

	/// Never answers successfully
	struct DummyFailingPrimary;
	#[async_trait]
	impl PrimaryForecaster for DummyFailingPrimary {
		async fn predict(&self, _metric_key: &str, _horizon: usize, _recent_history: &[AggregatedPoint]) -> AlmanacResult<Vec<f64>> {
			Err(AlmanacError::primary_unavailable("model service offline"))
		}
		async fn health_check(&self) -> AlmanacResult<bool> {
			Ok(false)
		}
	}

	/// Outage and health are switched from the test body
	struct ScriptedPrimary {
		failing: AtomicBool,
		healthy: AtomicBool,
		calls: AtomicUsize,
	}
	impl ScriptedPrimary {
		fn new() -> Self {
			Self {
				failing: AtomicBool::new(false),
				healthy: AtomicBool::new(true),
				calls: AtomicUsize::new(0),
			}
		}
	}
	#[async_trait]
	impl PrimaryForecaster for ScriptedPrimary {
		async fn predict(&self, _metric_key: &str, horizon: usize, _recent_history: &[AggregatedPoint]) -> AlmanacResult<Vec<f64>> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			if self.failing.load(Ordering::SeqCst) {
				return Err(AlmanacError::primary_unavailable("scripted outage"));
			}
			Ok(vec![22.0; horizon])
		}
		async fn health_check(&self) -> AlmanacResult<bool> {
			Ok(self.healthy.load(Ordering::SeqCst))
		}
	}

	struct DummyHistory {
		points: Vec<AggregatedPoint>,
	}
	#[async_trait]
	impl HistorySource for DummyHistory {
		async fn load_history(&self, _metric_key: &str) -> AlmanacResult<Vec<AggregatedPoint>> {
			Ok(self.points.clone())
		}
	}

	/// Answers only after the test clock passes `delay`
	struct SlowPrimary {
		delay: Duration,
	}
	#[async_trait]
	impl PrimaryForecaster for SlowPrimary {
		async fn predict(&self, _metric_key: &str, horizon: usize, _recent_history: &[AggregatedPoint]) -> AlmanacResult<Vec<f64>> {
			tokio::time::sleep(self.delay).await;
			Ok(vec![30.0; horizon])
		}
	}

	#[derive(Default)]
	struct RecordingObserver {
		changes: Mutex<Vec<(String, ControllerMode, ControllerMode)>>,
		reasons: Mutex<Vec<SwitchReason>>,
		installs: AtomicUsize,
		generations: Mutex<Vec<u64>>,
	}
	#[async_trait]
	impl ForecastObserver for RecordingObserver {
		async fn on_mode_change(&self, metric_key: &str, from: ControllerMode, to: ControllerMode, reason: &SwitchReason) -> AlmanacResult<()> {
			self.changes.lock().unwrap().push((metric_key.to_string(), from, to));
			self.reasons.lock().unwrap().push(reason.clone());
			Ok(())
		}
		async fn on_model_installed(&self, state: &ModelState) -> AlmanacResult<()> {
			self.installs.fetch_add(1, Ordering::SeqCst);
			self.generations.lock().unwrap().push(state.generation);
			Ok(())
		}
	}

	fn noise(h: u64) -> f64 {
		let x = h.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
		((x >> 33) % 1000) as f64 / 1000.0 - 0.5
	}

	fn daily_temperature(h: u64) -> f64 {
		22.0 + 2.0 * (2.0 * std::f64::consts::PI * h as f64 / 24.0).cos() + 0.3 * noise(h)
	}

	fn init_tracing() {
		let _ = tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_test_writer()
			.try_init();
	}

	fn controller_with(config: ForecastConfig, primary: Arc<dyn PrimaryForecaster>) -> ForecastController {
		ForecastController::new(config, ControllerCallbacks::new(primary)).unwrap()
	}

	/// One reading a minute past each hour, starting at `start_hour`
	async fn ingest_hours(controller: &ForecastController, key: &str, start_hour: u64, values: &[f64]) {
		for (i, &value) in values.iter().enumerate() {
			let ts = (start_hour + i as u64) * H + 60;
			controller.ingest(key, ts, value).await.unwrap();
		}
	}

	fn temperatures(hours: u64) -> Vec<f64> {
		(0..hours).map(daily_temperature).collect()
	}

	#[tokio::test]
	async fn test_fallback_horizon_is_contiguous() {
		let controller = controller_with(ForecastConfig::default(), Arc::new(DummyFailingPrimary));
		ingest_hours(&controller, "rack/temperature", 0, &temperatures(48)).await;

		let result = controller.forecast("rack/temperature", 24).await.unwrap();
		assert_eq!(result.horizon.len(), 24);
		// hour 47 is still open, so the horizon starts after it
		assert_eq!(result.horizon[0].timestamp, 48 * H);
		for pair in result.horizon.windows(2) {
			assert_eq!(pair[1].timestamp - pair[0].timestamp, H);
		}
		assert!(result.values().iter().all(|v| v.is_finite()));

		let confidence = result.confidence.unwrap();
		assert!((0.5..=0.95).contains(&confidence));
		assert!(!result.climate_adjusted);
	}

	#[tokio::test]
	async fn test_horizon_never_overlaps_ingested_hours() {
		let controller = controller_with(ForecastConfig::default(), Arc::new(DummyFailingPrimary));
		controller.ingest("rack/temperature", 9 * H + 300, 21.0).await.unwrap();
		controller.ingest("rack/temperature", 10 * H + 300, 21.5).await.unwrap();

		let result = controller.forecast("rack/temperature", 3).await.unwrap();
		let stamps: Vec<u64> = result.horizon.iter().map(|p| p.timestamp).collect();
		assert_eq!(stamps, vec![11 * H, 12 * H, 13 * H]);
		assert!(stamps.iter().all(|&ts| ts > 10 * H + 300));
	}

	#[tokio::test]
	async fn test_climate_flag_follows_adjustment() {
		let config = ForecastConfig::builder()
			.climate(ClimateAdjustment { enabled: true, ..Default::default() })
			.build();
		let controller = controller_with(config, Arc::new(DummyFailingPrimary));
		ingest_hours(&controller, "rack/temperature", 0, &temperatures(30)).await;

		let result = controller.forecast("rack/temperature", 6).await.unwrap();
		assert!(result.method_used.is_fallback());
		assert!(result.climate_adjusted);
		assert!(result.confidence.is_some());
	}

	#[tokio::test]
	async fn test_series_stays_gap_free_under_both_policies() {
		for policy in [GapFillPolicy::CarryForward, GapFillPolicy::SeasonalNaive { period_hours: 2 }] {
			let config = ForecastConfig::builder().gap_fill(policy).build();
			let controller = controller_with(config, Arc::new(DummyPrimary { value: 20.0 }));

			controller.ingest("rack/humidity", 60, 40.0).await.unwrap();
			controller.ingest("rack/humidity", H + 60, 44.0).await.unwrap();
			controller.ingest("rack/humidity", 6 * H + 60, 48.0).await.unwrap();

			let series = controller.series("rack/humidity").await.unwrap();
			assert_eq!(series.len(), 6, "policy {:?}", policy);
			for (i, point) in series.iter().enumerate() {
				assert_eq!(point.hour_timestamp, i as u64 * H);
			}
			assert!(series[2..].iter().all(|p| p.is_filled()));
			assert_eq!(series[1].sample_count, 1);
		}
	}

	#[tokio::test]
	async fn test_error_window_never_exceeds_capacity() {
		let config = ForecastConfig::builder().error_window(5, 1).build();
		let controller = controller_with(config, Arc::new(DummyPrimary { value: 20.0 }));
		controller.ingest("rack/temperature", 60, 20.0).await.unwrap();

		for i in 0..20 {
			controller.record_error("rack/temperature", 20.5, 20.0, i).await.unwrap();
		}
		let info = controller.fallback_info("rack/temperature").await.unwrap();
		assert_eq!(info.error_window_len, 5);
		assert_eq!(info.current_mae, Some(0.5));
		assert_eq!(info.mode, ControllerMode::UsingPrimary);
	}

	#[tokio::test]
	async fn test_repeated_forecast_is_identical() {
		let controller = controller_with(ForecastConfig::default(), Arc::new(DummyFailingPrimary));
		ingest_hours(&controller, "rack/temperature", 0, &temperatures(72)).await;

		let first = controller.forecast("rack/temperature", 12).await.unwrap();
		let second = controller.forecast("rack/temperature", 12).await.unwrap();
		assert_eq!(first.model_generation, second.model_generation);
		assert_eq!(first.horizon, second.horizon);
		assert_eq!(first.method_used, second.method_used);
	}

	#[tokio::test]
	async fn test_short_history_uses_smoothing() {
		let controller = controller_with(ForecastConfig::default(), Arc::new(DummyFailingPrimary));
		ingest_hours(&controller, "rack/temperature", 0, &temperatures(100)).await;

		let result = controller.forecast("rack/temperature", 6).await.unwrap();
		assert_eq!(result.method_used, ForecastMethod::FallbackSmoothing);

		let info = controller.fallback_info("rack/temperature").await.unwrap();
		assert_eq!(info.model_method, Some(ForecastMethod::FallbackSmoothing));
		assert!(info.degradation.unwrap().contains("insufficient history"));
		assert!(info.model_order.is_none());
	}

	#[tokio::test]
	async fn test_single_reading_gets_flat_forecast() {
		let controller = controller_with(ForecastConfig::default(), Arc::new(DummyFailingPrimary));
		controller.ingest("rack/temperature", 60, 21.5).await.unwrap();

		let result = controller.forecast("rack/temperature", 4).await.unwrap();
		assert_eq!(result.values(), vec![21.5; 4]);
		assert_eq!(result.horizon[0].timestamp, H);
	}

	#[tokio::test]
	async fn test_grid_search_selects_seasonal_model() {
		let controller = controller_with(ForecastConfig::default(), Arc::new(DummyFailingPrimary));
		ingest_hours(&controller, "rack/temperature", 0, &temperatures(201)).await;

		let result = controller.forecast("rack/temperature", 24).await.unwrap();
		assert_eq!(result.method_used, ForecastMethod::FallbackSarima);
		assert_eq!(result.horizon.len(), 24);

		let info = controller.fallback_info("rack/temperature").await.unwrap();
		assert_eq!(info.model_order.unwrap().period, 24);
		assert_eq!(info.seasonal_profile_summary.unwrap().dominant_period, Some(24));
	}

	#[tokio::test]
	async fn test_fixed_order_is_respected() {
		let config = ForecastConfig::builder()
			.order_selection(OrderSelection::Fixed(ModelOrder::default()))
			.build();
		let controller = controller_with(config, Arc::new(DummyFailingPrimary));
		ingest_hours(&controller, "rack/temperature", 0, &temperatures(201)).await;

		let result = controller.forecast("rack/temperature", 24).await.unwrap();
		assert_eq!(result.method_used, ForecastMethod::FallbackSarima);
		assert_eq!(result.horizon.len(), 24);

		let info = controller.fallback_info("rack/temperature").await.unwrap();
		assert_eq!(info.model_order, Some(ModelOrder::default()));
		assert!(info.degradation.is_none());
	}

	#[tokio::test]
	async fn test_fixed_order_without_enough_history_for_seasonality() {
		let config = ForecastConfig::builder()
			.order_selection(OrderSelection::Fixed(ModelOrder::default()))
			.min_fit_points(48)
			.build();
		let controller = controller_with(config, Arc::new(DummyFailingPrimary));
		ingest_hours(&controller, "rack/temperature", 0, &temperatures(120)).await;

		let result = controller.forecast("rack/temperature", 12).await.unwrap();
		assert_eq!(result.method_used, ForecastMethod::FallbackSarima);

		let order = controller.fallback_info("rack/temperature").await.unwrap().model_order.unwrap();
		assert!(!order.is_seasonal());
		assert_eq!((order.p, order.d, order.q), (2, 1, 1));
	}

	#[tokio::test(start_paused = true)]
	async fn test_primary_timeout_switches_to_fallback() {
		let observer = Arc::new(RecordingObserver::default());
		let primary = Arc::new(SlowPrimary { delay: Duration::from_secs(10) });
		let config = ForecastConfig::builder().primary_timeout_ms(100).build();
		let callbacks = ControllerCallbacks::new(primary).add_observer(observer.clone());
		let controller = ForecastController::new(config, callbacks).unwrap();
		controller.ingest("rack/temperature", 60, 21.0).await.unwrap();

		let result = controller.forecast("rack/temperature", 3).await.unwrap();
		assert!(result.method_used.is_fallback());
		assert_eq!(result.values(), vec![21.0; 3]);
		assert_eq!(controller.mode("rack/temperature").await.unwrap(), ControllerMode::UsingFallback);

		let reasons = observer.reasons.lock().unwrap().clone();
		assert_eq!(reasons.len(), 1);
		match &reasons[0] {
			SwitchReason::PrimaryFailure(message) => assert!(message.contains("100ms")),
			other => panic!("unexpected reason {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_humidity_correction_adds_one_degree_at_seventy_percent() {
		let config = ForecastConfig::builder()
			.link_humidity("a/temperature", "a/humidity")
			.build();
		let controller = controller_with(config, Arc::new(DummyFailingPrimary));

		let values = temperatures(48);
		ingest_hours(&controller, "a/temperature", 0, &values).await;
		ingest_hours(&controller, "b/temperature", 0, &values).await;
		ingest_hours(&controller, "a/humidity", 0, &[70.0; 48]).await;

		let linked = controller.forecast("a/temperature", 12).await.unwrap();
		let unlinked = controller.forecast("b/temperature", 12).await.unwrap();
		assert!(linked.exogenous_corrected);
		assert!(!unlinked.exogenous_corrected);

		for (a, b) in linked.horizon.iter().zip(&unlinked.horizon) {
			assert_eq!(a.timestamp, b.timestamp);
			assert!((a.value - b.value - 1.0).abs() < 1e-9);
		}
	}

	#[tokio::test]
	async fn test_missing_humidity_stream_leaves_forecast_unchanged() {
		let config = ForecastConfig::builder()
			.link_humidity("a/temperature", "a/humidity")
			.build();
		let controller = controller_with(config, Arc::new(DummyFailingPrimary));
		ingest_hours(&controller, "a/temperature", 0, &temperatures(30)).await;

		let result = controller.forecast("a/temperature", 6).await.unwrap();
		assert!(!result.exogenous_corrected);
	}

	#[tokio::test]
	async fn test_primary_forecasts_are_not_corrected() {
		let config = ForecastConfig::builder()
			.link_humidity("a/temperature", "a/humidity")
			.build();
		let controller = controller_with(config, Arc::new(DummyPrimary { value: 23.0 }));
		ingest_hours(&controller, "a/temperature", 0, &temperatures(10)).await;
		ingest_hours(&controller, "a/humidity", 0, &[90.0; 10]).await;

		let result = controller.forecast("a/temperature", 6).await.unwrap();
		assert_eq!(result.method_used, ForecastMethod::Primary);
		assert_eq!(result.values(), vec![23.0; 6]);
		assert!(!result.exogenous_corrected);
	}

	#[tokio::test(start_paused = true)]
	async fn test_switch_back_waits_for_cooldown() {
		let primary = Arc::new(ScriptedPrimary::new());
		let config = ForecastConfig::builder().switch_cooldown_secs(300).build();
		let controller = controller_with(config, primary.clone());
		controller.ingest("rack/temperature", 60, 21.0).await.unwrap();

		primary.failing.store(true, Ordering::SeqCst);
		let result = controller.forecast("rack/temperature", 3).await.unwrap();
		assert!(result.method_used.is_fallback());
		assert_eq!(controller.mode("rack/temperature").await.unwrap(), ControllerMode::UsingFallback);

		// Fallback mode does not call the primary
		controller.forecast("rack/temperature", 3).await.unwrap();
		assert_eq!(primary.calls.load(Ordering::SeqCst), 1);

		primary.failing.store(false, Ordering::SeqCst);
		assert_eq!(controller.check_primary_health().await.unwrap(), 0);

		// Failed re-check restarts the cool-down
		primary.healthy.store(false, Ordering::SeqCst);
		tokio::time::advance(Duration::from_secs(301)).await;
		assert_eq!(controller.check_primary_health().await.unwrap(), 0);
		primary.healthy.store(true, Ordering::SeqCst);
		assert_eq!(controller.check_primary_health().await.unwrap(), 0);

		tokio::time::advance(Duration::from_secs(301)).await;
		assert_eq!(controller.check_primary_health().await.unwrap(), 1);
		assert_eq!(controller.mode("rack/temperature").await.unwrap(), ControllerMode::UsingPrimary);

		let result = controller.forecast("rack/temperature", 3).await.unwrap();
		assert_eq!(result.method_used, ForecastMethod::Primary);
		assert_eq!(result.values(), vec![22.0; 3]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_switch_back_requires_recent_low_mae() {
		let primary = Arc::new(ScriptedPrimary::new());
		let config = ForecastConfig::builder().error_window(24, 3).build();
		let controller = controller_with(config, primary);
		controller.ingest("rack/temperature", 60, 21.0).await.unwrap();

		for ts in 1..=3 {
			controller.record_error("rack/temperature", 31.0, 21.0, ts).await.unwrap();
		}
		assert_eq!(controller.mode("rack/temperature").await.unwrap(), ControllerMode::UsingFallback);

		tokio::time::advance(Duration::from_secs(301)).await;
		assert_eq!(controller.check_primary_health().await.unwrap(), 0);

		controller.reset_error_tracking("rack/temperature").await.unwrap();
		tokio::time::advance(Duration::from_secs(301)).await;
		assert_eq!(controller.check_primary_health().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_served_predictions_are_scored_automatically() {
		let config = ForecastConfig::builder().mae_threshold(4.0).error_window(24, 2).build();
		let controller = controller_with(config, Arc::new(DummyPrimary { value: 25.0 }));
		controller.ingest("rack/temperature", 60, 20.0).await.unwrap();

		let result = controller.forecast("rack/temperature", 3).await.unwrap();
		assert_eq!(result.method_used, ForecastMethod::Primary);
		assert!(result.current_mae.is_none());

		ingest_hours(&controller, "rack/temperature", 1, &[20.0, 20.0]).await;
		assert_eq!(controller.mode("rack/temperature").await.unwrap(), ControllerMode::UsingPrimary);

		controller.ingest("rack/temperature", 3 * H + 60, 20.0).await.unwrap();
		let info = controller.fallback_info("rack/temperature").await.unwrap();
		assert_eq!(info.current_mae, Some(5.0));
		assert_eq!(info.mode, ControllerMode::UsingFallback);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_ingest_refit_and_forecast() {
		// A wide grid keeps each refit busy long enough to overlap the forecasts
		let config = ForecastConfig::builder()
			.order_selection(OrderSelection::Grid { p: vec![0, 1, 2, 3], q: vec![0, 1, 2] })
			.build();
		let observer = Arc::new(RecordingObserver::default());
		let callbacks = ControllerCallbacks::new(Arc::new(DummyFailingPrimary)).add_observer(observer.clone());
		let controller = ForecastController::new(config, callbacks).unwrap();

		// Hours 0..=198 closed, hour 199 open; the ingest tasks below only add to hour 199
		ingest_hours(&controller, "rack/temperature", 0, &temperatures(200)).await;

		let mut tasks = Vec::new();
		for i in 0..24u64 {
			let controller = controller.clone();
			tasks.push(tokio::spawn(async move {
				match i % 3 {
					0 => controller.refit_stream("rack/temperature").await.map(|_| None),
					1 => controller
						.ingest("rack/temperature", 199 * H + 120 + i, 22.0)
						.await
						.map(|_| None),
					_ => controller.forecast("rack/temperature", 12).await.map(Some),
				}
			}));
		}

		let mut by_generation: HashMap<u64, Vec<f64>> = HashMap::new();
		for task in tasks {
			let Some(result) = task.await.unwrap().unwrap() else {
				continue;
			};
			assert_eq!(result.horizon.len(), 12);
			assert_eq!(result.horizon[0].timestamp, 200 * H);
			let generation = result.model_generation.unwrap();
			let values = result.values();
			match by_generation.get(&generation) {
				Some(seen) => assert_eq!(seen, &values),
				None => {
					by_generation.insert(generation, values);
				}
			}
		}
		assert!(!by_generation.is_empty());

		// Every forecast came from a model that was actually installed
		let installed = observer.generations.lock().unwrap().clone();
		for generation in by_generation.keys() {
			assert!(installed.contains(generation));
		}

		let series = controller.series("rack/temperature").await.unwrap();
		assert_eq!(series.len(), 168);
		assert_eq!(series.last().unwrap().hour_timestamp, 198 * H);

		let info = controller.fallback_info("rack/temperature").await.unwrap();
		assert!(installed.contains(&info.model_generation.unwrap()));
	}

	#[tokio::test]
	async fn test_refit_installs_newer_generation() {
		let observer = Arc::new(RecordingObserver::default());
		let callbacks = ControllerCallbacks::new(Arc::new(DummyFailingPrimary)).add_observer(observer.clone());
		let controller = ForecastController::new(ForecastConfig::default(), callbacks).unwrap();
		ingest_hours(&controller, "rack/temperature", 0, &temperatures(30)).await;

		let first = controller.forecast("rack/temperature", 6).await.unwrap();
		assert!(controller.refit_stream("rack/temperature").await.unwrap());
		let second = controller.forecast("rack/temperature", 6).await.unwrap();

		assert!(second.model_generation > first.model_generation);
		assert_eq!(observer.installs.load(Ordering::SeqCst), 2);
		assert!(controller.status().await.last_refit.is_some());
	}

	#[tokio::test]
	async fn test_observer_sees_mode_change() {
		let observer = Arc::new(RecordingObserver::default());
		let callbacks = ControllerCallbacks::new(Arc::new(DummyFailingPrimary)).add_observer(observer.clone());
		let controller = ForecastController::new(ForecastConfig::default(), callbacks).unwrap();

		controller.ingest("rack/temperature", 60, 20.0).await.unwrap();
		controller.forecast("rack/temperature", 2).await.unwrap();
		controller.forecast("rack/temperature", 2).await.unwrap();

		let changes = observer.changes.lock().unwrap().clone();
		assert_eq!(
			changes,
			vec![("rack/temperature".to_string(), ControllerMode::UsingPrimary, ControllerMode::UsingFallback)]
		);
	}

	#[tokio::test]
	async fn test_warm_start_from_history_source() {
		let points: Vec<AggregatedPoint> = (0..30)
			.map(|h| AggregatedPoint::new(h * H, daily_temperature(h), 6))
			.collect();
		let callbacks = ControllerCallbacks::new(Arc::new(DummyFailingPrimary))
			.with_history(Arc::new(DummyHistory { points }));
		let controller = ForecastController::new(ForecastConfig::default(), callbacks).unwrap();

		assert_eq!(controller.warm_start("rack/temperature").await.unwrap(), 30);
		controller.ingest("rack/temperature", 31 * H + 60, 22.0).await.unwrap();

		let series = controller.series("rack/temperature").await.unwrap();
		assert_eq!(series.len(), 31);
		assert!(series[30].is_filled());

		let result = controller.forecast("rack/temperature", 5).await.unwrap();
		assert_eq!(result.horizon[0].timestamp, 32 * H);
	}

	#[tokio::test]
	async fn test_controller_lifecycle() {
		let config = presets::enclosure_config(&["rack"], 5.0);
		init_tracing();
		let controller = controller_with(config, Arc::new(DummyPrimary { value: 21.0 }));
		assert_ok!(controller.start().await);
		assert_err!(controller.start().await);

		let now = current_timestamp();
		controller.ingest("rack/temperature", now, 21.0).await.unwrap();
		let result = controller.forecast("rack/temperature", 3).await.unwrap();
		assert_eq!(result.method_used, ForecastMethod::Primary);

		let status = controller.status().await;
		assert!(status.is_running);
		assert!(status.streams_tracked >= 1);
		assert_eq!(status.total_forecasts, 1);

		assert_ok!(controller.shutdown().await);
		assert!(!controller.status().await.is_running);
		let err = assert_err!(controller.ingest("rack/temperature", now, 21.0).await);
		assert!(err.is_cancelled());
	}

	#[test]
	fn test_error_variants() {
		let err = AlmanacError::config("bad config");
		assert!(matches!(err, AlmanacError::Config { .. }));
		let err2 = AlmanacError::unknown_metric("id");
		assert!(matches!(err2, AlmanacError::UnknownMetric { .. }));
		let err3 = AlmanacError::insufficient_history("id", 0, 1);
		assert!(matches!(err3, AlmanacError::InsufficientHistory { .. }));
	}
}
