//! # Fallback Forecast Model
//!
//! A self-contained forecaster that only needs the locally aggregated series.
//!
//! ## Fitting
//!
//! 1. The seasonal period comes from the stream's [`SeasonalProfile`]; when the
//!    profile is disabled the model is fitted without seasonal terms.
//! 2. The series is differenced (seasonal lag first, then lag one).
//! 3. Each candidate order is estimated with the Hannan–Rissanen two-stage
//!    regression: a long autoregression (Levinson–Durbin) supplies innovation
//!    estimates, then AR and MA lags (seasonal lags included) are solved by
//!    least squares.
//! 4. The candidate with the lowest AIC wins, provided a trial forecast stays
//!    within a sane envelope of the training data.
//!
//! Whenever that fails, or there are fewer than `min_fit_points` points, the
//! model degrades to damped Holt smoothing over the deseasonalised series.
//! Smoothing needs a single value to produce a forecast, so degradation never
//! fails.
//!
//! [`ModelState`] values are immutable once built. The controller swaps them
//! whole behind an `Arc`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AlmanacError, AlmanacResult};
use crate::seasonality::{SeasonalProfile, DAILY_PERIOD};
use crate::stats::{autocovariances, levinson_durbin, mean, solve_linear_system, variance};
use crate::types::{AggregatedPoint, ForecastMethod, MetricKey, Timestamp};

/// Recent points whose spread drives [`forecast_confidence`]
const CONFIDENCE_WINDOW: usize = 50;

/// Successive factors tried on fitted coefficients before giving up on an order
const ROOT_SHRINKAGE: [f64; 6] = [1.0, 0.95, 0.85, 0.7, 0.5, 0.25];

/// Seasonal ARIMA order `(p, d, q)(P, D, Q)s`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
    /// Seasonal period in hours; 0 means no seasonal part
    pub period: usize,
}

impl Default for ModelOrder {
    fn default() -> Self {
        Self {
            p: 2,
            d: 1,
            q: 1,
            seasonal_p: 1,
            seasonal_d: 1,
            seasonal_q: 1,
            period: DAILY_PERIOD,
        }
    }
}

impl ModelOrder {
    /// Same order with the seasonal part bound to `period`, or dropped
    pub fn with_period(self, period: Option<usize>) -> Self {
        match period {
            Some(s) if s >= 2 => Self { period: s, ..self },
            _ => Self {
                seasonal_p: 0,
                seasonal_d: 0,
                seasonal_q: 0,
                period: 0,
                ..self
            },
        }
    }

    pub fn is_seasonal(&self) -> bool {
        self.period >= 2
    }

    fn ar_lags(&self) -> Vec<usize> {
        let mut lags: BTreeSet<usize> = (1..=self.p).collect();
        if self.is_seasonal() {
            lags.extend((1..=self.seasonal_p).map(|k| k * self.period));
        }
        lags.into_iter().collect()
    }

    fn ma_lags(&self) -> Vec<usize> {
        let mut lags: BTreeSet<usize> = (1..=self.q).collect();
        if self.is_seasonal() {
            lags.extend((1..=self.seasonal_q).map(|k| k * self.period));
        }
        lags.into_iter().collect()
    }

    /// Differencing lags, seasonal ones first
    fn difference_lags(&self) -> Vec<usize> {
        let seasonal = if self.is_seasonal() { self.seasonal_d } else { 0 };
        std::iter::repeat(self.period)
            .take(seasonal)
            .chain(std::iter::repeat(1).take(self.d))
            .collect()
    }
}

impl fmt::Display for ModelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SARIMA({},{},{})", self.p, self.d, self.q)?;
        if self.is_seasonal() {
            write!(f, "({},{},{}){}", self.seasonal_p, self.seasonal_d, self.seasonal_q, self.period)?;
        }
        Ok(())
    }
}

/// How the non-seasonal order is chosen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderSelection {
    /// Always use this order (its period is replaced by the detected one)
    Fixed(ModelOrder),
    /// Try every `(p, q)` pair and keep the lowest AIC
    Grid { p: Vec<usize>, q: Vec<usize> },
}

impl Default for OrderSelection {
    fn default() -> Self {
        Self::Grid {
            p: vec![0, 1, 2],
            q: vec![0, 1],
        }
    }
}

/// Damped Holt parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingSettings {
    pub alpha: f64,
    pub beta: f64,
    pub damping: f64,
}

impl Default for SmoothingSettings {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            beta: 0.1,
            damping: 0.9,
        }
    }
}

/// Settings for fitting the fallback model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub order_selection: OrderSelection,
    /// Non-seasonal differencing used by the grid
    pub d: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
    /// Below this many hourly points the smoothing estimator is used
    pub min_fit_points: usize,
    pub smoothing: SmoothingSettings,
    pub refit_interval_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            order_selection: OrderSelection::default(),
            d: 1,
            seasonal_p: 1,
            seasonal_d: 1,
            seasonal_q: 1,
            min_fit_points: 168,
            smoothing: SmoothingSettings::default(),
            refit_interval_secs: 3600,
        }
    }
}

/// Estimated seasonal ARIMA coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarimaCoefficients {
    /// Mean of the differenced series (0 when any differencing is applied)
    pub mean: f64,
    /// `(lag, coefficient)` pairs
    pub ar: Vec<(usize, f64)>,
    pub ma: Vec<(usize, f64)>,
    pub sigma2: f64,
    pub aic: f64,
}

/// What a fit produced
#[derive(Debug, Clone, PartialEq)]
pub enum FittedModel {
    Sarima(SarimaCoefficients),
    Smoothing(SmoothingSettings),
}

/// A fully built model for one stream. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct ModelState {
    pub metric_key: MetricKey,
    /// Order of the seasonal model; `None` for smoothing
    pub order: Option<ModelOrder>,
    pub fitted: FittedModel,
    pub profile: Arc<SeasonalProfile>,
    pub fit_timestamp: DateTime<Utc>,
    /// Residual standard deviation (SARIMA) or one-step MAE (smoothing)
    pub fit_quality: f64,
    pub generation: u64,
    pub training_points: usize,
    /// Why the fit fell back to smoothing, if it did
    pub degradation: Option<String>,
}

impl ModelState {
    pub fn method(&self) -> ForecastMethod {
        match self.fitted {
            FittedModel::Sarima(_) => ForecastMethod::FallbackSarima,
            FittedModel::Smoothing(_) => ForecastMethod::FallbackSmoothing,
        }
    }
}

/// Fits and evaluates fallback models
#[derive(Debug, Clone)]
pub struct FallbackForecastModel {
    settings: ModelSettings,
}

impl FallbackForecastModel {
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// Build a new model for `series`.
    ///
    /// Only fails when `cancel` fires or the series is empty; every other
    /// problem degrades to smoothing.
    pub fn fit(
        &self,
        metric_key: &str,
        series: &[AggregatedPoint],
        profile: Arc<SeasonalProfile>,
        generation: u64,
        cancel: &CancellationToken,
    ) -> AlmanacResult<ModelState> {
        check_cancelled(cancel)?;
        if series.is_empty() {
            return Err(AlmanacError::insufficient_history(metric_key, 0, 1));
        }

        let values: Vec<f64> = series.iter().map(|p| p.mean_value).collect();
        if values.len() < self.settings.min_fit_points {
            let reason = format!(
                "insufficient history: {} of {} points",
                values.len(),
                self.settings.min_fit_points
            );
            debug!(metric_key, points = values.len(), "fitting smoothing estimator");
            return Ok(self.smoothing_state(metric_key, series, profile, generation, Some(reason)));
        }

        match self.fit_sarima(&values, &profile, cancel) {
            Ok((order, coefficients)) => {
                check_cancelled(cancel)?;
                debug!(metric_key, %order, aic = coefficients.aic, "seasonal model fitted");
                Ok(ModelState {
                    metric_key: metric_key.to_string(),
                    order: Some(order),
                    fit_quality: coefficients.sigma2.sqrt(),
                    fitted: FittedModel::Sarima(coefficients),
                    profile,
                    fit_timestamp: Utc::now(),
                    generation,
                    training_points: values.len(),
                    degradation: None,
                })
            }
            Err(error) if error.is_cancelled() => Err(error),
            Err(error) => {
                warn!(metric_key, %error, "seasonal fit failed, degrading to smoothing");
                Ok(self.smoothing_state(metric_key, series, profile, generation, Some(error.to_string())))
            }
        }
    }

    /// Forecast the values at `timestamps` (hours following `series`).
    ///
    /// Re-applies the fitted coefficients to the current series. A SARIMA
    /// model that yields non-finite output is answered by smoothing instead.
    pub fn forecast(
        &self,
        state: &ModelState,
        series: &[AggregatedPoint],
        timestamps: &[Timestamp],
    ) -> (Vec<f64>, ForecastMethod) {
        if let (FittedModel::Sarima(coefficients), Some(order)) = (&state.fitted, state.order) {
            let values: Vec<f64> = series.iter().map(|p| p.mean_value).collect();
            match sarima_forecast(&values, &order, coefficients, timestamps.len()) {
                Some(forecast) if forecast.iter().all(|v| v.is_finite()) => {
                    return (forecast, ForecastMethod::FallbackSarima);
                }
                _ => {
                    warn!(metric_key = %state.metric_key, generation = state.generation, "seasonal forecast unusable, using smoothing");
                }
            }
        }

        let params = match state.fitted {
            FittedModel::Smoothing(params) => params,
            FittedModel::Sarima(_) => self.settings.smoothing,
        };
        (
            smoothing_forecast(&params, &state.profile, series, timestamps),
            ForecastMethod::FallbackSmoothing,
        )
    }

    fn candidate_orders(&self, period: Option<usize>) -> Vec<ModelOrder> {
        match &self.settings.order_selection {
            OrderSelection::Fixed(order) => vec![order.with_period(period)],
            OrderSelection::Grid { p, q } => p
                .iter()
                .flat_map(|&p| q.iter().map(move |&q| (p, q)))
                .map(|(p, q)| {
                    ModelOrder {
                        p,
                        d: self.settings.d,
                        q,
                        seasonal_p: self.settings.seasonal_p,
                        seasonal_d: self.settings.seasonal_d,
                        seasonal_q: self.settings.seasonal_q,
                        period: 0,
                    }
                    .with_period(period)
                })
                .collect(),
        }
    }

    fn fit_sarima(
        &self,
        values: &[f64],
        profile: &SeasonalProfile,
        cancel: &CancellationToken,
    ) -> AlmanacResult<(ModelOrder, SarimaCoefficients)> {
        let candidates = self.candidate_orders(profile.dominant_period);
        if candidates.is_empty() {
            return Err(AlmanacError::fit_failure("empty order grid"));
        }

        let mut best: Option<(ModelOrder, SarimaCoefficients)> = None;
        let mut last_error = None;

        for order in candidates {
            check_cancelled(cancel)?;
            match estimate(values, &order) {
                Ok(coefficients) => {
                    debug!(%order, aic = coefficients.aic, "candidate estimated");
                    if best.as_ref().map_or(true, |(_, b)| coefficients.aic < b.aic) {
                        best = Some((order, coefficients));
                    }
                }
                Err(error) => {
                    debug!(%order, %error, "candidate rejected");
                    last_error = Some(error);
                }
            }
        }

        best.ok_or_else(|| last_error.unwrap_or_else(|| AlmanacError::fit_failure("no candidate order converged")))
    }

    fn smoothing_state(
        &self,
        metric_key: &str,
        series: &[AggregatedPoint],
        profile: Arc<SeasonalProfile>,
        generation: u64,
        degradation: Option<String>,
    ) -> ModelState {
        let params = self.settings.smoothing;
        ModelState {
            metric_key: metric_key.to_string(),
            order: None,
            fitted: FittedModel::Smoothing(params),
            fit_quality: one_step_mae(&params, &profile, series),
            profile,
            fit_timestamp: Utc::now(),
            generation,
            training_points: series.len(),
            degradation,
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> AlmanacResult<()> {
    if cancel.is_cancelled() {
        Err(AlmanacError::cancelled("model fit interrupted by shutdown"))
    } else {
        Ok(())
    }
}

/// Successive differences; `levels[0]` is the input, the last level is fully differenced
fn difference(values: &[f64], lags: &[usize]) -> Option<Vec<Vec<f64>>> {
    let mut levels = vec![values.to_vec()];
    for &lag in lags {
        let previous = levels.last()?;
        if previous.len() <= lag {
            return None;
        }
        let next: Vec<f64> = (lag..previous.len()).map(|i| previous[i] - previous[i - lag]).collect();
        levels.push(next);
    }
    Some(levels)
}

/// Extend the deepest level by `forecast` and undo each differencing step
fn integrate(mut levels: Vec<Vec<f64>>, lags: &[usize], forecast: &[f64]) -> Vec<f64> {
    let steps = forecast.len();
    let original_len = levels[0].len();
    if let Some(deepest) = levels.last_mut() {
        deepest.extend_from_slice(forecast);
    }

    for i in (1..levels.len()).rev() {
        let lag = lags[i - 1];
        let (lower, upper) = levels.split_at_mut(i);
        let previous = &mut lower[i - 1];
        let current = &upper[0];
        let start = previous.len();
        for j in start..start + steps {
            let value = current[j - lag] + previous[j - lag];
            previous.push(value);
        }
    }

    levels.swap_remove(0).split_off(original_len)
}

/// `e_t = w_t - Σ ar·w_{t-l} - Σ ma·e_{t-l}`, with pre-sample terms taken as zero
fn arma_residuals(w: &[f64], ar: &[(usize, f64)], ma: &[(usize, f64)]) -> Vec<f64> {
    let mut residuals = Vec::with_capacity(w.len());
    for t in 0..w.len() {
        let mut predicted = 0.0;
        for &(lag, phi) in ar {
            if t >= lag {
                predicted += phi * w[t - lag];
            }
        }
        for &(lag, theta) in ma {
            if t >= lag {
                predicted += theta * residuals[t - lag];
            }
        }
        residuals.push(w[t] - predicted);
    }
    residuals
}

fn arma_forecast(w: &[f64], residuals: &[f64], ar: &[(usize, f64)], ma: &[(usize, f64)], steps: usize) -> Vec<f64> {
    let mut history = w.to_vec();
    let mut shocks = residuals.to_vec();
    for _ in 0..steps {
        let t = history.len();
        let mut value = 0.0;
        for &(lag, phi) in ar {
            if t >= lag {
                value += phi * history[t - lag];
            }
        }
        for &(lag, theta) in ma {
            if t >= lag {
                value += theta * shocks[t - lag];
            }
        }
        history.push(value);
        shocks.push(0.0);
    }
    history.split_off(w.len())
}

fn sarima_forecast(values: &[f64], order: &ModelOrder, coefficients: &SarimaCoefficients, steps: usize) -> Option<Vec<f64>> {
    let lags = order.difference_lags();
    let levels = difference(values, &lags)?;
    let centered: Vec<f64> = levels.last()?.iter().map(|v| v - coefficients.mean).collect();

    let residuals = arma_residuals(&centered, &coefficients.ar, &coefficients.ma);
    let forecast: Vec<f64> = arma_forecast(&centered, &residuals, &coefficients.ar, &coefficients.ma, steps)
        .into_iter()
        .map(|v| v + coefficients.mean)
        .collect();

    Some(integrate(levels, &lags, &forecast))
}

/// Hannan–Rissanen estimate of one candidate order
fn estimate(values: &[f64], order: &ModelOrder) -> AlmanacResult<SarimaCoefficients> {
    let lags = order.difference_lags();
    let levels = difference(values, &lags)
        .ok_or_else(|| AlmanacError::fit_failure(format!("{} needs more points than available", order)))?;
    let differenced = levels.last().map(Vec::as_slice).unwrap_or_default();

    let mean = if lags.is_empty() { mean(differenced).unwrap_or(0.0) } else { 0.0 };
    let w: Vec<f64> = differenced.iter().map(|v| v - mean).collect();
    let n = w.len();

    let ar_lags = order.ar_lags();
    let ma_lags = order.ma_lags();
    let max_ar = ar_lags.last().copied().unwrap_or(0);
    let max_ma = ma_lags.last().copied().unwrap_or(0);

    // Stage 1: long autoregression for innovation estimates
    let long_order = (max_ar.max(max_ma) + 1).max(8).min(n / 3);
    let innovations = if ma_lags.is_empty() {
        vec![0.0; n]
    } else {
        let autocov = autocovariances(&w, long_order);
        let phi = levinson_durbin(&autocov, long_order)
            .ok_or_else(|| AlmanacError::fit_failure("long autoregression is singular"))?;
        let mut innovations = vec![0.0; n];
        for t in long_order..n {
            let predicted: f64 = phi.iter().enumerate().map(|(j, a)| a * w[t - j - 1]).sum();
            innovations[t] = w[t] - predicted;
        }
        innovations
    };

    // Stage 2: least squares on the AR and MA lags
    let start = if ma_lags.is_empty() { max_ar } else { max_ar.max(long_order + max_ma) };
    let k = ar_lags.len() + ma_lags.len();
    let rows = n.saturating_sub(start);
    if rows <= k + 2 {
        return Err(AlmanacError::fit_failure(format!(
            "{} leaves {} usable points after differencing",
            order, rows
        )));
    }

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    let mut row = vec![0.0; k];
    for t in start..n {
        for (i, &lag) in ar_lags.iter().enumerate() {
            row[i] = w[t - lag];
        }
        for (i, &lag) in ma_lags.iter().enumerate() {
            row[ar_lags.len() + i] = innovations[t - lag];
        }
        for r in 0..k {
            xty[r] += row[r] * w[t];
            for c in 0..k {
                xtx[r][c] += row[r] * row[c];
            }
        }
    }

    let beta = solve_linear_system(xtx, xty)
        .ok_or_else(|| AlmanacError::fit_failure(format!("{} regression is singular", order)))?;

    let fitted_ar: Vec<(usize, f64)> = ar_lags.iter().copied().zip(beta.iter().copied()).collect();
    let fitted_ma: Vec<(usize, f64)> = ma_lags.iter().copied().zip(beta[ar_lags.len()..].iter().copied()).collect();

    // Least squares can land on an explosive solution; damp the
    // coefficients until the trial forecast stays bounded
    let mut last_error = AlmanacError::fit_failure(format!("{} residuals diverge", order));
    for rho in ROOT_SHRINKAGE {
        let ar = shrink(&fitted_ar, rho);
        let ma = shrink(&fitted_ma, rho);

        let residuals = arma_residuals(&w, &ar, &ma);
        let sse: f64 = residuals[start..].iter().map(|e| e * e).sum();
        if !sse.is_finite() {
            last_error = AlmanacError::fit_failure(format!("{} residuals diverge", order));
            continue;
        }
        let sigma2 = (sse / rows as f64).max(1e-12);
        let aic = rows as f64 * sigma2.ln() + 2.0 * (k + 1) as f64;

        let coefficients = SarimaCoefficients { mean, ar, ma, sigma2, aic };
        match check_divergence(values, order, &coefficients) {
            Ok(()) => {
                if rho < 1.0 {
                    debug!(%order, rho, "shrank coefficients to keep the forecast bounded");
                }
                return Ok(coefficients);
            }
            Err(error) => last_error = error,
        }
    }
    Err(last_error)
}

/// Confidence in a fallback forecast, from how steady the recent history is
/// relative to its level. Always within `[0.5, 0.95]`.
pub fn forecast_confidence(series: &[AggregatedPoint]) -> f64 {
    let values: Vec<f64> = series.iter().map(|p| p.mean_value).collect();
    let recent = &values[values.len().saturating_sub(CONFIDENCE_WINDOW)..];
    let (Some(level), Some(spread)) = (mean(&values), variance(recent)) else {
        return 0.5;
    };
    let confidence = 1.0 - spread / (level * level + 1e-6);
    if confidence.is_finite() {
        confidence.clamp(0.5, 0.95)
    } else {
        0.5
    }
}

/// Scale each lag-`l` coefficient by `rho^l`, dividing every root by `rho`
fn shrink(terms: &[(usize, f64)], rho: f64) -> Vec<(usize, f64)> {
    terms.iter().map(|&(lag, c)| (lag, c * rho.powi(lag as i32))).collect()
}

/// Reject models whose trial forecast leaves the envelope of the training data
fn check_divergence(values: &[f64], order: &ModelOrder, coefficients: &SarimaCoefficients) -> AlmanacResult<()> {
    let steps = 2 * order.period.max(DAILY_PERIOD);
    let trial = sarima_forecast(values, order, coefficients, steps)
        .ok_or_else(|| AlmanacError::fit_failure("trial forecast failed"))?;

    let low = values.iter().copied().fold(f64::INFINITY, f64::min);
    let high = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = (high - low).max(1.0);

    if trial.iter().any(|v| !v.is_finite() || *v < low - 3.0 * span || *v > high + 3.0 * span) {
        return Err(AlmanacError::fit_failure(format!("{} forecast diverges", order)));
    }
    Ok(())
}

/// Run damped Holt over the deseasonalised series; returns `(level, trend)` and one-step errors
fn holt(params: &SmoothingSettings, profile: &SeasonalProfile, series: &[AggregatedPoint]) -> Option<(f64, f64, Vec<f64>)> {
    let deseasonalised: Vec<f64> = series
        .iter()
        .map(|p| p.mean_value - profile.value_at(p.hour_timestamp))
        .collect();
    let first = *deseasonalised.first()?;

    let mut level = first;
    let mut trend = if deseasonalised.len() > 1 { deseasonalised[1] - first } else { 0.0 };
    let mut errors = Vec::with_capacity(deseasonalised.len());

    for &value in &deseasonalised[1..] {
        let predicted = level + params.damping * trend;
        errors.push((value - predicted).abs());

        let previous = level;
        level = params.alpha * value + (1.0 - params.alpha) * predicted;
        trend = params.beta * (level - previous) + (1.0 - params.beta) * params.damping * trend;
    }

    Some((level, trend, errors))
}

fn smoothing_forecast(
    params: &SmoothingSettings,
    profile: &SeasonalProfile,
    series: &[AggregatedPoint],
    timestamps: &[Timestamp],
) -> Vec<f64> {
    let Some((level, trend, _)) = holt(params, profile, series) else {
        return Vec::new();
    };

    let mut damped = 0.0;
    let mut factor = 1.0;
    timestamps
        .iter()
        .map(|&ts| {
            factor *= params.damping;
            damped += factor;
            level + damped * trend + profile.value_at(ts)
        })
        .collect()
}

fn one_step_mae(params: &SmoothingSettings, profile: &SeasonalProfile, series: &[AggregatedPoint]) -> f64 {
    holt(params, profile, series)
        .and_then(|(_, _, errors)| mean(&errors))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seasonality::{SeasonalityAnalyzer, SeasonalitySettings};
    use crate::types::SECONDS_PER_HOUR;
    use crate::utils::following_hours;

    fn noise(h: u64) -> f64 {
        let x = h.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((x >> 33) % 1000) as f64 / 1000.0 - 0.5
    }

    /// Daily cycle plus bounded deterministic noise
    fn enclosure_series(hours: u64) -> Vec<AggregatedPoint> {
        (0..hours)
            .map(|h| {
                let value = 22.0 + 2.0 * (2.0 * std::f64::consts::PI * h as f64 / 24.0).cos() + 0.3 * noise(h);
                AggregatedPoint::new(h * SECONDS_PER_HOUR, value, 12)
            })
            .collect()
    }

    fn profile_for(series: &[AggregatedPoint]) -> Arc<SeasonalProfile> {
        Arc::new(SeasonalityAnalyzer::new(SeasonalitySettings::default(), None).analyze(series))
    }

    fn horizon(series: &[AggregatedPoint], steps: usize) -> Vec<Timestamp> {
        following_hours(series.last().unwrap().hour_timestamp, steps)
    }

    #[test]
    fn test_difference_and_integrate_invert() {
        let values: Vec<f64> = (0..30).map(|i| (i * i) as f64).collect();
        let lags = vec![4, 1];
        let levels = difference(&values, &lags).unwrap();
        assert_eq!(levels[2].len(), 25);

        // Second differences of i^2 at lags 4 and 1 are the constant 8
        assert!(levels[2].iter().all(|v| (v - 8.0).abs() < 1e-9));
        let extended = integrate(levels, &lags, &[8.0, 8.0]);
        assert_eq!(extended, vec![900.0, 961.0]);
    }

    #[test]
    fn test_short_history_degrades_to_smoothing() {
        let model = FallbackForecastModel::new(ModelSettings::default());
        let series = enclosure_series(48);
        let profile = profile_for(&series);
        assert!(!profile.is_enabled());

        let state = model.fit("rack/temperature", &series, profile, 1, &CancellationToken::new()).unwrap();
        assert_eq!(state.method(), ForecastMethod::FallbackSmoothing);
        assert!(state.degradation.as_deref().unwrap().contains("48 of 168"));

        let (values, method) = model.forecast(&state, &series, &horizon(&series, 12));
        assert_eq!(method, ForecastMethod::FallbackSmoothing);
        assert_eq!(values.len(), 12);
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_single_value_is_flat_line() {
        let model = FallbackForecastModel::new(ModelSettings::default());
        let series = vec![AggregatedPoint::new(0, 21.5, 1)];
        let state = model
            .fit("rack/temperature", &series, Arc::new(SeasonalProfile::disabled(1)), 1, &CancellationToken::new())
            .unwrap();

        let (values, _) = model.forecast(&state, &series, &horizon(&series, 5));
        assert_eq!(values, vec![21.5; 5]);
    }

    #[test]
    fn test_grid_fit_selects_seasonal_model() {
        let model = FallbackForecastModel::new(ModelSettings::default());
        let series = enclosure_series(168);
        let profile = profile_for(&series);
        assert_eq!(profile.dominant_period, Some(24));

        let state = model.fit("rack/temperature", &series, profile, 3, &CancellationToken::new()).unwrap();
        assert_eq!(state.method(), ForecastMethod::FallbackSarima);
        assert_eq!(state.generation, 3);
        let order = state.order.unwrap();
        assert_eq!(order.period, 24);
        assert!(order.p <= 2 && order.q <= 1);

        let (values, method) = model.forecast(&state, &series, &horizon(&series, 24));
        assert_eq!(method, ForecastMethod::FallbackSarima);
        assert_eq!(values.len(), 24);
        assert!(values.iter().all(|v| (15.0..30.0).contains(v)));
    }

    #[test]
    fn test_fixed_order_without_profile_drops_seasonal_terms() {
        let settings = ModelSettings {
            order_selection: OrderSelection::Fixed(ModelOrder::default()),
            ..Default::default()
        };
        let model = FallbackForecastModel::new(settings);
        let series = enclosure_series(168);

        let state = model
            .fit("rack/temperature", &series, Arc::new(SeasonalProfile::disabled(168)), 1, &CancellationToken::new())
            .unwrap();
        let order = state.order.unwrap();
        assert!(!order.is_seasonal());
        assert_eq!((order.p, order.d, order.q), (2, 1, 1));
        assert_eq!(order.to_string(), "SARIMA(2,1,1)");
        assert_eq!(state.method(), ForecastMethod::FallbackSarima);

        let (values, method) = model.forecast(&state, &series, &horizon(&series, 48));
        assert_eq!(method, ForecastMethod::FallbackSarima);
        let low = series.iter().map(|p| p.mean_value).fold(f64::INFINITY, f64::min);
        let high = series.iter().map(|p| p.mean_value).fold(f64::NEG_INFINITY, f64::max);
        let span = high - low;
        assert!(values.iter().all(|v| *v >= low - 3.0 * span && *v <= high + 3.0 * span));
    }

    #[test]
    fn test_confidence_tracks_stability() {
        assert_eq!(forecast_confidence(&[]), 0.5);

        let steady: Vec<_> = (0..80).map(|h| AggregatedPoint::new(h * SECONDS_PER_HOUR, 22.0, 4)).collect();
        assert_eq!(forecast_confidence(&steady), 0.95);

        // variance 1 around a level of 2: 1 - 1/4
        let swinging: Vec<_> = (0..60)
            .map(|h| AggregatedPoint::new(h * SECONDS_PER_HOUR, if h % 2 == 0 { 1.0 } else { 3.0 }, 4))
            .collect();
        assert!((forecast_confidence(&swinging) - 0.75).abs() < 1e-6);

        let wild: Vec<_> = (0..60)
            .map(|h| AggregatedPoint::new(h * SECONDS_PER_HOUR, if h % 2 == 0 { -5.0 } else { 5.0 }, 4))
            .collect();
        assert_eq!(forecast_confidence(&wild), 0.5);
    }

    #[test]
    fn test_shrink_damps_higher_lags_more() {
        let damped = shrink(&[(1, 2.0), (2, -1.0)], 0.5);
        assert_eq!(damped, vec![(1, 1.0), (2, -0.25)]);
        assert_eq!(shrink(&[(24, 0.8)], 1.0), vec![(24, 0.8)]);
    }

    #[test]
    fn test_cancelled_fit_is_an_error() {
        let model = FallbackForecastModel::new(ModelSettings::default());
        let series = enclosure_series(168);
        let token = CancellationToken::new();
        token.cancel();

        let error = model.fit("rack/temperature", &series, profile_for(&series), 1, &token).unwrap_err();
        assert!(error.is_cancelled());
    }

    #[test]
    fn test_forecast_is_deterministic() {
        let model = FallbackForecastModel::new(ModelSettings::default());
        let series = enclosure_series(200);
        let state = model
            .fit("rack/temperature", &series, profile_for(&series), 1, &CancellationToken::new())
            .unwrap();

        let steps = horizon(&series, 6);
        assert_eq!(model.forecast(&state, &series, &steps), model.forecast(&state, &series, &steps));
    }
}
