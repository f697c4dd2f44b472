//! # Hourly Aggregation
//!
//! Turns irregular raw readings into a gap-free hourly series. Samples are
//! bucketed by the hour they fall in; a bucket closes when a sample for a
//! later hour arrives or when the stream is flushed. Hours that received no
//! samples are synthesised by the configured [`GapFillPolicy`] so that any
//! two consecutive retained points are exactly one hour apart.

use std::collections::{BTreeMap, VecDeque};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AlmanacError, AlmanacResult};
use crate::types::{AggregatedPoint, MetricKey, MetricValue, RawSample, Timestamp, SECONDS_PER_HOUR};
use crate::utils::hour_floor;

/// How hours without samples are filled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GapFillPolicy {
    /// Repeat the previous hour's mean
    CarryForward,
    /// Reuse the value one period earlier when retained, else carry forward
    SeasonalNaive { period_hours: u64 },
}

impl Default for GapFillPolicy {
    fn default() -> Self {
        Self::CarryForward
    }
}

/// Aggregation settings shared by every stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    /// Number of most recent hours kept per stream
    pub retention_hours: usize,
    /// Policy for empty hours
    pub gap_fill: GapFillPolicy,
    /// How many closed hours a late sample may still be folded into
    pub late_tolerance_hours: u64,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            retention_hours: 168,
            gap_fill: GapFillPolicy::CarryForward,
            late_tolerance_hours: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenBucket {
    hour: Timestamp,
    sum: f64,
    count: u32,
}

impl OpenBucket {
    fn new(hour: Timestamp, value: MetricValue) -> Self {
        Self { hour, sum: value, count: 1 }
    }

    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Hourly aggregator for one metric stream
#[derive(Debug, Clone)]
pub struct Aggregator {
    metric_key: MetricKey,
    settings: AggregationSettings,
    series: VecDeque<AggregatedPoint>,
    open: Option<OpenBucket>,
}

impl Aggregator {
    pub fn new<K: Into<MetricKey>>(metric_key: K, settings: AggregationSettings) -> Self {
        Self {
            metric_key: metric_key.into(),
            series: VecDeque::with_capacity(settings.retention_hours + 1),
            settings,
            open: None,
        }
    }

    /// Add one raw sample.
    ///
    /// Returns the points that were closed by this sample (the previous
    /// bucket plus any gap fills), oldest first.
    pub fn push(&mut self, sample: RawSample) -> AlmanacResult<Vec<AggregatedPoint>> {
        if !sample.value.is_finite() {
            return Err(AlmanacError::ingestion(
                self.metric_key.as_str(),
                format!("non-finite value {} at {}", sample.value, sample.timestamp),
            ));
        }

        let hour = hour_floor(sample.timestamp);
        let mut closed = Vec::new();

        match self.open {
            Some(ref mut bucket) if bucket.hour == hour => {
                bucket.sum += sample.value;
                bucket.count += 1;
            }
            Some(bucket) if hour > bucket.hour => {
                closed.extend(self.close_bucket(bucket));
                closed.extend(self.fill_until(hour));
                self.open = Some(OpenBucket::new(hour, sample.value));
            }
            Some(bucket) => {
                closed.extend(self.fold_late(bucket.hour, hour, sample)?);
            }
            None => match self.series.back().map(|p| p.hour_timestamp) {
                Some(last) if hour <= last => {
                    closed.extend(self.fold_late(last + SECONDS_PER_HOUR, hour, sample)?);
                }
                _ => {
                    closed.extend(self.fill_until(hour));
                    self.open = Some(OpenBucket::new(hour, sample.value));
                }
            },
        }

        Ok(closed)
    }

    /// Close everything strictly before the hour containing `now`.
    ///
    /// The open bucket is appended if its hour has passed, and empty hours up
    /// to (but excluding) the current one are filled.
    pub fn flush(&mut self, now: Timestamp) -> Vec<AggregatedPoint> {
        let current_hour = hour_floor(now);
        let mut closed = Vec::new();

        if let Some(bucket) = self.open {
            if bucket.hour < current_hour {
                closed.extend(self.close_bucket(bucket));
                self.open = None;
            }
        }

        if self.open.is_none() && !self.series.is_empty() {
            closed.extend(self.fill_until(current_hour));
        }

        closed
    }

    /// Merge previously persisted hourly history under the live series.
    ///
    /// Points are re-aligned to hour boundaries, duplicates are resolved in
    /// favour of live data, gaps are filled and the retention cap applied.
    /// Returns the number of points retained afterwards.
    pub fn warm_start(&mut self, history: Vec<AggregatedPoint>) -> usize {
        let mut merged: BTreeMap<Timestamp, AggregatedPoint> = BTreeMap::new();
        for point in history.into_iter().filter(|p| p.mean_value.is_finite()) {
            let hour = hour_floor(point.hour_timestamp);
            merged.insert(hour, AggregatedPoint { hour_timestamp: hour, ..point });
        }
        for point in self.series.drain(..) {
            merged.insert(point.hour_timestamp, point);
        }
        if let Some(bucket) = self.open {
            // The open hour belongs to live ingestion
            merged.retain(|&hour, _| hour < bucket.hour);
        }

        for (hour, point) in merged {
            self.fill_until(hour);
            if self.series.back().map_or(true, |p| p.hour_timestamp + SECONDS_PER_HOUR == hour) {
                self.append(point);
            }
        }

        debug!(metric_key = %self.metric_key, points = self.series.len(), "warm start merged history");
        self.series.len()
    }

    /// Retained hourly points, oldest first
    pub fn series(&self) -> &VecDeque<AggregatedPoint> {
        &self.series
    }

    /// Owned copy of the retained series
    pub fn snapshot(&self) -> Vec<AggregatedPoint> {
        self.series.iter().copied().collect()
    }

    /// Mean of the bucket currently being filled, if any
    pub fn open_bucket(&self) -> Option<AggregatedPoint> {
        self.open.map(|b| AggregatedPoint::new(b.hour, b.mean(), b.count))
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Append a finished bucket, filling any hours between it and the series
    fn close_bucket(&mut self, bucket: OpenBucket) -> Vec<AggregatedPoint> {
        let mut closed = self.fill_until(bucket.hour);
        closed.push(self.append(AggregatedPoint::new(bucket.hour, bucket.mean(), bucket.count)));
        closed
    }

    fn append(&mut self, point: AggregatedPoint) -> AggregatedPoint {
        debug_assert!(self
            .series
            .back()
            .map_or(true, |last| point.hour_timestamp == last.hour_timestamp + SECONDS_PER_HOUR));

        self.series.push_back(point);
        while self.series.len() > self.settings.retention_hours {
            self.series.pop_front();
        }
        point
    }

    /// Fill empty hours after the last retained point, up to `until` (exclusive)
    fn fill_until(&mut self, until: Timestamp) -> Vec<AggregatedPoint> {
        let mut filled = Vec::new();
        let Some(mut last) = self.series.back().copied() else {
            return filled;
        };

        // Never synthesise more than one retention window
        let missing = (until.saturating_sub(last.hour_timestamp) / SECONDS_PER_HOUR).saturating_sub(1);
        if missing as usize > self.settings.retention_hours {
            let skip = missing - self.settings.retention_hours as u64;
            last.hour_timestamp += skip * SECONDS_PER_HOUR;
        }

        let mut hour = last.hour_timestamp + SECONDS_PER_HOUR;
        while hour < until {
            let value = self.gap_value(hour, last.mean_value);
            let point = AggregatedPoint::new(hour, value, 0);
            if self.series.back().map_or(false, |p| p.hour_timestamp + SECONDS_PER_HOUR != hour) {
                // Gap larger than retention: restart the series at the filled run
                self.series.clear();
            }
            filled.push(self.append(point));
            last = point;
            hour += SECONDS_PER_HOUR;
        }

        if !filled.is_empty() {
            debug!(metric_key = %self.metric_key, hours = filled.len(), "filled empty hours");
        }
        filled
    }

    fn gap_value(&self, hour: Timestamp, previous: MetricValue) -> MetricValue {
        match self.settings.gap_fill {
            GapFillPolicy::CarryForward => previous,
            GapFillPolicy::SeasonalNaive { period_hours } => {
                period_hours
                    .checked_mul(SECONDS_PER_HOUR)
                    .and_then(|span| hour.checked_sub(span))
                    .and_then(|t| self.point_at(t))
                    .map(|p| p.mean_value)
                    .unwrap_or(previous)
            }
        }
    }

    fn point_at(&self, hour: Timestamp) -> Option<&AggregatedPoint> {
        let first = self.series.front()?.hour_timestamp;
        if hour < first {
            return None;
        }
        let index = ((hour - first) / SECONDS_PER_HOUR) as usize;
        self.series.get(index).filter(|p| p.hour_timestamp == hour)
    }

    /// Fold a sample that arrived after its hour stopped being the open one.
    ///
    /// An hour with no closed point yet (the stream started with a later
    /// sample) is closed here; those points are returned.
    fn fold_late(&mut self, open_hour: Timestamp, hour: Timestamp, sample: RawSample) -> AlmanacResult<Vec<AggregatedPoint>> {
        let tolerance = self.settings.late_tolerance_hours.saturating_mul(SECONDS_PER_HOUR);
        if hour < open_hour.saturating_sub(tolerance) {
            return Err(AlmanacError::ingestion(
                self.metric_key.as_str(),
                format!("sample at {} is older than the late tolerance window", sample.timestamp),
            ));
        }

        if self.series.back().map_or(true, |last| hour > last.hour_timestamp) {
            let mut closed = self.fill_until(hour);
            closed.push(self.append(AggregatedPoint::new(hour, sample.value, 1)));
            closed.extend(self.fill_until(open_hour));
            debug!(metric_key = %self.metric_key, hour, "closed hour from late sample");
            return Ok(closed);
        }

        let first = self.series.front().map(|p| p.hour_timestamp);
        let point = first
            .filter(|&f| hour >= f)
            .and_then(|f| self.series.get_mut(((hour - f) / SECONDS_PER_HOUR) as usize))
            .filter(|p| p.hour_timestamp == hour)
            .ok_or_else(|| {
                AlmanacError::ingestion(
                    self.metric_key.as_str(),
                    format!("sample at {} falls outside the retained series", sample.timestamp),
                )
            })?;

        if point.sample_count == 0 {
            point.mean_value = sample.value;
            point.sample_count = 1;
        } else {
            let total = point.mean_value * point.sample_count as f64 + sample.value;
            point.sample_count += 1;
            point.mean_value = total / point.sample_count as f64;
        }
        debug!(metric_key = %self.metric_key, hour, "folded late sample into closed hour");
        Ok(Vec::new())
    }
}
