// src/tracker.rs

use std::collections::VecDeque;

use crate::types::{ErrorRecord, MetricValue, Timestamp};

/// Sliding window of forecast errors for one stream and one method family.
///
/// Holds at most `capacity` records; the oldest is evicted first.
#[derive(Debug, Clone)]
pub struct ErrorTracker {
    capacity: usize,
    min_records: usize,
    window: VecDeque<ErrorRecord>,
}

impl ErrorTracker {
    pub fn new(capacity: usize, min_records: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            min_records,
            window: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a predicted/observed pair and return its absolute error
    pub fn record(&mut self, predicted: MetricValue, observed: MetricValue, timestamp: Timestamp) -> f64 {
        let record = ErrorRecord::new(predicted, observed, timestamp);
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(record);
        record.absolute_error
    }

    /// Mean absolute error over the window, `None` when empty
    pub fn current_mae(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.window.iter().map(|r| r.absolute_error).sum::<f64>() / self.window.len() as f64)
    }

    /// MAE and count of records stamped at or after `since`
    pub fn recent_mae(&self, since: Timestamp) -> Option<(f64, usize)> {
        let (sum, count) = self
            .window
            .iter()
            .filter(|r| r.timestamp >= since)
            .fold((0.0, 0usize), |(sum, count), r| (sum + r.absolute_error, count + 1));
        (count > 0).then(|| (sum / count as f64, count))
    }

    /// True once the window holds enough records and its MAE exceeds `threshold`
    pub fn should_use_fallback(&self, threshold: f64) -> bool {
        if self.window.len() < self.min_records {
            return false;
        }
        self.current_mae().map_or(false, |mae| mae > threshold)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.window.iter()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_has_no_mae() {
        let tracker = ErrorTracker::new(4, 1);
        assert!(tracker.current_mae().is_none());
        assert!(!tracker.should_use_fallback(0.0));
    }

    #[test]
    fn test_window_keeps_most_recent_n() {
        let mut tracker = ErrorTracker::new(3, 1);
        tracker.record(10.0, 0.0, 1); // evicted
        tracker.record(1.0, 0.0, 2);
        tracker.record(2.0, 0.0, 3);
        assert_eq!(tracker.record(3.0, 0.0, 4), 3.0);

        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.current_mae(), Some(2.0));
        assert_eq!(tracker.records().next().unwrap().timestamp, 2);
    }

    #[test]
    fn test_minimum_records_before_switching() {
        let mut tracker = ErrorTracker::new(168, 3);
        tracker.record(30.0, 20.0, 1);
        tracker.record(30.0, 20.0, 2);
        assert!(!tracker.should_use_fallback(5.0));

        tracker.record(30.0, 20.0, 3);
        assert!(tracker.should_use_fallback(5.0));
        assert!(!tracker.should_use_fallback(10.0));
    }

    #[test]
    fn test_recent_mae_filters_by_age() {
        let mut tracker = ErrorTracker::new(10, 1);
        tracker.record(9.0, 0.0, 100);
        tracker.record(1.0, 0.0, 200);
        tracker.record(3.0, 0.0, 300);

        assert_eq!(tracker.recent_mae(200), Some((2.0, 2)));
        assert!(tracker.recent_mae(301).is_none());

        tracker.reset();
        assert!(tracker.is_empty());
    }
}
