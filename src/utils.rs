//! Utility functions for common operations

use crate::types::{Timestamp, SECONDS_PER_HOUR};

/// Align a timestamp to the start of its hour
pub fn hour_floor(timestamp: Timestamp) -> Timestamp {
    timestamp - timestamp % SECONDS_PER_HOUR
}

/// Hour index since the epoch, as used by the harmonic terms
pub fn hour_index(timestamp: Timestamp) -> f64 {
    timestamp as f64 / SECONDS_PER_HOUR as f64
}

/// `count` contiguous hour timestamps following `after`
pub fn following_hours(after: Timestamp, count: usize) -> Vec<Timestamp> {
    let base = hour_floor(after);
    (1..=count as u64).map(|i| base + i * SECONDS_PER_HOUR).collect()
}

/// Get current Unix timestamp
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
