// src/error.rs

use crate::types::MetricKey;

/// Result type used throughout the almanac library
pub type AlmanacResult<T> = Result<T, AlmanacError>;

/// All possible errors that can occur in the almanac library
#[derive(thiserror::Error, Debug)]
pub enum AlmanacError {
    /// Configuration-related errors (fatal at startup)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A raw sample was malformed or arrived too late to be aggregated
    #[error("Rejected sample for '{metric_key}': {message}")]
    Ingestion { metric_key: MetricKey, message: String },

    /// Seasonal model estimation did not converge
    #[error("Model fit failed: {message}")]
    FitFailure { message: String },

    /// The primary forecaster timed out, errored or returned garbage
    #[error("Primary forecaster unavailable: {message}")]
    PrimaryUnavailable { message: String },

    /// Too few points to perform the requested operation
    #[error("Insufficient history for '{metric_key}': {available} points available, {required} required")]
    InsufficientHistory {
        metric_key: MetricKey,
        available: usize,
        required: usize,
    },

    /// No stream is registered under this key
    #[error("Metric stream '{metric_key}' not found")]
    UnknownMetric { metric_key: MetricKey },

    /// Requested horizon is outside the configured bounds
    #[error("Invalid forecast horizon {requested}: must be between 1 and {max}")]
    InvalidHorizon { requested: usize, max: usize },

    /// Work was abandoned because shutdown was requested
    #[error("Operation cancelled: {message}")]
    Cancelled { message: String },

    /// Channel communication error (internal)
    #[error("Internal channel error: {message}")]
    ChannelError { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// IO-related errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Generic error for unexpected situations
    #[error("Unexpected error: {message}")]
    Unexpected { message: String },
}

/// Helper methods for creating common errors
impl AlmanacError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn ingestion<K: Into<String>, S: Into<String>>(metric_key: K, message: S) -> Self {
        Self::Ingestion {
            metric_key: metric_key.into(),
            message: message.into(),
        }
    }

    pub fn fit_failure<S: Into<String>>(message: S) -> Self {
        Self::FitFailure {
            message: message.into(),
        }
    }

    pub fn primary_unavailable<S: Into<String>>(message: S) -> Self {
        Self::PrimaryUnavailable {
            message: message.into(),
        }
    }

    pub fn insufficient_history<K: Into<String>>(metric_key: K, available: usize, required: usize) -> Self {
        Self::InsufficientHistory {
            metric_key: metric_key.into(),
            available,
            required,
        }
    }

    pub fn unknown_metric<K: Into<String>>(metric_key: K) -> Self {
        Self::UnknownMetric {
            metric_key: metric_key.into(),
        }
    }

    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn unexpected<S: Into<String>>(message: S) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Whether this error came from a shutdown request rather than a real fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Convert from channel send errors
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AlmanacError {
    fn from(error: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelError {
            message: format!("Failed to send on channel: {}", error),
        }
    }
}

/// Convert from blocking task failures
impl From<tokio::task::JoinError> for AlmanacError {
    fn from(error: tokio::task::JoinError) -> Self {
        if error.is_cancelled() {
            Self::cancelled("background task was aborted")
        } else {
            Self::Unexpected {
                message: format!("Background task panicked: {}", error),
            }
        }
    }
}
