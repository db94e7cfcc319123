use thiserror::Error;

use crate::types::TimeInterval;

/// Custom error type for pipeline operations.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Failed to read SQL template {path}: {source}")]
    Template {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid date {input:?}: expected YYYY-MM-DD, YYYY-MM-DD HH:MM:SS or RFC 3339")]
    InvalidDate { input: String },

    #[error("Invalid period {0:?}: expected one of h, d, w, m, q, y")]
    InvalidPeriod(String),

    #[error("Timestamp {0} is outside the representable range")]
    TimestampOutOfRange(String),

    #[error("Unknown naming strategy '{0}'")]
    UnknownNamingStrategy(String),

    #[error("Source connection failed: {0}")]
    SourceConnect(String),

    #[error("Query execution failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Cannot decode column {column} as a number: {detail}")]
    Decode { column: usize, detail: String },

    #[error("Series {name} has non-finite value {value}")]
    NonFiniteValue { name: String, value: f64 },

    #[error("Series name {0:?} contains a line break")]
    InvalidSeriesName(String),

    #[error("Sink connection failed: {0}")]
    SinkConnect(String),

    #[error("Batch write failed: {0}")]
    SinkWrite(String),

    #[error("HTTP Error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),
}

impl EtlError {
    /// Errors that would repeat identically for every remaining interval. The scheduler starts
    /// no further jobs after one of these, whatever the error mode.
    pub fn aborts_run(&self) -> bool {
        matches!(self, EtlError::UnknownNamingStrategy(_))
    }
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for EtlError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        EtlError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}

/// A job that ended in an error, together with the interval it was processing.
#[derive(Error, Debug)]
#[error("job {interval} failed: {error}")]
pub struct JobFailure {
    pub interval: TimeInterval,
    #[source]
    pub error: EtlError,
}
