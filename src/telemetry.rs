use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::period::Period;
use crate::scheduler::ErrorMode;
use crate::types::TimeInterval;

/// Structured, in-process event hook for observability.
///
/// The pipeline is a library; it never prints. Callers provide an implementation that forwards
/// these events to `tracing`, metrics, or a custom collector. [`TracingEventListener`] is the one
/// the command-line tool installs.
pub trait EtlEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: EtlEvent);
}

/// Structured events emitted by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum EtlEvent {
    RunStarted {
        intervals: usize,
        threads: usize,
        period: Period,
        error_mode: ErrorMode,
        /// Aligned range covered by the run.
        range: TimeInterval,
    },
    RunFinished {
        completed: usize,
        failed: usize,
        skipped: usize,
        points: usize,
        elapsed: Duration,
    },

    JobStarted { interval: TimeInterval },
    JobFinished { interval: TimeInterval, points: usize, elapsed: Duration },
    JobFailed { interval: TimeInterval, error: String },

    /// A scalar query did not return exactly one row.
    UnexpectedRowCount { interval: TimeInterval, rows: usize, sql: String },
    /// A keyed row produced no series names.
    RowSkipped { interval: TimeInterval, reason: String },
    /// Emitted per point only when debug output is enabled.
    PointProduced { interval: TimeInterval, index: usize, name: String, value: f64 },

    BatchWritten { interval: TimeInterval, points: usize },
    /// Dry run: the batch was built but not sent.
    BatchDiscarded { interval: TimeInterval, points: usize },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl EtlEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: EtlEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn EtlEventListener> {
    Arc::new(NoopEventListener)
}

/// Forwards events to `tracing` with structured fields.
#[derive(Debug, Default)]
pub struct TracingEventListener;

impl EtlEventListener for TracingEventListener {
    fn on_event(&self, event: EtlEvent) {
        match event {
            EtlEvent::RunStarted { intervals, threads, period, error_mode, range } => {
                tracing::info!(
                    intervals,
                    threads,
                    period = %period,
                    error_mode = error_mode.as_str(),
                    range = %range,
                    "Running"
                );
            }
            EtlEvent::RunFinished { completed, failed, skipped, points, elapsed } => {
                tracing::info!(completed, failed, skipped, points, elapsed = ?elapsed, "All done");
            }
            EtlEvent::JobStarted { interval } => {
                tracing::trace!(interval = %interval, "job started");
            }
            EtlEvent::JobFinished { interval, points, elapsed } => {
                tracing::debug!(interval = %interval, points, elapsed = ?elapsed, "job finished");
            }
            EtlEvent::JobFailed { interval, error } => {
                tracing::error!(interval = %interval, error = %error, "job failed");
            }
            EtlEvent::UnexpectedRowCount { interval, rows, sql } => {
                tracing::warn!(
                    interval = %interval,
                    rows,
                    query = %sql,
                    "query should return either a single value or multiple rows, each containing a string and numbers"
                );
            }
            EtlEvent::RowSkipped { interval, reason } => {
                tracing::warn!(interval = %interval, "{}", reason);
            }
            EtlEvent::PointProduced { interval, index, name, value } => {
                tracing::debug!(interval = %interval, index, name = %name, value, "point");
            }
            EtlEvent::BatchWritten { interval, points } => {
                tracing::debug!(interval = %interval, points, "batch written");
            }
            EtlEvent::BatchDiscarded { interval, points } => {
                tracing::debug!(interval = %interval, points, "skipping series write");
            }
        }
    }
}

/// Metrics instrumentation through the `metrics` facade.
///
/// Recording is a no-op until a recorder is installed. With the `prometheus` feature an
/// in-process scrape handle is available; no HTTP server is started.
pub mod etl_metrics {
    use std::time::Duration;

    use ::metrics::{describe_counter, describe_histogram, Unit};

    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

    // --- metric names ---
    //
    // Counters are exposed as `<name>_total` by the Prometheus exporter.

    pub const JOBS_COMPLETED: &str = "sqlseries_jobs_completed";
    pub const JOBS_FAILED: &str = "sqlseries_jobs_failed";
    pub const POINTS_WRITTEN: &str = "sqlseries_points_written";
    pub const ROWS_READ: &str = "sqlseries_rows_read";
    pub const JOB_DURATION_SECONDS: &str = "sqlseries_job_duration_seconds";

    /// Handle to the in-process Prometheus recorder.
    #[cfg(feature = "prometheus")]
    #[derive(Debug)]
    pub struct InProcessPrometheus {
        handle: PrometheusHandle,
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process).
        pub fn install() -> Result<Self, MetricsInitError> {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;
            describe_all();
            Ok(Self { handle })
        }

        /// Renders the current metrics in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            self.handle.run_upkeep();
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: BuildError) -> Self {
            match e {
                BuildError::FailedToSetGlobalRecorder(_) => MetricsInitError::AlreadyInstalled,
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }

    #[inline]
    pub fn record_job_completed(duration: Duration) {
        ::metrics::counter!(JOBS_COMPLETED).increment(1);
        ::metrics::histogram!(JOB_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    #[inline]
    pub fn record_job_failed() {
        ::metrics::counter!(JOBS_FAILED).increment(1);
    }

    #[inline]
    pub fn record_points_written(points: u64) {
        if points > 0 {
            ::metrics::counter!(POINTS_WRITTEN).increment(points);
        }
    }

    #[inline]
    pub fn record_rows_read(rows: u64) {
        if rows > 0 {
            ::metrics::counter!(ROWS_READ).increment(rows);
        }
    }

    pub fn describe_all() {
        describe_counter!(JOBS_COMPLETED, Unit::Count, "Interval jobs that finished successfully.");
        describe_counter!(JOBS_FAILED, Unit::Count, "Interval jobs that ended with an error.");
        describe_counter!(
            POINTS_WRITTEN,
            Unit::Count,
            "Metric points handed to the sink (dry runs excluded)."
        );
        describe_counter!(ROWS_READ, Unit::Count, "Result rows read from the relational source.");
        describe_histogram!(
            JOB_DURATION_SECONDS,
            Unit::Seconds,
            "Wall time of one job: connect, query, transform and batch write."
        );
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingEventListener {
    events: Mutex<Vec<EtlEvent>>,
}

impl CollectingEventListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<EtlEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EtlEventListener for CollectingEventListener {
    fn on_event(&self, event: EtlEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}
