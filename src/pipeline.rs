//! Pipeline orchestration: partitions the range, schedules one job per interval against the
//! configured source and sink, and reports the aggregated outcome.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use crate::error::EtlError;
use crate::interval::partition;
use crate::job::{JobContext, QueryJob, SeriesTarget};
use crate::period::Period;
use crate::scheduler::{ErrorMode, RunReport, Scheduler};
use crate::sink::SinkConnector;
use crate::source::SourceConnector;
use crate::telemetry::{etl_metrics, noop_event_listener, EtlEvent, EtlEventListener};
use crate::template::SqlTemplate;
use crate::types::{TimeInterval, Timestamp};

/// Configuration options for a pipeline run. Passed read-only to every job.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of concurrent jobs. `None` uses the available parallelism.
    pub concurrency: Option<usize>,
    /// Emit one event per produced point.
    pub debug: bool,
    /// Build batches but never write them.
    pub dry_run: bool,
    /// Failure policy across jobs.
    pub error_mode: ErrorMode,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn EtlEventListener>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            concurrency: None,
            debug: false,
            dry_run: false,
            error_mode: ErrorMode::default(),
            event_listener: noop_event_listener(),
        }
    }
}

impl PipelineConfig {
    /// Effective worker count: the override if set and non-zero, else the number of CPUs.
    pub fn threads(&self) -> usize {
        match self.concurrency {
            Some(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

/// One extraction: which query to run over which range, and how to name its output.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Literal series name (scalar queries) or naming strategy identifier (multi-column).
    pub series: String,
    pub template: SqlTemplate,
    pub from: Timestamp,
    pub to: Timestamp,
    pub period: Period,
    /// Declares the query multi-column, so the naming strategy is validated before any job runs.
    pub multi_column: bool,
}

/// Main entry point: runs [`RunRequest`]s against a source and a sink.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn SourceConnector>,
    sink: Arc<dyn SinkConnector>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn SourceConnector>,
        sink: Arc<dyn SinkConnector>,
    ) -> Self {
        Pipeline {
            config,
            source,
            sink,
        }
    }

    /// Runs one job per interval of the aligned range and waits for all of them.
    ///
    /// # Errors
    /// Returns an error only for problems detected before scheduling (calendar overflow, an
    /// unknown naming strategy on a declared multi-column query, worker pool failure). Job
    /// failures are collected in the returned [`RunReport`].
    pub fn run(&self, request: &RunRequest) -> Result<RunReport, EtlError> {
        let started = Instant::now();
        let target = SeriesTarget::new(request.series.clone());
        if request.multi_column {
            target.require_strategy()?;
        }

        let intervals = partition(request.from, request.to, request.period)?;
        let scheduler = Scheduler::new(self.config.threads(), self.config.error_mode);
        let listener = &self.config.event_listener;
        listener.on_event(EtlEvent::RunStarted {
            intervals: intervals.len(),
            threads: scheduler.threads(),
            period: intervals.period(),
            error_mode: scheduler.error_mode(),
            range: TimeInterval::new(intervals.aligned_start(), intervals.aligned_end()),
        });

        let template = Arc::new(request.template.clone());
        let target = Arc::new(target);
        let ctx = JobContext {
            config: &self.config,
            source: self.source.as_ref(),
            sink: self.sink.as_ref(),
        };

        let mut report = scheduler.run(intervals, |interval| {
            let job = QueryJob {
                interval,
                template: Arc::clone(&template),
                target: Arc::clone(&target),
                period: request.period,
            };
            job.run(&ctx).inspect_err(|e| {
                etl_metrics::record_job_failed();
                listener.on_event(EtlEvent::JobFailed {
                    interval,
                    error: e.to_string(),
                });
            })
        })?;
        report.elapsed = started.elapsed();

        listener.on_event(EtlEvent::RunFinished {
            completed: report.completed.len(),
            failed: report.failures.len(),
            skipped: report.skipped,
            points: report.points(),
            elapsed: report.elapsed,
        });
        Ok(report)
    }
}
