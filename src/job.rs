//! One unit of work: query one interval, transform the rows, write one batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::batch::BatchWriter;
use crate::error::EtlError;
use crate::naming::NamingStrategy;
use crate::period::Period;
use crate::pipeline::PipelineConfig;
use crate::sink::SinkConnector;
use crate::source::SourceConnector;
use crate::telemetry::{etl_metrics, EtlEvent};
use crate::template::SqlTemplate;
use crate::transform::{transform, RowResult, TransformContext, TransformWarning};
use crate::types::TimeInterval;

/// The first positional argument: a literal series name for scalar queries, and the naming
/// strategy identifier for multi-column queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesTarget {
    name: String,
    strategy: Option<NamingStrategy>,
}

impl SeriesTarget {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let strategy = name.parse().ok();
        SeriesTarget { name, strategy }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> Option<NamingStrategy> {
        self.strategy
    }

    /// Fails unless the name selects a known naming strategy.
    pub fn require_strategy(&self) -> Result<NamingStrategy, EtlError> {
        self.strategy
            .ok_or_else(|| EtlError::UnknownNamingStrategy(self.name.clone()))
    }
}

/// Immutable description of the work for one interval.
#[derive(Debug, Clone)]
pub struct QueryJob {
    pub interval: TimeInterval,
    pub template: Arc<SqlTemplate>,
    pub target: Arc<SeriesTarget>,
    pub period: Period,
}

/// Connections and configuration a job runs against.
#[derive(Debug, Clone, Copy)]
pub struct JobContext<'a> {
    pub config: &'a PipelineConfig,
    pub source: &'a dyn SourceConnector,
    pub sink: &'a dyn SinkConnector,
}

/// Summary of a finished job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub interval: TimeInterval,
    pub rows: usize,
    pub points: usize,
    /// False when the batch was discarded (dry run).
    pub written: bool,
    pub elapsed: Duration,
}

impl QueryJob {
    /// Runs the job to completion. Both connections are opened here and dropped before return.
    pub fn run(&self, ctx: &JobContext<'_>) -> Result<JobReport, EtlError> {
        let started = Instant::now();
        let listener = &ctx.config.event_listener;
        listener.on_event(EtlEvent::JobStarted {
            interval: self.interval,
        });

        let mut source = ctx.source.connect()?;
        let sink = if ctx.config.dry_run {
            None
        } else {
            Some(ctx.sink.connect()?)
        };

        let sql = self.template.render(&self.interval);
        let rowset = source.query(&sql)?;
        let rows = rowset.rows.len();
        etl_metrics::record_rows_read(rows as u64);

        let decoded = RowResult::decode(rowset)?;
        let tctx = TransformContext {
            interval: self.interval,
            period: self.period,
            series_name: self.target.name(),
            strategy: self.target.strategy(),
        };
        let transformed = transform(&tctx, decoded)?;

        for warning in transformed.warnings {
            let event = match warning {
                TransformWarning::UnexpectedRowCount { rows } => EtlEvent::UnexpectedRowCount {
                    interval: self.interval,
                    rows,
                    sql: sql.clone(),
                },
                TransformWarning::RowSkipped(skip) => EtlEvent::RowSkipped {
                    interval: self.interval,
                    reason: skip.to_string(),
                },
            };
            listener.on_event(event);
        }
        if ctx.config.debug {
            for (index, point) in transformed.points.iter().enumerate() {
                listener.on_event(EtlEvent::PointProduced {
                    interval: self.interval,
                    index,
                    name: point.name.clone(),
                    value: point.value,
                });
            }
        }

        let mut writer = BatchWriter::new(self.interval, sink, Arc::clone(listener));
        writer.extend(transformed.points);
        let outcome = writer.flush()?;
        drop(source);

        let elapsed = started.elapsed();
        etl_metrics::record_job_completed(elapsed);
        listener.on_event(EtlEvent::JobFinished {
            interval: self.interval,
            points: outcome.points,
            elapsed,
        });
        Ok(JobReport {
            interval: self.interval,
            rows,
            points: outcome.points,
            written: outcome.written,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::parse_datetime;
    use crate::sink::MemoryConnector;
    use crate::source::SqliteConnector;
    use crate::telemetry::CollectingEventListener;
    use rusqlite::Connection;

    fn day(s: &str) -> TimeInterval {
        let start = parse_datetime(s).unwrap();
        TimeInterval::new(start, Period::Day.next_period_start(start).unwrap())
    }

    fn fixture_db(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("gha.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE events (created_at TEXT, repo TEXT, kind TEXT);
             INSERT INTO events VALUES ('2020-01-01 03:00:00', 'kube-ctl', 'push');
             INSERT INTO events VALUES ('2020-01-01 09:00:00', 'kube-ctl', 'pr');
             INSERT INTO events VALUES ('2020-01-01 10:00:00', 'helm', 'push');
             INSERT INTO events VALUES ('2020-01-02 10:00:00', 'helm', 'push');",
        )
        .unwrap();
        path
    }

    fn job(sql: &str, series: &str, interval: TimeInterval) -> QueryJob {
        QueryJob {
            interval,
            template: Arc::new(SqlTemplate::new(sql)),
            target: Arc::new(SeriesTarget::new(series)),
            period: Period::Day,
        }
    }

    #[test]
    fn test_series_target_parsing() {
        let t = SeriesTarget::new("prs_merged_data");
        assert_eq!(t.strategy(), Some(NamingStrategy::PrsMerged));
        let t = SeriesTarget::new("events_d");
        assert_eq!(t.strategy(), None);
        assert!(matches!(t.require_strategy(), Err(EtlError::UnknownNamingStrategy(_))));
    }

    #[test]
    fn test_scalar_job_writes_one_point() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteConnector::new(fixture_db(dir.path()));
        let sink = MemoryConnector::new();
        let config = PipelineConfig::default();
        let ctx = JobContext { config: &config, source: &source, sink: &sink };

        let report = job(
            "select count(*) from events where created_at >= '{{from}}' and created_at < '{{to}}'",
            "events_d",
            day("2020-01-01"),
        )
        .run(&ctx)
        .unwrap();

        assert_eq!(report.points, 1);
        assert!(report.written);
        let points = sink.points().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "events_d");
        assert_eq!(points[0].value, 3.0);
        assert_eq!(points[0].timestamp, day("2020-01-01").start);
    }

    #[test]
    fn test_multi_column_job_uses_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteConnector::new(fixture_db(dir.path()));
        let sink = MemoryConnector::new();
        let config = PipelineConfig::default();
        let ctx = JobContext { config: &config, source: &source, sink: &sink };

        job(
            "select repo, count(*) from events where created_at >= '{{from}}' and created_at < '{{to}}' group by repo order by repo",
            "sig_mentions_data",
            day("2020-01-01"),
        )
        .run(&ctx)
        .unwrap();

        let got: Vec<_> = sink
            .points()
            .unwrap()
            .into_iter()
            .map(|p| (p.name, p.value))
            .collect();
        assert_eq!(got, vec![("helm_d".to_string(), 1.0), ("kube_ctl_d".to_string(), 2.0)]);
    }

    #[test]
    fn test_dry_run_skips_sink_and_reports_debug_points() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteConnector::new(fixture_db(dir.path()));
        let sink = MemoryConnector::new();
        let events = Arc::new(CollectingEventListener::new());
        let config = PipelineConfig {
            dry_run: true,
            debug: true,
            event_listener: events.clone(),
            ..PipelineConfig::default()
        };
        let ctx = JobContext { config: &config, source: &source, sink: &sink };

        let report = job("select 42", "answer", day("2020-01-01")).run(&ctx).unwrap();
        assert!(!report.written);
        assert!(sink.batches().unwrap().is_empty());
        let events = events.events();
        assert!(events.iter().any(|e| matches!(e, EtlEvent::PointProduced { name, value, .. } if name == "answer" && *value == 42.0)));
        assert!(events.iter().any(|e| matches!(e, EtlEvent::BatchDiscarded { points: 1, .. })));
    }

    #[test]
    fn test_query_failure_is_job_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteConnector::new(fixture_db(dir.path()));
        let sink = MemoryConnector::new();
        let config = PipelineConfig::default();
        let ctx = JobContext { config: &config, source: &source, sink: &sink };

        let err = job("select * from missing_table", "x", day("2020-01-01")).run(&ctx).unwrap_err();
        assert!(matches!(err, EtlError::Query(_)));
        assert!(sink.batches().unwrap().is_empty());
    }
}
