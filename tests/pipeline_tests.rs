//! End-to-end pipeline runs against a SQLite fixture and an in-memory sink.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use sqlseries::sink::MemoryConnector;
use sqlseries::source::SqliteConnector;
use sqlseries::telemetry::CollectingEventListener;
use sqlseries::*;

fn ts(s: &str) -> Timestamp {
    parse_datetime(s).unwrap()
}

// 5 events on 2020-01-01, 7 on 2020-01-02, 1 on 2020-01-06.
fn fixture_db(dir: &Path) -> PathBuf {
    let path = dir.join("gha.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE events (created_at TEXT, repo TEXT, company TEXT);")
        .unwrap();
    let mut insert = conn
        .prepare("INSERT INTO events VALUES (?1, ?2, ?3)")
        .unwrap();
    let repos = ["kubernetes/kubernetes", "helm/charts", "kubernetes/test-infra"];
    for i in 0..5 {
        insert
            .execute((format!("2020-01-01 0{}:00:00", i), repos[i % 3], "Société Générale"))
            .unwrap();
    }
    for i in 0..7 {
        insert
            .execute((format!("2020-01-02 1{}:30:00", i), repos[i % 3], "Red Hat"))
            .unwrap();
    }
    insert
        .execute(("2020-01-06 12:00:00", repos[0], "Red Hat"))
        .unwrap();
    path
}

const COUNT_SQL: &str =
    "select count(*) from events where created_at >= '{{from}}' and created_at < '{{to}}'";

fn pipeline(
    db: PathBuf,
    sink: &MemoryConnector,
    config: PipelineConfig,
) -> Pipeline {
    Pipeline::new(config, Arc::new(SqliteConnector::new(db)), Arc::new(sink.clone()))
}

fn request(series: &str, sql: &str, from: &str, to: &str, period: Period) -> RunRequest {
    RunRequest {
        series: series.to_string(),
        template: SqlTemplate::new(sql),
        from: ts(from),
        to: ts(to),
        period,
        multi_column: false,
    }
}

fn sorted_points(sink: &MemoryConnector) -> Vec<(String, Timestamp, f64)> {
    let mut points: Vec<_> = sink
        .points()
        .unwrap()
        .into_iter()
        .map(|p| (p.name, p.timestamp, p.value))
        .collect();
    points.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    points
}

#[test]
fn test_scalar_daily_counts() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemoryConnector::new();
    let config = PipelineConfig {
        concurrency: Some(4),
        ..PipelineConfig::default()
    };
    let report = pipeline(fixture_db(dir.path()), &sink, config)
        .run(&request("events_d", COUNT_SQL, "2020-01-01", "2020-01-02", Period::Day))
        .unwrap();

    assert!(report.is_success(), "failures: {:?}", report.failures);
    assert_eq!(report.intervals, 2);
    assert_eq!(report.points(), 2);
    assert_eq!(
        sorted_points(&sink),
        vec![
            ("events_d".to_string(), ts("2020-01-01"), 5.0),
            ("events_d".to_string(), ts("2020-01-02"), 7.0),
        ]
    );
    // One batch per job.
    assert_eq!(sink.batches().unwrap().len(), 2);
}

#[test]
fn test_weekly_range_aligns_to_monday() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemoryConnector::new();
    // 2020-01-01 is a Wednesday; its week starts on Monday 2019-12-30.
    let report = pipeline(fixture_db(dir.path()), &sink, PipelineConfig::default())
        .run(&request("events_w", COUNT_SQL, "2020-01-01", "2020-01-06", Period::Week))
        .unwrap();

    assert!(report.is_success());
    assert_eq!(
        sorted_points(&sink),
        vec![
            ("events_w".to_string(), ts("2019-12-30"), 12.0),
            ("events_w".to_string(), ts("2020-01-06"), 1.0),
        ]
    );
}

#[test]
fn test_multi_column_naming_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemoryConnector::new();
    let sql = "select repo, count(*) from events \
               where created_at >= '{{from}}' and created_at < '{{to}}' \
               group by repo order by repo";
    let report = pipeline(fixture_db(dir.path()), &sink, PipelineConfig::default())
        .run(&request("prs_merged_data", sql, "2020-01-01", "2020-01-01", Period::Day))
        .unwrap();

    assert!(report.is_success());
    assert_eq!(
        sorted_points(&sink),
        vec![
            ("prs_helm_charts_d".to_string(), ts("2020-01-01"), 2.0),
            ("prs_kubernetes_kubernetes_d".to_string(), ts("2020-01-01"), 2.0),
            ("prs_kubernetes_test_infra_d".to_string(), ts("2020-01-01"), 1.0),
        ]
    );
}

#[test]
fn test_company_activity_strips_diacritics() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemoryConnector::new();
    let sql = "select company || ';events,repos', count(*), count(distinct repo) from events \
               where created_at >= '{{from}}' and created_at < '{{to}}' \
               group by company";
    let report = pipeline(fixture_db(dir.path()), &sink, PipelineConfig::default())
        .run(&request("company_activity", sql, "2020-01-01", "2020-01-01", Period::Day))
        .unwrap();

    assert!(report.is_success());
    assert_eq!(
        sorted_points(&sink),
        vec![
            ("company_societe_generale_events_d".to_string(), ts("2020-01-01"), 5.0),
            ("company_societe_generale_repos_d".to_string(), ts("2020-01-01"), 3.0),
        ]
    );
}

#[test]
fn test_unknown_strategy_fails_fast_on_first_interval() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemoryConnector::new();
    let listener = Arc::new(CollectingEventListener::new());
    let config = PipelineConfig {
        concurrency: Some(1),
        error_mode: ErrorMode::FailFast,
        event_listener: listener.clone(),
        ..PipelineConfig::default()
    };
    let sql = "select repo, count(*) from events \
               where created_at >= '{{from}}' and created_at < '{{to}}' group by repo";
    let report = pipeline(fixture_db(dir.path()), &sink, config)
        .run(&request("no_such_function", sql, "2020-01-01", "2020-01-05", Period::Day))
        .unwrap();

    assert_eq!(report.intervals, 5);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.skipped, 4);
    let first = report.first_failure().unwrap();
    assert_eq!(first.interval.start, ts("2020-01-01"));
    assert!(matches!(first.error, EtlError::UnknownNamingStrategy(ref s) if s == "no_such_function"));
    assert!(sink.points().unwrap().is_empty());

    let failed: Vec<_> = listener
        .events()
        .into_iter()
        .filter(|e| matches!(e, EtlEvent::JobFailed { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
}

#[test]
fn test_unknown_strategy_aborts_run_in_default_error_mode() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemoryConnector::new();
    let config = PipelineConfig {
        concurrency: Some(1),
        ..PipelineConfig::default()
    };
    assert_eq!(config.error_mode, ErrorMode::CollectAll);
    let sql = "select repo, count(*) from events \
               where created_at >= '{{from}}' and created_at < '{{to}}' group by repo";
    let report = pipeline(fixture_db(dir.path()), &sink, config)
        .run(&request("no_such_function", sql, "2020-01-01", "2020-01-10", Period::Day))
        .unwrap();

    assert_eq!(report.intervals, 10);
    assert_eq!(report.failures.len(), 1);
    assert!(report.skipped > 0);
    assert_eq!(report.skipped, 9);
    assert!(!report.is_success());
    assert!(sink.batches().unwrap().is_empty());
}

#[test]
fn test_declared_multi_column_rejects_unknown_strategy_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemoryConnector::new();
    let mut req = request("no_such_function", COUNT_SQL, "2020-01-01", "2020-01-05", Period::Day);
    req.multi_column = true;
    let err = pipeline(fixture_db(dir.path()), &sink, PipelineConfig::default())
        .run(&req)
        .unwrap_err();
    assert!(matches!(err, EtlError::UnknownNamingStrategy(_)));
    assert!(sink.batches().unwrap().is_empty());
}

#[test]
fn test_collect_all_reports_every_failed_interval() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemoryConnector::new();
    let report = pipeline(fixture_db(dir.path()), &sink, PipelineConfig::default())
        .run(&request(
            "broken",
            "select count(*) from no_such_table where x >= '{{from}}'",
            "2020-01-01",
            "2020-01-03",
            Period::Day,
        ))
        .unwrap();
    assert_eq!(report.failures.len(), 3);
    assert_eq!(report.skipped, 0);
    assert!(report
        .failures
        .iter()
        .all(|f| matches!(f.error, EtlError::Query(_))));
}

#[test]
fn test_dry_run_never_writes() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemoryConnector::new();
    let listener = Arc::new(CollectingEventListener::new());
    let config = PipelineConfig {
        dry_run: true,
        debug: true,
        event_listener: listener.clone(),
        ..PipelineConfig::default()
    };
    let report = pipeline(fixture_db(dir.path()), &sink, config)
        .run(&request("events_d", COUNT_SQL, "2020-01-01", "2020-01-02", Period::Day))
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.points(), 2);
    assert!(report.completed.iter().all(|r| !r.written));
    assert!(sink.batches().unwrap().is_empty());

    let events = listener.events();
    let discarded = events
        .iter()
        .filter(|e| matches!(e, EtlEvent::BatchDiscarded { .. }))
        .count();
    let produced = events
        .iter()
        .filter(|e| matches!(e, EtlEvent::PointProduced { .. }))
        .count();
    assert_eq!(discarded, 2);
    assert_eq!(produced, 2);
    assert!(matches!(events.first(), Some(EtlEvent::RunStarted { intervals: 2, error_mode: ErrorMode::CollectAll, .. })));
    assert!(matches!(events.last(), Some(EtlEvent::RunFinished { completed: 2, .. })));
}

#[test]
fn test_from_after_to_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemoryConnector::new();
    let report = pipeline(fixture_db(dir.path()), &sink, PipelineConfig::default())
        .run(&request("events_d", COUNT_SQL, "2020-01-05", "2020-01-01", Period::Day))
        .unwrap();
    assert_eq!(report.intervals, 0);
    assert!(report.is_success());
    assert!(sink.batches().unwrap().is_empty());
}
