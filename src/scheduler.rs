//! Bounded worker pool that runs one job per interval.
//!
//! Jobs are admitted in interval order onto a fixed-size `rayon` pool, so at most `threads` jobs
//! execute at once. With a single thread, jobs run on the calling thread strictly in order.
//! Every job yields a typed outcome; the scheduler aggregates them into a [`RunReport`].

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::{EtlError, JobFailure};
use crate::job::JobReport;
use crate::types::TimeInterval;

/// What to do once a job fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Start no further jobs after the first failure; running jobs still finish.
    FailFast,
    /// Run every job and report all failures at the end. A failure that invalidates the whole
    /// run (see [`EtlError::aborts_run`]) still stops new jobs.
    #[default]
    CollectAll,
}

impl ErrorMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorMode::FailFast => "fail_fast",
            ErrorMode::CollectAll => "collect_all",
        }
    }
}

impl FromStr for ErrorMode {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().replace('-', "_").as_str() {
            "fail_fast" => Ok(ErrorMode::FailFast),
            "collect_all" => Ok(ErrorMode::CollectAll),
            other => Err(EtlError::ConfigError(format!(
                "unknown error_mode {:?} (expected fail_fast or collect_all)",
                other
            ))),
        }
    }
}

/// Aggregated outcome of a run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Number of intervals in the range.
    pub intervals: usize,
    /// Successful jobs, ordered by interval.
    pub completed: Vec<JobReport>,
    /// Failed jobs, ordered by interval.
    pub failures: Vec<JobFailure>,
    /// Jobs never started because of an earlier run-aborting failure.
    pub skipped: usize,
    pub elapsed: Duration,
}

impl RunReport {
    /// Total points produced by successful jobs.
    pub fn points(&self) -> usize {
        self.completed.iter().map(|r| r.points).sum()
    }

    /// Returns true if every interval completed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped == 0
    }

    /// The earliest failure, if any.
    pub fn first_failure(&self) -> Option<&JobFailure> {
        self.failures.first()
    }
}

enum Outcome {
    Done(JobReport),
    Failed(EtlError),
    Skipped,
}

/// Runs jobs under a concurrency limit.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    threads: usize,
    error_mode: ErrorMode,
}

impl Scheduler {
    /// `threads` is clamped to at least one.
    pub fn new(threads: usize, error_mode: ErrorMode) -> Self {
        Scheduler {
            threads: threads.max(1),
            error_mode,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn error_mode(&self) -> ErrorMode {
        self.error_mode
    }

    /// Runs `job` once per interval and waits for all of them.
    ///
    /// # Errors
    /// Only fails if the worker pool cannot be built; job errors are reported in the
    /// [`RunReport`].
    pub fn run<I, F>(&self, intervals: I, job: F) -> Result<RunReport, EtlError>
    where
        I: IntoIterator<Item = TimeInterval>,
        I::IntoIter: Send,
        F: Fn(TimeInterval) -> Result<JobReport, EtlError> + Sync,
    {
        let started = Instant::now();
        let fail_fast = self.error_mode == ErrorMode::FailFast;
        let abort = AtomicBool::new(false);

        let run_one = |interval: TimeInterval| -> Outcome {
            if abort.load(Ordering::Acquire) {
                return Outcome::Skipped;
            }
            match job(interval) {
                Ok(report) => Outcome::Done(report),
                Err(e) => {
                    if fail_fast || e.aborts_run() {
                        abort.store(true, Ordering::Release);
                    }
                    Outcome::Failed(e)
                }
            }
        };

        let mut outcomes: Vec<(TimeInterval, Outcome)> = if self.threads == 1 {
            intervals.into_iter().map(|iv| (iv, run_one(iv))).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.threads)
                .thread_name(|i| format!("sqlseries-worker-{}", i))
                .build()
                .map_err(|e| EtlError::WorkerPool(e.to_string()))?;

            let (tx, rx) = mpsc::channel();
            let intervals = intervals.into_iter();
            let run_one = &run_one;
            pool.scope_fifo(move |scope| {
                for interval in intervals {
                    let tx = tx.clone();
                    scope.spawn_fifo(move |_| {
                        // The receiver outlives the scope; a send error cannot happen here.
                        let _ = tx.send((interval, run_one(interval)));
                    });
                }
            });
            let mut collected: Vec<_> = rx.into_iter().collect();
            collected.sort_by_key(|(iv, _)| iv.start);
            collected
        };

        let mut report = RunReport {
            intervals: outcomes.len(),
            ..RunReport::default()
        };
        for (interval, outcome) in outcomes.drain(..) {
            match outcome {
                Outcome::Done(r) => report.completed.push(r),
                Outcome::Failed(error) => report.failures.push(JobFailure { interval, error }),
                Outcome::Skipped => report.skipped += 1,
            }
        }
        report.elapsed = started.elapsed();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::partition;
    use crate::period::{parse_datetime, Period};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::thread;

    fn report(interval: TimeInterval) -> JobReport {
        JobReport {
            interval,
            rows: 1,
            points: 1,
            written: true,
            elapsed: Duration::ZERO,
        }
    }

    fn days(n: u64) -> Vec<TimeInterval> {
        let from = parse_datetime("2020-01-01").unwrap();
        let to = from + chrono::Days::new(n - 1);
        partition(from, to, Period::Day).unwrap().collect()
    }

    #[test]
    fn test_concurrency_never_exceeds_limit() {
        for limit in [2usize, 3, 4] {
            let active = AtomicUsize::new(0);
            let peak = AtomicUsize::new(0);
            let scheduler = Scheduler::new(limit, ErrorMode::CollectAll);
            let rep = scheduler
                .run(days(24), |iv| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(report(iv))
                })
                .unwrap();
            assert_eq!(rep.completed.len(), 24);
            assert!(peak.load(Ordering::SeqCst) <= limit, "limit {} exceeded", limit);
        }
    }

    #[test]
    fn test_single_thread_runs_in_interval_order() {
        let order = Mutex::new(Vec::new());
        let caller = thread::current().id();
        let intervals = days(10);
        let rep = Scheduler::new(1, ErrorMode::CollectAll)
            .run(intervals.clone(), |iv| {
                assert_eq!(thread::current().id(), caller);
                order.lock().unwrap().push(iv);
                Ok(report(iv))
            })
            .unwrap();
        assert_eq!(order.into_inner().unwrap(), intervals);
        let completed: Vec<_> = rep.completed.iter().map(|r| r.interval).collect();
        assert_eq!(completed, intervals);
    }

    #[test]
    fn test_collect_all_runs_every_job() {
        let intervals = days(6);
        let bad = intervals[2];
        let rep = Scheduler::new(3, ErrorMode::CollectAll)
            .run(intervals.clone(), |iv| {
                if iv == bad {
                    Err(EtlError::SinkWrite("down".into()))
                } else {
                    Ok(report(iv))
                }
            })
            .unwrap();
        assert_eq!(rep.intervals, 6);
        assert_eq!(rep.completed.len(), 5);
        assert_eq!(rep.failures.len(), 1);
        assert_eq!(rep.failures[0].interval, bad);
        assert_eq!(rep.skipped, 0);
        assert!(!rep.is_success());
        // Reports come back ordered by interval even when run concurrently.
        let starts: Vec<_> = rep.completed.iter().map(|r| r.interval.start).collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }

    #[test]
    fn test_fail_fast_sequential_stops_after_first_failure() {
        let intervals = days(8);
        let calls = AtomicUsize::new(0);
        let rep = Scheduler::new(1, ErrorMode::FailFast)
            .run(intervals.clone(), |iv| {
                calls.fetch_add(1, Ordering::SeqCst);
                if iv == intervals[3] {
                    Err(EtlError::UnknownNamingStrategy("nope".into()))
                } else {
                    Ok(report(iv))
                }
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(rep.completed.len(), 3);
        assert_eq!(rep.failures.len(), 1);
        assert_eq!(rep.skipped, 4);
    }

    #[test]
    fn test_collect_all_stops_on_run_aborting_error() {
        let intervals = days(6);
        let calls = AtomicUsize::new(0);
        let rep = Scheduler::new(1, ErrorMode::CollectAll)
            .run(intervals.clone(), |iv| {
                calls.fetch_add(1, Ordering::SeqCst);
                if iv == intervals[1] {
                    Err(EtlError::UnknownNamingStrategy("nope".into()))
                } else {
                    Ok(report(iv))
                }
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(rep.completed.len(), 1);
        assert_eq!(rep.failures.len(), 1);
        assert_eq!(rep.skipped, 4);
    }

    #[test]
    fn test_fail_fast_parallel_skips_later_jobs() {
        let intervals = days(40);
        let rep = Scheduler::new(2, ErrorMode::FailFast)
            .run(intervals.clone(), |iv| {
                if iv == intervals[0] {
                    Err(EtlError::SinkWrite("down".into()))
                } else {
                    thread::sleep(Duration::from_millis(2));
                    Ok(report(iv))
                }
            })
            .unwrap();
        assert_eq!(rep.failures.len(), 1);
        assert!(rep.skipped > 0);
        assert_eq!(rep.completed.len() + rep.failures.len() + rep.skipped, 40);
    }

    #[test]
    fn test_empty_range() {
        let rep = Scheduler::new(4, ErrorMode::CollectAll)
            .run(Vec::new(), |iv| Ok(report(iv)))
            .unwrap();
        assert_eq!(rep.intervals, 0);
        assert!(rep.is_success());
    }

    #[test]
    fn test_error_mode_parse() {
        assert_eq!("fail-fast".parse::<ErrorMode>().unwrap(), ErrorMode::FailFast);
        assert_eq!("collect_all".parse::<ErrorMode>().unwrap(), ErrorMode::CollectAll);
        assert!("sometimes".parse::<ErrorMode>().is_err());
    }
}
