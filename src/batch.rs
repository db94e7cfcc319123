use std::sync::Arc;

use crate::error::EtlError;
use crate::sink::SeriesSink;
use crate::telemetry::{etl_metrics, EtlEvent, EtlEventListener};
use crate::types::{Batch, MetricPoint, TimeInterval};

/// Accumulates the points of one job and flushes them with a single sink call.
///
/// A writer without a sink is a dry run: the batch is built, reported, and dropped.
/// Writers are never shared between jobs, so no locking is needed on the write path.
pub struct BatchWriter {
    interval: TimeInterval,
    batch: Batch,
    sink: Option<Box<dyn SeriesSink>>,
    listener: Arc<dyn EtlEventListener>,
}

/// What happened to a flushed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    pub points: usize,
    /// False for dry runs.
    pub written: bool,
}

impl BatchWriter {
    pub fn new(
        interval: TimeInterval,
        sink: Option<Box<dyn SeriesSink>>,
        listener: Arc<dyn EtlEventListener>,
    ) -> Self {
        BatchWriter {
            interval,
            batch: Batch::default(),
            sink,
            listener,
        }
    }

    /// Stages a single point.
    pub fn add(&mut self, point: MetricPoint) {
        self.batch.push(point);
    }

    /// Returns the number of staged points.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Returns true if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Writes the staged batch in one call, or discards it on a dry run.
    ///
    /// Consumes the writer; the sink connection is released when this returns, on success
    /// and on error alike.
    pub fn flush(self) -> Result<FlushOutcome, EtlError> {
        let points = self.batch.len();
        match self.sink {
            Some(mut sink) => {
                sink.write_batch(&self.batch)?;
                etl_metrics::record_points_written(points as u64);
                self.listener.on_event(EtlEvent::BatchWritten {
                    interval: self.interval,
                    points,
                });
                Ok(FlushOutcome {
                    points,
                    written: true,
                })
            }
            None => {
                self.listener.on_event(EtlEvent::BatchDiscarded {
                    interval: self.interval,
                    points,
                });
                Ok(FlushOutcome {
                    points,
                    written: false,
                })
            }
        }
    }
}

impl Extend<MetricPoint> for BatchWriter {
    fn extend<I: IntoIterator<Item = MetricPoint>>(&mut self, iter: I) {
        self.batch.extend(iter);
    }
}
