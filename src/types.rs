use std::fmt;

use chrono::NaiveDateTime;

use crate::error::EtlError;
use crate::period::format_ymdhms;

/// Timestamp type (naive calendar time, interpreted as UTC).
pub type Timestamp = NaiveDateTime;

/// Value type.
pub type Value = f64;

/// Half-open time window `[start, end)` aligned to a period boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeInterval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeInterval {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        TimeInterval { start, end }
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", format_ymdhms(self.start), format_ymdhms(self.end))
    }
}

/// A single named time-series point. Points carry no tags; the value is stored in the
/// `value` field on the sink side.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub timestamp: Timestamp,
    pub value: Value,
}

impl MetricPoint {
    pub fn new(name: impl Into<String>, timestamp: Timestamp, value: Value) -> Self {
        MetricPoint {
            name: name.into(),
            timestamp,
            value,
        }
    }

    /// Timestamp as nanoseconds since the Unix epoch.
    pub fn timestamp_nanos(&self) -> Result<i64, EtlError> {
        self.timestamp
            .and_utc()
            .timestamp_nanos_opt()
            .ok_or_else(|| EtlError::TimestampOutOfRange(format_ymdhms(self.timestamp)))
    }
}

/// Ordered collection of points produced by one job.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Batch {
    points: Vec<MetricPoint>,
}

impl Batch {
    /// Appends a point, keeping insertion order.
    pub fn push(&mut self, point: MetricPoint) {
        self.points.push(point);
    }

    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    /// Returns the number of points in the batch.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl Extend<MetricPoint> for Batch {
    fn extend<I: IntoIterator<Item = MetricPoint>>(&mut self, iter: I) {
        self.points.extend(iter);
    }
}
