#![doc = include_str!("../README.md")]
// Declare modules
pub mod batch;
pub mod error;
pub mod interval;
pub mod job;
pub mod naming;
pub mod period;
pub mod pipeline;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod telemetry;
pub mod template;
pub mod transform;
pub mod types;

/// Error type for pipeline operations.
pub use crate::error::{EtlError, JobFailure};
/// Lazy interval sequence over an aligned range.
pub use crate::interval::{partition, Intervals};
/// One unit of work and its summary.
pub use crate::job::{JobReport, QueryJob, SeriesTarget};
/// Closed set of series naming strategies.
pub use crate::naming::NamingStrategy;
/// Calendar granularity and date helpers.
pub use crate::period::{format_ymdhms, parse_datetime, Period};
/// Main entry point and its configuration.
pub use crate::pipeline::{Pipeline, PipelineConfig, RunRequest};
/// Worker pool and run outcome.
pub use crate::scheduler::{ErrorMode, RunReport, Scheduler};
/// Time-series sinks.
pub use crate::sink::{SeriesSink, SinkConnector};
/// Relational sources.
pub use crate::source::{RelationalSource, SourceConnector};
/// Structured event hook for observability.
pub use crate::telemetry::{EtlEvent, EtlEventListener};
/// SQL text with interval placeholders.
pub use crate::template::SqlTemplate;
/// Core data types.
pub use crate::types::{Batch, MetricPoint, TimeInterval, Timestamp, Value};
