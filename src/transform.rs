//! Typed decoding of query results and their transformation into metric points.
//!
//! Two result shapes are supported: a single scalar (one column) and keyed rows (a text key
//! followed by one or more numeric columns).

use crate::error::EtlError;
use crate::naming::{NamingStrategy, RowSkip};
use crate::period::Period;
use crate::source::{RowSet, SqlValue};
use crate::types::{MetricPoint, TimeInterval, Value};

/// One keyed result row: the row key and its value columns.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRow {
    pub key: String,
    pub values: Vec<Option<Value>>,
}

/// Result of one query, decoded by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RowResult {
    /// No columns at all.
    Empty,
    /// Single-column result. `value` is the last row seen (`None` for no rows or NULL).
    Scalar { value: Option<Value>, rows: usize },
    /// Two or more columns.
    Keyed(Vec<KeyedRow>),
}

impl RowResult {
    /// Decodes a raw [`RowSet`] according to its column count.
    ///
    /// # Errors
    /// Returns [`EtlError::Decode`] if a scalar cell is text that is not a number, or a blob.
    pub fn decode(rows: RowSet) -> Result<Self, EtlError> {
        match rows.column_count() {
            0 => Ok(RowResult::Empty),
            1 => {
                let count = rows.rows.len();
                let mut value = None;
                for row in &rows.rows {
                    value = match row.first() {
                        Some(cell) => decode_scalar(cell, 0)?,
                        None => None,
                    };
                }
                Ok(RowResult::Scalar { value, rows: count })
            }
            _ => {
                let keyed = rows
                    .rows
                    .into_iter()
                    .map(|row| {
                        let mut cells = row.into_iter();
                        let key = cells.next().map(row_key).unwrap_or_default();
                        let values = cells.map(|c| lenient_number(&c)).collect();
                        KeyedRow { key, values }
                    })
                    .collect();
                Ok(RowResult::Keyed(keyed))
            }
        }
    }
}

/// Nullable float for the scalar path. Text must parse.
fn decode_scalar(cell: &SqlValue, column: usize) -> Result<Option<Value>, EtlError> {
    match cell {
        SqlValue::Null => Ok(None),
        SqlValue::Integer(i) => Ok(Some(*i as f64)),
        SqlValue::Real(f) => Ok(Some(*f)),
        SqlValue::Text(s) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            Ok(v) => Err(EtlError::Decode {
                column,
                detail: format!("{:?}: non-finite value {}", s, v),
            }),
            Err(e) => Err(EtlError::Decode {
                column,
                detail: format!("{:?}: {}", s, e),
            }),
        },
        SqlValue::Blob(b) => Err(EtlError::Decode {
            column,
            detail: format!("blob of {} bytes", b.len()),
        }),
    }
}

/// Value columns of keyed rows: anything that is not a finite number becomes `None` (written
/// as `0.0`).
fn lenient_number(cell: &SqlValue) -> Option<Value> {
    let parsed = match cell {
        SqlValue::Null => None,
        SqlValue::Integer(i) => Some(*i as f64),
        SqlValue::Real(f) => Some(*f),
        SqlValue::Text(s) => s.trim().parse::<f64>().ok(),
        SqlValue::Blob(b) => std::str::from_utf8(b).ok().and_then(|s| s.trim().parse().ok()),
    };
    parsed.filter(|v| v.is_finite())
}

fn row_key(cell: SqlValue) -> String {
    match cell {
        SqlValue::Null => String::new(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Text(s) => s,
        SqlValue::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
    }
}

/// What the transformer needs to know about the job it is serving.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub interval: TimeInterval,
    pub period: Period,
    /// Literal series name used for scalar results.
    pub series_name: &'a str,
    /// Naming strategy for keyed results, if the series target names one.
    pub strategy: Option<NamingStrategy>,
}

/// Non-fatal conditions met while transforming.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformWarning {
    /// A scalar query returned a row count other than one.
    UnexpectedRowCount { rows: usize },
    /// A keyed row produced no names and was dropped.
    RowSkipped(RowSkip),
}

/// Points produced for one job, in source row order, plus any warnings.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Transformed {
    pub points: Vec<MetricPoint>,
    pub warnings: Vec<TransformWarning>,
}

/// Turns a decoded result into metric points, all timestamped at the interval start.
///
/// # Errors
/// Returns [`EtlError::UnknownNamingStrategy`] for a keyed result when no strategy is set.
pub fn transform(ctx: &TransformContext<'_>, result: RowResult) -> Result<Transformed, EtlError> {
    let ts = ctx.interval.start;
    let mut out = Transformed::default();
    match result {
        RowResult::Empty => {}
        RowResult::Scalar { value, rows } => {
            if rows != 1 {
                out.warnings.push(TransformWarning::UnexpectedRowCount { rows });
            }
            out.points
                .push(MetricPoint::new(ctx.series_name, ts, value.unwrap_or(0.0)));
        }
        RowResult::Keyed(rows) => {
            let strategy = ctx
                .strategy
                .ok_or_else(|| EtlError::UnknownNamingStrategy(ctx.series_name.to_string()))?;
            for row in rows {
                let names = match strategy.series_names(&row.key, ctx.period) {
                    Ok(names) => names,
                    Err(skip) => {
                        out.warnings.push(TransformWarning::RowSkipped(skip));
                        continue;
                    }
                };
                // Strict pairwise zip: surplus names or values are dropped.
                for (name, value) in names.into_iter().zip(row.values) {
                    out.points.push(MetricPoint::new(name, ts, value.unwrap_or(0.0)));
                }
            }
        }
    }
    Ok(out)
}
