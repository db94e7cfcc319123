//! Time-series sinks: where finished batches are written.
//!
//! Points are encoded as InfluxDB line protocol (`<name> value=<f64> <unix-nanos>`), which every
//! sink here either transmits or stores verbatim.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::EtlError;
use crate::types::{Batch, MetricPoint};

/// An open connection to a time-series store.
pub trait SeriesSink {
    /// Transmits a whole batch in one call.
    fn write_batch(&mut self, batch: &Batch) -> Result<(), EtlError>;
}

/// Opens one [`SeriesSink`] per job.
pub trait SinkConnector: std::fmt::Debug + Send + Sync {
    fn connect(&self) -> Result<Box<dyn SeriesSink>, EtlError>;
}

/// Escapes a measurement name for line protocol (commas and spaces).
pub fn escape_measurement(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, ',' | ' ' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Encodes one point as a line-protocol line (without trailing newline).
///
/// # Errors
/// Line protocol has no encoding for line breaks in names or for non-finite floats; both are
/// rejected rather than written as a corrupt line.
pub fn encode_point(point: &MetricPoint) -> Result<String, EtlError> {
    if point.name.contains(&['\n', '\r'][..]) {
        return Err(EtlError::InvalidSeriesName(point.name.clone()));
    }
    if !point.value.is_finite() {
        return Err(EtlError::NonFiniteValue {
            name: point.name.clone(),
            value: point.value,
        });
    }
    let nanos = point.timestamp_nanos()?;
    Ok(format!(
        "{} value={} {}",
        escape_measurement(&point.name),
        point.value,
        nanos
    ))
}

/// Encodes a batch as newline-terminated line protocol.
pub fn encode_batch(batch: &Batch) -> Result<String, EtlError> {
    let mut body = String::with_capacity(batch.len() * 48);
    for point in batch.points() {
        body.push_str(&encode_point(point)?);
        body.push('\n');
    }
    Ok(body)
}

// ---------- InfluxDB over HTTP ----------

/// Connection settings for an InfluxDB 1.x compatible `/write` endpoint.
#[derive(Debug, Clone)]
pub struct InfluxHttpConnector {
    pub url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl InfluxHttpConnector {
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        InfluxHttpConnector {
            url: url.into(),
            database: database.into(),
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// `<url>/write?db=..&precision=ns[&u=..&p=..]`
    fn write_url(&self) -> Result<reqwest::Url, EtlError> {
        let mut params = vec![("db", self.database.as_str()), ("precision", "ns")];
        if let Some(u) = self.username.as_deref() {
            params.push(("u", u));
        }
        if let Some(p) = self.password.as_deref() {
            params.push(("p", p));
        }
        let base = format!("{}/write", self.url.trim_end_matches('/'));
        reqwest::Url::parse_with_params(&base, &params)
            .map_err(|e| EtlError::SinkConnect(format!("invalid url {:?}: {}", self.url, e)))
    }
}

impl SinkConnector for InfluxHttpConnector {
    fn connect(&self) -> Result<Box<dyn SeriesSink>, EtlError> {
        let write_url = self.write_url()?;
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| EtlError::SinkConnect(e.to_string()))?;
        Ok(Box::new(InfluxHttpSink { client, write_url }))
    }
}

#[derive(Debug)]
pub struct InfluxHttpSink {
    client: reqwest::blocking::Client,
    write_url: reqwest::Url,
}

impl SeriesSink for InfluxHttpSink {
    fn write_batch(&mut self, batch: &Batch) -> Result<(), EtlError> {
        // The endpoint rejects empty bodies.
        if batch.is_empty() {
            return Ok(());
        }
        let body = encode_batch(batch)?;
        let resp = self.client.post(self.write_url.clone()).body(body).send()?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(EtlError::SinkWrite(format!("{}: {}", status, text.trim())));
        }
        Ok(())
    }
}

// ---------- Line protocol file ----------

/// Appends each batch to a file as line protocol.
#[derive(Debug, Clone)]
pub struct LineProtocolFileConnector {
    path: PathBuf,
}

impl LineProtocolFileConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LineProtocolFileConnector { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SinkConnector for LineProtocolFileConnector {
    fn connect(&self) -> Result<Box<dyn SeriesSink>, EtlError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EtlError::SinkConnect(format!("{}: {}", self.path.display(), e)))?;
        Ok(Box::new(WriterSink { writer: file }))
    }
}

/// Writes each batch to standard output as line protocol.
#[derive(Debug, Clone, Default)]
pub struct StdoutConnector;

impl SinkConnector for StdoutConnector {
    fn connect(&self) -> Result<Box<dyn SeriesSink>, EtlError> {
        Ok(Box::new(WriterSink {
            writer: std::io::stdout(),
        }))
    }
}

/// Line-protocol sink over any writer. The encoded batch goes out in a single `write_all`.
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> SeriesSink for WriterSink<W> {
    fn write_batch(&mut self, batch: &Batch) -> Result<(), EtlError> {
        let body = encode_batch(batch)?;
        self.writer
            .write_all(body.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| EtlError::SinkWrite(e.to_string()))
    }
}

// ---------- In-memory ----------

/// Collects batches in process. Every connection appends to the same shared list.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    batches: Arc<Mutex<Vec<Batch>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// All batches written so far, in write order.
    pub fn batches(&self) -> Result<Vec<Batch>, EtlError> {
        Ok(self.batches.lock()?.clone())
    }

    /// All points written so far, flattened in write order.
    pub fn points(&self) -> Result<Vec<MetricPoint>, EtlError> {
        Ok(self
            .batches
            .lock()?
            .iter()
            .flat_map(|b| b.points().iter().cloned())
            .collect())
    }
}

impl SinkConnector for MemoryConnector {
    fn connect(&self) -> Result<Box<dyn SeriesSink>, EtlError> {
        Ok(Box::new(MemorySink {
            batches: Arc::clone(&self.batches),
        }))
    }
}

#[derive(Debug)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Batch>>>,
}

impl SeriesSink for MemorySink {
    fn write_batch(&mut self, batch: &Batch) -> Result<(), EtlError> {
        self.batches.lock()?.push(batch.clone());
        Ok(())
    }
}
