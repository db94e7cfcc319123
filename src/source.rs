//! Relational source: executes already-substituted read queries and hands back raw cells.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use crate::error::EtlError;

/// A single raw result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
        }
    }
}

/// Column metadata plus all rows of one executed query, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// An open connection to a relational database.
pub trait RelationalSource {
    /// Executes a parameterless read query.
    fn query(&mut self, sql: &str) -> Result<RowSet, EtlError>;
}

/// Opens one [`RelationalSource`] per job.
pub trait SourceConnector: std::fmt::Debug + Send + Sync {
    fn connect(&self) -> Result<Box<dyn RelationalSource>, EtlError>;
}

/// Read-only SQLite connection.
#[derive(Debug)]
pub struct SqliteSource {
    conn: Connection,
}

impl SqliteSource {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, EtlError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| EtlError::SourceConnect(format!("{}: {}", path.display(), e)))?;
        conn.busy_timeout(busy_timeout)?;
        Ok(SqliteSource { conn })
    }
}

impl RelationalSource for SqliteSource {
    fn query(&mut self, sql: &str) -> Result<RowSet, EtlError> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let n = columns.len();

        let mut out = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(n);
            for i in 0..n {
                cells.push(SqlValue::from(row.get_ref(i)?));
            }
            out.push(cells);
        }
        Ok(RowSet { columns, rows: out })
    }
}

/// Connects to a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SqliteConnector {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceConnector for SqliteConnector {
    fn connect(&self) -> Result<Box<dyn RelationalSource>, EtlError> {
        Ok(Box::new(SqliteSource::open(&self.path, self.busy_timeout)?))
    }
}
