//! Command-line front end for the sqlseries pipeline.
//!
//! Loads configuration from (in precedence order): defaults, config file, environment variables
//! (`SQLSERIES_*`), and CLI flags. Runs the SQL template once per interval of the requested range
//! and writes the resulting points to the configured sink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use config::{Config, Environment, File};
use tracing_subscriber::EnvFilter;

use sqlseries::sink::{InfluxHttpConnector, LineProtocolFileConnector, StdoutConnector};
use sqlseries::source::SqliteConnector;
use sqlseries::telemetry::TracingEventListener;
use sqlseries::{
    parse_datetime, ErrorMode, Period, Pipeline, PipelineConfig, RunRequest, SinkConnector,
    SqlTemplate,
};

// ---------- CLI ----------

/// Runs a SQL query per calendar interval and writes the results as time series.
///
/// For a query returning a single value, SERIES_NAME_OR_FUNC is the exact series name. For
/// queries returning multiple rows (a string key followed by numbers) it names the function
/// that maps each row and the period to series names.
#[derive(Parser, Debug)]
#[command(name = "sqlseries", version, about)]
pub struct Cli {
    /// Series name (single-value queries) or naming function (multi-column queries).
    #[arg(required_unless_present = "validate_config")]
    pub series_name_or_func: Option<String>,

    /// SQL template file containing {{from}} and {{to}} placeholders.
    #[arg(required_unless_present = "validate_config")]
    pub sql_file: Option<PathBuf>,

    /// Range start, e.g. 2015-08-03 or "2015-08-03 10:00:00".
    #[arg(required_unless_present = "validate_config")]
    pub from: Option<String>,

    /// Range end (inclusive at period granularity).
    #[arg(required_unless_present = "validate_config")]
    pub to: Option<String>,

    /// Period: h, d, w, m, q or y.
    #[arg(required_unless_present = "validate_config")]
    pub period: Option<String>,

    /// Path to config file (TOML). If omitted, `sqlseries.toml` is used when it exists.
    #[arg(long, env = "SQLSERIES_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not load any config file; use defaults + env + CLI only.
    #[arg(long, default_value_t = false)]
    pub no_config: bool,

    /// Load and validate config (file + env + CLI), print the effective settings, then exit.
    #[arg(long, default_value_t = false)]
    pub validate_config: bool,

    /// Maximum number of concurrent jobs (defaults to the number of CPUs).
    #[arg(long, short = 'j')]
    pub concurrency: Option<usize>,

    /// Log every produced point.
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// Build batches but do not write them.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// fail_fast or collect_all.
    #[arg(long)]
    pub error_mode: Option<String>,

    /// Shorthand for --error-mode fail_fast.
    #[arg(long, default_value_t = false, conflicts_with = "error_mode")]
    pub fail_fast: bool,

    /// The query returns multiple columns; reject an unknown naming function before running.
    #[arg(long, default_value_t = false)]
    pub multi_column: bool,

    /// SQLite database to query.
    #[arg(long)]
    pub sqlite: Option<PathBuf>,

    /// Sink kind: influx_http, line_protocol_file or stdout.
    #[arg(long)]
    pub sink: Option<String>,

    /// InfluxDB base URL (influx_http sink).
    #[arg(long)]
    pub influx_url: Option<String>,

    /// InfluxDB database name (influx_http sink).
    #[arg(long)]
    pub influx_db: Option<String>,

    /// Output file (line_protocol_file sink). Implies that sink unless --sink is given.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Print Prometheus-format run metrics to stderr when done.
    #[arg(long, default_value_t = false)]
    pub print_metrics: bool,
}

// ---------- File/env config (all optional for partial config) ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    InfluxHttp,
    LineProtocolFile,
    Stdout,
}

impl SinkKind {
    fn parse(s: &str) -> Result<Self, String> {
        match s.trim().replace('-', "_").as_str() {
            "influx_http" | "influx" => Ok(SinkKind::InfluxHttp),
            "line_protocol_file" | "file" => Ok(SinkKind::LineProtocolFile),
            "stdout" => Ok(SinkKind::Stdout),
            other => Err(format!(
                "unknown sink {:?} (expected influx_http, line_protocol_file or stdout)",
                other
            )),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SinkKind::InfluxHttp => "influx_http",
            SinkKind::LineProtocolFile => "line_protocol_file",
            SinkKind::Stdout => "stdout",
        }
    }
}

/// `[source]` section.
#[derive(Debug, Default, serde::Deserialize)]
pub struct SourceFileConfig {
    pub sqlite_path: Option<String>,
    pub busy_timeout_secs: Option<u64>,
}

/// `[sink]` section.
#[derive(Debug, Default, serde::Deserialize)]
pub struct SinkFileConfig {
    pub kind: Option<SinkKind>,
    pub url: Option<String>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub path: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Top-level config as read from file + env. Every field optional for layering.
#[derive(Debug, Default, serde::Deserialize)]
pub struct FileConfig {
    pub concurrency: Option<usize>,
    pub debug: Option<bool>,
    pub dry_run: Option<bool>,
    pub error_mode: Option<ErrorMode>,
    pub source: Option<SourceFileConfig>,
    pub sink: Option<SinkFileConfig>,
}

/// Effective settings after merging every layer.
#[derive(Debug, Clone)]
pub struct Settings {
    pub concurrency: Option<usize>,
    pub debug: bool,
    pub dry_run: bool,
    pub error_mode: ErrorMode,
    pub sqlite_path: Option<PathBuf>,
    pub busy_timeout: Duration,
    pub sink_kind: SinkKind,
    pub influx_url: String,
    pub influx_db: String,
    pub influx_username: Option<String>,
    pub influx_password: Option<String>,
    pub output_path: Option<PathBuf>,
    pub sink_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            concurrency: None,
            debug: false,
            dry_run: false,
            error_mode: ErrorMode::CollectAll,
            sqlite_path: None,
            busy_timeout: Duration::from_secs(5),
            sink_kind: SinkKind::Stdout,
            influx_url: "http://localhost:8086".to_string(),
            influx_db: "sqlseries".to_string(),
            influx_username: None,
            influx_password: None,
            output_path: None,
            sink_timeout: Duration::from_secs(30),
        }
    }
}

/// Load merged settings. CLI overrides file/env.
fn load_settings(cli: &Cli) -> Result<Settings, String> {
    let mut builder = Config::builder();

    if !cli.no_config {
        if let Some(ref path) = cli.config {
            if !path.exists() {
                return Err(format!("config file not found: {}", path.display()));
            }
            builder = builder.add_source(File::from(path.as_path()).required(false));
        } else {
            let default_path = PathBuf::from("sqlseries.toml");
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path.as_path()).required(false));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("SQLSERIES")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder.build().map_err(|e| e.to_string())?;
    let partial: FileConfig = merged.try_deserialize().map_err(|e| e.to_string())?;

    let mut settings = Settings::default();
    merge_file_config(&mut settings, &partial);
    merge_cli(&mut settings, cli)?;
    Ok(settings)
}

/// Merge file/env partial config. Only overwrites fields that are `Some`.
fn merge_file_config(base: &mut Settings, partial: &FileConfig) {
    if let Some(n) = partial.concurrency {
        base.concurrency = Some(n);
    }
    if let Some(b) = partial.debug {
        base.debug = b;
    }
    if let Some(b) = partial.dry_run {
        base.dry_run = b;
    }
    if let Some(mode) = partial.error_mode {
        base.error_mode = mode;
    }
    if let Some(src) = &partial.source {
        if let Some(p) = &src.sqlite_path {
            base.sqlite_path = Some(PathBuf::from(p));
        }
        if let Some(secs) = src.busy_timeout_secs {
            base.busy_timeout = Duration::from_secs(secs);
        }
    }
    if let Some(sink) = &partial.sink {
        if let Some(kind) = sink.kind {
            base.sink_kind = kind;
        }
        if let Some(url) = &sink.url {
            base.influx_url = url.clone();
        }
        if let Some(db) = &sink.database {
            base.influx_db = db.clone();
        }
        if let Some(u) = &sink.username {
            base.influx_username = Some(u.clone());
        }
        if let Some(p) = &sink.password {
            base.influx_password = Some(p.clone());
        }
        if let Some(path) = &sink.path {
            base.output_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = sink.timeout_secs {
            base.sink_timeout = Duration::from_secs(secs);
        }
    }
}

fn merge_cli(base: &mut Settings, cli: &Cli) -> Result<(), String> {
    if let Some(n) = cli.concurrency {
        base.concurrency = Some(n);
    }
    base.debug |= cli.debug;
    base.dry_run |= cli.dry_run;
    if cli.fail_fast {
        base.error_mode = ErrorMode::FailFast;
    }
    if let Some(mode) = &cli.error_mode {
        base.error_mode = mode.parse().map_err(|e: sqlseries::EtlError| e.to_string())?;
    }
    if let Some(p) = &cli.sqlite {
        base.sqlite_path = Some(p.clone());
    }
    if let Some(url) = &cli.influx_url {
        base.influx_url = url.clone();
    }
    if let Some(db) = &cli.influx_db {
        base.influx_db = db.clone();
    }
    if let Some(out) = &cli.output {
        base.output_path = Some(out.clone());
        if cli.sink.is_none() {
            base.sink_kind = SinkKind::LineProtocolFile;
        }
    }
    if let Some(kind) = &cli.sink {
        base.sink_kind = SinkKind::parse(kind)?;
    }
    if let Some(0) = base.concurrency {
        return Err("concurrency must be at least 1".to_string());
    }
    Ok(())
}

fn build_sink(settings: &Settings) -> Result<Arc<dyn SinkConnector>, String> {
    Ok(match settings.sink_kind {
        SinkKind::InfluxHttp => {
            let mut c = InfluxHttpConnector::new(&settings.influx_url, &settings.influx_db);
            c.username = settings.influx_username.clone();
            c.password = settings.influx_password.clone();
            c.timeout = settings.sink_timeout;
            Arc::new(c)
        }
        SinkKind::LineProtocolFile => {
            let path = settings
                .output_path
                .as_ref()
                .ok_or("line_protocol_file sink needs --output or [sink] path")?;
            Arc::new(LineProtocolFileConnector::new(path))
        }
        SinkKind::Stdout => Arc::new(StdoutConnector),
    })
}

fn print_settings(s: &Settings) {
    println!(
        "concurrency={}",
        s.concurrency.map_or_else(|| "auto".to_string(), |n| n.to_string())
    );
    println!("debug={}", s.debug);
    println!("dry_run={}", s.dry_run);
    println!("error_mode={}", s.error_mode.as_str());
    println!(
        "sqlite_path={}",
        s.sqlite_path.as_ref().map_or_else(String::new, |p| p.display().to_string())
    );
    println!("sink={}", s.sink_kind.as_str());
    println!("influx_url={}", s.influx_url);
    println!("influx_db={}", s.influx_db);
    println!(
        "output={}",
        s.output_path.as_ref().map_or_else(String::new, |p| p.display().to_string())
    );
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

// ---------- Metrics scrape ----------

#[cfg(feature = "prometheus")]
mod scrape {
    use sqlseries::telemetry::etl_metrics::{InProcessPrometheus, MetricsInitError};

    /// In-process Prometheus recorder, installed only when requested.
    pub struct Scrape(Option<InProcessPrometheus>);

    impl Scrape {
        pub fn install(enabled: bool) -> Result<Self, MetricsInitError> {
            if !enabled {
                return Ok(Scrape(None));
            }
            Ok(Scrape(Some(InProcessPrometheus::install()?)))
        }

        pub fn print(&self) {
            if let Some(prom) = &self.0 {
                eprintln!("{}", prom.render());
            }
        }
    }
}

#[cfg(not(feature = "prometheus"))]
mod scrape {
    pub struct Scrape;

    impl Scrape {
        pub fn install(enabled: bool) -> Result<Self, std::convert::Infallible> {
            if enabled {
                tracing::warn!("built without the prometheus feature; --print-metrics ignored");
            }
            Ok(Scrape)
        }

        pub fn print(&self) {}
    }
}

// ---------- Main ----------

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let started = Instant::now();
    let cli = Cli::parse();
    let settings = load_settings(&cli).map_err(|e| {
        eprintln!("config error: {}", e);
        e
    })?;

    if cli.validate_config {
        print_settings(&settings);
        return Ok(());
    }

    init_logging(settings.debug);

    let scrape = scrape::Scrape::install(cli.print_metrics)?;

    // Positionals are present: clap enforces them unless --validate-config.
    let (Some(series), Some(sql_file), Some(from), Some(to), Some(period)) = (
        cli.series_name_or_func.as_deref(),
        cli.sql_file.as_deref(),
        cli.from.as_deref(),
        cli.to.as_deref(),
        cli.period.as_deref(),
    ) else {
        return Err("missing positional arguments".into());
    };

    let template = SqlTemplate::load(sql_file)?;
    if !template.has_placeholders() {
        tracing::warn!(sql_file = %sql_file.display(), "query has no {{{{from}}}} or {{{{to}}}} placeholder; every interval runs the same query");
    }
    let request = RunRequest {
        series: series.to_string(),
        template,
        from: parse_datetime(from)?,
        to: parse_datetime(to)?,
        period: period.parse::<Period>()?,
        multi_column: cli.multi_column,
    };

    let sqlite_path = settings
        .sqlite_path
        .clone()
        .ok_or("no source configured: pass --sqlite or set [source] sqlite_path")?;
    let source = SqliteConnector::new(sqlite_path).with_busy_timeout(settings.busy_timeout);
    let sink = build_sink(&settings)?;

    let config = PipelineConfig {
        concurrency: settings.concurrency,
        debug: settings.debug,
        dry_run: settings.dry_run,
        error_mode: settings.error_mode,
        event_listener: Arc::new(TracingEventListener),
    };
    let pipeline = Pipeline::new(config, Arc::new(source), sink);
    let report = pipeline.run(&request)?;

    scrape.print();

    tracing::info!(elapsed = ?started.elapsed(), "Time");
    if !report.is_success() {
        for failure in &report.failures {
            eprintln!("error: {}", failure);
        }
        return Err(format!(
            "{} of {} jobs failed, {} skipped",
            report.failures.len(),
            report.intervals,
            report.skipped
        )
        .into());
    }
    Ok(())
}
