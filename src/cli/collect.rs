//! Collect command implementation

use chrono::{FixedOffset, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::collector::config::DEFAULT_MAX_CONCURRENT_REQUESTS;
use crate::collector::{
    CollectionOrchestrator, CollectionProgress, CollectorConfig, ProgressEvent, ProgressSink,
};
use crate::output::{CsvDailyWriter, CsvRecordsWriter, OutputWriter, RecordsWriter};
use crate::shutdown::SharedShutdown;
use crate::{CollectionRequest, CollectionResult, Credentials};

use super::CliError;

/// Maximum allowed concurrency to avoid throttling by the platform
const MAX_CONCURRENCY: usize = 32;

/// Parse a `DD/MM/YYYY` calendar date.
pub fn parse_date(input: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(input.trim(), "%d/%m/%Y")
        .map_err(|e| format!("'{input}' is not a DD/MM/YYYY date: {e}"))
}

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Parse a `+HH:MM` / `-HH:MM` UTC offset (`Z` for UTC).
pub fn parse_utc_offset(input: &str) -> Result<FixedOffset, String> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("z") || input.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| "invalid offset".to_string());
    }

    let invalid = || format!("'{input}' is not a UTC offset like -03:00");
    let (sign, rest) = match input.as_bytes().first() {
        Some(b'+') => (1, &input[1..]),
        Some(b'-') => (-1, &input[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Parse a boolean environment-style flag (`true/false`, `1/0`, `yes/no`).
pub fn parse_flag(input: &str) -> Result<bool, String> {
    match input.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("'{other}' is not a boolean")),
    }
}

/// Read logins from a file: one per line, blank lines and `#` comments skipped.
pub fn read_logins_file(path: &Path) -> Result<Vec<String>, CliError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CliError::InvalidArgument(format!("Failed to read logins file {path:?}: {e}"))
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// User Time Collector CLI
#[derive(Parser, Debug)]
#[command(name = "user-time-collector")]
#[command(about = "Collect per-user time metrics from Genesys Cloud into CSV", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect time data for a list of logins
    Collect(CollectArgs),
}

/// Output layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputLayout {
    /// One row per user, interval and metric
    Long,
    /// One `;`-separated row per user and day, a column per metric
    Daily,
}

/// Collect command arguments
#[derive(Parser, Debug)]
pub struct CollectArgs {
    /// First day to collect (DD/MM/YYYY)
    #[arg(long, value_parser = parse_date)]
    pub start: NaiveDate,

    /// Last day to collect, inclusive (DD/MM/YYYY)
    #[arg(long, value_parser = parse_date)]
    pub end: NaiveDate,

    /// Login to collect; repeat for several
    #[arg(long = "login", value_name = "LOGIN")]
    pub logins: Vec<String>,

    /// File with one login per line
    #[arg(long)]
    pub logins_file: Option<PathBuf>,

    /// Output CSV path
    #[arg(long, short, default_value = "user_times.csv")]
    pub output: PathBuf,

    /// Output layout
    #[arg(long, value_enum, default_value_t = OutputLayout::Long)]
    pub layout: OutputLayout,

    /// Environment domain, e.g. mypurecloud.com
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: String,

    /// OAuth client id
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: String,

    /// OAuth client secret
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// Verify TLS certificates
    #[arg(long, env = "SSL_VERIFY", default_value = "true", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub ssl_verify: bool,

    /// Maximum concurrent API calls (default: 5, max: 32)
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_REQUESTS, value_parser = parse_concurrency)]
    pub max_concurrency: usize,

    /// UTC offset of the local day boundary
    #[arg(long, default_value = "-03:00", value_parser = parse_utc_offset, allow_hyphen_values = true)]
    pub utc_offset: FixedOffset,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl CollectArgs {
    /// Logins from `--login` and `--logins-file`, in that order.
    pub fn load_logins(&self) -> Result<Vec<String>, CliError> {
        let mut logins: Vec<String> = self.logins.iter().map(|l| l.trim().to_string()).collect();
        if let Some(path) = &self.logins_file {
            logins.extend(read_logins_file(path)?);
        }
        logins.retain(|login| !login.is_empty());

        if logins.is_empty() {
            return Err(CliError::InvalidArgument(
                "no logins given; use --login or --logins-file".to_string(),
            ));
        }
        Ok(logins)
    }

    /// Build the collection request
    pub fn request(&self) -> Result<CollectionRequest, CliError> {
        let request = CollectionRequest::new(self.start, self.end, self.load_logins()?);
        request.validate().map_err(CliError::InvalidArgument)?;
        Ok(request)
    }

    /// Build the credentials
    pub fn credentials(&self) -> Result<Credentials, CliError> {
        let credentials = Credentials::new(
            self.environment.trim(),
            self.client_id.trim(),
            self.client_secret.as_str(),
        )
        .with_verify_tls(self.ssl_verify);
        credentials.validate().map_err(CliError::ConfigurationError)?;
        Ok(credentials)
    }

    /// Build the collector configuration
    pub fn config(&self) -> CollectorConfig {
        CollectorConfig::default()
            .with_max_concurrent_requests(self.max_concurrency)
            .with_utc_offset(self.utc_offset)
    }

    /// Execute the collect command
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<CollectionResult, CliError> {
        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr).map_err(CliError::ConfigurationError)?;
        }

        let request = self.request()?;
        let config = self.config();
        let orchestrator = CollectionOrchestrator::for_credentials(self.credentials()?, config)?
            .with_shutdown(shutdown);

        let (sink, events) = ProgressSink::channel();
        let engine = tokio::spawn(async move { orchestrator.collect(&request, &sink).await });

        let progress = display_progress(events).await;
        let result = engine
            .await
            .map_err(|e| CliError::TaskFailed(e.to_string()))??;
        info!("{}", progress.format_progress());

        for (login, reason) in &result.failures {
            warn!(login = %login, "No data collected: {}", reason);
        }
        if result.cancelled {
            warn!("Collection was cancelled; the output is partial");
        }

        let rows = write_result(&self.output, self.layout, self.utc_offset, &result)?;
        info!(
            path = %self.output.display(),
            rows,
            records = result.records.len(),
            failures = result.failures.len(),
            "Output written"
        );
        Ok(result)
    }
}

/// Write `result` in the chosen layout; returns the rows written.
pub fn write_result(
    path: &Path,
    layout: OutputLayout,
    offset: FixedOffset,
    result: &CollectionResult,
) -> Result<u64, CliError> {
    let rows = match layout {
        OutputLayout::Long => {
            let mut writer = CsvRecordsWriter::new(path)?;
            writer.write_records(&result.records)?;
            writer.close()?
        }
        OutputLayout::Daily => {
            let mut writer = CsvDailyWriter::new(path, offset)?;
            writer.write_records(&result.records)?;
            writer.close()?
        }
    };
    Ok(rows)
}

/// Render progress events until the engine drops its sink.
async fn display_progress(mut events: UnboundedReceiver<ProgressEvent>) -> CollectionProgress {
    let mut progress = CollectionProgress::new();
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} users {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    while let Some(event) = events.recv().await {
        progress.apply(&event);
        match &event {
            ProgressEvent::Started { total_logins } => bar.set_length(*total_logins as u64),
            ProgressEvent::UserFailed { login, reason } => {
                bar.println(format!("[FAILED] {login}: {reason}"));
            }
            ProgressEvent::Cancelled => bar.set_message("cancelling..."),
            _ => {}
        }
        bar.set_position(progress.finished_logins as u64);
        if !matches!(event, ProgressEvent::Cancelled) {
            bar.set_message(format!("{} rows", progress.records_collected));
        }
    }

    bar.finish_and_clear();
    progress
}
