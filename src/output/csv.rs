//! CSV output writers
//!
//! Two layouts are supported:
//! - [`CsvRecordsWriter`]: one row per record,
//!   `login,interval_start,interval_end,metric_name,metric_value`
//! - [`CsvDailyWriter`]: one `;`-separated row per user and local day with a
//!   column per [`TimeMetric`]

use chrono::{FixedOffset, NaiveDate, SecondsFormat};
use csv::{Writer, WriterBuilder};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use super::{OutputError, OutputResult, OutputWriter, RecordsWriter};
use crate::{TimeMetric, TimeRecord};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// Header of the long layout
pub const RECORDS_HEADER: [&str; 5] = [
    "login",
    "interval_start",
    "interval_end",
    "metric_name",
    "metric_value",
];

fn create_file<P: AsRef<Path>>(path: P) -> OutputResult<BufWriter<File>> {
    let path = path.as_ref();
    info!("Creating CSV writer: path={}", path.display());

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;
    }

    let file = File::create(path)
        .map_err(|e| OutputError::IoError(format!("Failed to create file: {}", e)))?;
    Ok(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file))
}

fn finish<W: Write>(writer: Writer<W>) -> OutputResult<W> {
    writer
        .into_inner()
        .map_err(|e| OutputError::IoError(format!("Failed to get inner writer: {}", e)))
}

/// CSV row of the long layout
#[derive(Debug, Serialize)]
struct RecordRow<'a> {
    login: &'a str,
    interval_start: String,
    interval_end: String,
    metric_name: &'static str,
    metric_value: String,
}

impl<'a> From<&'a TimeRecord> for RecordRow<'a> {
    fn from(record: &'a TimeRecord) -> Self {
        Self {
            login: &record.login,
            interval_start: record
                .interval_start
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            interval_end: record.interval_end.to_rfc3339_opts(SecondsFormat::Secs, true),
            metric_name: record.metric_name.as_str(),
            metric_value: record.metric_value.to_string(),
        }
    }
}

/// CSV writer for the long layout; the header is written even with no rows.
pub struct CsvRecordsWriter<W: Write = BufWriter<File>> {
    writer: Writer<W>,
    rows_written: u64,
}

impl CsvRecordsWriter {
    /// Create the file at `path`, creating parent directories as needed
    pub fn new<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        Self::from_writer(create_file(path)?)
    }
}

impl<W: Write> CsvRecordsWriter<W> {
    /// Write to any sink
    pub fn from_writer(sink: W) -> OutputResult<Self> {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(sink);
        writer
            .write_record(RECORDS_HEADER)
            .map_err(|e| OutputError::CsvError(format!("Failed to write header: {}", e)))?;

        Ok(Self {
            writer,
            rows_written: 0,
        })
    }

    /// Rows written so far, excluding the header
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and return the sink
    pub fn into_inner(mut self) -> OutputResult<W> {
        self.flush()?;
        finish(self.writer)
    }
}

impl<W: Write> RecordsWriter for CsvRecordsWriter<W> {
    fn write_record(&mut self, record: &TimeRecord) -> OutputResult<()> {
        self.writer
            .serialize(RecordRow::from(record))
            .map_err(|e| OutputError::CsvError(format!("Failed to write record: {}", e)))?;

        self.rows_written += 1;
        if self.rows_written % 1000 == 0 {
            self.flush()?;
            debug!("Progress: {} rows written", self.rows_written);
        }
        Ok(())
    }
}

impl<W: Write> OutputWriter for CsvRecordsWriter<W> {
    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))
    }

    fn close(self) -> OutputResult<u64> {
        let rows = self.rows_written;
        self.into_inner()?;
        info!("CSV writer closed successfully: {} rows written", rows);
        Ok(rows)
    }
}

/// One pending row of the daily layout
#[derive(Debug)]
struct DailyRow {
    date: NaiveDate,
    user_id: String,
    login: String,
    values: HashMap<TimeMetric, Decimal>,
}

/// CSV writer for the daily wide layout.
///
/// Records must arrive grouped by login and day, as
/// [`CollectionResult::records`](crate::CollectionResult::records) are.
/// Days are taken from `interval_start` in the given offset.
pub struct CsvDailyWriter<W: Write = BufWriter<File>> {
    writer: Writer<W>,
    offset: FixedOffset,
    pending: Option<DailyRow>,
    rows_written: u64,
}

impl CsvDailyWriter {
    /// Create the file at `path`, creating parent directories as needed
    pub fn new<P: AsRef<Path>>(path: P, offset: FixedOffset) -> OutputResult<Self> {
        Self::from_writer(create_file(path)?, offset)
    }
}

impl<W: Write> CsvDailyWriter<W> {
    /// Write to any sink
    pub fn from_writer(sink: W, offset: FixedOffset) -> OutputResult<Self> {
        let mut writer = WriterBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .from_writer(sink);

        let header = ["DATE", "USER_ID", "LOGIN"]
            .into_iter()
            .chain(TimeMetric::ALL.iter().map(TimeMetric::as_str));
        writer
            .write_record(header)
            .map_err(|e| OutputError::CsvError(format!("Failed to write header: {}", e)))?;

        Ok(Self {
            writer,
            offset,
            pending: None,
            rows_written: 0,
        })
    }

    /// Day rows written so far, excluding the header
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Write the pending row, flush and return the sink
    pub fn into_inner(mut self) -> OutputResult<W> {
        self.emit_pending()?;
        self.flush()?;
        finish(self.writer)
    }

    fn emit_pending(&mut self) -> OutputResult<()> {
        let Some(row) = self.pending.take() else {
            return Ok(());
        };

        let fields = [
            row.date.format("%d/%m/%Y").to_string(),
            row.user_id,
            row.login,
        ]
        .into_iter()
        .chain(TimeMetric::ALL.iter().map(|metric| {
            row.values
                .get(metric)
                .copied()
                .unwrap_or(Decimal::ZERO)
                .to_string()
        }));

        self.writer
            .write_record(fields)
            .map_err(|e| OutputError::CsvError(format!("Failed to write day row: {}", e)))?;
        self.rows_written += 1;
        Ok(())
    }
}

impl<W: Write> RecordsWriter for CsvDailyWriter<W> {
    fn write_record(&mut self, record: &TimeRecord) -> OutputResult<()> {
        let date = record.interval_start.with_timezone(&self.offset).date_naive();

        let same_row = self
            .pending
            .as_ref()
            .is_some_and(|row| row.date == date && row.login == record.login);
        if !same_row {
            self.emit_pending()?;
            self.pending = Some(DailyRow {
                date,
                user_id: record.user_id.clone(),
                login: record.login.clone(),
                values: HashMap::with_capacity(TimeMetric::ALL.len()),
            });
        }

        if let Some(row) = self.pending.as_mut() {
            *row.values.entry(record.metric_name).or_insert(Decimal::ZERO) += record.metric_value;
        }
        Ok(())
    }
}

impl<W: Write> OutputWriter for CsvDailyWriter<W> {
    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))
    }

    fn close(mut self) -> OutputResult<u64> {
        self.emit_pending()?;
        let rows = self.rows_written;
        self.into_inner()?;
        info!("CSV daily writer closed successfully: {} rows written", rows);
        Ok(rows)
    }
}
