//! Data output writers

use crate::TimeRecord;

pub mod csv;

pub use self::csv::{CsvDailyWriter, CsvRecordsWriter};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Generic output writer trait
pub trait OutputWriter {
    /// Flush any buffered data
    fn flush(&mut self) -> OutputResult<()>;

    /// Close the writer and finalize output; returns the data rows written
    fn close(self) -> OutputResult<u64>;
}

/// Trait for writing collected time records
pub trait RecordsWriter: OutputWriter {
    /// Write a single record
    fn write_record(&mut self, record: &TimeRecord) -> OutputResult<()>;

    /// Write multiple records in order
    fn write_records(&mut self, records: &[TimeRecord]) -> OutputResult<()> {
        for record in records {
            self.write_record(record)?;
        }
        Ok(())
    }
}
