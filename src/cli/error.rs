//! CLI error types and conversions

use crate::api::ApiError;
use crate::collector::CollectError;
use crate::output::OutputError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Collection aborted
    #[error("collection error: {0}")]
    CollectError(#[from] CollectError),

    /// HTTP client could not be set up
    #[error("api error: {0}")]
    ApiError(#[from] ApiError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// The collection task panicked or was aborted
    #[error("collection task failed: {0}")]
    TaskFailed(String),
}
