//! Collection orchestration and rate limiting
//!
//! The collector drives one run end to end:
//!
//! 1. **Validation**: the [`CollectionRequest`](crate::CollectionRequest) is checked before any network call
//! 2. **Authentication**: a token is obtained up front; failure here is fatal
//! 3. **Resolution**: logins are matched to platform users in one batch
//! 4. **Fetching**: one task per resolved user, gated by [`RateLimiter`]
//! 5. **Assembly**: results are put back into request login order
//!
//! # Components
//!
//! - [`orchestrator`] - [`CollectionOrchestrator`], the run driver
//! - [`rate_limit`] - FIFO concurrency ceiling shared by every call of a run
//! - [`progress`] - Progress events, sink and display folding
//! - [`config`] - Constants, retry policies and [`CollectorConfig`]
//!
//! # Error Handling
//!
//! Only a malformed request or an authentication failure aborts a run
//! ([`CollectError`]). Everything that goes wrong for a single login ends up
//! in [`CollectionResult::failures`](crate::CollectionResult::failures).

pub mod config;
pub mod orchestrator;
pub mod progress;
pub mod rate_limit;

pub use config::{CollectorConfig, RetryPolicy};
pub use orchestrator::CollectionOrchestrator;
pub use progress::{CollectionProgress, ProgressEvent, ProgressSink};
pub use rate_limit::{RateLimitError, RateLimiter, RatePermit};

use crate::api::auth::AuthError;

/// Fatal collection errors
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// The request violates its invariants
    #[error("invalid request: {0}")]
    Validation(String),

    /// No access token could be obtained
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
}

/// Result type for collection runs
pub type CollectResult<T> = Result<T, CollectError>;
