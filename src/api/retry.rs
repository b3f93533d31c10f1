//! Retry loop with exponential backoff, and the log messages it emits.
//!
//! Token exchange, directory pages and time data pages all retry through
//! [`with_retry`]. Each attempt is a fresh closure call, so a rate limiter
//! permit taken inside the attempt is released before the backoff sleep.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiResult};
use crate::collector::config::RetryPolicy;
use crate::metrics::record_retry_backoff;
use crate::shutdown::ShutdownCoordinator;

/// Classification of retry errors for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request timed out
    NetworkTimeout,
    /// Connection refused, DNS failure, reset
    NetworkOffline,
    /// HTTP 429
    RateLimit,
    /// HTTP 5xx
    ServerError(u16),
    /// Access token rejected or credentials refused
    AuthFailed,
    /// HTTP 4xx other than 401/403/429
    ClientError(u16),
    /// Response could not be decoded
    InvalidResponse,
    /// Anything else
    Generic,
}

impl RetryErrorType {
    /// Classify an API error.
    pub fn from_api_error(error: &ApiError) -> Self {
        match error {
            ApiError::Timeout(_) => Self::NetworkTimeout,
            ApiError::Network(_) => Self::NetworkOffline,
            ApiError::RateLimited => Self::RateLimit,
            ApiError::Server(code) => Self::ServerError(*code),
            ApiError::Unauthorized(_) | ApiError::TokenExpired | ApiError::Auth(_) => {
                Self::AuthFailed
            }
            ApiError::Client { status, .. } => Self::ClientError(*status),
            ApiError::Parse(_) => Self::InvalidResponse,
            ApiError::Limiter(_) | ApiError::Cancelled => Self::Generic,
        }
    }

    /// User-friendly description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::AuthFailed => "authentication failed",
            Self::ClientError(code) => match code {
                400 => "invalid request",
                404 => "resource not found",
                _ => "client error",
            },
            Self::InvalidResponse => "unexpected response",
            Self::Generic => "error",
        }
    }

    /// Suggested remediation shown when retries are exhausted.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => {
                "Verify connectivity and the environment host (e.g. mypurecloud.com)"
            }
            Self::RateLimit => "Lower --max-concurrency or retry later",
            Self::ServerError(_) => "The platform may be experiencing issues, try again later",
            Self::AuthFailed => {
                "Verify the client id, secret and the OAuth client's analytics permissions"
            }
            Self::ClientError(_) => "Check the date range and logins",
            Self::InvalidResponse => "The API answered with an unexpected payload",
            Self::Generic => "Try again",
        }
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered the retry
    pub error_type: RetryErrorType,
    /// Backoff until the next attempt
    pub backoff_duration: Duration,
    /// What was being attempted (e.g. "time page for alice")
    pub operation: String,
    /// Original error message
    pub error_message: String,
}

impl RetryContext {
    /// Build a context from the failing attempt.
    pub fn new(
        attempt: u32,
        policy: &RetryPolicy,
        error: &ApiError,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts: policy.max_attempts,
            error_type: RetryErrorType::from_api_error(error),
            backoff_duration: policy.backoff(attempt.saturating_sub(1)),
            operation: operation.into(),
            error_message: error.to_string(),
        }
    }

    /// Retry announcement with attempt counters.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying {} (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.operation,
            self.attempt + 1,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        )
    }

    /// Message when the retry announced by this context works.
    pub fn format_success(&self) -> String {
        format!(
            "Retry attempt {}/{} succeeded for {}",
            self.attempt + 1,
            self.max_attempts,
            self.operation
        )
    }

    /// Final failure summary with a suggestion.
    pub fn format_failure(&self) -> String {
        [
            format!(
                "[FAILED] {} failed after {} attempts",
                self.operation, self.attempt
            ),
            format!("  Last error: {}", self.error_message),
            format!("  Suggestion: {}", self.error_type.suggestion()),
        ]
        .join("\n")
    }
}

/// How a retried operation ultimately failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// A non-retryable error; no further attempts were made
    #[error("{0}")]
    Fatal(ApiError),

    /// Every attempt failed with a transient error
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last: ApiError,
    },

    /// Cancellation was requested before the next attempt
    #[error("cancelled")]
    Cancelled,
}

/// Run `attempt` until it succeeds, fails permanently, runs out of attempts
/// or the run is cancelled.
///
/// Cancellation is checked before every attempt and interrupts a backoff
/// sleep; an attempt already in progress is never interrupted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &'static str,
    operation: &str,
    shutdown: Option<&ShutdownCoordinator>,
    mut attempt: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt_number = 0;
    let mut last_retry: Option<RetryContext> = None;

    loop {
        if shutdown.is_some_and(|s| s.is_shutdown_requested()) {
            debug!("Skipping {} - cancellation requested", operation);
            return Err(RetryError::Cancelled);
        }

        attempt_number += 1;
        let error = match attempt().await {
            Ok(value) => {
                if let Some(context) = &last_retry {
                    info!("{}", context.format_success());
                }
                return Ok(value);
            }
            Err(ApiError::Cancelled) => {
                debug!("{} cancelled while waiting for a slot", operation);
                return Err(RetryError::Cancelled);
            }
            Err(error) => error,
        };

        if !error.is_retryable() {
            debug!("{} failed permanently: {}", operation, error);
            return Err(RetryError::Fatal(error));
        }

        let context = RetryContext::new(attempt_number, policy, &error, operation);
        if attempt_number >= max_attempts {
            warn!("{}", context.format_failure());
            return Err(RetryError::Exhausted {
                attempts: attempt_number,
                last: error,
            });
        }

        warn!("{}", context.format_retry());
        record_retry_backoff(label, context.backoff_duration, attempt_number);
        let backoff = context.backoff_duration;
        last_retry = Some(context);

        match shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.wait_for_shutdown() => {}
                }
            }
            None => tokio::time::sleep(backoff).await,
        }
    }
}
