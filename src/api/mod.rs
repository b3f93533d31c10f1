//! Platform API access
//!
//! [`TimeApi`] is the seam between the engine and the wire: one method per
//! remote operation, each a single attempt. Retrying, token caching and rate
//! limiting live in the components layered on top of it:
//!
//! - [`auth::AuthTokenProvider`] - cached client-credentials token
//! - [`users::UserResolver`] - login to user id resolution
//! - [`pagination::PagedFetcher`] - cursor-following time data queries
//! - [`retry`] - shared retry loop and retry log formatting
//!
//! [`genesys_http::GenesysClient`] implements the trait over HTTPS.

use crate::{ResolvedUser, TimeRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;

pub mod auth;
pub mod genesys_http;
pub mod genesys_parser;
pub mod pagination;
pub mod retry;
pub mod users;

/// Errors from a single API call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Connection-level failure (DNS, refused, reset)
    #[error("network error: {0}")]
    Network(String),

    /// The request exceeded its timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// HTTP 429
    #[error("rate limit exceeded")]
    RateLimited,

    /// HTTP 5xx
    #[error("server error: {0}")]
    Server(u16),

    /// HTTP 401/403
    #[error("unauthorized ({0})")]
    Unauthorized(u16),

    /// The cached access token was rejected and has been invalidated
    #[error("access token rejected")]
    TokenExpired,

    /// Other HTTP 4xx
    #[error("client error {status}: {body}")]
    Client {
        /// Status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The response body did not match the expected shape
    #[error("parse error: {0}")]
    Parse(String),

    /// No access token could be obtained
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The rate limiter refused a permit
    #[error("rate limiter error: {0}")]
    Limiter(String),

    /// Cancellation was requested before the call went out
    #[error("call cancelled")]
    Cancelled,
}

impl ApiError {
    /// Classify an unsuccessful HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            429 => ApiError::RateLimited,
            401 | 403 => ApiError::Unauthorized(status),
            500..=599 => ApiError::Server(status),
            _ => ApiError::Client {
                status,
                body: body.into(),
            },
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_)
                | ApiError::Timeout(_)
                | ApiError::RateLimited
                | ApiError::Server(_)
                | ApiError::TokenExpired
        )
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Outcome of a client-credentials exchange
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// Bearer token
    pub access_token: String,
    /// Lifetime from the moment of issue
    pub expires_in: Duration,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// One account from the user directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    /// Internal user id
    pub id: String,
    /// Primary email, if set
    pub email: Option<String>,
    /// Display name, if set
    pub name: Option<String>,
}

/// One page of the user directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPage {
    /// Accounts on this page
    pub entities: Vec<DirectoryUser>,
    /// Total pages, when the platform reports it
    pub page_count: Option<u32>,
}

/// One page request of a user's time data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeQuery {
    /// User being queried
    pub user: ResolvedUser,
    /// First day of the range (inclusive)
    pub start_date: NaiveDate,
    /// Last day of the range (inclusive)
    pub end_date: NaiveDate,
    /// Continuation cursor from the previous page; `None` for the first
    pub cursor: Option<String>,
}

/// One page of a user's time data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimePage {
    /// Rows on this page
    pub records: Vec<TimeRecord>,
    /// Cursor for the next page; `None` when exhausted
    pub next_cursor: Option<String>,
}

/// Single-attempt platform operations
#[async_trait]
pub trait TimeApi: Send + Sync {
    /// Exchange client credentials for an access token
    async fn exchange_token(&self) -> ApiResult<TokenGrant>;

    /// Fetch one page (1-based) of the user directory
    async fn list_users(&self, token: &str, page_number: u32) -> ApiResult<UserPage>;

    /// Fetch one page of time data for a user
    async fn fetch_time_page(&self, token: &str, query: &TimeQuery) -> ApiResult<TimePage>;
}
