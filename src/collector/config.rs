//! Collection configuration constants and backoff calculation

use chrono::{FixedOffset, Offset, Utc};
use std::time::Duration;

/// Concurrent outstanding HTTP calls allowed against the platform.
/// The analytics API throttles clients well above this, but five keeps a
/// single operator's run from starving other integrations on the same org.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 5;

/// HTTP connect timeout - time to establish the TCP/TLS connection.
pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP request timeout - overall time for one request/response.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A cached token is refreshed this long before it actually expires.
pub const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Directory page size; 500 is the largest the users endpoint accepts.
pub const DIRECTORY_PAGE_SIZE: u32 = 500;

/// Upper bound on pages for a single paginated query.
pub const MAX_PAGES: usize = 10_000;

/// Local day boundary used when splitting the range into days (UTC-3).
pub const DEFAULT_UTC_OFFSET_SECS: i32 = -3 * 3600;

/// Retry budget for one operation: attempt count and exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Exponential backoff: `base_delay * 2^retry`, capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay)
    }
}

/// Token exchange: 3 attempts, 500ms doubling.
pub const TOKEN_RETRY: RetryPolicy =
    RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(8));

/// Directory lookup: first attempt plus 2 retries.
pub const LOOKUP_RETRY: RetryPolicy =
    RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(8));

/// Page fetch: 4 attempts, 500ms doubling, capped at 8s.
pub const PAGE_RETRY: RetryPolicy =
    RetryPolicy::new(4, Duration::from_millis(500), Duration::from_secs(8));

/// Tunables for one collection run.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Rate limiter ceiling; the only concurrency gate of a run
    pub max_concurrent_requests: usize,
    /// HTTP connect timeout
    pub connect_timeout: Duration,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Refresh margin before token expiry
    pub token_skew: Duration,
    /// Retry policy for the credential exchange
    pub token_retry: RetryPolicy,
    /// Retry policy for directory pages
    pub lookup_retry: RetryPolicy,
    /// Retry policy for time data pages
    pub page_retry: RetryPolicy,
    /// Users per directory page
    pub directory_page_size: u32,
    /// Page cap per paginated query
    pub max_pages: usize,
    /// Offset of the local day boundary from UTC, in seconds
    pub utc_offset_secs: i32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            connect_timeout: HTTP_CONNECT_TIMEOUT,
            request_timeout: HTTP_REQUEST_TIMEOUT,
            token_skew: TOKEN_EXPIRY_SKEW,
            token_retry: TOKEN_RETRY,
            lookup_retry: LOOKUP_RETRY,
            page_retry: PAGE_RETRY,
            directory_page_size: DIRECTORY_PAGE_SIZE,
            max_pages: MAX_PAGES,
            utc_offset_secs: DEFAULT_UTC_OFFSET_SECS,
        }
    }
}

impl CollectorConfig {
    /// Set the rate limiter ceiling (at least 1)
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max.max(1);
        self
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Use the same policy for every retried operation
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.token_retry = policy;
        self.lookup_retry = policy;
        self.page_retry = policy;
        self
    }

    /// Set the page retry policy
    pub fn with_page_retry(mut self, policy: RetryPolicy) -> Self {
        self.page_retry = policy;
        self
    }

    /// Set the page cap per query
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Set the local day boundary
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset_secs = offset.local_minus_utc();
        self
    }

    /// Local day boundary as a chrono offset (UTC if out of range).
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_secs).unwrap_or_else(|| Utc.fix())
    }
}
