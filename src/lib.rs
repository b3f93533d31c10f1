//! # User Time Collector Library
//!
//! Collects per-user time metrics (logged-in, on-queue, presence and routing
//! status durations) from the Genesys Cloud analytics API for a list of user
//! logins over a date range, and flattens them into an ordered table ready
//! for CSV export.
//!
//! ## Features
//!
//! - **Token lifecycle**: client-credentials exchange with caching and single-flight refresh
//! - **Rate Limiting**: every outbound call is gated by a FIFO concurrency ceiling
//! - **Partial failures**: unknown logins and failed fetches are reported, never fatal
//! - **Deterministic output**: rows are ordered by request login order, then interval start
//! - **Cancellation**: in-flight calls finish, no new work starts, partial results are returned
//!
//! ## Quick Start
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use user_time_collector::collector::{CollectionOrchestrator, CollectorConfig, ProgressSink};
//! use user_time_collector::{CollectionRequest, Credentials};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::new("mypurecloud.com", "client-id", "client-secret");
//! let request = CollectionRequest::new(
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
//!     vec!["alice".to_string(), "bob".to_string()],
//! );
//!
//! let orchestrator = CollectionOrchestrator::for_credentials(credentials, CollectorConfig::default())?;
//! let (sink, mut events) = ProgressSink::channel();
//! let run = tokio::spawn(async move { orchestrator.collect(&request, &sink).await });
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! let result = run.await??;
//! println!("{} rows, {} failures", result.records.len(), result.failures.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`api`] - Transport trait, Genesys HTTP client, token provider, user resolver, paged fetcher
//! - [`collector`] - Rate limiter, progress events, configuration and the orchestrator
//! - [`output`] - CSV writers for the collected records
//! - [`cli`] - Command-line front-end
//! - [`shutdown`] - Cancellation signal shared by every task of a run

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Platform API access (transport, auth, resolution, pagination)
pub mod api;

/// CLI command implementations
pub mod cli;

/// Collection orchestration, rate limiting and progress
pub mod collector;

/// Request and retry metrics
pub mod metrics;

/// Data output writers
pub mod output;

/// Cancellation coordination shared across tasks
pub mod shutdown;

/// API credentials for one platform environment.
///
/// `environment_host` is the regional domain (e.g. `mypurecloud.com`); the
/// token endpoint lives at `login.<host>` and the API at `api.<host>`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Regional domain of the environment
    pub environment_host: String,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Validate TLS certificates (disable only on intercepting networks)
    pub verify_tls: bool,
}

impl Credentials {
    /// Credentials with TLS verification enabled.
    pub fn new(
        environment_host: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            environment_host: environment_host.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            verify_tls: true,
        }
    }

    /// Toggle TLS certificate verification.
    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    /// Validate that every field is populated
    pub fn validate(&self) -> Result<(), String> {
        if self.environment_host.trim().is_empty() {
            return Err("Environment host cannot be empty".to_string());
        }
        if self.client_id.trim().is_empty() {
            return Err("Client id cannot be empty".to_string());
        }
        if self.client_secret.is_empty() {
            return Err("Client secret cannot be empty".to_string());
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("environment_host", &self.environment_host)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

/// One collection run: inclusive date range plus the logins to collect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRequest {
    /// First calendar day (inclusive)
    pub start_date: NaiveDate,
    /// Last calendar day (inclusive)
    pub end_date: NaiveDate,
    /// Logins in operator order; duplicates allowed
    pub logins: Vec<String>,
}

impl CollectionRequest {
    /// Create a request
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, logins: Vec<String>) -> Self {
        Self {
            start_date,
            end_date,
            logins,
        }
    }

    /// Validate request invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.start_date > self.end_date {
            return Err(format!(
                "Start date ({}) must not be after end date ({})",
                self.start_date, self.end_date
            ));
        }

        if self.logins.is_empty() {
            return Err("At least one login is required".to_string());
        }

        for (position, login) in self.logins.iter().enumerate() {
            if login.is_empty() {
                return Err(format!("Login #{} is empty", position + 1));
            }
            if login.trim() != login {
                return Err(format!(
                    "Login #{} ({login:?}) has surrounding whitespace",
                    position + 1
                ));
            }
        }

        Ok(())
    }

    /// Logins with exact duplicates removed, first occurrence wins.
    pub fn unique_logins(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.logins
            .iter()
            .filter(|login| seen.insert(login.as_str()))
            .cloned()
            .collect()
    }
}

/// A login mapped to the platform's internal user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedUser {
    /// Login as entered by the operator
    pub login: String,
    /// Internal user id
    pub user_id: String,
    /// Directory email, when known
    pub email: Option<String>,
    /// Directory display name, when known
    pub name: Option<String>,
}

impl ResolvedUser {
    /// Create a resolved user without directory details
    pub fn new(login: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            user_id: user_id.into(),
            email: None,
            name: None,
        }
    }
}

/// Time metrics exported per user and interval.
///
/// Values are durations in milliseconds. `OffQueue` and `LoggedIn` are
/// derived from the presence metrics rather than read from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeMetric {
    /// On-queue plus off-queue time
    LoggedIn,
    /// System presence ON_QUEUE
    OnQueue,
    /// Sum of the off-queue presences
    OffQueue,
    /// Routing status INTERACTING
    Interacting,
    /// Routing status IDLE
    Idle,
    /// Routing status NOT_RESPONDING
    NotResponding,
    /// System presence AVAILABLE
    Available,
    /// System presence AWAY
    Away,
    /// System presence BREAK
    Break,
    /// System presence BUSY
    Busy,
    /// System presence IDLE (auto-away)
    SystemAway,
    /// System presence MEAL
    Meal,
    /// System presence MEETING
    Meeting,
    /// System presence TRAINING
    Training,
}

impl TimeMetric {
    /// Every metric in export column order.
    pub const ALL: [TimeMetric; 14] = [
        TimeMetric::LoggedIn,
        TimeMetric::OnQueue,
        TimeMetric::OffQueue,
        TimeMetric::Interacting,
        TimeMetric::Idle,
        TimeMetric::NotResponding,
        TimeMetric::Available,
        TimeMetric::Away,
        TimeMetric::Break,
        TimeMetric::Busy,
        TimeMetric::SystemAway,
        TimeMetric::Meal,
        TimeMetric::Meeting,
        TimeMetric::Training,
    ];

    /// Presences summed into `OffQueue`.
    pub const OFF_QUEUE_PARTS: [TimeMetric; 7] = [
        TimeMetric::Available,
        TimeMetric::Away,
        TimeMetric::Break,
        TimeMetric::Busy,
        TimeMetric::Meal,
        TimeMetric::Meeting,
        TimeMetric::Training,
    ];

    /// Export column name
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeMetric::LoggedIn => "LOGGED_IN",
            TimeMetric::OnQueue => "ON_QUEUE",
            TimeMetric::OffQueue => "OFF_QUEUE",
            TimeMetric::Interacting => "INTERACTING",
            TimeMetric::Idle => "IDLE",
            TimeMetric::NotResponding => "NOT_RESPONDING",
            TimeMetric::Available => "AVAILABLE",
            TimeMetric::Away => "AWAY",
            TimeMetric::Break => "BREAK",
            TimeMetric::Busy => "BUSY",
            TimeMetric::SystemAway => "SYSTEM_AWAY",
            TimeMetric::Meal => "MEAL",
            TimeMetric::Meeting => "MEETING",
            TimeMetric::Training => "TRAINING",
        }
    }

    /// Analytics `(metric, qualifier)` pair this value is read from, or
    /// `None` for derived metrics.
    pub fn source(&self) -> Option<(&'static str, &'static str)> {
        match self {
            TimeMetric::LoggedIn | TimeMetric::OffQueue => None,
            TimeMetric::OnQueue => Some(("tSystemPresence", "ON_QUEUE")),
            TimeMetric::Interacting => Some(("tAgentRoutingStatus", "INTERACTING")),
            TimeMetric::Idle => Some(("tAgentRoutingStatus", "IDLE")),
            TimeMetric::NotResponding => Some(("tAgentRoutingStatus", "NOT_RESPONDING")),
            TimeMetric::Available => Some(("tSystemPresence", "AVAILABLE")),
            TimeMetric::Away => Some(("tSystemPresence", "AWAY")),
            TimeMetric::Break => Some(("tSystemPresence", "BREAK")),
            TimeMetric::Busy => Some(("tSystemPresence", "BUSY")),
            TimeMetric::SystemAway => Some(("tSystemPresence", "IDLE")),
            TimeMetric::Meal => Some(("tSystemPresence", "MEAL")),
            TimeMetric::Meeting => Some(("tSystemPresence", "MEETING")),
            TimeMetric::Training => Some(("tSystemPresence", "TRAINING")),
        }
    }
}

impl fmt::Display for TimeMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeMetric::ALL
            .into_iter()
            .find(|metric| metric.as_str() == s)
            .ok_or_else(|| format!("Invalid time metric: {s}"))
    }
}

/// One export row: a metric value for one user over one interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRecord {
    /// Internal user id
    pub user_id: String,
    /// Login as entered by the operator
    pub login: String,
    /// Interval start (inclusive)
    pub interval_start: DateTime<Utc>,
    /// Interval end (exclusive)
    pub interval_end: DateTime<Utc>,
    /// Metric measured
    pub metric_name: TimeMetric,
    /// Duration in milliseconds
    pub metric_value: Decimal,
}

impl TimeRecord {
    /// Validate record integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_end <= self.interval_start {
            return Err(format!(
                "Interval end ({}) must be after interval start ({})",
                self.interval_end, self.interval_start
            ));
        }

        if self.metric_value < Decimal::ZERO {
            return Err(format!(
                "Metric value must be non-negative, got {}",
                self.metric_value
            ));
        }

        Ok(())
    }
}

/// Why a login contributed nothing to the export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FailureReason {
    /// No directory account matches the login
    #[error("login not found")]
    NotFound,

    /// The directory lookup failed after retries
    #[error("lookup failed: {0}")]
    LookupFailed(String),

    /// Fetching the user's time data failed after retries
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The run was cancelled before this user's data was complete
    #[error("cancelled")]
    Cancelled,
}

impl FailureReason {
    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::NotFound => "not_found",
            FailureReason::LookupFailed(_) => "lookup_failed",
            FailureReason::FetchFailed(_) => "fetch_failed",
            FailureReason::Cancelled => "cancelled",
        }
    }
}

/// Merged output of one collection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionResult {
    /// Rows grouped by request login order, then ascending interval start
    pub records: Vec<TimeRecord>,
    /// Logins whose data was fetched completely (possibly zero rows), in request order
    pub succeeded: Vec<String>,
    /// Logins that contributed nothing, with the reason
    pub failures: BTreeMap<String, FailureReason>,
    /// The run was cancelled; the result is partial
    pub cancelled: bool,
}

impl CollectionResult {
    /// Rows collected for one login, in export order.
    pub fn records_for<'a>(&'a self, login: &'a str) -> impl Iterator<Item = &'a TimeRecord> + 'a {
        self.records.iter().filter(move |record| record.login == login)
    }

    /// Distinct logins that contributed rows, in export order.
    pub fn contributing_logins(&self) -> Vec<&str> {
        let mut logins: Vec<&str> = Vec::new();
        for record in &self.records {
            if logins.last() != Some(&record.login.as_str()) {
                logins.push(&record.login);
            }
        }
        logins
    }
}
