//! Genesys Cloud HTTP transport
//!
//! Implements [`TimeApi`] over HTTPS with reqwest. Every method performs
//! exactly one request; status codes are classified into [`ApiError`] and
//! retried by the callers.
//!
//! Time data is paged one local day at a time: the cursor is the next day to
//! query (`YYYY-MM-DD`) and each page covers local midnight to local midnight
//! at the configured UTC offset.

use async_trait::async_trait;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, TimeZone, Utc};
use reqwest::{Client, RequestBuilder};
use serde_json::json;
use tracing::{debug, warn};

use crate::api::genesys_parser::{parse_aggregates, parse_token, parse_users_page};
use crate::api::{ApiError, ApiResult, TimeApi, TimePage, TimeQuery, TokenGrant, UserPage};
use crate::collector::config::CollectorConfig;
use crate::metrics::HttpRequestMetrics;
use crate::Credentials;

const TOKEN_PATH: &str = "/oauth/token";
const USERS_PATH: &str = "/api/v2/users";
const AGGREGATES_PATH: &str = "/api/v2/analytics/users/aggregates/query";

/// Metrics reported for every user aggregates query.
const AGGREGATE_METRICS: [&str; 3] = ["tAgentRoutingStatus", "tOrganizationPresence", "tSystemPresence"];

/// HTTPS client for one Genesys Cloud environment
pub struct GenesysClient {
    client: Client,
    login_base: String,
    api_base: String,
    client_id: String,
    client_secret: String,
    directory_page_size: u32,
    utc_offset: FixedOffset,
}

impl GenesysClient {
    /// Client for `login.<host>` and `api.<host>` of the credentials' environment.
    pub fn new(credentials: Credentials, config: &CollectorConfig) -> ApiResult<Self> {
        let host = credentials.environment_host.trim().trim_end_matches('/').to_string();
        Self::with_base_urls(
            credentials,
            config,
            format!("https://login.{host}"),
            format!("https://api.{host}"),
        )
    }

    /// Client against explicit base URLs (proxies, test servers).
    pub fn with_base_urls(
        credentials: Credentials,
        config: &CollectorConfig,
        login_base: impl Into<String>,
        api_base: impl Into<String>,
    ) -> ApiResult<Self> {
        credentials.validate().map_err(ApiError::Auth)?;

        if !credentials.verify_tls {
            warn!("TLS certificate verification is disabled");
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(!credentials.verify_tls)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            login_base: login_base.into().trim_end_matches('/').to_string(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            directory_page_size: config.directory_page_size,
            utc_offset: config.utc_offset(),
        })
    }

    /// Send one request and return the body of a 2xx response.
    async fn send(&self, endpoint: &'static str, request: RequestBuilder) -> ApiResult<String> {
        let metrics = HttpRequestMetrics::start(endpoint);
        debug!(
            endpoint,
            correlation_id = metrics.correlation_id(),
            "Sending request"
        );

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                metrics.record_network_error();
                return Err(classify_transport_error(&e));
            }
        };

        let status = response.status().as_u16();
        metrics.record_complete(status);

        let body = response.text().await.map_err(|e| classify_transport_error(&e))?;
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            debug!(endpoint, status, "Request rejected");
            Err(ApiError::from_status(status, truncate(&body, 512)))
        }
    }

    /// The local day a query page covers: the cursor, or the range start.
    fn page_day(&self, query: &TimeQuery) -> ApiResult<NaiveDate> {
        match query.cursor.as_deref() {
            None => Ok(query.start_date),
            Some(cursor) => NaiveDate::parse_from_str(cursor, "%Y-%m-%d")
                .map_err(|e| ApiError::Parse(format!("Invalid page cursor {cursor:?}: {e}"))),
        }
    }

    /// UTC bounds of one local day.
    fn day_interval(&self, day: NaiveDate) -> ApiResult<(DateTime<Utc>, DateTime<Utc>)> {
        let next = day
            .checked_add_days(Days::new(1))
            .ok_or_else(|| ApiError::Parse(format!("Date out of range: {day}")))?;
        Ok((self.local_midnight(day)?, self.local_midnight(next)?))
    }

    fn local_midnight(&self, day: NaiveDate) -> ApiResult<DateTime<Utc>> {
        self.utc_offset
            .from_local_datetime(&day.and_time(chrono::NaiveTime::MIN))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| ApiError::Parse(format!("No local midnight for {day}")))
    }
}

#[async_trait]
impl TimeApi for GenesysClient {
    async fn exchange_token(&self) -> ApiResult<TokenGrant> {
        let request = self
            .client
            .post(format!("{}{}", self.login_base, TOKEN_PATH))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")]);

        let body = self.send("oauth_token", request).await?;
        parse_token(&body)
    }

    async fn list_users(&self, token: &str, page_number: u32) -> ApiResult<UserPage> {
        let request = self
            .client
            .get(format!("{}{}", self.api_base, USERS_PATH))
            .bearer_auth(token)
            .query(&[
                ("pageSize", self.directory_page_size.to_string()),
                ("pageNumber", page_number.to_string()),
                ("sortOrder", "ASC".to_string()),
                ("state", "any".to_string()),
            ]);

        let body = self.send("users", request).await?;
        parse_users_page(&body)
    }

    async fn fetch_time_page(&self, token: &str, query: &TimeQuery) -> ApiResult<TimePage> {
        let day = self.page_day(query)?;
        if day > query.end_date {
            return Ok(TimePage::default());
        }

        let (start, end) = self.day_interval(day)?;
        let body = aggregates_query(&query.user.user_id, start, end);
        let request = self
            .client
            .post(format!("{}{}", self.api_base, AGGREGATES_PATH))
            .bearer_auth(token)
            .json(&body);

        let response = self.send("user_aggregates", request).await?;
        let records = parse_aggregates(&response, &query.user, (start, end))?;

        let next_cursor = (day < query.end_date)
            .then(|| day.succ_opt())
            .flatten()
            .map(|next| next.format("%Y-%m-%d").to_string());

        Ok(TimePage {
            records,
            next_cursor,
        })
    }
}

/// Request body of a single-user aggregates query.
pub fn aggregates_query(user_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> serde_json::Value {
    json!({
        "interval": format!("{}/{}", format_instant(start), format_instant(end)),
        "groupBy": ["userId"],
        "filter": {
            "type": "or",
            "predicates": [{
                "type": "dimension",
                "dimension": "userId",
                "operator": "matches",
                "value": user_id,
            }],
        },
        "metrics": AGGREGATE_METRICS,
    })
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn classify_transport_error(error: &reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout(error.to_string())
    } else if error.is_decode() {
        ApiError::Parse(error.to_string())
    } else {
        ApiError::Network(error.to_string())
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
