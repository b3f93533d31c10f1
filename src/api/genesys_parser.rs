//! Genesys Cloud response parsing
//!
//! Turns the raw JSON of the OAuth, users and user-aggregates endpoints into
//! the transport types. Aggregates become one [`TimeRecord`] per
//! [`TimeMetric`] per interval that has data; `OFF_QUEUE` and `LOGGED_IN` are
//! derived from the presence sums.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::{ApiError, ApiResult, DirectoryUser, TokenGrant, UserPage};
use crate::{ResolvedUser, TimeMetric, TimeRecord};

/// Token lifetime assumed when the response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsersResponse {
    #[serde(default)]
    entities: Vec<UserEntity>,
    #[serde(default)]
    page_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct UserEntity {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AggregatesResponse {
    #[serde(default)]
    results: Vec<AggregateGroup>,
}

#[derive(Debug, Deserialize)]
struct AggregateGroup {
    #[serde(default)]
    data: Vec<AggregateData>,
}

#[derive(Debug, Deserialize)]
struct AggregateData {
    #[serde(default)]
    interval: Option<String>,
    #[serde(default)]
    metrics: Vec<AggregateMetric>,
}

#[derive(Debug, Deserialize)]
struct AggregateMetric {
    metric: String,
    #[serde(default)]
    qualifier: Option<String>,
    #[serde(default)]
    stats: HashMap<String, Value>,
}

/// Parse an OAuth client-credentials response
pub fn parse_token(body: &str) -> ApiResult<TokenGrant> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| ApiError::Parse(format!("Failed to parse token response: {e}")))?;

    if response.access_token.is_empty() {
        return Err(ApiError::Parse("Token response has an empty access_token".to_string()));
    }

    Ok(TokenGrant {
        access_token: response.access_token,
        expires_in: response
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME),
    })
}

/// Parse one page of `GET /api/v2/users`
pub fn parse_users_page(body: &str) -> ApiResult<UserPage> {
    let response: UsersResponse = serde_json::from_str(body)
        .map_err(|e| ApiError::Parse(format!("Failed to parse users page: {e}")))?;

    Ok(UserPage {
        entities: response
            .entities
            .into_iter()
            .map(|entity| DirectoryUser {
                id: entity.id,
                email: entity.email.filter(|e| !e.is_empty()),
                name: entity.name,
            })
            .collect(),
        page_count: response.page_count,
    })
}

/// Parse a user aggregates query response into time records.
///
/// `interval` is the queried window, used for data items that carry no
/// interval of their own. Intervals without any data produce no records.
pub fn parse_aggregates(
    body: &str,
    user: &ResolvedUser,
    interval: (DateTime<Utc>, DateTime<Utc>),
) -> ApiResult<Vec<TimeRecord>> {
    let response: AggregatesResponse = if body.trim().is_empty() {
        AggregatesResponse::default()
    } else {
        serde_json::from_str(body)
            .map_err(|e| ApiError::Parse(format!("Failed to parse aggregates response: {e}")))?
    };

    // (start, end) -> (metric, qualifier) -> summed milliseconds
    let mut buckets: BTreeMap<(DateTime<Utc>, DateTime<Utc>), HashMap<(String, String), Decimal>> =
        BTreeMap::new();

    for data in response.results.into_iter().flat_map(|group| group.data) {
        let window = match data.interval.as_deref() {
            Some(raw) => parse_interval(raw)?,
            None => interval,
        };
        let bucket = buckets.entry(window).or_default();

        for metric in data.metrics {
            let Some(sum) = metric.stats.get("sum") else {
                continue;
            };
            let value = decimal_from_json(sum).ok_or_else(|| {
                ApiError::Parse(format!("Metric {} has a non-numeric sum: {sum}", metric.metric))
            })?;
            let key = (metric.metric, metric.qualifier.unwrap_or_default());
            *bucket.entry(key).or_insert(Decimal::ZERO) += value;
        }
    }

    let mut records = Vec::with_capacity(buckets.len() * TimeMetric::ALL.len());
    for ((start, end), sums) in buckets {
        let values = metric_values(&sums);
        records.extend(TimeMetric::ALL.iter().map(|metric| TimeRecord {
            user_id: user.user_id.clone(),
            login: user.login.clone(),
            interval_start: start,
            interval_end: end,
            metric_name: *metric,
            metric_value: values[metric],
        }));
    }

    debug!(
        login = %user.login,
        records = records.len(),
        "Parsed aggregates response"
    );
    Ok(records)
}

fn metric_values(sums: &HashMap<(String, String), Decimal>) -> HashMap<TimeMetric, Decimal> {
    let mut values: HashMap<TimeMetric, Decimal> = TimeMetric::ALL
        .iter()
        .map(|metric| {
            let value = metric
                .source()
                .and_then(|(name, qualifier)| {
                    sums.get(&(name.to_string(), qualifier.to_string())).copied()
                })
                .unwrap_or(Decimal::ZERO);
            (*metric, value)
        })
        .collect();

    let off_queue: Decimal = TimeMetric::OFF_QUEUE_PARTS.iter().map(|m| values[m]).sum();
    let logged_in = values[&TimeMetric::OnQueue] + off_queue;
    values.insert(TimeMetric::OffQueue, off_queue);
    values.insert(TimeMetric::LoggedIn, logged_in);
    values
}

/// Parse an ISO-8601 `start/end` interval.
pub fn parse_interval(raw: &str) -> ApiResult<(DateTime<Utc>, DateTime<Utc>)> {
    let (start, end) = raw
        .split_once('/')
        .ok_or_else(|| ApiError::Parse(format!("Invalid interval: {raw}")))?;

    let parse = |s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ApiError::Parse(format!("Invalid interval bound {s:?}: {e}")))
    };

    let (start, end) = (parse(start)?, parse(end)?);
    if end <= start {
        warn!("Interval {} ends before it starts", raw);
        return Err(ApiError::Parse(format!("Empty interval: {raw}")));
    }
    Ok((start, end))
}

fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_u64().map(Decimal::from))
            .or_else(|| n.as_f64().and_then(Decimal::from_f64_retain)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
