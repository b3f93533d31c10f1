//! In-memory `TimeApi` with scripted directory, pages, latency and failures

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use user_time_collector::api::{
    ApiError, ApiResult, DirectoryUser, TimeApi, TimePage, TimeQuery, TokenGrant, UserPage,
};
use user_time_collector::{CollectionRequest, TimeMetric, TimeRecord};

type PageHook = Box<dyn Fn(&str, usize) + Send + Sync>;

/// Scripted platform backend
#[derive(Default)]
pub struct FakeApi {
    directory: Vec<DirectoryUser>,
    pages: HashMap<String, Vec<Vec<TimeRecord>>>,
    latency: HashMap<String, Duration>,
    failing_page: HashMap<String, (usize, ApiError)>,
    token_delay: Duration,
    token_failure: Option<ApiError>,
    page_hook: Option<PageHook>,

    exchanges: AtomicU64,
    directory_calls: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    page_calls: Mutex<Vec<(String, usize)>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory account whose email local part is `login`
    pub fn user(mut self, login: &str, user_id: &str) -> Self {
        self.directory.push(DirectoryUser {
            id: user_id.to_string(),
            email: Some(format!("{login}@example.com")),
            name: Some(login.to_uppercase()),
        });
        self
    }

    /// Time data pages for a user id, in cursor order
    pub fn pages(mut self, user_id: &str, pages: Vec<Vec<TimeRecord>>) -> Self {
        self.pages.insert(user_id.to_string(), pages);
        self
    }

    /// Delay before every page of a user id is answered
    pub fn latency(mut self, user_id: &str, latency: Duration) -> Self {
        self.latency.insert(user_id.to_string(), latency);
        self
    }

    /// Every request for page `index` of a user id fails with `error`
    pub fn failing_page(mut self, user_id: &str, index: usize, error: ApiError) -> Self {
        self.failing_page.insert(user_id.to_string(), (index, error));
        self
    }

    pub fn token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn token_failure(mut self, error: ApiError) -> Self {
        self.token_failure = Some(error);
        self
    }

    /// Called with (user id, page index) when a page request arrives
    pub fn on_page(mut self, hook: impl Fn(&str, usize) + Send + Sync + 'static) -> Self {
        self.page_hook = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn directory_calls(&self) -> u64 {
        self.directory_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> Vec<(String, usize)> {
        self.page_calls.lock().unwrap().clone()
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimeApi for FakeApi {
    async fn exchange_token(&self) -> ApiResult<TokenGrant> {
        let _guard = self.enter();
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if !self.token_delay.is_zero() {
            tokio::time::sleep(self.token_delay).await;
        }
        if let Some(error) = &self.token_failure {
            return Err(error.clone());
        }
        Ok(TokenGrant {
            access_token: "fake-token".to_string(),
            expires_in: Duration::from_secs(3600),
        })
    }

    async fn list_users(&self, token: &str, page_number: u32) -> ApiResult<UserPage> {
        let _guard = self.enter();
        assert_eq!(token, "fake-token");
        self.directory_calls.fetch_add(1, Ordering::SeqCst);

        let entities = if page_number == 1 {
            self.directory.clone()
        } else {
            Vec::new()
        };
        Ok(UserPage {
            entities,
            page_count: Some(1),
        })
    }

    async fn fetch_time_page(&self, token: &str, query: &TimeQuery) -> ApiResult<TimePage> {
        let _guard = self.enter();
        assert_eq!(token, "fake-token");

        let user_id = query.user.user_id.as_str();
        let index: usize = match query.cursor.as_deref() {
            None => 0,
            Some(cursor) => cursor.parse().map_err(|_| ApiError::Parse(cursor.to_string()))?,
        };
        self.page_calls
            .lock()
            .unwrap()
            .push((user_id.to_string(), index));
        if let Some(hook) = &self.page_hook {
            hook(user_id, index);
        }

        if let Some(latency) = self.latency.get(user_id) {
            tokio::time::sleep(*latency).await;
        }

        if let Some((failing, error)) = self.failing_page.get(user_id) {
            if *failing == index {
                return Err(error.clone());
            }
        }

        let pages = self.pages.get(user_id).map(Vec::as_slice).unwrap_or_default();
        let records = pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < pages.len()).then(|| (index + 1).to_string());
        Ok(TimePage {
            records,
            next_cursor,
        })
    }
}

/// A record for `login` on day `day` of January 2024
pub fn record(login: &str, user_id: &str, day: u32, metric: TimeMetric, value: i64) -> TimeRecord {
    let start = Utc.with_ymd_and_hms(2024, 1, day, 3, 0, 0).unwrap();
    TimeRecord {
        user_id: user_id.to_string(),
        login: login.to_string(),
        interval_start: start,
        interval_end: start + chrono::Duration::days(1),
        metric_name: metric,
        metric_value: Decimal::from(value),
    }
}

/// January 2024 request for the given logins
pub fn january(logins: &[&str]) -> CollectionRequest {
    CollectionRequest::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        logins.iter().map(|l| l.to_string()).collect(),
    )
}
