//! Cursor-following time data queries
//!
//! [`PagedFetcher`] issues one logical query (user x date range) and follows
//! the continuation cursor until the transport stops returning one. Each page
//! is retried independently and passes through the rate limiter.
//!
//! Safety mechanisms:
//! - Page cap per query to stop runaway cursors
//! - Cancellation checked before every page request

use chrono::NaiveDate;
use futures_util::{stream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::api::auth::AuthTokenProvider;
use crate::api::retry::{with_retry, RetryError};
use crate::api::{ApiError, TimeApi, TimePage, TimeQuery};
use crate::collector::config::RetryPolicy;
use crate::shutdown::SharedShutdown;
use crate::{ResolvedUser, TimeRecord};

/// Why a user's time data could not be fetched
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The platform rejected a page permanently
    #[error("page rejected: {0}")]
    Rejected(ApiError),

    /// A page kept failing with transient errors
    #[error("page failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last: ApiError,
    },

    /// Cancellation was requested before the query finished
    #[error("cancelled")]
    Cancelled,

    /// The cursor kept going past the page cap
    #[error("more than {0} pages")]
    TooManyPages(usize),
}

impl From<RetryError> for FetchError {
    fn from(error: RetryError) -> Self {
        match error {
            RetryError::Fatal(e) => FetchError::Rejected(e),
            RetryError::Exhausted { attempts, last } => FetchError::Exhausted { attempts, last },
            RetryError::Cancelled => FetchError::Cancelled,
        }
    }
}

/// Lazy sequence of one user's time records
pub type TimeRecordStream = Pin<Box<dyn Stream<Item = Result<TimeRecord, FetchError>> + Send>>;

/// Fetches paginated time data for one user at a time
#[derive(Clone)]
pub struct PagedFetcher {
    api: Arc<dyn TimeApi>,
    auth: Arc<AuthTokenProvider>,
    policy: RetryPolicy,
    max_pages: usize,
    shutdown: Option<SharedShutdown>,
}

impl PagedFetcher {
    /// Create a fetcher
    pub fn new(
        api: Arc<dyn TimeApi>,
        auth: Arc<AuthTokenProvider>,
        policy: RetryPolicy,
        max_pages: usize,
    ) -> Self {
        Self {
            api,
            auth,
            policy,
            max_pages,
            shutdown: None,
        }
    }

    /// Stop before the next page once cancellation is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Fetch one page, retrying transient failures.
    pub async fn next_page(&self, query: &TimeQuery) -> Result<TimePage, FetchError> {
        let operation = format!(
            "time page {} for {}",
            query.cursor.as_deref().unwrap_or("start"),
            query.user.login
        );

        let page = with_retry(
            &self.policy,
            "time_page",
            &operation,
            self.shutdown.as_deref(),
            || {
                self.auth.authorized(|token| {
                    let api = self.api.clone();
                    let query = query.clone();
                    async move { api.fetch_time_page(token.value(), &query).await }
                })
            },
        )
        .await?;

        debug!(
            login = %query.user.login,
            records = page.records.len(),
            more = page.next_cursor.is_some(),
            "Fetched time page"
        );
        Ok(page)
    }

    /// Lazy record stream for `user` over `[start_date, end_date]`.
    ///
    /// The stream ends after the first error. It cannot be restarted.
    pub fn fetch(
        &self,
        user: ResolvedUser,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> TimeRecordStream {
        let fetcher = self.clone();
        let first = TimeQuery {
            user,
            start_date,
            end_date,
            cursor: None,
        };

        let stream = stream::unfold((Some(first), 0usize), move |(next, pages)| {
            let fetcher = fetcher.clone();

            async move {
                let Some(query) = next else {
                    return None;
                };

                if pages >= fetcher.max_pages {
                    let items = vec![Err(FetchError::TooManyPages(fetcher.max_pages))];
                    return Some((stream::iter(items), (None, pages)));
                }

                match fetcher.next_page(&query).await {
                    Ok(page) => {
                        let next = page.next_cursor.map(|cursor| TimeQuery {
                            cursor: Some(cursor),
                            ..query
                        });
                        let items: Vec<Result<TimeRecord, FetchError>> =
                            page.records.into_iter().map(Ok).collect();
                        Some((stream::iter(items), (next, pages + 1)))
                    }
                    Err(e) => Some((stream::iter(vec![Err(e)]), (None, pages))),
                }
            }
        })
        .flatten();

        Box::pin(stream)
    }

    /// Every record for `user`, or nothing.
    ///
    /// `on_page` is called with the running page count after each page.
    /// Records from earlier pages are discarded when a later page fails.
    pub async fn fetch_all<F>(
        &self,
        user: &ResolvedUser,
        start_date: NaiveDate,
        end_date: NaiveDate,
        mut on_page: F,
    ) -> Result<Vec<TimeRecord>, FetchError>
    where
        F: FnMut(u32),
    {
        let mut records = Vec::new();
        let mut query = TimeQuery {
            user: user.clone(),
            start_date,
            end_date,
            cursor: None,
        };
        let mut pages: u32 = 0;

        loop {
            if pages as usize >= self.max_pages {
                return Err(FetchError::TooManyPages(self.max_pages));
            }

            let page = self.next_page(&query).await?;
            pages += 1;
            records.extend(page.records);
            on_page(pages);

            match page.next_cursor {
                Some(cursor) => query.cursor = Some(cursor),
                None => break,
            }
        }

        debug!(
            login = %user.login,
            pages,
            records = records.len(),
            "Time data complete"
        );
        Ok(records)
    }
}
