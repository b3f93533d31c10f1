//! Collection run driver
//!
//! [`CollectionOrchestrator::collect`] validates the request, authenticates,
//! resolves every login in one batch and then fans out one task per resolved
//! user. Task results come back in completion order and are reassembled into
//! request login order before being returned.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::api::auth::{AuthError, AuthTokenProvider};
use crate::api::genesys_http::GenesysClient;
use crate::api::pagination::{FetchError, PagedFetcher};
use crate::api::users::UserResolver;
use crate::api::{ApiResult, TimeApi};
use crate::collector::config::CollectorConfig;
use crate::collector::progress::{ProgressEvent, ProgressSink};
use crate::collector::rate_limit::RateLimiter;
use crate::collector::{CollectError, CollectResult};
use crate::metrics::{record_user_collected, record_user_failed};
use crate::shutdown::SharedShutdown;
use crate::{CollectionRequest, CollectionResult, Credentials, FailureReason, ResolvedUser, TimeRecord};

/// Outcome of one user's fetch task: request index, login, records
type UserOutcome = (usize, String, Result<Vec<TimeRecord>, FetchError>);

/// Drives collection runs against one platform environment
pub struct CollectionOrchestrator {
    api: Arc<dyn TimeApi>,
    config: CollectorConfig,
    shutdown: Option<SharedShutdown>,
}

impl CollectionOrchestrator {
    /// Orchestrator over any transport
    pub fn new(api: Arc<dyn TimeApi>) -> Self {
        Self {
            api,
            config: CollectorConfig::default(),
            shutdown: None,
        }
    }

    /// Orchestrator over HTTPS for the given credentials
    pub fn for_credentials(credentials: Credentials, config: CollectorConfig) -> ApiResult<Self> {
        let client = GenesysClient::new(credentials, &config)?;
        Ok(Self::new(Arc::new(client)).with_config(config))
    }

    /// Replace the run configuration
    pub fn with_config(mut self, config: CollectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Observe a cancellation signal
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run configuration
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    fn cancel_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
    }

    /// Collect time data for every login in `request`.
    ///
    /// Fails only for an invalid request or when no token can be obtained.
    /// Per-login problems land in [`CollectionResult::failures`]; every
    /// distinct login ends up in exactly one of `succeeded` or `failures`.
    pub async fn collect(
        &self,
        request: &CollectionRequest,
        progress: &ProgressSink,
    ) -> CollectResult<CollectionResult> {
        request.validate().map_err(CollectError::Validation)?;

        let logins = request.unique_logins();
        info!(
            logins = logins.len(),
            start_date = %request.start_date,
            end_date = %request.end_date,
            max_concurrency = self.config.max_concurrent_requests,
            "Starting collection"
        );
        progress.emit(ProgressEvent::Started {
            total_logins: logins.len(),
        });

        let mut result = CollectionResult::default();
        if self.cancel_requested() {
            warn!("Cancelled before collection started");
            for login in &logins {
                fail_login(&mut result, progress, login, FailureReason::Cancelled);
            }
            return Ok(self.finish(result, progress));
        }

        let limiter = Arc::new(RateLimiter::new(self.config.max_concurrent_requests));
        let mut auth = AuthTokenProvider::new(
            self.api.clone(),
            limiter.clone(),
            self.config.token_retry,
            self.config.token_skew,
        );
        if let Some(shutdown) = &self.shutdown {
            auth = auth.with_shutdown(shutdown.clone());
        }
        let auth = Arc::new(auth);
        match auth.token().await {
            Ok(_) => {}
            Err(AuthError::Cancelled) => {
                warn!("Cancelled during authentication");
                for login in &logins {
                    fail_login(&mut result, progress, login, FailureReason::Cancelled);
                }
                return Ok(self.finish(result, progress));
            }
            Err(e) => {
                error!("Authentication failed: {}", e);
                return Err(CollectError::Auth(e));
            }
        }

        // Waiters queued on the limiter are turned away as soon as the run is cancelled
        let closer = self.shutdown.clone().map(|shutdown| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                shutdown.wait_for_shutdown().await;
                debug!("Closing rate limiter");
                limiter.close();
            })
        });

        let mut resolver = UserResolver::new(
            self.api.clone(),
            auth.clone(),
            self.config.lookup_retry,
            self.config.max_pages,
        );
        let mut fetcher = PagedFetcher::new(
            self.api.clone(),
            auth,
            self.config.page_retry,
            self.config.max_pages,
        );
        if let Some(shutdown) = &self.shutdown {
            resolver = resolver.with_shutdown(shutdown.clone());
            fetcher = fetcher.with_shutdown(shutdown.clone());
        }

        let mut resolution = resolver.resolve(&logins).await;
        let mut resolved: Vec<(usize, ResolvedUser)> = Vec::new();
        for (index, login) in logins.iter().enumerate() {
            match resolution.remove(login) {
                Some(Ok(user)) => {
                    progress.emit(ProgressEvent::UserResolved {
                        login: login.clone(),
                    });
                    resolved.push((index, user));
                }
                Some(Err(reason)) => fail_login(&mut result, progress, login, reason),
                None => fail_login(
                    &mut result,
                    progress,
                    login,
                    FailureReason::LookupFailed("no lookup outcome".to_string()),
                ),
            }
        }
        info!(
            resolved = resolved.len(),
            unresolved = result.failures.len(),
            "Logins resolved"
        );

        let mut outcomes = self.fetch_users(&fetcher, request, &resolved, progress).await;
        if let Some(closer) = closer {
            closer.abort();
        }

        // Reassemble in request order; completion order is irrelevant.
        for (index, user) in &resolved {
            match outcomes.remove(index) {
                Some(Ok(mut records)) => {
                    records.sort_by_key(|record| record.interval_start);
                    record_user_collected(records.len());
                    progress.emit(ProgressEvent::UserCompleted {
                        login: user.login.clone(),
                        records: records.len(),
                    });
                    result.records.extend(records);
                    result.succeeded.push(user.login.clone());
                }
                Some(Err(FetchError::Cancelled)) => {
                    fail_login(&mut result, progress, &user.login, FailureReason::Cancelled)
                }
                Some(Err(e)) => {
                    warn!(login = %user.login, "Fetch failed: {}", e);
                    fail_login(
                        &mut result,
                        progress,
                        &user.login,
                        FailureReason::FetchFailed(e.to_string()),
                    )
                }
                None => fail_login(
                    &mut result,
                    progress,
                    &user.login,
                    FailureReason::FetchFailed("fetch task did not complete".to_string()),
                ),
            }
        }

        Ok(self.finish(result, progress))
    }

    /// Run one fetch task per resolved user and gather outcomes by index.
    async fn fetch_users(
        &self,
        fetcher: &PagedFetcher,
        request: &CollectionRequest,
        resolved: &[(usize, ResolvedUser)],
        progress: &ProgressSink,
    ) -> BTreeMap<usize, Result<Vec<TimeRecord>, FetchError>> {
        let mut tasks: JoinSet<UserOutcome> = JoinSet::new();

        for (index, user) in resolved {
            let fetcher = fetcher.clone();
            let progress = progress.clone();
            let user = user.clone();
            let index = *index;
            let (start_date, end_date) = (request.start_date, request.end_date);

            tasks.spawn(async move {
                let login = user.login.clone();
                let result = fetcher
                    .fetch_all(&user, start_date, end_date, |pages_fetched| {
                        progress.emit(ProgressEvent::FetchProgress {
                            login: login.clone(),
                            pages_fetched,
                        });
                    })
                    .await;
                (index, login, result)
            });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, login, result)) => {
                    debug!(login = %login, ok = result.is_ok(), "Fetch task finished");
                    outcomes.insert(index, result);
                }
                Err(e) => error!("Fetch task failed to complete: {}", e),
            }
        }
        outcomes
    }

    fn finish(&self, mut result: CollectionResult, progress: &ProgressSink) -> CollectionResult {
        if self.cancel_requested() {
            result.cancelled = true;
            warn!(
                succeeded = result.succeeded.len(),
                failures = result.failures.len(),
                "Collection cancelled, returning partial result"
            );
            progress.emit(ProgressEvent::Cancelled);
        }

        info!(
            records = result.records.len(),
            succeeded = result.succeeded.len(),
            failures = result.failures.len(),
            "Collection complete"
        );
        progress.emit(ProgressEvent::Completed {
            total_records: result.records.len(),
            total_failures: result.failures.len(),
        });
        result
    }
}

fn fail_login(
    result: &mut CollectionResult,
    progress: &ProgressSink,
    login: &str,
    reason: FailureReason,
) {
    record_user_failed(reason.kind());
    progress.emit(ProgressEvent::UserFailed {
        login: login.to_string(),
        reason: reason.clone(),
    });
    result.failures.insert(login.to_string(), reason);
}
