//! Access token lifecycle
//!
//! [`AuthTokenProvider`] hands out a cached bearer token and refreshes it
//! shortly before expiry. The cache sits behind an async mutex that is held
//! across the credential exchange, so concurrent callers arriving during a
//! refresh queue on the lock and then read the token the first caller
//! obtained; only one exchange is ever in flight.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::api::retry::{with_retry, RetryError};
use crate::api::{ApiError, ApiResult, TimeApi, TokenGrant};
use crate::collector::config::RetryPolicy;
use crate::collector::rate_limit::RateLimiter;
use crate::shutdown::SharedShutdown;

/// Authentication errors (fatal for a run)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The token endpoint refused the credentials
    #[error("credentials rejected: {0}")]
    InvalidCredentials(ApiError),

    /// Every exchange attempt failed with a transient error
    #[error("token exchange failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last: ApiError,
    },

    /// The run was cancelled before a token could be obtained
    #[error("token exchange cancelled")]
    Cancelled,
}

impl From<RetryError> for AuthError {
    fn from(error: RetryError) -> Self {
        match error {
            RetryError::Fatal(e) => AuthError::InvalidCredentials(e),
            RetryError::Exhausted { attempts, last } => AuthError::Exhausted { attempts, last },
            RetryError::Cancelled => AuthError::Cancelled,
        }
    }
}

/// A bearer token and the instant it stops being valid
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn from_grant(grant: TokenGrant, issued_at: Instant) -> Self {
        Self {
            value: grant.access_token,
            expires_at: issued_at + grant.expires_in,
        }
    }

    /// Bearer value for the Authorization header
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Expiry instant
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Still usable with `skew` to spare.
    pub fn is_fresh(&self, skew: Duration) -> bool {
        Instant::now() + skew < self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Obtains and caches access tokens for one run
pub struct AuthTokenProvider {
    api: Arc<dyn TimeApi>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    skew: Duration,
    cache: Mutex<Option<AccessToken>>,
    exchanges: AtomicU64,
    shutdown: Option<SharedShutdown>,
}

impl AuthTokenProvider {
    /// Create a provider with an empty cache.
    pub fn new(
        api: Arc<dyn TimeApi>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        skew: Duration,
    ) -> Self {
        Self {
            api,
            limiter,
            policy,
            skew,
            cache: Mutex::new(None),
            exchanges: AtomicU64::new(0),
            shutdown: None,
        }
    }

    /// Refuse to start calls once cancellation is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn cancel_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
    }

    /// Current token, exchanging credentials if the cache is empty or stale.
    pub async fn token(&self) -> Result<AccessToken, AuthError> {
        let mut cache = self.cache.lock().await;

        if let Some(token) = cache.as_ref().filter(|t| t.is_fresh(self.skew)) {
            return Ok(token.clone());
        }

        let issued_at = Instant::now();
        let grant = with_retry(
            &self.policy,
            "token",
            "token exchange",
            self.shutdown.as_deref(),
            || self.exchange_once(),
        )
        .await?;

        let token = AccessToken::from_grant(grant, issued_at);
        info!(
            expires_in_secs = token.expires_at.saturating_duration_since(issued_at).as_secs(),
            "Access token obtained"
        );
        *cache = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next [`token`](Self::token) call exchanges again.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.lock().await;
        if cache.take().is_some() {
            debug!("Cached access token invalidated");
        }
    }

    /// Drop the cached token only if it is still `rejected`; a token another
    /// caller already refreshed stays.
    pub async fn invalidate_if_current(&self, rejected: &str) -> bool {
        let mut cache = self.cache.lock().await;
        if cache.as_ref().is_some_and(|t| t.value == rejected) {
            *cache = None;
            debug!("Cached access token invalidated");
            true
        } else {
            false
        }
    }

    /// Map a data-call failure made with token `used`: a 401/403 invalidates
    /// that token and becomes retryable so the next attempt runs with a fresh one.
    pub async fn absorb_unauthorized(&self, error: ApiError, used: &str) -> ApiError {
        match error {
            ApiError::Unauthorized(status) => {
                debug!(status, "Data call unauthorized, refreshing token");
                self.invalidate_if_current(used).await;
                ApiError::TokenExpired
            }
            other => other,
        }
    }

    /// One authorized data call: current token, then a limiter permit held
    /// for the duration of `call`. A rejected token is invalidated and
    /// reported as [`ApiError::TokenExpired`].
    ///
    /// Cancellation is checked again once the permit is granted; a call
    /// that queued before cancellation never reaches the wire.
    pub async fn authorized<T, F, Fut>(&self, call: F) -> ApiResult<T>
    where
        F: FnOnce(AccessToken) -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let token = self.token().await.map_err(|e| match e {
            AuthError::Cancelled => ApiError::Cancelled,
            other => ApiError::Auth(other.to_string()),
        })?;

        let permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) if self.cancel_requested() => return Err(ApiError::Cancelled),
            Err(e) => return Err(ApiError::Limiter(e.to_string())),
        };
        if self.cancel_requested() {
            self.limiter.release(permit);
            debug!("Call skipped after permit wait - cancellation requested");
            return Err(ApiError::Cancelled);
        }

        let used = token.value.clone();
        let result = call(token).await;
        self.limiter.release(permit);

        match result {
            Ok(value) => Ok(value),
            Err(error) => Err(self.absorb_unauthorized(error, &used).await),
        }
    }

    /// Credential exchanges performed so far
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    async fn exchange_once(&self) -> ApiResult<TokenGrant> {
        let permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) if self.cancel_requested() => return Err(ApiError::Cancelled),
            Err(e) => return Err(ApiError::Limiter(e.to_string())),
        };
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        let result = self.api.exchange_token().await;
        self.limiter.release(permit);
        result
    }
}
