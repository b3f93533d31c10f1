//! Login to user id resolution
//!
//! Logins are matched against the user directory, case-insensitively, on
//! either the full email or its local part. The directory is paged in
//! ascending order until every login is matched or the pages run out.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::auth::AuthTokenProvider;
use crate::api::retry::{with_retry, RetryError};
use crate::api::{DirectoryUser, TimeApi, UserPage};
use crate::collector::config::RetryPolicy;
use crate::shutdown::SharedShutdown;
use crate::{FailureReason, ResolvedUser};

/// Outcome per login
pub type Resolution = HashMap<String, Result<ResolvedUser, FailureReason>>;

/// Resolves operator logins to platform users
pub struct UserResolver {
    api: Arc<dyn TimeApi>,
    auth: Arc<AuthTokenProvider>,
    policy: RetryPolicy,
    max_pages: usize,
    shutdown: Option<SharedShutdown>,
}

impl UserResolver {
    /// Create a resolver
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

    /// Stop paging once cancellation is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Resolve every login. Each input login gets exactly one entry.
    ///
    /// A failed directory page fails every login not yet matched with
    /// [`FailureReason::LookupFailed`]; cancellation fails them with
    /// [`FailureReason::Cancelled`].
    pub async fn resolve(&self, logins: &[String]) -> Resolution {
        let mut outcome = Resolution::with_capacity(logins.len());
        let mut pending: HashMap<String, Vec<&str>> = HashMap::new();
        for login in logins {
            pending
                .entry(login.to_lowercase())
                .or_default()
                .push(login.as_str());
        }

        let mut page_number: u32 = 1;
        while !pending.is_empty() {
            let page = match self.fetch_page(page_number).await {
                Ok(page) => page,
                Err(error) => {
                    let reason = match error {
                        RetryError::Cancelled => FailureReason::Cancelled,
                        other => FailureReason::LookupFailed(other.to_string()),
                    };
                    warn!(
                        page = page_number,
                        unresolved = pending.len(),
                        "Directory lookup failed: {}",
                        reason
                    );
                    fail_pending(&mut outcome, pending, reason);
                    return outcome;
                }
            };

            let entities = page.entities.len();
            for user in &page.entities {
                match_user(user, &mut pending, &mut outcome);
            }

            let last_page = entities == 0
                || page.page_count.is_some_and(|count| page_number >= count)
                || page_number as usize >= self.max_pages;
            debug!(page = page_number, entities, remaining = pending.len(), "Directory page scanned");
            if last_page {
                break;
            }
            page_number += 1;
        }

        if !pending.is_empty() {
            info!(unresolved = pending.len(), "Logins not found in directory");
        }
        fail_pending(&mut outcome, pending, FailureReason::NotFound);
        outcome
    }

    async fn fetch_page(&self, page_number: u32) -> Result<UserPage, RetryError> {
        let operation = format!("directory page {page_number}");
        with_retry(
            &self.policy,
            "users",
            &operation,
            self.shutdown.as_deref(),
            || {
                self.auth.authorized(|token| {
                    let api = self.api.clone();
                    async move { api.list_users(token.value(), page_number).await }
                })
            },
        )
        .await
    }
}

fn match_user(
    user: &DirectoryUser,
    pending: &mut HashMap<String, Vec<&str>>,
    outcome: &mut Resolution,
) {
    let Some(email) = user.email.as_deref() else {
        return;
    };
    let email = email.to_lowercase();
    let local_part = email.split('@').next().unwrap_or_default();

    for key in [local_part, email.as_str()] {
        if let Some(logins) = pending.remove(key) {
            for login in logins {
                debug!(login, user_id = %user.id, "Login resolved");
                outcome.insert(
                    login.to_string(),
                    Ok(ResolvedUser {
                        login: login.to_string(),
                        user_id: user.id.clone(),
                        email: user.email.clone(),
                        name: user.name.clone(),
                    }),
                );
            }
        }
    }
}

fn fail_pending(outcome: &mut Resolution, pending: HashMap<String, Vec<&str>>, reason: FailureReason) {
    for login in pending.into_values().flatten() {
        outcome.insert(login.to_string(), Err(reason.clone()));
    }
}
