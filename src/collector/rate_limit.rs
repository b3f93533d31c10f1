//! Concurrency ceiling for outbound HTTP calls
//!
//! Every request made during a run holds a [`RatePermit`] for its duration.
//! Waiters are served in arrival order: tokio's semaphore is fair, so a user
//! queued early is never starved by later arrivals.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::metrics::RateLimiterMetrics;

/// FIFO limiter bounding outstanding requests to a fixed ceiling
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held rate limiter slot; the slot frees when the permit is dropped.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    /// Create a limiter allowing `max_concurrent` outstanding requests (at least 1).
    pub fn new(max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<RatePermit, RateLimitError> {
        let started = Instant::now();
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| RateLimitError::AcquireError(e.to_string()))?;

        let waited = started.elapsed();
        RateLimiterMetrics::record_acquired(waited, self.available());
        if waited.as_millis() > 100 {
            debug!(wait_ms = waited.as_millis(), "Rate limit permit acquired after wait");
        }

        Ok(RatePermit { _permit: permit })
    }

    /// Return a slot explicitly. Equivalent to dropping the permit.
    pub fn release(&self, permit: RatePermit) {
        drop(permit);
    }

    /// Configured ceiling
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Stop handing out permits; pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Failed to acquire a permit (limiter closed)
    #[error("failed to acquire rate limit permit: {0}")]
    AcquireError(String),
}
