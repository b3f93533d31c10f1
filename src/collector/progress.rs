//! Progress events and their delivery.
//!
//! The engine reports what it is doing through [`ProgressEvent`]s pushed into
//! a [`ProgressSink`]. Delivery is buffered and never blocks: a slow or
//! departed observer cannot stall collection. [`CollectionProgress`] folds the
//! event stream into counters and percentage strings for display.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::FailureReason;

/// Something observable happened during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The run passed validation and is about to authenticate
    Started {
        /// Distinct logins in the request
        total_logins: usize,
    },
    /// A login was matched to a platform user
    UserResolved {
        /// Login as entered
        login: String,
    },
    /// A login will contribute nothing
    UserFailed {
        /// Login as entered
        login: String,
        /// Why
        reason: FailureReason,
    },
    /// Another page of a user's time data arrived
    FetchProgress {
        /// Login as entered
        login: String,
        /// Pages fetched so far for this user
        pages_fetched: u32,
    },
    /// All of a user's pages were fetched
    UserCompleted {
        /// Login as entered
        login: String,
        /// Rows contributed
        records: usize,
    },
    /// Cancellation was observed; the result will be partial
    Cancelled,
    /// The run finished
    Completed {
        /// Rows in the result
        total_records: usize,
        /// Logins in the failure map
        total_failures: usize,
    },
}

/// Non-blocking destination for progress events.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// Create a sink and the receiver the observer polls.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Deliver an event. Never blocks; a closed receiver is ignored.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Running totals derived from progress events.
#[derive(Debug, Clone)]
pub struct CollectionProgress {
    /// Distinct logins in the run
    pub total_logins: usize,
    /// Logins that reached a terminal state
    pub finished_logins: usize,
    /// Logins that failed
    pub failed_logins: usize,
    /// Pages fetched across all users
    pub pages_fetched: u64,
    /// Rows collected so far
    pub records_collected: usize,
    /// Cancellation observed
    pub cancelled: bool,
    /// When the run started
    pub start_time: Instant,
}

impl Default for CollectionProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionProgress {
    /// Empty progress, clock started now.
    pub fn new() -> Self {
        Self {
            total_logins: 0,
            finished_logins: 0,
            failed_logins: 0,
            pages_fetched: 0,
            records_collected: 0,
            cancelled: false,
            start_time: Instant::now(),
        }
    }

    /// Fold one event into the totals.
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { total_logins } => self.total_logins = *total_logins,
            ProgressEvent::UserResolved { .. } => {}
            ProgressEvent::UserFailed { .. } => {
                self.failed_logins += 1;
                self.finished_logins += 1;
            }
            ProgressEvent::FetchProgress { .. } => self.pages_fetched += 1,
            ProgressEvent::UserCompleted { records, .. } => {
                self.records_collected += records;
                self.finished_logins += 1;
            }
            ProgressEvent::Cancelled => self.cancelled = true,
            ProgressEvent::Completed { total_records, .. } => {
                self.records_collected = *total_records;
                self.finished_logins = self.total_logins;
            }
        }
    }

    /// Completion percentage (0-100) by finished logins.
    pub fn percentage(&self) -> f64 {
        if self.total_logins == 0 {
            return 0.0;
        }
        (self.finished_logins as f64 / self.total_logins as f64 * 100.0).min(100.0)
    }

    /// Estimate remaining time from the per-login pace so far.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.finished_logins == 0 || self.finished_logins >= self.total_logins {
            return None;
        }
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let per_login = elapsed / self.finished_logins as f64;
        let remaining = (self.total_logins - self.finished_logins) as f64 * per_login;
        Some(Duration::from_secs_f64(remaining))
    }

    /// Human-readable progress line.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] {}/{} users - {:.0}% complete - {} rows",
            self.finished_logins,
            self.total_logins,
            self.percentage(),
            self.records_collected
        )];

        if self.failed_logins > 0 {
            parts.push(format!("({} failed)", self.failed_logins));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
