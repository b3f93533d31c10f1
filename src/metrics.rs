//! Observability metrics for collection runs
//!
//! Request counts, latencies, 429 responses, retries, rate limiter waits and
//! per-user outcomes are recorded through the `metrics` facade. Nothing is
//! exported unless [`init_metrics`] installs the Prometheus endpoint; without
//! it every call below is a cheap no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Install the Prometheus exporter and register metric descriptions.
///
/// Idempotent: later calls are ignored once the exporter is installed.
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        METRICS_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(format!("Failed to install Prometheus exporter: {e}"));
    }

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to the platform API"
    );
    describe_counter!(
        "http_429_errors_total",
        Unit::Count,
        "Total number of 429 rate limit responses received"
    );
    describe_counter!("http_retries_total", Unit::Count, "Total number of retry attempts");
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_histogram!(
        "rate_limit_queue_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a rate limiter slot"
    );
    describe_gauge!(
        "rate_limit_permits_available",
        Unit::Count,
        "Currently free rate limiter slots"
    );
    describe_counter!(
        "users_collected_total",
        Unit::Count,
        "Users whose time data was collected completely"
    );
    describe_counter!(
        "users_failed_total",
        Unit::Count,
        "Users that contributed nothing to the export"
    );

    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Whether the Prometheus exporter is installed
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.load(Ordering::SeqCst)
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome of one HTTP request
pub struct HttpRequestMetrics {
    endpoint: &'static str,
    start_time: Instant,
    correlation_id: String,
}

impl HttpRequestMetrics {
    /// Start recording a request against `endpoint` (a route label, not a full URL)
    pub fn start(endpoint: &'static str) -> Self {
        let correlation_id = generate_correlation_id();
        debug!(correlation_id = %correlation_id, endpoint, "Starting HTTP request");
        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    /// Record a response with the given status
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint,
            "status" => status_code.to_string(),
        )
        .increment(1);
        histogram!("http_request_duration_seconds", "endpoint" => self.endpoint)
            .record(duration.as_secs_f64());

        if status_code == 429 {
            counter!("http_429_errors_total", "endpoint" => self.endpoint).increment(1);
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = self.endpoint,
                duration_ms = duration.as_millis(),
                "Rate limit error (429) recorded"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    /// Record a transport failure (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint,
            "status" => "network_error",
        )
        .increment(1);
        histogram!("http_request_duration_seconds", "endpoint" => self.endpoint)
            .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = self.endpoint,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record a retry and the backoff applied before it
pub fn record_retry_backoff(operation: &'static str, duration: Duration, attempt: u32) {
    counter!(
        "http_retries_total",
        "operation" => operation,
        "attempt" => attempt.to_string(),
    )
    .increment(1);
    histogram!("retry_backoff_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Rate limiter metrics helper
pub struct RateLimiterMetrics;

impl RateLimiterMetrics {
    /// Record a permit handed out after `waited` in the queue
    pub fn record_acquired(waited: Duration, available: usize) {
        histogram!("rate_limit_queue_wait_seconds").record(waited.as_secs_f64());
        gauge!("rate_limit_permits_available").set(available as f64);
    }
}

/// Record a user collected completely
pub fn record_user_collected(records: usize) {
    counter!("users_collected_total").increment(1);
    debug!(records, "User collected");
}

/// Record a user that contributed nothing, labelled by failure kind
pub fn record_user_failed(kind: &'static str) {
    counter!("users_failed_total", "reason" => kind).increment(1);
}
