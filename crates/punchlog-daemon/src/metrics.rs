//! Prometheus metrics for the ledger daemon.
//!
//! | Metric | Type | Description | Labels |
//! |--------|------|-------------|--------|
//! | `punchlog_appends_total` | Counter | Events appended | `status` |
//! | `punchlog_append_rejections_total` | Counter | Ingest requests refused | `code` |
//! | `punchlog_append_latency_seconds` | Histogram | Ingest handling latency | |
//! | `punchlog_verifications_total` | Counter | Chain verifications | `outcome` |
//!
//! # Usage
//!
//! ```rust
//! use punchlog_daemon::metrics::MetricsRegistry;
//!
//! let registry = MetricsRegistry::new().unwrap();
//! registry.ledger_metrics().event_appended("In");
//! registry.ledger_metrics().verification_completed("valid");
//! let output = registry.encode_text().unwrap();
//! assert!(output.contains("punchlog_appends_total"));
//! ```

use std::sync::Arc;

use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Maximum length for label values to prevent denial-of-service via unbounded
/// labels.
pub const MAX_LABEL_VALUE_LEN: usize = 64;

/// Histogram buckets for ingest latency (in seconds).
pub const APPEND_LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0, 5.0];

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Ledger metrics.
///
/// All metrics use interior mutability and are safe to share across threads.
#[derive(Clone)]
pub struct LedgerMetrics {
    /// Events appended, labeled by resolved `status`.
    appends_total: CounterVec,

    /// Refused ingest requests, labeled by error `code`.
    append_rejections_total: CounterVec,

    /// Wall time of ingest handling, including retries.
    append_latency: Histogram,

    /// Verifications run, labeled by `outcome` (`valid`, `broken`, `error`).
    verifications_total: CounterVec,
}

impl LedgerMetrics {
    /// Creates ledger metrics and registers them with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate name).
    pub fn new(registry: &Registry) -> MetricsResult<Self> {
        let appends_total = CounterVec::new(
            Opts::new("punchlog_appends_total", "Attendance events appended"),
            &["status"],
        )?;
        registry.register(Box::new(appends_total.clone()))?;

        let append_rejections_total = CounterVec::new(
            Opts::new(
                "punchlog_append_rejections_total",
                "Ingest requests refused, by error code",
            ),
            &["code"],
        )?;
        registry.register(Box::new(append_rejections_total.clone()))?;

        let append_latency = Histogram::with_opts(
            HistogramOpts::new(
                "punchlog_append_latency_seconds",
                "Latency of ingest handling including retries",
            )
            .buckets(APPEND_LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(append_latency.clone()))?;

        let verifications_total = CounterVec::new(
            Opts::new(
                "punchlog_verifications_total",
                "Chain verifications by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(verifications_total.clone()))?;

        Ok(Self {
            appends_total,
            append_rejections_total,
            append_latency,
            verifications_total,
        })
    }

    /// Records an appended event.
    pub fn event_appended(&self, status: &str) {
        self.appends_total
            .with_label_values(&[truncate_label(status)])
            .inc();
    }

    /// Records a refused ingest request.
    pub fn append_rejected(&self, code: &str) {
        self.append_rejections_total
            .with_label_values(&[truncate_label(code)])
            .inc();
    }

    /// Records how long an ingest request took.
    pub fn observe_append_latency(&self, latency_secs: f64) {
        self.append_latency.observe(latency_secs);
    }

    /// Records a verification outcome.
    pub fn verification_completed(&self, outcome: &str) {
        self.verifications_total
            .with_label_values(&[truncate_label(outcome)])
            .inc();
    }

    /// Appended events for a status. Useful for tests.
    #[must_use]
    pub fn append_count(&self, status: &str) -> f64 {
        self.appends_total
            .with_label_values(&[truncate_label(status)])
            .get()
    }

    /// Rejections for a code. Useful for tests.
    #[must_use]
    pub fn rejection_count(&self, code: &str) -> f64 {
        self.append_rejections_total
            .with_label_values(&[truncate_label(code)])
            .get()
    }

    /// Verifications for an outcome. Useful for tests.
    #[must_use]
    pub fn verification_count(&self, outcome: &str) -> f64 {
        self.verifications_total
            .with_label_values(&[truncate_label(outcome)])
            .get()
    }
}

/// Registry wrapper holding the ledger metrics.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    ledger_metrics: LedgerMetrics,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all ledger metrics registered.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails.
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();
        let ledger_metrics = LedgerMetrics::new(&registry)?;
        Ok(Self {
            registry,
            ledger_metrics,
        })
    }

    /// Returns a reference to the ledger metrics.
    #[must_use]
    pub const fn ledger_metrics(&self) -> &LedgerMetrics {
        &self.ledger_metrics
    }

    /// Encodes all metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

/// Shared metrics registry for use across the daemon.
pub type SharedMetricsRegistry = Arc<MetricsRegistry>;

/// Creates a new shared metrics registry.
///
/// # Errors
///
/// Returns an error if metric registration fails.
pub fn new_shared_registry() -> MetricsResult<SharedMetricsRegistry> {
    Ok(Arc::new(MetricsRegistry::new()?))
}

/// Truncates a label value on a UTF-8 character boundary.
fn truncate_label(value: &str) -> &str {
    if value.len() <= MAX_LABEL_VALUE_LEN {
        return value;
    }
    let end = value
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= MAX_LABEL_VALUE_LEN)
        .last()
        .unwrap_or(0);
    &value[..end]
}
