//! Prometheus metrics for bucketline.
//!
//! Defines metric name constants and small recording helpers used by the
//! client, the retrier and the hedging dispatcher.  Recording goes through
//! the `metrics` facade, so it is a no-op until a recorder is installed;
//! the binary installs a Prometheus recorder via [`init_metrics`].

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total client operations (counter). Labels: operation, outcome.
pub const OPERATIONS_TOTAL: &str = "bucketline_operations_total";

/// Client operation duration in seconds (histogram). Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "bucketline_operation_duration_seconds";

/// Total retries after a transient failure (counter). Labels: operation.
pub const RETRIES_TOTAL: &str = "bucketline_retries_total";

/// Total hedged GET attempts issued (counter).
pub const HEDGES_ISSUED_TOTAL: &str = "bucketline_hedges_issued_total";

/// Total hedged GET attempts skipped by the rate limiter (counter).
pub const HEDGES_SKIPPED_TOTAL: &str = "bucketline_hedges_skipped_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(OPERATIONS_TOTAL, "Total client operations by outcome");
    describe_histogram!(
        OPERATION_DURATION_SECONDS,
        "Client operation duration in seconds, including retries and hedges"
    );
    describe_counter!(RETRIES_TOTAL, "Total retries after transient failures");
    describe_counter!(HEDGES_ISSUED_TOTAL, "Total hedged GET attempts issued");
    describe_counter!(
        HEDGES_SKIPPED_TOTAL,
        "Total hedged GET attempts skipped by the rate limiter"
    );
}

// -- Recording helpers --------------------------------------------------------

/// Record one finished client operation.
///
/// `outcome` is `"ok"` or an error class (`"not_found"`, `"transient"`,
/// `"permanent"`).
pub fn record_operation(operation: &'static str, started: Instant, outcome: &'static str) {
    counter!(OPERATIONS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
    histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

/// Record one retry of `operation`.
pub fn record_retry(operation: &'static str) {
    counter!(RETRIES_TOTAL, "operation" => operation).increment(1);
}

/// Record a hedge round: `issued` when the limiter granted it, otherwise skipped.
pub fn record_hedge(issued: bool) {
    if issued {
        counter!(HEDGES_ISSUED_TOTAL).increment(1);
    } else {
        counter!(HEDGES_SKIPPED_TOTAL).increment(1);
    }
}

// -- Tests --------------------------------------------------------------------
