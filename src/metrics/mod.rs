//! Prometheus metrics for the dispatch core.
//!
//! - Queue metrics (enqueued, claimed, requeued, depth)
//! - Delivery metrics (delivered, failed, retried by sweep)
//! - Request metrics (submitted, expired)
//! - Provider send latency

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "drover";

lazy_static! {
    /// Total messages accepted into the queue
    pub static ref QUEUE_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_enqueued_total", METRIC_PREFIX),
        "Total messages accepted into the queue"
    ).unwrap();

    /// Total messages claimed by dispatch workers
    pub static ref QUEUE_CLAIMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_claimed_total", METRIC_PREFIX),
        "Total messages claimed by dispatch workers"
    ).unwrap();

    /// Total messages returned to the queue (manual requeue + stale sweep)
    pub static ref QUEUE_REQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_requeued_total", METRIC_PREFIX),
        "Total messages returned to the queue"
    ).unwrap();

    /// Current number of rows in Queued status
    pub static ref QUEUE_DEPTH: IntGauge = register_int_gauge!(
        format!("{}_queue_depth", METRIC_PREFIX),
        "Current number of rows in Queued status"
    ).unwrap();

    /// Total deliveries finished, by outcome
    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Total deliveries finished",
        &["outcome"]
    ).unwrap();

    /// Total failed deliveries requeued by the retry sweep
    pub static ref DELIVERIES_RETRIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_deliveries_retried_total", METRIC_PREFIX),
        "Total failed deliveries requeued by the retry sweep"
    ).unwrap();

    /// Total notification requests submitted
    pub static ref REQUESTS_SUBMITTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_requests_submitted_total", METRIC_PREFIX),
        "Total notification requests submitted"
    ).unwrap();

    /// Total requests cancelled by the expiration sweep
    pub static ref REQUESTS_EXPIRED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_requests_expired_total", METRIC_PREFIX),
        "Total requests cancelled by the expiration sweep"
    ).unwrap();

    /// Provider send latency in seconds
    pub static ref PROVIDER_SEND_SECONDS: Histogram = register_histogram!(
        format!("{}_provider_send_seconds", METRIC_PREFIX),
        "Provider send latency in seconds",
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).unwrap();
}

/// Record a finished delivery by outcome.
pub fn record_delivery(outcome: &str) {
    DELIVERIES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    encoder.encode_to_string(&families).unwrap_or_default()
}
