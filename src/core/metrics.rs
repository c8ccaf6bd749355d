//! Metrics collection for the generation pipeline using Prometheus
//!
//! Tracks queue pressure, in-flight work, outcomes, retries, and refunds.
//! The registry is process-global; counters are incremented from the hot
//! path and scraped out-of-band.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Gauge,
};

lazy_static! {
    /// Current number of jobs waiting in the queue
    pub static ref QUEUE_DEPTH: Gauge = register_gauge!(
        "lumora_queue_depth",
        "Number of generation jobs currently queued"
    )
    .unwrap();

    /// Jobs currently past admission (holding a generation permit)
    pub static ref JOBS_IN_FLIGHT: Gauge = register_gauge!(
        "lumora_jobs_in_flight",
        "Number of generation jobs currently executing"
    )
    .unwrap();

    /// Rejected submissions by reason
    /// Labels: reason (queue_full/cooldown/no_model/balance/invalid)
    pub static ref SUBMISSIONS_REJECTED_TOTAL: CounterVec = register_counter_vec!(
        "lumora_submissions_rejected_total",
        "Total number of rejected generation submissions",
        &["reason"]
    )
    .unwrap();

    /// Completed generations by kind
    /// Labels: kind (avatar_image/reference_image/video)
    pub static ref GENERATION_SUCCESS_TOTAL: CounterVec = register_counter_vec!(
        "lumora_generation_success_total",
        "Total number of successfully delivered generations",
        &["kind"]
    )
    .unwrap();

    /// Failed generations by kind and stage
    /// Labels: kind, stage (provider/fetch/ledger)
    pub static ref GENERATION_FAILURE_TOTAL: CounterVec = register_counter_vec!(
        "lumora_generation_failure_total",
        "Total number of failed generations",
        &["kind", "stage"]
    )
    .unwrap();

    /// Retry attempts against external services
    /// Labels: attempt (1/2/3/...)
    pub static ref RETRY_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "lumora_retry_attempts_total",
        "Total number of retry attempts by attempt number",
        &["attempt"]
    )
    .unwrap();

    /// Compensating credits issued after post-debit failures
    pub static ref REFUNDS_TOTAL: Counter = register_counter!(
        "lumora_refunds_total",
        "Total number of compensating balance credits"
    )
    .unwrap();
}

/// Updates the queue depth gauge after a submit or dequeue.
pub fn update_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as f64);
}
