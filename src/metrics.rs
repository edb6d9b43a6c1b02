//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Upstream API requests
//! - Reconciliation outcomes per record
//! - Local entity writes
//! - Job dispatch and completion
//! - Completion tracker polling
//! - Run lifecycle
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replica_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use replica_engine::metrics;
//! use std::time::Duration;
//!
//! metrics::record_upstream_request("file", "list_distributions", true, Duration::from_millis(80));
//! metrics::record_record_outcome("file", "reconciled");
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Upstream
// =============================================================================

/// Record one upstream API request.
pub fn record_upstream_request(backend: &str, operation: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replica_upstream_requests_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "replica_upstream_request_duration_seconds",
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record how many distributions a backend listing returned.
pub fn record_upstream_listing(backend: &str, count: usize) {
    gauge!("replica_upstream_distributions", "backend" => backend.to_string()).set(count as f64);
}

/// Record a listing that hit the page size (catalog possibly truncated).
pub fn record_listing_truncated(backend: &str) {
    counter!("replica_upstream_listing_truncated_total", "backend" => backend.to_string()).increment(1);
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Record the outcome of reconciling one upstream record.
///
/// Outcomes: `reconciled`, `disarmed`, `no_content`, `failed`.
pub fn record_record_outcome(backend: &str, outcome: &str) {
    counter!(
        "replica_records_total",
        "backend" => backend.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a local entity write (`remote` / `repository`, `create` / `update`).
pub fn record_entity_write(kind: &str, action: &str) {
    counter!(
        "replica_entity_writes_total",
        "kind" => kind.to_string(),
        "action" => action.to_string()
    )
    .increment(1);
}

/// Record a create that lost a uniqueness race and was retried as an update.
pub fn record_conflict_retry(kind: &str) {
    counter!("replica_conflict_retries_total", "kind" => kind.to_string()).increment(1);
}

/// Record a SQLite busy retry in the entity store.
pub fn record_store_retry(operation: &str) {
    counter!("replica_store_busy_retries_total", "operation" => operation.to_string()).increment(1);
}

// =============================================================================
// Jobs
// =============================================================================

/// Record a dispatched job by function name.
pub fn record_job_dispatch(function: &str) {
    counter!("replica_jobs_dispatched_total", "function" => function.to_string()).increment(1);
}

/// Record a job reaching a final state.
pub fn record_job_final(function: &str, state: &str) {
    counter!(
        "replica_jobs_final_total",
        "function" => function.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record one tracker poll cycle.
pub fn record_poll_cycle(pending: usize, resolved: usize, duration: Duration) {
    counter!("replica_tracker_polls_total").increment(1);
    gauge!("replica_tracker_pending_jobs").set(pending.saturating_sub(resolved) as f64);
    histogram!("replica_tracker_poll_duration_seconds").record(duration.as_secs_f64());
}

/// Record a failed job state query.
pub fn record_poll_error() {
    counter!("replica_tracker_poll_errors_total").increment(1);
}

/// Record a finished batch.
pub fn record_batch_finished(jobs: usize, failed: usize, abandoned: usize, duration: Duration) {
    counter!("replica_batches_finished_total").increment(1);
    histogram!("replica_batch_jobs").record(jobs as f64);
    if failed > 0 {
        counter!("replica_batch_failed_jobs_total").increment(failed as u64);
    }
    if abandoned > 0 {
        counter!("replica_batch_abandoned_jobs_total").increment(abandoned as u64);
    }
    histogram!("replica_batch_duration_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Run lifecycle
// =============================================================================

/// Gauge for run state.
pub fn set_run_state(state: &str) {
    let value = match state {
        "Created" => 0.0,
        "Reconciling" => 1.0,
        "Tracking" => 2.0,
        "Finished" => 3.0,
        "Failed" => 4.0,
        _ => -1.0,
    };
    gauge!("replica_run_state").set(value);
}

/// Record a finished reconciliation pass.
pub fn record_run_complete(records: usize, failed: usize, jobs: usize, duration: Duration) {
    counter!("replica_runs_total").increment(1);
    counter!("replica_run_records_total").increment(records as u64);
    if failed > 0 {
        counter!("replica_run_failed_records_total").increment(failed as u64);
    }
    histogram!("replica_run_jobs").record(jobs as f64);
    histogram!("replica_run_duration_seconds").record(duration.as_secs_f64());
}

/// Record errors by class.
pub fn record_error(backend: &str, class: &str) {
    counter!(
        "replica_errors_total",
        "backend" => backend.to_string(),
        "class" => class.to_string()
    )
    .increment(1);
}

// =============================================================================
// Circuit Breaker
// =============================================================================

/// Record circuit breaker call outcome.
pub fn record_circuit_call(circuit_name: &str, outcome: &str) {
    counter!(
        "replica_circuit_calls_total",
        "circuit" => circuit_name.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
