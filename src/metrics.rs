// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Store requests (latency, retries) per cluster and operation
//! - Bulk loads (documents accepted and rejected)
//! - Schema creation on the target
//! - Collection outcomes and pass totals
//! - Drift verification findings
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! No exporter is installed here; the embedding process picks one.
//!
//! # Usage
//!
//! ```rust,no_run
//! use index_replicator::metrics;
//! use std::time::Duration;
//!
//! metrics::record_store_request("source", "count", Duration::from_millis(12), true);
//! metrics::set_engine_state("Running");
//! ```

use crate::coordinator::{CollectionReport, PassSummary};
use crate::loader::BatchResult;
use crate::verify::VerificationReport;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Store Client Metrics
// =============================================================================

/// Record one store request, after its retries.
pub fn record_store_request(cluster: &str, operation: &str, duration: Duration, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replication_store_requests_total",
        "cluster" => cluster.to_string(),
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "replication_store_request_duration_seconds",
        "cluster" => cluster.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a retried store request attempt.
pub fn record_store_retry(operation: &str) {
    counter!("replication_store_retries_total", "operation" => operation.to_string()).increment(1);
}

// =============================================================================
// Loading Metrics
// =============================================================================

/// Record one bulk load.
pub fn record_batch_load(collection: &str, result: &BatchResult, duration: Duration) {
    let collection = collection.to_string();

    counter!("replication_documents_loaded_total", "collection" => collection.clone())
        .increment(result.success);
    if result.failed > 0 {
        counter!("replication_documents_failed_total", "collection" => collection.clone())
            .increment(result.failed);
    }
    histogram!("replication_batch_load_duration_seconds", "collection" => collection.clone())
        .record(duration.as_secs_f64());
    histogram!("replication_batch_size", "collection" => collection).record(result.total as f64);
}

/// Record a target collection creation attempt.
pub fn record_schema_created(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replication_schema_creations_total", "status" => status).increment(1);
}

// =============================================================================
// Coordinator Metrics
// =============================================================================

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Encoded as a number for alerting.
    let value = match state {
        "Created" => 0.0,
        "Connecting" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("replication_engine_state").set(value);
}

/// Record the final state of one collection.
pub fn record_collection_outcome(report: &CollectionReport) {
    counter!(
        "replication_collections_total",
        "state" => report.state.as_str()
    )
    .increment(1);
    histogram!(
        "replication_collection_duration_seconds",
        "collection" => report.name.clone()
    )
    .record(report.duration.as_secs_f64());
}

/// Record totals of a finished pass.
pub fn record_pass(summary: &PassSummary) {
    let status = if summary.interrupted { "interrupted" } else { "complete" };
    counter!("replication_passes_total", "status" => status).increment(1);
    histogram!("replication_pass_duration_seconds").record(summary.duration.as_secs_f64());
    gauge!("replication_pass_documents_processed").set(summary.stats.processed as f64);
    gauge!("replication_pass_documents_failed").set(summary.stats.failed as f64);
    gauge!("replication_pass_failed_collections").set(summary.failed_count() as f64);
}

// =============================================================================
// Verification Metrics
// =============================================================================

/// Record a verification run.
pub fn record_verification(report: &VerificationReport) {
    counter!("replication_verify_runs_total").increment(1);
    counter!("replication_verify_documents_checked_total").increment(report.checked);
    gauge!("replication_verify_mismatches").set(report.mismatches as f64);
    gauge!("replication_verify_missing_collections").set(report.missing_indices as f64);
    gauge!("replication_verify_count_mismatches").set(report.count_mismatches as f64);
    gauge!("replication_verify_content_mismatches").set(report.content_mismatches as f64);
    if report.errors > 0 {
        counter!("replication_verify_errors_total").increment(report.errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{CollectionState, ReplicationStats};

    // The metrics crate uses global state. With no recorder installed these
    // are no-ops; the tests check edge-case inputs do not panic.

    #[test]
    fn test_record_store_request() {
        record_store_request("source", "count", Duration::from_millis(5), true);
        record_store_request("target", "bulk", Duration::ZERO, false);
        record_store_request("", "", Duration::from_secs(300), true);
    }

    #[test]
    fn test_record_store_retry() {
        record_store_retry("scroll");
        record_store_retry("");
    }

    #[test]
    fn test_record_batch_load() {
        let partial = BatchResult { total: 10, success: 9, failed: 1 };
        record_batch_load("logs", &partial, Duration::from_millis(40));
        record_batch_load("logs", &BatchResult::default(), Duration::ZERO);
    }

    #[test]
    fn test_record_schema_created() {
        record_schema_created(true);
        record_schema_created(false);
    }

    #[test]
    fn test_set_engine_state() {
        for state in ["Created", "Connecting", "Running", "ShuttingDown", "Stopped", "Failed", "bogus"] {
            set_engine_state(state);
        }
    }

    #[test]
    fn test_record_collection_and_pass() {
        let report = CollectionReport {
            name: "logs".to_string(),
            state: CollectionState::Done,
            stats: ReplicationStats { processed: 3, updated: 3, failed: 0 },
            timestamp_field: None,
            source_count: 3,
            error: None,
            duration: Duration::from_millis(7),
        };
        record_collection_outcome(&report);
        record_pass(&PassSummary {
            collections: vec![report],
            ..Default::default()
        });
        record_pass(&PassSummary {
            interrupted: true,
            ..Default::default()
        });
    }

    #[test]
    fn test_record_verification() {
        record_verification(&VerificationReport::default());
        record_verification(&VerificationReport {
            checked: 99,
            mismatches: 1,
            content_mismatches: 1,
            errors: 1,
            ..Default::default()
        });
    }
}
