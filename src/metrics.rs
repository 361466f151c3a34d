// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the PDB operator.
//!
//! All metrics share the namespace prefix `pdb_operator_`.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Outcomes and durations per controller
//! - **PDB Lifecycle Metrics** - PDB creations, updates and deletions per namespace
//! - **Enforcement Metrics** - Override attempts, enforcement decisions, policy ties
//! - **Compliance Metrics** - Per-workload compliance state
//! - **Cache Metrics** - Policy cache hits and misses
//!
//! # Example
//!
//! ```rust,no_run
//! use pdb_operator::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("workload", std::time::Duration::from_millis(40));
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all operator metrics
const METRICS_NAMESPACE: &str = "pdb_operator";

/// Compliance states a workload can be in. Exactly one is set to 1 at a time.
pub const COMPLIANCE_STATES: &[&str] = &[
    "managed",
    "insufficient_replicas",
    "creation_failed",
    "update_failed",
    "deleted",
    "unmanaged",
];

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliations by controller and result
///
/// Labels:
/// - `controller`: `workload`, `availabilitypolicy` or `pdb`
/// - `result`: `success`, `error` or `requeue`
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by controller and result",
    );
    let counter = CounterVec::new(opts, &["controller", "result"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by controller",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = HistogramVec::new(opts, &["controller"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// PDB Lifecycle Metrics
// ============================================================================

/// Total number of PDBs created by namespace
pub static PDBS_CREATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_pdbs_created_total"),
        "Total number of PodDisruptionBudgets created by namespace",
    );
    let counter = CounterVec::new(opts, &["namespace"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of PDBs updated by namespace
pub static PDBS_UPDATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_pdbs_updated_total"),
        "Total number of PodDisruptionBudgets updated by namespace",
    );
    let counter = CounterVec::new(opts, &["namespace"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of PDBs deleted by namespace
pub static PDBS_DELETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_pdbs_deleted_total"),
        "Total number of PodDisruptionBudgets deleted by namespace",
    );
    let counter = CounterVec::new(opts, &["namespace"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Enforcement Metrics
// ============================================================================

/// Annotation override attempts against a matching policy
///
/// Labels:
/// - `outcome`: `accepted`, `blocked`, `below_minimum`, `requires_annotation`,
///   `requires_reason`, `disallowed`
pub static OVERRIDE_ATTEMPTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_override_attempts_total"),
        "Annotation override attempts by outcome",
    );
    let counter = CounterVec::new(opts, &["outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Enforcement decisions by mode and outcome
///
/// Labels:
/// - `mode`: `strict`, `flexible`, `advisory` or `none`
/// - `outcome`: `policy` or `annotation`
pub static ENFORCEMENT_DECISIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_enforcement_decisions_total"),
        "Enforcement decisions by mode and outcome",
    );
    let counter = CounterVec::new(opts, &["mode", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Workloads matched by more than one policy
pub static MULTI_POLICY_MATCHES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        format!("{METRICS_NAMESPACE}_multi_policy_matches_total"),
        "Number of times a workload matched more than one policy",
    )
    .unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Selections decided by the `namespace/name` tie-break
pub static POLICY_TIEBREAKS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        format!("{METRICS_NAMESPACE}_policy_tiebreaks_total"),
        "Number of policy selections decided by name tie-break at equal priority",
    )
    .unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Active policies per namespace they apply to (`*` for cluster-wide policies)
pub static ACTIVE_POLICIES: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_active_policies"),
        "Number of active availability policies by namespace",
    );
    let gauge = GaugeVec::new(opts, &["namespace"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Compliance Metrics
// ============================================================================

/// Compliance status per workload (1 for the current status, 0 otherwise)
pub static COMPLIANCE_STATUS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_compliance_status"),
        "PDB compliance status per workload",
    );
    let gauge = GaugeVec::new(opts, &["namespace", "workload", "status"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Cache and Store Metrics
// ============================================================================

/// Policy cache hits by lookup kind (`policy`, `list`, `maintenance`)
pub static POLICY_CACHE_HITS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_policy_cache_hits_total"),
        "Policy cache hits by lookup kind",
    );
    let counter = CounterVec::new(opts, &["kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Policy cache misses by lookup kind
pub static POLICY_CACHE_MISSES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_policy_cache_misses_total"),
        "Policy cache misses by lookup kind",
    );
    let counter = CounterVec::new(opts, &["kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// In-process retries of object-store calls
pub static STORE_RETRIES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_store_retries_total"),
        "Object store calls retried after a transient failure, by operation",
    );
    let counter = CounterVec::new(opts, &["operation"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful reconciliation
pub fn record_reconciliation_success(controller: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[controller, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[controller])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
pub fn record_reconciliation_error(controller: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[controller, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[controller])
        .observe(duration.as_secs_f64());
}

/// Record a reconciliation that asked for an immediate requeue
pub fn record_reconciliation_requeue(controller: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[controller, "requeue"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[controller])
        .observe(duration.as_secs_f64());
}

pub fn record_pdb_created(namespace: &str) {
    PDBS_CREATED_TOTAL.with_label_values(&[namespace]).inc();
}

pub fn record_pdb_updated(namespace: &str) {
    PDBS_UPDATED_TOTAL.with_label_values(&[namespace]).inc();
}

pub fn record_pdb_deleted(namespace: &str) {
    PDBS_DELETED_TOTAL.with_label_values(&[namespace]).inc();
}

pub fn record_override_attempt(outcome: &str) {
    OVERRIDE_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_enforcement_decision(mode: &str, outcome: &str) {
    ENFORCEMENT_DECISIONS_TOTAL
        .with_label_values(&[mode, outcome])
        .inc();
}

pub fn record_multi_policy_match() {
    MULTI_POLICY_MATCHES_TOTAL.inc();
}

pub fn record_policy_tiebreak() {
    POLICY_TIEBREAKS_TOTAL.inc();
}

pub fn set_active_policies(namespace: &str, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    ACTIVE_POLICIES
        .with_label_values(&[namespace])
        .set(count as f64);
}

/// Zero every namespace of the active-policies gauge before recounting.
pub fn reset_active_policies() {
    ACTIVE_POLICIES.reset();
}

/// Set the compliance status of a workload.
///
/// The gauge for `status` is set to 1 and every other known state for the same
/// workload is reset to 0, so dashboards can sum by `status`.
pub fn set_compliance_status(namespace: &str, workload: &str, status: &str) {
    for state in COMPLIANCE_STATES {
        let value = if *state == status { 1.0 } else { 0.0 };
        COMPLIANCE_STATUS
            .with_label_values(&[namespace, workload, state])
            .set(value);
    }
}

pub fn record_cache_hit(kind: &str) {
    POLICY_CACHE_HITS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_cache_miss(kind: &str) {
    POLICY_CACHE_MISSES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_store_retry(operation: &str) {
    STORE_RETRIES_TOTAL.with_label_values(&[operation]).inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reconciliation_success() {
        let controller = "metrics-test-success";
        record_reconciliation_success(controller, Duration::from_millis(500));

        let counter = RECONCILIATION_TOTAL.with_label_values(&[controller, "success"]);
        assert!(counter.get() >= 1.0);
    }

    #[test]
    fn test_compliance_status_is_exclusive() {
        set_compliance_status("metrics-test", "app", "managed");
        set_compliance_status("metrics-test", "app", "insufficient_replicas");

        #[allow(clippy::float_cmp)]
        {
            assert_eq!(
                COMPLIANCE_STATUS
                    .with_label_values(&["metrics-test", "app", "insufficient_replicas"])
                    .get(),
                1.0
            );
            assert_eq!(
                COMPLIANCE_STATUS
                    .with_label_values(&["metrics-test", "app", "managed"])
                    .get(),
                0.0
            );
        }
    }

    #[test]
    fn test_gather_metrics_contains_prefix() {
        record_pdb_created("metrics-test-ns");
        let text = gather_metrics().unwrap();
        assert!(text.contains("pdb_operator_pdbs_created_total"));
    }
}
