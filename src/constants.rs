// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the PDB operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for the `AvailabilityPolicy` CRD
pub const API_GROUP: &str = "availability.oda.tmforum.org";

/// API version for the `AvailabilityPolicy` CRD
pub const API_VERSION: &str = "v1alpha1";

/// Kind name for `AvailabilityPolicy` resource
pub const KIND_AVAILABILITY_POLICY: &str = "AvailabilityPolicy";

/// Kind name for managed workloads
pub const KIND_DEPLOYMENT: &str = "Deployment";

/// API version of managed workloads
pub const DEPLOYMENT_API_VERSION: &str = "apps/v1";

/// Kind name for `PodDisruptionBudget`
pub const KIND_PDB: &str = "PodDisruptionBudget";

/// Identifier written to the `managed-by` label of every PDB the operator owns
pub const OPERATOR_NAME: &str = "pdb-operator";

// ============================================================================
// Controller Names
// ============================================================================

/// Controller name for the policy-aware workload reconciler
pub const CONTROLLER_WORKLOAD: &str = "workload";

/// Controller name for the availability policy reconciler
pub const CONTROLLER_POLICY: &str = "availabilitypolicy";

/// Controller name for the annotation-only PDB reconciler
pub const CONTROLLER_DIRECT_PDB: &str = "pdb";

// ============================================================================
// PDB Labels
// ============================================================================

/// Standard label for the tool managing the resource
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label carrying the resolved availability class
pub const LABEL_AVAILABILITY_CLASS: &str = "oda.tmforum.org/availability-class";

/// Label carrying the inferred component function
pub const LABEL_COMPONENT_FUNCTION: &str = "oda.tmforum.org/component-function";

/// Label carrying the owning component (workload) name
pub const LABEL_COMPONENT: &str = "oda.tmforum.org/component";

// ============================================================================
// Workload Annotations (consumed)
// ============================================================================

/// Requested availability class
pub const ANNOTATION_AVAILABILITY_CLASS: &str = "oda.tmforum.org/availability-class";

/// Explicit component function (`core`, `management`, `security`)
pub const ANNOTATION_COMPONENT_FUNCTION: &str = "oda.tmforum.org/component-function";

/// Component name used for policy `componentNames` matching
pub const ANNOTATION_COMPONENT_NAME: &str = "oda.tmforum.org/component-name";

/// Maintenance window (`HH:MM-HH:MM TZ`)
pub const ANNOTATION_MAINTENANCE_WINDOW: &str = "oda.tmforum.org/maintenance-window";

/// Free-text justification for overriding a policy
pub const ANNOTATION_OVERRIDE_REASON: &str = "oda.tmforum.org/override-reason";

// ============================================================================
// PDB Annotations (written)
// ============================================================================

/// Operator that created the PDB
pub const ANNOTATION_CREATED_BY: &str = "oda.tmforum.org/created-by";

/// RFC3339 creation time
pub const ANNOTATION_CREATION_TIME: &str = "oda.tmforum.org/creation-time";

/// RFC3339 time of the last operator write
pub const ANNOTATION_LAST_MODIFIED: &str = "oda.tmforum.org/last-modified";

/// Human-readable description of the PDB
pub const ANNOTATION_DESCRIPTION: &str = "oda.tmforum.org/description";

/// Resolution source (`annotation`, `policy-strict`, ...) or policy name
pub const ANNOTATION_POLICY_SOURCE: &str = "oda.tmforum.org/policy-source";

/// Enforcement mode applied when the PDB was synthesized
pub const ANNOTATION_ENFORCEMENT_MODE: &str = "oda.tmforum.org/enforcement-mode";

/// Maintenance-mode annotations that older operator versions wrote on PDBs.
/// They are cleared on every update.
pub const STALE_MAINTENANCE_ANNOTATIONS: &[&str] = &[
    "oda.tmforum.org/maintenance-mode",
    "oda.tmforum.org/maintenance-window-active",
    "oda.tmforum.org/original-min-available",
];

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer placed on workloads with a managed PDB
pub const FINALIZER_PDB_CLEANUP: &str = "pdb-cleanup/finalizer";

/// Finalizer placed on `AvailabilityPolicy` resources
pub const FINALIZER_AVAILABILITY_POLICY: &str = "availabilitypolicy/finalizer";

// ============================================================================
// Availability Defaults
// ============================================================================

/// Minimum replica count for which a PDB is synthesized
pub const MIN_REPLICAS_FOR_PDB: i32 = 2;

/// Default policy priority applied by the defaulter
pub const DEFAULT_POLICY_PRIORITY: i32 = 50;

/// Maximum policy priority
pub const MAX_POLICY_PRIORITY: i32 = 1000;

/// Default unhealthy-pod eviction policy for custom PDBs
pub const DEFAULT_UNHEALTHY_POD_EVICTION_POLICY: &str = "IfHealthyBudget";

/// Default timezone for maintenance windows
pub const DEFAULT_MAINTENANCE_TIMEZONE: &str = "UTC";

// ============================================================================
// Cache Constants
// ============================================================================

/// Cache key under which the full policy list is stored
pub const CACHE_KEY_ALL_POLICIES: &str = "all-policies";

/// Maximum number of single-policy entries kept in the cache
pub const POLICY_CACHE_MAX_ENTRIES: usize = 1024;

/// Time-to-live for cached maintenance-window results (seconds)
pub const MAINTENANCE_WINDOW_CACHE_TTL_SECS: u64 = 60;

// ============================================================================
// Controller Timing Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Periodic policy status refresh (5 minutes)
pub const DEFAULT_POLICY_REQUEUE_SECS: u64 = 300;

/// Requeue delay after adding a finalizer, so the next pass sees the new object
pub const FINALIZER_REQUEUE_SECS: u64 = 1;

/// Default number of concurrent reconcile workers per controller
pub const DEFAULT_RECONCILE_WORKERS: u16 = 3;

/// Default shutdown grace period (seconds)
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Default trace sample rate
pub const DEFAULT_TRACE_SAMPLE_RATE: f64 = 0.1;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Default bind address for the metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Liveness probe path
pub const HEALTHZ_PATH: &str = "/healthz";

/// Readiness probe path
pub const READYZ_PATH: &str = "/readyz";
