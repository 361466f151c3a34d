// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator configuration.
//!
//! Every setting can be passed as a command-line flag or through the
//! environment variable named next to it.

use crate::constants::{
    DEFAULT_POLICY_REQUEUE_SECS, DEFAULT_RECONCILE_WORKERS, DEFAULT_SHUTDOWN_GRACE_SECS,
    DEFAULT_TRACE_SAMPLE_RATE, METRICS_SERVER_BIND_ADDRESS,
};
use clap::Parser;
use std::time::Duration;

/// Runtime configuration of the operator.
#[derive(Parser, Clone, Debug, PartialEq)]
#[command(name = "pdb-operator", version, about = "PodDisruptionBudget operator driven by availability policies")]
pub struct OperatorConfig {
    /// Run the annotation-only PDB reconciler instead of the policy-aware one
    #[arg(long, env = "ENABLE_PDB", default_value_t = false)]
    pub enable_pdb: bool,

    /// Namespace the operator runs in
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub pod_namespace: String,

    /// Version reported in logs and events
    #[arg(long, env = "OPERATOR_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub operator_version: String,

    /// Jaeger collector endpoint
    #[arg(long, env = "JAEGER_ENDPOINT")]
    pub jaeger_endpoint: Option<String>,

    /// OTLP collector endpoint
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Fraction of reconciles to trace, clamped to [0, 1]
    #[arg(long, env = "TRACE_SAMPLE_RATE", default_value_t = DEFAULT_TRACE_SAMPLE_RATE)]
    pub trace_sample_rate: f64,

    /// Periodic policy status refresh interval in seconds
    #[arg(long, env = "REQUEUE_INTERVAL_SECONDS", default_value_t = DEFAULT_POLICY_REQUEUE_SECS)]
    pub requeue_interval_seconds: u64,

    /// Concurrent reconciles per controller
    #[arg(long, env = "RECONCILE_WORKERS", default_value_t = DEFAULT_RECONCILE_WORKERS)]
    pub reconcile_workers: u16,

    /// Infer component functions from the annotation only, never from the workload name
    #[arg(long, env = "STRICT_FUNCTION_INFERENCE", default_value_t = false)]
    pub strict_function_inference: bool,

    /// Bind address of the metrics and health server
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = METRICS_SERVER_BIND_ADDRESS)]
    pub metrics_bind_address: String,

    /// Seconds to wait for in-flight reconciles on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_SECONDS", default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS)]
    pub shutdown_grace_seconds: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            enable_pdb: false,
            pod_namespace: "default".to_string(),
            operator_version: env!("CARGO_PKG_VERSION").to_string(),
            jaeger_endpoint: None,
            otlp_endpoint: None,
            trace_sample_rate: DEFAULT_TRACE_SAMPLE_RATE,
            requeue_interval_seconds: DEFAULT_POLICY_REQUEUE_SECS,
            reconcile_workers: DEFAULT_RECONCILE_WORKERS,
            strict_function_inference: false,
            metrics_bind_address: METRICS_SERVER_BIND_ADDRESS.to_string(),
            shutdown_grace_seconds: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

impl OperatorConfig {
    /// Sample rate clamped to `[0, 1]`. Non-finite input falls back to the default.
    #[must_use]
    pub fn sample_rate(&self) -> f64 {
        if self.trace_sample_rate.is_finite() {
            self.trace_sample_rate.clamp(0.0, 1.0)
        } else {
            DEFAULT_TRACE_SAMPLE_RATE
        }
    }

    #[must_use]
    pub fn policy_requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_seconds.max(1))
    }

    #[must_use]
    pub fn workers(&self) -> u16 {
        self.reconcile_workers.max(1)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// The configured tracing collector, OTLP taking precedence over Jaeger.
    #[must_use]
    pub fn tracing_endpoint(&self) -> Option<&str> {
        self.otlp_endpoint
            .as_deref()
            .or(self.jaeger_endpoint.as_deref())
            .filter(|endpoint| !endpoint.is_empty())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
