// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers.
//!
//! Every reconciler receives an `Arc<Context>` holding:
//! - the object store (Kubernetes API in production, memory in tests)
//! - the event recorder and audit sink
//! - the policy cache and the per-workload fingerprint map
//! - the operator configuration
//! - the process shutdown token every reconcile scope derives from
//!
//! Nothing here is a global: tests build independent contexts with
//! [`Context::new`].

use crate::audit::{AuditSink, TracingAuditSink};
use crate::cache::PolicyCache;
use crate::config::OperatorConfig;
use crate::constants::OPERATOR_NAME;
use crate::events::{EventRecorder, KubeEventRecorder};
use crate::fingerprint::DeploymentState;
use crate::store::{KubeStore, ObjectKey, ObjectStore};
use crate::telemetry::ReconcileScope;
use kube::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Source of truth for workloads, PDBs and policies
    pub store: Arc<dyn ObjectStore>,

    /// Kubernetes event publisher
    pub events: Arc<dyn EventRecorder>,

    /// Audit record destination
    pub audit: Arc<dyn AuditSink>,

    /// Policy cache shared by the workload and policy controllers
    pub cache: Arc<PolicyCache>,

    /// Last applied fingerprint per workload
    pub deployment_state: Arc<DeploymentState>,

    pub config: OperatorConfig,

    /// Cancelled on shutdown
    pub shutdown: CancellationToken,
}

impl Context {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventRecorder>,
        audit: Arc<dyn AuditSink>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            events,
            audit,
            cache: Arc::new(PolicyCache::new()),
            deployment_state: Arc::new(DeploymentState::new()),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Context backed by the Kubernetes API.
    #[must_use]
    pub fn for_kube(client: Client, config: OperatorConfig) -> Self {
        let instance = Some(format!("{OPERATOR_NAME}-{}", config.operator_version));
        Self::new(
            Arc::new(KubeStore::new(client.clone())),
            Arc::new(KubeEventRecorder::new(client, OPERATOR_NAME, instance)),
            Arc::new(TracingAuditSink),
            config,
        )
    }

    /// Open a reconcile scope bound to the shutdown token.
    #[must_use]
    pub fn scope(
        &self,
        controller: &'static str,
        key: &ObjectKey,
        correlation_id: Option<&str>,
    ) -> ReconcileScope {
        ReconcileScope::new(controller, key, correlation_id, &self.shutdown)
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
