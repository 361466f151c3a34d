// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common test utilities for scenario tests
//!
//! Every scenario runs the real reconcilers against the in-memory object store,
//! event recorder and audit sink.

#![allow(dead_code)]

use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use pdb_operator::audit::MemoryAuditSink;
use pdb_operator::config::OperatorConfig;
use pdb_operator::constants::{CONTROLLER_POLICY, CONTROLLER_WORKLOAD};
use pdb_operator::context::Context;
use pdb_operator::crd::{
    AvailabilityClass, AvailabilityPolicy, AvailabilityPolicySpec, ComponentSelector,
    EnforcementMode,
};
use pdb_operator::errors::ReconcileError;
use pdb_operator::events::MemoryEventRecorder;
use pdb_operator::reconcilers::{reconcile_policy, reconcile_workload, ReconcileOutcome};
use pdb_operator::store::{MemoryStore, ObjectKey};
use pdb_operator::telemetry::ReconcileScope;
use pdb_operator::workload::Workload;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reconcile passes allowed before a workload is considered stuck.
const MAX_SETTLE_PASSES: usize = 5;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub events: Arc<MemoryEventRecorder>,
    pub audit: Arc<MemoryAuditSink>,
    pub ctx: Context,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OperatorConfig::default())
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(MemoryEventRecorder::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let ctx = Context::new(store.clone(), events.clone(), audit.clone(), config);
        Self {
            store,
            events,
            audit,
            ctx,
        }
    }

    /// One workload reconcile pass.
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let key = ObjectKey::new(namespace, name);
        let scope = ReconcileScope::detached(CONTROLLER_WORKLOAD, &key);
        reconcile_workload(&self.ctx, &key, &scope).await
    }

    /// Reconcile a workload until it stops asking for an immediate requeue.
    pub async fn settle(&self, namespace: &str, name: &str) {
        for _ in 0..MAX_SETTLE_PASSES {
            let outcome = self
                .reconcile(namespace, name)
                .await
                .unwrap_or_else(|e| panic!("reconcile of {namespace}/{name} failed: {e}"));
            if !outcome.requeue {
                return;
            }
        }
        panic!("{namespace}/{name} kept requeueing");
    }

    pub async fn reconcile_policy(&self, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let scope = ReconcileScope::detached(CONTROLLER_POLICY, &ObjectKey::cluster(name));
        reconcile_policy(&self.ctx, name, &scope).await
    }

    /// Mutate a stored workload the way `kubectl edit` would.
    pub fn edit_workload(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut Workload)) {
        let key = ObjectKey::new(namespace, name);
        let mut workload = self
            .store
            .workload(&key)
            .unwrap_or_else(|| panic!("workload {key} not found"));
        edit(&mut workload);
        self.store.apply_workload(workload);
    }

    /// The canonical PDB of a workload.
    pub fn pdb(&self, namespace: &str, workload: &str) -> Option<PodDisruptionBudget> {
        self.store
            .pdb(&ObjectKey::new(namespace, &format!("{workload}-pdb")))
    }

    pub fn min_available(&self, namespace: &str, workload: &str) -> Option<IntOrString> {
        self.pdb(namespace, workload)
            .and_then(|pdb| pdb.spec)
            .and_then(|spec| spec.min_available)
    }
}

pub fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

pub fn percent(value: &str) -> Option<IntOrString> {
    Some(IntOrString::String(value.to_string()))
}

/// A workload selecting pods by `app=<name>` plus `labels`.
pub fn workload(
    namespace: &str,
    name: &str,
    replicas: i32,
    labels: &[(&str, &str)],
    annotations: &[(&str, &str)],
) -> Workload {
    let mut all_labels = map(labels);
    all_labels.insert("app".to_string(), name.to_string());
    Workload {
        namespace: namespace.to_string(),
        name: name.to_string(),
        replicas,
        selector: LabelSelector {
            match_labels: Some(map(&[("app", name)])),
            ..Default::default()
        },
        labels: all_labels,
        annotations: map(annotations),
        ..Default::default()
    }
}

/// A policy selecting workloads by `match_labels`.
pub fn policy(
    name: &str,
    class: AvailabilityClass,
    enforcement: EnforcementMode,
    match_labels: &[(&str, &str)],
) -> AvailabilityPolicy {
    AvailabilityPolicy::new(
        name,
        AvailabilityPolicySpec {
            availability_class: class,
            enforcement: Some(enforcement),
            component_selector: ComponentSelector {
                match_labels: map(match_labels),
                ..Default::default()
            },
            ..Default::default()
        },
    )
}
