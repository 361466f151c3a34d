// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Annotation-only PDB reconciliation, enabled with `ENABLE_PDB=true`.
//!
//! Workloads are managed purely from their `availability-class` annotation and
//! the class defaults table. Policies are never consulted. The pass is the
//! workload reconciler's, so retries, finalizers, events and change detection
//! behave identically.

use crate::context::Context;
use crate::errors::ReconcileError;
use crate::reconcilers::workload::{reconcile, Resolution};
use crate::reconcilers::ReconcileOutcome;
use crate::store::ObjectKey;
use crate::telemetry::ReconcileScope;

/// Reconcile the workload identified by `key` from its annotations alone.
///
/// # Errors
///
/// Returns an error when a store call fails after retries or when the
/// workload's `availability-class` annotation is invalid.
pub async fn reconcile_direct_pdb(
    ctx: &Context,
    key: &ObjectKey,
    scope: &ReconcileScope,
) -> Result<ReconcileOutcome, ReconcileError> {
    reconcile(ctx, key, scope, Resolution::AnnotationOnly).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::OperatorConfig;
    use crate::constants::{ANNOTATION_AVAILABILITY_CLASS, ANNOTATION_COMPONENT_FUNCTION, CONTROLLER_DIRECT_PDB};
    use crate::crd::{AvailabilityClass, AvailabilityPolicy, AvailabilityPolicySpec, ComponentSelector};
    use crate::events::{reasons, MemoryEventRecorder};
    use crate::store::MemoryStore;
    use crate::workload::Workload;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn setup() -> (Arc<MemoryStore>, Arc<MemoryEventRecorder>, Context) {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(MemoryEventRecorder::new());
        let ctx = Context::new(
            store.clone(),
            events.clone(),
            Arc::new(MemoryAuditSink::new()),
            OperatorConfig {
                enable_pdb: true,
                ..OperatorConfig::default()
            },
        );
        (store, events, ctx)
    }

    fn workload(annotations: &[(&str, &str)]) -> Workload {
        Workload {
            namespace: "default".into(),
            name: "gateway".into(),
            replicas: 3,
            selector: LabelSelector {
                match_labels: Some(map(&[("app", "gateway")])),
                ..Default::default()
            },
            labels: map(&[("app", "gateway")]),
            annotations: map(annotations),
            ..Default::default()
        }
    }

    async fn settle(ctx: &Context, key: &ObjectKey) {
        for _ in 0..5 {
            let scope = ReconcileScope::detached(CONTROLLER_DIRECT_PDB, key);
            if !reconcile_direct_pdb(ctx, key, &scope).await.unwrap().requeue {
                return;
            }
        }
        panic!("reconcile kept requeueing");
    }

    #[tokio::test]
    async fn test_security_annotation_uses_defaults_table() {
        let (store, events, ctx) = setup();
        store.apply_workload(workload(&[
            (ANNOTATION_AVAILABILITY_CLASS, "standard"),
            (ANNOTATION_COMPONENT_FUNCTION, "security"),
        ]));
        let key = ObjectKey::new("default", "gateway");
        settle(&ctx, &key).await;

        let pdb = store.pdb(&ObjectKey::new("default", "gateway-pdb")).unwrap();
        assert_eq!(
            pdb.spec.unwrap().min_available,
            Some(IntOrString::String("75%".into()))
        );
        assert!(events.has(reasons::PDB_CREATED));
    }

    #[tokio::test]
    async fn test_policies_are_ignored() {
        let (store, events, ctx) = setup();
        store.apply_policy(AvailabilityPolicy::new(
            "everything",
            AvailabilityPolicySpec {
                availability_class: AvailabilityClass::MissionCritical,
                component_selector: ComponentSelector {
                    match_labels: map(&[("app", "gateway")]),
                    ..Default::default()
                },
                ..Default::default()
            },
        ));
        store.apply_workload(workload(&[]));
        let key = ObjectKey::new("default", "gateway");
        settle(&ctx, &key).await;

        assert!(store.pdbs_in("default").is_empty());
        assert!(events.has(reasons::DEPLOYMENT_UNMANAGED));
    }
}
