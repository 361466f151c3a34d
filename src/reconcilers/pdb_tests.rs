// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `pdb.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        build_pdb, can_adopt, delete_owned_pdb, diff_patch, is_owned_by, pdb_key, reconcile_pdb,
        PdbAction,
    };
    use crate::audit::{actions as audit_actions, MemoryAuditSink, RESULT_FAILURE};
    use crate::availability::{config_from_annotations, AvailabilityConfig};
    use crate::config::OperatorConfig;
    use crate::constants::{
        ANNOTATION_AVAILABILITY_CLASS, ANNOTATION_ENFORCEMENT_MODE, ANNOTATION_LAST_MODIFIED,
        ANNOTATION_POLICY_SOURCE, CONTROLLER_WORKLOAD, LABEL_AVAILABILITY_CLASS,
        LABEL_COMPONENT_FUNCTION, LABEL_MANAGED_BY, OPERATOR_NAME,
    };
    use crate::context::Context;
    use crate::crd::ComponentFunction;
    use crate::events::{reasons, MemoryEventRecorder};
    use crate::store::memory::Operation;
    use crate::store::{MemoryStore, ObjectKey, StoreError};
    use crate::telemetry::ReconcileScope;
    use crate::workload::Workload;
    use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
        LabelSelector, ObjectMeta, OwnerReference,
    };
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct Harness {
        store: Arc<MemoryStore>,
        events: Arc<MemoryEventRecorder>,
        audit: Arc<MemoryAuditSink>,
        ctx: Context,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(MemoryEventRecorder::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let ctx = Context::new(
            store.clone(),
            events.clone(),
            audit.clone(),
            OperatorConfig::default(),
        );
        Harness {
            store,
            events,
            audit,
            ctx,
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn workload(class: &str) -> Workload {
        Workload {
            namespace: "default".into(),
            name: "my-app".into(),
            uid: "uid-my-app".into(),
            replicas: 3,
            selector: LabelSelector {
                match_labels: Some(labels(&[("app", "my-app")])),
                ..Default::default()
            },
            annotations: labels(&[(ANNOTATION_AVAILABILITY_CLASS, class)]),
            generation: 1,
            ..Default::default()
        }
    }

    fn config(workload: &Workload) -> AvailabilityConfig {
        config_from_annotations(workload, &ComponentFunction::Core)
            .unwrap()
            .unwrap()
    }

    fn scope() -> ReconcileScope {
        ReconcileScope::detached(CONTROLLER_WORKLOAD, &ObjectKey::new("default", "my-app"))
    }

    fn foreign_pdb(name: &str, selector: &[(&str, &str)]) -> PodDisruptionBudget {
        PodDisruptionBudget {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            spec: Some(PodDisruptionBudgetSpec {
                min_available: Some(IntOrString::Int(1)),
                selector: Some(LabelSelector {
                    match_labels: Some(labels(selector)),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn test_build_pdb_metadata_and_spec() {
        let w = workload("high-availability");
        let pdb = build_pdb(&w, &config(&w), "2025-01-01T00:00:00+00:00");

        assert_eq!(pdb.metadata.name.as_deref(), Some("my-app-pdb"));
        assert_eq!(pdb.metadata.namespace.as_deref(), Some("default"));

        let spec = pdb.spec.clone().unwrap();
        assert_eq!(spec.min_available, Some(IntOrString::String("75%".into())));
        assert_eq!(spec.selector, Some(w.selector.clone()));
        assert!(spec.max_unavailable.is_none());

        let pdb_labels = pdb.metadata.labels.clone().unwrap();
        assert_eq!(pdb_labels[LABEL_MANAGED_BY], OPERATOR_NAME);
        assert_eq!(pdb_labels[LABEL_AVAILABILITY_CLASS], "high-availability");
        assert_eq!(pdb_labels[LABEL_COMPONENT_FUNCTION], "core");

        let annotations = pdb.metadata.annotations.clone().unwrap();
        assert_eq!(annotations[ANNOTATION_POLICY_SOURCE], "annotation");
        assert_eq!(annotations[ANNOTATION_ENFORCEMENT_MODE], "none");
        assert_eq!(annotations[ANNOTATION_LAST_MODIFIED], "2025-01-01T00:00:00+00:00");

        let owners = pdb.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, "uid-my-app");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn test_diff_patch_ignores_timestamps() {
        let w = workload("standard");
        let c = config(&w);
        let existing = build_pdb(&w, &c, "2025-01-01T00:00:00+00:00");
        let desired = build_pdb(&w, &c, "2025-06-01T00:00:00+00:00");
        assert!(diff_patch(&existing, &desired, "2025-06-01T00:00:00+00:00").is_none());
    }

    #[test]
    fn test_diff_patch_updates_min_available_and_clears_stale_annotations() {
        let w = workload("standard");
        let mut existing = build_pdb(&w, &config(&w), "2025-01-01T00:00:00+00:00");
        existing
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert("oda.tmforum.org/maintenance-mode".into(), "true".into());
        if let Some(spec) = existing.spec.as_mut() {
            spec.max_unavailable = Some(IntOrString::Int(1));
        }

        let upgraded = workload("high-availability");
        let desired = build_pdb(&upgraded, &config(&upgraded), "now");
        let patch = diff_patch(&existing, &desired, "now").unwrap();

        assert_eq!(patch["spec"]["minAvailable"], json!("75%"));
        assert_eq!(patch["spec"]["maxUnavailable"], Value::Null);
        assert!(patch["spec"].get("selector").is_none());
        assert_eq!(
            patch["metadata"]["annotations"]["oda.tmforum.org/maintenance-mode"],
            Value::Null
        );
        assert_eq!(
            patch["metadata"]["annotations"][ANNOTATION_LAST_MODIFIED],
            json!("now")
        );
        assert_eq!(
            patch["metadata"]["labels"][LABEL_AVAILABILITY_CLASS],
            json!("high-availability")
        );
    }

    #[test]
    fn test_diff_patch_replaces_selector_labels() {
        let w = workload("standard");
        let c = config(&w);
        let mut existing = build_pdb(&w, &c, "t0");
        if let Some(spec) = existing.spec.as_mut() {
            spec.selector = Some(LabelSelector {
                match_labels: Some(labels(&[("app", "old"), ("tier", "web")])),
                ..Default::default()
            });
        }

        let desired = build_pdb(&w, &c, "t1");
        let patch = diff_patch(&existing, &desired, "t1").unwrap();
        assert_eq!(
            patch["spec"]["selector"]["matchLabels"],
            json!({"app": "my-app", "tier": null})
        );
        assert_eq!(patch["spec"]["selector"]["matchExpressions"], Value::Null);
    }

    #[test]
    fn test_diff_patch_adopts_orphan() {
        let w = workload("standard");
        let c = config(&w);
        let mut existing = build_pdb(&w, &c, "t0");
        existing.metadata.owner_references = None;

        let patch = diff_patch(&existing, &build_pdb(&w, &c, "t1"), "t1").unwrap();
        assert_eq!(patch["metadata"]["ownerReferences"][0]["uid"], json!("uid-my-app"));
    }

    #[test]
    fn test_ownership_rules() {
        let w = workload("standard");
        let ours = build_pdb(&w, &config(&w), "t0");
        assert!(is_owned_by(&ours, &w));
        assert!(can_adopt(&ours, &w));

        let mut orphan = ours.clone();
        orphan.metadata.owner_references = None;
        assert!(!is_owned_by(&orphan, &w));
        assert!(can_adopt(&orphan, &w));

        let mut other_owner = ours.clone();
        other_owner.metadata.owner_references = Some(vec![OwnerReference {
            uid: "someone-else".into(),
            ..Default::default()
        }]);
        assert!(!can_adopt(&other_owner, &w));

        let unmanaged = foreign_pdb("my-app-pdb", &[("app", "my-app")]);
        assert!(!can_adopt(&unmanaged, &w));
    }

    #[tokio::test]
    async fn test_reconcile_creates_then_is_idempotent() {
        let h = harness();
        let w = workload("high-availability");
        let c = config(&w);

        let outcome = reconcile_pdb(&h.ctx, &w, &c, &scope()).await.unwrap();
        assert_eq!(outcome.action, PdbAction::Created);
        assert!(outcome.changed());
        assert!(h.store.pdb(&pdb_key(&w)).is_some());
        assert!(h.events.has(reasons::PDB_CREATED));
        assert_eq!(h.audit.count(audit_actions::CREATE), 1);

        h.store.clear_writes();
        let again = reconcile_pdb(&h.ctx, &w, &c, &scope()).await.unwrap();
        assert_eq!(again.action, PdbAction::Unchanged);
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_updates_on_class_change() {
        let h = harness();
        let w = workload("standard");
        reconcile_pdb(&h.ctx, &w, &config(&w), &scope()).await.unwrap();

        let upgraded = workload("mission-critical");
        let outcome = reconcile_pdb(&h.ctx, &upgraded, &config(&upgraded), &scope())
            .await
            .unwrap();
        assert_eq!(outcome.action, PdbAction::Updated);

        let pdb = h.store.pdb(&pdb_key(&w)).unwrap();
        assert_eq!(
            pdb.spec.unwrap().min_available,
            Some(IntOrString::String("90%".into()))
        );
        assert!(h.events.has(reasons::PDB_UPDATED));
    }

    #[tokio::test]
    async fn test_reconcile_leaves_unmanaged_pdb_alone() {
        let h = harness();
        let w = workload("standard");
        h.store.insert_pdb(foreign_pdb("my-app-pdb", &[("app", "my-app")]));

        let outcome = reconcile_pdb(&h.ctx, &w, &config(&w), &scope()).await.unwrap();
        assert_eq!(outcome.action, PdbAction::OwnershipConflict);
        assert_eq!(h.store.write_count(), 0);
        assert!(h.events.has(reasons::PDB_OWNERSHIP_CONFLICT));
        assert_eq!(
            h.store.pdb(&pdb_key(&w)).unwrap().spec.unwrap().min_available,
            Some(IntOrString::Int(1))
        );
    }

    #[tokio::test]
    async fn test_reconcile_removes_owned_duplicates_only() {
        let h = harness();
        let w = workload("standard");
        let c = config(&w);

        let mut legacy = build_pdb(&w, &c, "t0");
        legacy.metadata.name = Some("my-app-legacy".into());
        h.store.insert_pdb(legacy);
        h.store
            .insert_pdb(foreign_pdb("hand-made", &[("app", "my-app")]));

        reconcile_pdb(&h.ctx, &w, &c, &scope()).await.unwrap();

        let names: Vec<String> = h
            .store
            .pdbs_in("default")
            .iter()
            .filter_map(|p| p.metadata.name.clone())
            .collect();
        assert!(names.contains(&"my-app-pdb".to_string()));
        assert!(names.contains(&"hand-made".to_string()));
        assert!(!names.contains(&"my-app-legacy".to_string()));
        assert!(h.events.has(reasons::DUPLICATE_PDB_REMOVED));
    }

    #[tokio::test]
    async fn test_create_failure_is_reported() {
        let h = harness();
        let w = workload("standard");
        h.store.fail_next(
            Operation::CreatePdb,
            StoreError::Invalid {
                resource: "PodDisruptionBudget default/my-app-pdb".into(),
                message: "bad selector".into(),
            },
        );

        assert!(reconcile_pdb(&h.ctx, &w, &config(&w), &scope()).await.is_err());
        assert!(h.events.has(reasons::PDB_CREATION_FAILED));
        let audit = h.audit.events();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].result, RESULT_FAILURE);
        assert!(h.store.pdb(&pdb_key(&w)).is_none());
    }

    #[tokio::test]
    async fn test_delete_owned_pdb() {
        let h = harness();
        let w = workload("standard");
        assert!(!delete_owned_pdb(&h.ctx, &w, &scope()).await.unwrap());

        reconcile_pdb(&h.ctx, &w, &config(&w), &scope()).await.unwrap();
        assert!(delete_owned_pdb(&h.ctx, &w, &scope()).await.unwrap());
        assert!(h.store.pdb(&pdb_key(&w)).is_none());
        assert!(h.events.has(reasons::PDB_DELETED));
        assert_eq!(h.audit.count(audit_actions::DELETE), 1);
    }

    #[tokio::test]
    async fn test_delete_keeps_foreign_pdb() {
        let h = harness();
        let w = workload("standard");
        h.store.insert_pdb(foreign_pdb("my-app-pdb", &[("app", "my-app")]));

        assert!(!delete_owned_pdb(&h.ctx, &w, &scope()).await.unwrap());
        assert!(h.store.pdb(&pdb_key(&w)).is_some());
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_keeps_managed_pdb_without_owner() {
        let h = harness();
        let w = workload("standard");
        let mut orphan = build_pdb(&w, &config(&w), "t0");
        orphan.metadata.owner_references = None;
        h.store.insert_pdb(orphan);

        assert!(!delete_owned_pdb(&h.ctx, &w, &scope()).await.unwrap());
        assert!(h.store.pdb(&pdb_key(&w)).is_some());
        assert!(!h.events.has(reasons::PDB_DELETED));
        assert_eq!(h.store.write_count(), 0);
    }
}
