// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `policy.rs`

#[cfg(test)]
mod tests {
    use super::super::{active_policy_counts, matching_components, reconcile_policy, ALL_NAMESPACES};
    use crate::audit::{actions as audit_actions, MemoryAuditSink};
    use crate::config::OperatorConfig;
    use crate::constants::{
        ANNOTATION_COMPONENT_NAME, CACHE_KEY_ALL_POLICIES, CONTROLLER_POLICY,
        FINALIZER_AVAILABILITY_POLICY,
    };
    use crate::context::Context;
    use crate::crd::{
        AvailabilityClass, AvailabilityPolicy, AvailabilityPolicySpec, ComponentSelector,
        CustomPdbConfig,
    };
    use crate::errors::{ErrorKind, ReconcileError};
    use crate::events::{reasons, MemoryEventRecorder};
    use crate::reconcilers::status::{
        find_condition, CONDITION_READY, CONDITION_VALIDATED, REASON_NO_MATCHING_COMPONENTS,
    };
    use crate::reconcilers::ReconcileOutcome;
    use crate::store::{MemoryStore, ObjectKey};
    use crate::telemetry::ReconcileScope;
    use crate::workload::Workload;
    use kube::ResourceExt;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

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

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn tier_policy(name: &str, tier: &str) -> AvailabilityPolicy {
        AvailabilityPolicy::new(
            name,
            AvailabilityPolicySpec {
                availability_class: AvailabilityClass::Standard,
                component_selector: ComponentSelector {
                    match_labels: map(&[("tier", tier)]),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
    }

    fn workload(namespace: &str, name: &str, tier: &str) -> Workload {
        Workload {
            namespace: namespace.into(),
            name: name.into(),
            replicas: 3,
            labels: map(&[("tier", tier)]),
            ..Default::default()
        }
    }

    async fn run(h: &Harness, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let scope = ReconcileScope::detached(CONTROLLER_POLICY, &ObjectKey::cluster(name));
        reconcile_policy(&h.ctx, name, &scope).await
    }

    #[tokio::test]
    async fn test_status_lists_matched_components() {
        let h = harness();
        h.store.apply_policy(tier_policy("web-policy", "web"));
        h.store.apply_workload(workload("shop", "frontend", "web"));
        h.store.apply_workload(Workload {
            annotations: map(&[(ANNOTATION_COMPONENT_NAME, "catalog")]),
            ..workload("shop", "catalog-api", "web")
        });
        h.store.apply_workload(workload("shop", "db", "data"));

        let outcome = run(&h, "web-policy").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::after(Duration::from_secs(300)));

        let policy = h.store.policy("web-policy").unwrap();
        assert_eq!(
            policy.finalizers().to_vec(),
            vec![FINALIZER_AVAILABILITY_POLICY.to_string()]
        );
        let status = policy.status.unwrap();
        assert_eq!(
            status.applied_to_components,
            vec!["shop/catalog".to_string(), "shop/frontend".to_string()]
        );
        assert_eq!(status.component_count, 2);
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(
            find_condition(&status.conditions, CONDITION_READY).unwrap().status,
            "True"
        );
        assert_eq!(
            find_condition(&status.conditions, CONDITION_VALIDATED).unwrap().status,
            "True"
        );
        assert!(h.events.has(reasons::POLICY_APPLIED));
        assert_eq!(h.audit.count(audit_actions::POLICY_APPLY), 1);
    }

    #[tokio::test]
    async fn test_unchanged_policy_is_quiet() {
        let h = harness();
        h.store.apply_policy(tier_policy("web-policy", "web"));
        h.store.apply_workload(workload("shop", "frontend", "web"));
        run(&h, "web-policy").await.unwrap();

        h.store.clear_writes();
        h.events.clear();
        run(&h, "web-policy").await.unwrap();
        assert_eq!(h.store.write_count(), 0);
        assert!(h.events.events().is_empty());
    }

    #[tokio::test]
    async fn test_no_matching_components_is_not_ready() {
        let h = harness();
        h.store.apply_policy(tier_policy("web-policy", "web"));

        run(&h, "web-policy").await.unwrap();
        let status = h.store.policy("web-policy").unwrap().status.unwrap();
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason.as_deref(), Some(REASON_NO_MATCHING_COMPONENTS));
        assert_eq!(status.component_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_policy_reports_validation_failure() {
        let h = harness();
        h.store.apply_policy(AvailabilityPolicy::new(
            "broken",
            AvailabilityPolicySpec {
                availability_class: AvailabilityClass::Custom,
                custom_pdb_config: Some(CustomPdbConfig::default()),
                component_selector: ComponentSelector {
                    namespaces: vec!["shop".into()],
                    ..Default::default()
                },
                ..Default::default()
            },
        ));

        let err = run(&h, "broken").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let status = h.store.policy("broken").unwrap().status.unwrap();
        let validated = find_condition(&status.conditions, CONDITION_VALIDATED).unwrap();
        assert_eq!(validated.status, "False");
        assert!(validated
            .message
            .as_deref()
            .unwrap()
            .contains("spec.customPDBConfig"));
        assert!(h.events.has(reasons::POLICY_VALIDATION_FAILED));

        // A second failing pass does not repeat the event.
        h.events.clear();
        assert!(run(&h, "broken").await.is_err());
        assert!(!h.events.has(reasons::POLICY_VALIDATION_FAILED));
    }

    #[tokio::test]
    async fn test_spec_change_emits_policy_updated() {
        let h = harness();
        h.store.apply_policy(tier_policy("web-policy", "web"));
        run(&h, "web-policy").await.unwrap();

        let mut edited = h.store.policy("web-policy").unwrap();
        edited.spec.availability_class = AvailabilityClass::HighAvailability;
        h.store.apply_policy(edited);
        h.events.clear();

        run(&h, "web-policy").await.unwrap();
        assert!(h.events.has(reasons::POLICY_UPDATED));
        assert_eq!(
            h.store
                .policy("web-policy")
                .unwrap()
                .status
                .unwrap()
                .observed_generation,
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_deletion_releases_finalizer() {
        let h = harness();
        h.store.apply_policy(tier_policy("web-policy", "web"));
        run(&h, "web-policy").await.unwrap();
        assert!(h.ctx.cache.get("web-policy").is_some());

        h.store.delete_policy("web-policy").unwrap();
        assert!(h.store.policy("web-policy").is_some());

        assert_eq!(run(&h, "web-policy").await.unwrap(), ReconcileOutcome::done());
        assert!(h.store.policy("web-policy").is_none());
        assert!(h.events.has(reasons::POLICY_REMOVED));
        assert_eq!(h.audit.count(audit_actions::POLICY_REMOVE), 1);
        assert!(h.ctx.cache.get("web-policy").is_none());
    }

    #[tokio::test]
    async fn test_missing_policy_invalidates_cache() {
        let h = harness();
        h.ctx.cache.set("gone", tier_policy("gone", "web"));
        h.ctx
            .cache
            .set_list(CACHE_KEY_ALL_POLICIES, vec![tier_policy("gone", "web")]);

        assert_eq!(run(&h, "gone").await.unwrap(), ReconcileOutcome::done());
        assert!(h.ctx.cache.get("gone").is_none());
        assert!(h.ctx.cache.get_list(CACHE_KEY_ALL_POLICIES).is_none());
    }

    #[test]
    fn test_matching_components_skips_deleting_workloads() {
        let policy = tier_policy("web-policy", "web");
        let workloads = vec![
            workload("a", "one", "web"),
            Workload {
                deletion_timestamp: Some("2025-01-01T00:00:00Z".into()),
                ..workload("a", "two", "web")
            },
        ];
        assert_eq!(
            matching_components(&policy, &workloads, false),
            vec!["a/one".to_string()]
        );
    }

    #[test]
    fn test_active_policy_counts() {
        let scoped = AvailabilityPolicy::new(
            "scoped",
            AvailabilityPolicySpec {
                component_selector: ComponentSelector {
                    namespaces: vec!["shop".into(), "billing".into()],
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let counts = active_policy_counts(&[scoped, tier_policy("global", "web")]);
        assert_eq!(counts.get("shop"), Some(&1));
        assert_eq!(counts.get("billing"), Some(&1));
        assert_eq!(counts.get(ALL_NAMESPACES), Some(&1));
    }
}
