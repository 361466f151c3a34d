// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        conditions_equal, create_condition, find_condition, update_condition_in_memory,
        PolicyStatusUpdater, CONDITION_READY, CONDITION_VALIDATED, REASON_COMPONENTS_MATCHED,
        REASON_VALIDATION_PASSED,
    };
    use crate::crd::{AvailabilityPolicy, AvailabilityPolicySpec};
    use crate::store::memory::Operation;
    use crate::store::{MemoryStore, ObjectStore, StoreError};
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_create_condition() {
        let condition = create_condition("Ready", "True", "ComponentsMatched", "ok", Some(3));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason.as_deref(), Some("ComponentsMatched"));
        assert_eq!(condition.observed_generation, Some(3));
        assert!(condition.last_transition_time.is_some());
    }

    #[test]
    fn test_transition_time_preserved_when_status_unchanged() {
        let mut conditions = vec![create_condition("Ready", "True", "A", "first", Some(1))];
        conditions[0].last_transition_time = Some("2025-01-01T00:00:00+00:00".into());

        update_condition_in_memory(&mut conditions, "Ready", "True", "B", "second", Some(2));
        let ready = find_condition(&conditions, "Ready").unwrap();
        assert_eq!(
            ready.last_transition_time.as_deref(),
            Some("2025-01-01T00:00:00+00:00")
        );
        assert_eq!(ready.message.as_deref(), Some("second"));
        assert_eq!(ready.observed_generation, Some(2));

        update_condition_in_memory(&mut conditions, "Ready", "False", "C", "third", Some(2));
        let ready = find_condition(&conditions, "Ready").unwrap();
        assert_ne!(
            ready.last_transition_time.as_deref(),
            Some("2025-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn test_conditions_equal_ignores_time() {
        let a = vec![create_condition("Ready", "True", "A", "m", Some(1))];
        let mut b = a.clone();
        b[0].last_transition_time = Some("2020-01-01T00:00:00+00:00".into());
        assert!(conditions_equal(&a, &b));

        b[0].status = "False".into();
        assert!(!conditions_equal(&a, &b));
        assert!(!conditions_equal(&a, &[]));
    }

    fn stored_policy(store: &MemoryStore) -> AvailabilityPolicy {
        store.apply_policy(AvailabilityPolicy::new(
            "standard-policy",
            AvailabilityPolicySpec::default(),
        ));
        store.policy("standard-policy").unwrap()
    }

    fn fill(updater: &mut PolicyStatusUpdater, generation: Option<i64>) {
        updater.set_condition(CONDITION_VALIDATED, "True", REASON_VALIDATION_PASSED, "valid");
        updater.set_condition(CONDITION_READY, "True", REASON_COMPONENTS_MATCHED, "1 component");
        updater.set_applied_components(vec!["default/api".into()]);
        updater.set_observed_generation(generation);
    }

    #[tokio::test]
    async fn test_apply_writes_once() {
        let store = MemoryStore::new();
        let policy = stored_policy(&store);
        let token = CancellationToken::new();

        let mut updater = PolicyStatusUpdater::new(&policy);
        fill(&mut updater, policy.metadata.generation);
        assert!(updater.apply(&store, &token).await.unwrap());

        let written = store.policy("standard-policy").unwrap();
        let status = written.status.clone().unwrap();
        assert_eq!(status.component_count, 1);
        assert_eq!(status.applied_to_components, vec!["default/api".to_string()]);
        assert_eq!(status.observed_generation, Some(1));
        assert!(status.last_updated.is_some());

        // Same content against the written policy: nothing to do.
        store.clear_writes();
        let mut again = PolicyStatusUpdater::new(&written);
        fill(&mut again, written.metadata.generation);
        assert!(!again.has_changes());
        assert!(!again.apply(&store, &token).await.unwrap());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_refetches_on_conflict() {
        let store = MemoryStore::new();
        let policy = stored_policy(&store);
        let token = CancellationToken::new();

        // Someone else bumps the resourceVersion after we observed the policy.
        let mut concurrent = policy.clone();
        concurrent.metadata.labels = Some([("team".to_string(), "sre".to_string())].into());
        store.apply_policy(concurrent);

        let mut updater = PolicyStatusUpdater::new(&policy);
        fill(&mut updater, policy.metadata.generation);
        assert!(updater.apply(&store, &token).await.unwrap());

        let written = store.policy("standard-policy").unwrap();
        assert_eq!(written.status.unwrap().component_count, 1);
        assert_eq!(
            written.metadata.labels.unwrap().get("team").map(String::as_str),
            Some("sre")
        );
    }

    #[tokio::test]
    async fn test_apply_surfaces_not_found() {
        let store = MemoryStore::new();
        let policy = stored_policy(&store);
        store.fail_next(
            Operation::ReplacePolicyStatus,
            StoreError::NotFound {
                resource: "AvailabilityPolicy standard-policy".into(),
            },
        );

        let mut updater = PolicyStatusUpdater::new(&policy);
        fill(&mut updater, policy.metadata.generation);
        assert!(updater
            .apply(&store, &CancellationToken::new())
            .await
            .is_err());
        assert!(store
            .get_policy("standard-policy")
            .await
            .unwrap()
            .unwrap()
            .status
            .is_none());
    }
}
