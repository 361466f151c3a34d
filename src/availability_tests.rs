// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `availability.rs`

#[cfg(test)]
mod tests {
    use crate::availability::{
        complement_of_max_unavailable, config_from_annotations, config_from_policy,
        default_min_available, format_maintenance_window, SOURCE_ANNOTATION,
    };
    use crate::constants::{ANNOTATION_AVAILABILITY_CLASS, ANNOTATION_MAINTENANCE_WINDOW};
    use crate::crd::{
        AvailabilityClass, AvailabilityPolicy, AvailabilityPolicySpec, ComponentFunction,
        CustomPdbConfig, EnforcementMode, MaintenanceWindow,
    };
    use crate::errors::{ErrorKind, ReconcileError};
    use crate::workload::Workload;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    fn pct(value: &str) -> IntOrString {
        IntOrString::String(value.to_string())
    }

    fn workload_with(annotations: &[(&str, &str)]) -> Workload {
        Workload {
            namespace: "default".into(),
            name: "my-app".into(),
            replicas: 4,
            annotations: annotations
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_table() {
        use AvailabilityClass::{HighAvailability, MissionCritical, NonCritical, Standard};
        let core = ComponentFunction::Core;
        let security = ComponentFunction::Security;

        assert_eq!(default_min_available(&NonCritical, &core), Some(pct("20%")));
        assert_eq!(default_min_available(&NonCritical, &security), Some(pct("50%")));
        assert_eq!(default_min_available(&Standard, &core), Some(pct("50%")));
        assert_eq!(default_min_available(&Standard, &security), Some(pct("75%")));
        assert_eq!(default_min_available(&HighAvailability, &core), Some(pct("75%")));
        assert_eq!(default_min_available(&HighAvailability, &security), Some(pct("75%")));
        assert_eq!(default_min_available(&MissionCritical, &core), Some(pct("90%")));
        assert_eq!(default_min_available(&MissionCritical, &security), Some(pct("90%")));
        assert_eq!(default_min_available(&AvailabilityClass::Custom, &core), None);
    }

    #[test]
    fn test_management_function_uses_base_defaults() {
        assert_eq!(
            default_min_available(&AvailabilityClass::NonCritical, &ComponentFunction::Management),
            Some(pct("20%"))
        );
    }

    #[test]
    fn test_complement_of_max_unavailable() {
        assert_eq!(complement_of_max_unavailable(&pct("25%"), 4), Some(pct("75%")));
        assert_eq!(
            complement_of_max_unavailable(&IntOrString::Int(1), 4),
            Some(IntOrString::Int(3))
        );
        assert_eq!(
            complement_of_max_unavailable(&IntOrString::Int(9), 4),
            Some(IntOrString::Int(0))
        );
        assert_eq!(complement_of_max_unavailable(&pct("abc"), 4), None);
        assert_eq!(complement_of_max_unavailable(&pct("150%"), 4), None);
    }

    #[test]
    fn test_annotation_config() {
        let workload = workload_with(&[
            (ANNOTATION_AVAILABILITY_CLASS, "high-availability"),
            (ANNOTATION_MAINTENANCE_WINDOW, "02:00-04:00 UTC"),
        ]);
        let config = config_from_annotations(&workload, &ComponentFunction::Core)
            .unwrap()
            .unwrap();
        assert_eq!(config.availability_class, AvailabilityClass::HighAvailability);
        assert_eq!(config.min_available, pct("75%"));
        assert_eq!(config.source, SOURCE_ANNOTATION);
        assert_eq!(config.maintenance_window.as_deref(), Some("02:00-04:00 UTC"));
        assert_eq!(config.enforcement_label(), "none");
    }

    #[test]
    fn test_missing_annotation_yields_none() {
        let workload = workload_with(&[]);
        assert!(config_from_annotations(&workload, &ComponentFunction::Core)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_invalid_annotation_is_validation_error() {
        let workload = workload_with(&[(ANNOTATION_AVAILABILITY_CLASS, "platinum")]);
        let err = config_from_annotations(&workload, &ComponentFunction::Core).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidAvailabilityClass { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_policy_config_applies_security_boost() {
        let policy = AvailabilityPolicy::new(
            "sec-policy",
            AvailabilityPolicySpec {
                availability_class: AvailabilityClass::Standard,
                ..Default::default()
            },
        );
        let config = config_from_policy(&policy, &workload_with(&[]), &ComponentFunction::Security);
        assert_eq!(config.min_available, pct("75%"));
        assert_eq!(config.policy_name.as_deref(), Some("sec-policy"));
        assert_eq!(config.enforcement, Some(EnforcementMode::Advisory));
    }

    #[test]
    fn test_custom_policy_uses_explicit_values() {
        let mut policy = AvailabilityPolicy::new(
            "custom",
            AvailabilityPolicySpec {
                availability_class: AvailabilityClass::Custom,
                custom_pdb_config: Some(CustomPdbConfig {
                    max_unavailable: Some(IntOrString::Int(1)),
                    unhealthy_pod_eviction_policy: Some("AlwaysAllow".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let config = config_from_policy(&policy, &workload_with(&[]), &ComponentFunction::Core);
        assert_eq!(config.min_available, IntOrString::Int(3));
        assert_eq!(
            config.unhealthy_pod_eviction_policy.as_deref(),
            Some("AlwaysAllow")
        );

        policy.spec.custom_pdb_config = Some(CustomPdbConfig {
            min_available: Some(pct("60%")),
            ..Default::default()
        });
        let config = config_from_policy(&policy, &workload_with(&[]), &ComponentFunction::Core);
        assert_eq!(config.min_available, pct("60%"));
    }

    #[test]
    fn test_with_class_recomputes_min_available() {
        let workload = workload_with(&[(ANNOTATION_AVAILABILITY_CLASS, "standard")]);
        let config = config_from_annotations(&workload, &ComponentFunction::Core)
            .unwrap()
            .unwrap();
        let raised = config.with_class(AvailabilityClass::MissionCritical);
        assert_eq!(raised.min_available, pct("90%"));
        assert_eq!(raised.availability_class, AvailabilityClass::MissionCritical);
        assert!(raised.description.contains("mission-critical"));
    }

    #[test]
    fn test_format_maintenance_window_defaults_timezone() {
        let window = MaintenanceWindow {
            start: "22:00".into(),
            end: "02:00".into(),
            ..Default::default()
        };
        assert_eq!(format_maintenance_window(&window), "22:00-02:00 UTC");
    }
}
