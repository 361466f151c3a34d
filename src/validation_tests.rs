// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `validation.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{
        AvailabilityClass, AvailabilityPolicySpec, ComponentFunction, ComponentSelector,
        CustomPdbConfig, EnforcementMode, LabelSelectorRequirement, MaintenanceWindow,
    };
    use crate::validation::{apply_defaults, format_errors, validate, warnings, FieldError};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    fn valid_spec() -> AvailabilityPolicySpec {
        AvailabilityPolicySpec {
            availability_class: AvailabilityClass::Standard,
            component_selector: ComponentSelector {
                namespaces: vec!["components".into()],
                ..Default::default()
            },
            priority: 100,
            enforcement: Some(EnforcementMode::Advisory),
            ..Default::default()
        }
    }

    fn window(start: &str, end: &str, timezone: &str, days: Vec<i32>) -> MaintenanceWindow {
        MaintenanceWindow {
            start: start.into(),
            end: end.into(),
            timezone: timezone.into(),
            days_of_week: days,
        }
    }

    /// Assert validation fails with an error on exactly `field`.
    fn assert_rejected(spec: &AvailabilityPolicySpec, field: &str) {
        let errors = validate(spec);
        assert!(
            errors.iter().any(|e| e.field == field),
            "expected an error on {field}, got: {}",
            format_errors(&errors)
        );
    }

    #[test]
    fn test_valid_spec_passes() {
        assert!(validate(&valid_spec()).is_empty());
    }

    // ------------------------------------------------------------------
    // Defaulter
    // ------------------------------------------------------------------

    #[test]
    fn test_defaults_are_filled() {
        let mut spec = AvailabilityPolicySpec {
            availability_class: AvailabilityClass::Custom,
            custom_pdb_config: Some(CustomPdbConfig {
                min_available: Some(IntOrString::Int(2)),
                ..Default::default()
            }),
            maintenance_windows: vec![window("01:00", "02:00", "", vec![])],
            ..Default::default()
        };
        apply_defaults(&mut spec);

        assert_eq!(spec.priority, 50);
        assert_eq!(spec.enforcement, Some(EnforcementMode::Advisory));
        assert_eq!(spec.maintenance_windows[0].timezone, "UTC");
        assert_eq!(spec.maintenance_windows[0].days_of_week, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(spec.enforce_min_replicas, Some(true));
        assert_eq!(spec.allow_override, Some(true));
        assert_eq!(spec.override_requires_reason, Some(false));
        assert_eq!(
            spec.custom_pdb_config
                .unwrap()
                .unhealthy_pod_eviction_policy
                .as_deref(),
            Some("IfHealthyBudget")
        );
    }

    #[test]
    fn test_defaults_for_strict_and_flexible() {
        let mut strict = AvailabilityPolicySpec {
            enforcement: Some(EnforcementMode::Strict),
            ..valid_spec()
        };
        apply_defaults(&mut strict);
        assert_eq!(strict.allow_override, Some(false));

        let mut flexible = AvailabilityPolicySpec {
            availability_class: AvailabilityClass::HighAvailability,
            enforcement: Some(EnforcementMode::Flexible),
            ..valid_spec()
        };
        apply_defaults(&mut flexible);
        assert_eq!(flexible.minimum_class, Some(AvailabilityClass::HighAvailability));
    }

    #[test]
    fn test_defaults_keep_explicit_values() {
        let mut spec = AvailabilityPolicySpec {
            priority: 7,
            allow_override: Some(false),
            ..valid_spec()
        };
        apply_defaults(&mut spec);
        assert_eq!(spec.priority, 7);
        assert_eq!(spec.allow_override, Some(false));
    }

    // ------------------------------------------------------------------
    // Rejections
    // ------------------------------------------------------------------

    #[test]
    fn test_rejects_unknown_class() {
        let spec = AvailabilityPolicySpec {
            availability_class: AvailabilityClass::Unknown("platinum".into()),
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.availabilityClass");
    }

    #[test]
    fn test_rejects_custom_without_config() {
        let spec = AvailabilityPolicySpec {
            availability_class: AvailabilityClass::Custom,
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.customPDBConfig");
    }

    #[test]
    fn test_rejects_custom_with_neither_or_both() {
        let neither = AvailabilityPolicySpec {
            availability_class: AvailabilityClass::Custom,
            custom_pdb_config: Some(CustomPdbConfig::default()),
            ..valid_spec()
        };
        assert_rejected(&neither, "spec.customPDBConfig");

        let both = AvailabilityPolicySpec {
            availability_class: AvailabilityClass::Custom,
            custom_pdb_config: Some(CustomPdbConfig {
                min_available: Some(IntOrString::Int(1)),
                max_unavailable: Some(IntOrString::Int(1)),
                ..Default::default()
            }),
            ..valid_spec()
        };
        assert_rejected(&both, "spec.customPDBConfig");
    }

    #[test]
    fn test_rejects_malformed_custom_values() {
        let spec = AvailabilityPolicySpec {
            availability_class: AvailabilityClass::Custom,
            custom_pdb_config: Some(CustomPdbConfig {
                min_available: Some(IntOrString::String("lots".into())),
                unhealthy_pod_eviction_policy: Some("Sometimes".into()),
                ..Default::default()
            }),
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.customPDBConfig.minAvailable");
        assert_rejected(&spec, "spec.customPDBConfig.unhealthyPodEvictionPolicy");
    }

    #[test]
    fn test_rejects_empty_selector() {
        let spec = AvailabilityPolicySpec {
            component_selector: ComponentSelector::default(),
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.componentSelector");
    }

    #[test]
    fn test_rejects_unknown_component_function() {
        let spec = AvailabilityPolicySpec {
            component_selector: ComponentSelector {
                component_functions: vec![
                    ComponentFunction::Security,
                    ComponentFunction::Unknown("billing".into()),
                ],
                ..Default::default()
            },
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.componentSelector.componentFunctions[1]");
    }

    #[test]
    fn test_rejects_bad_match_expression() {
        let spec = AvailabilityPolicySpec {
            component_selector: ComponentSelector {
                match_expressions: vec![
                    LabelSelectorRequirement {
                        key: "tier".into(),
                        operator: "Like".into(),
                        values: vec![],
                    },
                    LabelSelectorRequirement {
                        key: "tier".into(),
                        operator: "In".into(),
                        values: vec![],
                    },
                ],
                ..Default::default()
            },
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.componentSelector.matchExpressions[0].operator");
        assert_rejected(&spec, "spec.componentSelector.matchExpressions[1].values");
    }

    #[test]
    fn test_rejects_malformed_time() {
        let spec = AvailabilityPolicySpec {
            maintenance_windows: vec![window("2am", "04:00", "UTC", vec![])],
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.maintenanceWindows[0].start");

        let spec = AvailabilityPolicySpec {
            maintenance_windows: vec![window("02:00", "25:00", "UTC", vec![])],
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.maintenanceWindows[0].end");
    }

    #[test]
    fn test_rejects_invalid_timezone() {
        let spec = AvailabilityPolicySpec {
            maintenance_windows: vec![window("02:00", "04:00", "Moon/Tranquility", vec![])],
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.maintenanceWindows[0].timezone");
    }

    #[test]
    fn test_rejects_bad_days_of_week() {
        let out_of_range = AvailabilityPolicySpec {
            maintenance_windows: vec![window("02:00", "04:00", "UTC", vec![1, 7])],
            ..valid_spec()
        };
        assert_rejected(&out_of_range, "spec.maintenanceWindows[0].daysOfWeek");

        let duplicated = AvailabilityPolicySpec {
            maintenance_windows: vec![window("02:00", "04:00", "UTC", vec![1, 1])],
            ..valid_spec()
        };
        assert_rejected(&duplicated, "spec.maintenanceWindows[0].daysOfWeek");
    }

    #[test]
    fn test_rejects_priority_out_of_range() {
        for priority in [-1, 1001] {
            let spec = AvailabilityPolicySpec {
                priority,
                ..valid_spec()
            };
            assert_rejected(&spec, "spec.priority");
        }
    }

    #[test]
    fn test_rejects_unknown_enforcement() {
        let spec = AvailabilityPolicySpec {
            enforcement: Some(EnforcementMode::Unknown("lenient".into())),
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.enforcement");
    }

    #[test]
    fn test_rejects_minimum_above_class_under_flexible() {
        let spec = AvailabilityPolicySpec {
            availability_class: AvailabilityClass::Standard,
            enforcement: Some(EnforcementMode::Flexible),
            minimum_class: Some(AvailabilityClass::MissionCritical),
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.minimumClass");
    }

    #[test]
    fn test_rejects_override_requirements_outside_advisory() {
        let spec = AvailabilityPolicySpec {
            enforcement: Some(EnforcementMode::Strict),
            override_requires_annotation: Some("example.com/approved".into()),
            override_requires_reason: Some(true),
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.overrideRequiresAnnotation");
        assert_rejected(&spec, "spec.overrideRequiresReason");
    }

    #[test]
    fn test_rejects_required_annotation_when_override_disallowed() {
        let spec = AvailabilityPolicySpec {
            allow_override: Some(false),
            override_requires_annotation: Some("example.com/approved".into()),
            ..valid_spec()
        };
        assert_rejected(&spec, "spec.overrideRequiresAnnotation");
    }

    #[test]
    fn test_errors_are_field_scoped() {
        let spec = AvailabilityPolicySpec {
            priority: 5000,
            ..valid_spec()
        };
        let errors = validate(&spec);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            FieldError {
                field: "spec.priority".into(),
                message: "5000 is outside 0..1000".into(),
            }
        );
    }

    // ------------------------------------------------------------------
    // Warnings
    // ------------------------------------------------------------------

    #[test]
    fn test_warnings() {
        let spec = AvailabilityPolicySpec {
            priority: 0,
            component_selector: ComponentSelector {
                component_names: vec!["api".into()],
                ..Default::default()
            },
            enforcement: Some(EnforcementMode::Strict),
            allow_override: Some(true),
            ..valid_spec()
        };
        let found = warnings(&spec);
        assert_eq!(found.len(), 3);

        let flexible = AvailabilityPolicySpec {
            enforcement: Some(EnforcementMode::Flexible),
            ..valid_spec()
        };
        assert!(warnings(&flexible)
            .iter()
            .any(|w| w.contains("minimumClass")));
        assert!(warnings(&valid_spec()).is_empty());
    }
}
