// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `AvailabilityPolicy` defaulting and validation.
//!
//! The defaulter fills every optional field with its effective value; the
//! validator rejects malformed specs with field-scoped errors and reports
//! non-blocking warnings. Both are pure functions over the spec.

use crate::constants::{
    DEFAULT_MAINTENANCE_TIMEZONE, DEFAULT_POLICY_PRIORITY, DEFAULT_UNHEALTHY_POD_EVICTION_POLICY,
    MAX_POLICY_PRIORITY,
};
use crate::crd::{
    AvailabilityClass, AvailabilityPolicy, AvailabilityPolicySpec, ComponentFunction, EnforcementMode,
};
use crate::maintenance::{parse_hhmm, parse_timezone};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::HashSet;
use std::fmt;

const UNHEALTHY_POD_EVICTION_POLICIES: &[&str] = &["IfHealthyBudget", "AlwaysAllow"];
const SELECTOR_OPERATORS: &[&str] = &["In", "NotIn", "Exists", "DoesNotExist"];

/// A validation failure on one field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// JSON path of the offending field, e.g. `spec.maintenanceWindows[0].start`.
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Join field errors into one message.
#[must_use]
pub fn format_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Defaulter
// ============================================================================

/// Fill unset fields with their effective values.
pub fn apply_defaults(spec: &mut AvailabilityPolicySpec) {
    if spec.priority == 0 {
        spec.priority = DEFAULT_POLICY_PRIORITY;
    }
    if spec.enforcement.is_none() {
        spec.enforcement = Some(EnforcementMode::Advisory);
    }

    for window in &mut spec.maintenance_windows {
        if window.timezone.is_empty() {
            window.timezone = DEFAULT_MAINTENANCE_TIMEZONE.to_string();
        }
        if window.days_of_week.is_empty() {
            window.days_of_week = (0..=6).collect();
        }
    }

    if spec.enforce_min_replicas.is_none() {
        spec.enforce_min_replicas = Some(true);
    }
    if spec.allow_override.is_none() {
        spec.allow_override = Some(spec.enforcement_mode() != EnforcementMode::Strict);
    }
    if spec.override_requires_reason.is_none() {
        spec.override_requires_reason = Some(false);
    }

    if spec.availability_class == AvailabilityClass::Custom {
        if let Some(custom) = spec.custom_pdb_config.as_mut() {
            if custom.unhealthy_pod_eviction_policy.is_none() {
                custom.unhealthy_pod_eviction_policy =
                    Some(DEFAULT_UNHEALTHY_POD_EVICTION_POLICY.to_string());
            }
        }
    }

    if spec.enforcement_mode() == EnforcementMode::Flexible && spec.minimum_class.is_none() {
        spec.minimum_class = Some(spec.availability_class.clone());
    }
}

/// Copy of `policy` with defaults applied to its spec.
#[must_use]
pub fn defaulted(policy: &AvailabilityPolicy) -> AvailabilityPolicy {
    let mut policy = policy.clone();
    apply_defaults(&mut policy.spec);
    policy
}

// ============================================================================
// Validator
// ============================================================================

fn validate_int_or_percent(field: &str, value: &IntOrString, errors: &mut Vec<FieldError>) {
    match value {
        IntOrString::Int(n) if *n < 0 => {
            errors.push(FieldError::new(field, "must not be negative"));
        }
        IntOrString::Int(_) => {}
        IntOrString::String(s) => {
            let valid = s
                .strip_suffix('%')
                .and_then(|p| p.parse::<i32>().ok())
                .is_some_and(|p| (0..=100).contains(&p));
            if !valid {
                errors.push(FieldError::new(
                    field,
                    format!("'{s}' must be an integer or a percentage between 0% and 100%"),
                ));
            }
        }
    }
}

fn validate_custom(spec: &AvailabilityPolicySpec, errors: &mut Vec<FieldError>) {
    let Some(custom) = spec.custom_pdb_config.as_ref() else {
        if spec.availability_class == AvailabilityClass::Custom {
            errors.push(FieldError::new(
                "spec.customPDBConfig",
                "required when availabilityClass is custom",
            ));
        }
        return;
    };

    match (&custom.min_available, &custom.max_unavailable) {
        (Some(_), Some(_)) => errors.push(FieldError::new(
            "spec.customPDBConfig",
            "minAvailable and maxUnavailable are mutually exclusive",
        )),
        (None, None) => errors.push(FieldError::new(
            "spec.customPDBConfig",
            "one of minAvailable or maxUnavailable must be set",
        )),
        (Some(min), None) => {
            validate_int_or_percent("spec.customPDBConfig.minAvailable", min, errors);
        }
        (None, Some(max)) => {
            validate_int_or_percent("spec.customPDBConfig.maxUnavailable", max, errors);
        }
    }

    if let Some(policy) = custom.unhealthy_pod_eviction_policy.as_deref() {
        if !UNHEALTHY_POD_EVICTION_POLICIES.contains(&policy) {
            errors.push(FieldError::new(
                "spec.customPDBConfig.unhealthyPodEvictionPolicy",
                format!("'{policy}' must be one of {UNHEALTHY_POD_EVICTION_POLICIES:?}"),
            ));
        }
    }
}

fn validate_selector(spec: &AvailabilityPolicySpec, errors: &mut Vec<FieldError>) {
    let selector = &spec.component_selector;
    if selector.is_empty() {
        errors.push(FieldError::new(
            "spec.componentSelector",
            "at least one of componentNames, componentFunctions, matchLabels, matchExpressions or namespaces must be set",
        ));
    }

    for (i, function) in selector.component_functions.iter().enumerate() {
        if matches!(function, ComponentFunction::Unknown(_)) {
            errors.push(FieldError::new(
                format!("spec.componentSelector.componentFunctions[{i}]"),
                format!("unknown component function '{function}'"),
            ));
        }
    }

    for (i, requirement) in selector.match_expressions.iter().enumerate() {
        let field = format!("spec.componentSelector.matchExpressions[{i}]");
        if !SELECTOR_OPERATORS.contains(&requirement.operator.as_str()) {
            errors.push(FieldError::new(
                format!("{field}.operator"),
                format!("unknown operator '{}'", requirement.operator),
            ));
        } else if matches!(requirement.operator.as_str(), "In" | "NotIn")
            && requirement.values.is_empty()
        {
            errors.push(FieldError::new(
                format!("{field}.values"),
                "must be non-empty for In and NotIn",
            ));
        }
    }
}

fn validate_windows(spec: &AvailabilityPolicySpec, errors: &mut Vec<FieldError>) {
    for (i, window) in spec.maintenance_windows.iter().enumerate() {
        let field = format!("spec.maintenanceWindows[{i}]");
        if parse_hhmm(&window.start).is_err() {
            errors.push(FieldError::new(
                format!("{field}.start"),
                format!("'{}' must be HH:MM", window.start),
            ));
        }
        if parse_hhmm(&window.end).is_err() {
            errors.push(FieldError::new(
                format!("{field}.end"),
                format!("'{}' must be HH:MM", window.end),
            ));
        }
        if parse_timezone(&window.timezone).is_err() {
            errors.push(FieldError::new(
                format!("{field}.timezone"),
                format!("unknown timezone '{}'", window.timezone),
            ));
        }

        let mut seen = HashSet::new();
        for day in &window.days_of_week {
            if !(0..=6).contains(day) {
                errors.push(FieldError::new(
                    format!("{field}.daysOfWeek"),
                    format!("{day} is outside 0..6"),
                ));
            } else if !seen.insert(*day) {
                errors.push(FieldError::new(
                    format!("{field}.daysOfWeek"),
                    format!("{day} is listed more than once"),
                ));
            }
        }
    }
}

fn validate_enforcement(spec: &AvailabilityPolicySpec, errors: &mut Vec<FieldError>) {
    let mode = spec.enforcement_mode();
    if let EnforcementMode::Unknown(value) = &mode {
        errors.push(FieldError::new(
            "spec.enforcement",
            format!("unknown enforcement mode '{value}', expected strict, flexible or advisory"),
        ));
    }

    if let Some(minimum) = &spec.minimum_class {
        if !minimum.is_known() {
            errors.push(FieldError::new(
                "spec.minimumClass",
                format!("unknown availability class '{minimum}'"),
            ));
        } else if mode == EnforcementMode::Flexible
            && minimum.rank() > spec.availability_class.rank()
        {
            errors.push(FieldError::new(
                "spec.minimumClass",
                format!(
                    "minimumClass {minimum} exceeds availabilityClass {}",
                    spec.availability_class
                ),
            ));
        }
    }

    let requires_annotation = spec
        .override_requires_annotation
        .as_deref()
        .is_some_and(|key| !key.is_empty());
    if mode != EnforcementMode::Advisory {
        if requires_annotation {
            errors.push(FieldError::new(
                "spec.overrideRequiresAnnotation",
                "only valid with advisory enforcement",
            ));
        }
        if spec.override_requires_reason == Some(true) {
            errors.push(FieldError::new(
                "spec.overrideRequiresReason",
                "only valid with advisory enforcement",
            ));
        }
    }
    if requires_annotation && spec.allow_override == Some(false) {
        errors.push(FieldError::new(
            "spec.overrideRequiresAnnotation",
            "has no effect when allowOverride is false",
        ));
    }
}

/// Validate a spec, returning every field error found.
#[must_use]
pub fn validate(spec: &AvailabilityPolicySpec) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if !spec.availability_class.is_known() {
        errors.push(FieldError::new(
            "spec.availabilityClass",
            format!(
                "unknown availability class '{}', expected one of non-critical, standard, high-availability, mission-critical, custom",
                spec.availability_class
            ),
        ));
    }

    validate_custom(spec, &mut errors);
    validate_selector(spec, &mut errors);
    validate_windows(spec, &mut errors);

    if !(0..=MAX_POLICY_PRIORITY).contains(&spec.priority) {
        errors.push(FieldError::new(
            "spec.priority",
            format!("{} is outside 0..{MAX_POLICY_PRIORITY}", spec.priority),
        ));
    }

    validate_enforcement(spec, &mut errors);
    errors
}

/// Non-blocking findings worth reporting to the user.
#[must_use]
pub fn warnings(spec: &AvailabilityPolicySpec) -> Vec<String> {
    let mut warnings = Vec::new();
    if spec.priority == 0 {
        warnings.push("priority is 0; this policy loses every tie".to_string());
    }
    if spec.component_selector.namespaces.is_empty() {
        warnings.push("no namespaces selected; the policy applies cluster-wide".to_string());
    }
    let mode = spec.enforcement_mode();
    if mode == EnforcementMode::Strict && spec.allow_override == Some(true) {
        warnings.push("allowOverride is ignored under strict enforcement".to_string());
    }
    if mode == EnforcementMode::Flexible && spec.minimum_class.is_none() {
        warnings.push(
            "flexible enforcement without minimumClass uses availabilityClass as the minimum"
                .to_string(),
        );
    }
    warnings
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod validation_tests;
