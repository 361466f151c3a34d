// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Availability configuration resolved for a single workload.
//!
//! An [`AvailabilityConfig`] is computed on every reconcile, either from the
//! workload's own `availability-class` annotation or from the policy that
//! selects it, and then fused by the enforcement resolver.
//!
//! # Default `minAvailable`
//!
//! | Class | Default | Security function |
//! |---|---|---|
//! | non-critical | 20% | 50% |
//! | standard | 50% | 75% |
//! | high-availability | 75% | 75% |
//! | mission-critical | 90% | 90% |
//!
//! `custom` uses the policy's `customPDBConfig`.

use crate::constants::{
    ANNOTATION_AVAILABILITY_CLASS, ANNOTATION_MAINTENANCE_WINDOW, DEFAULT_MAINTENANCE_TIMEZONE,
};
use crate::crd::{
    AvailabilityClass, AvailabilityPolicy, ComponentFunction, CustomPdbConfig, EnforcementMode,
    MaintenanceWindow,
};
use crate::errors::ReconcileError;
use crate::workload::Workload;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use tracing::warn;

/// Source tag of a config built from the workload annotation alone.
pub const SOURCE_ANNOTATION: &str = "annotation";

/// Resolved availability settings for one workload.
#[derive(Clone, Debug, PartialEq)]
pub struct AvailabilityConfig {
    pub availability_class: AvailabilityClass,
    pub component_function: ComponentFunction,
    pub min_available: IntOrString,
    pub description: String,
    /// Maintenance window in `HH:MM-HH:MM TZ` form, when one applies.
    pub maintenance_window: Option<String>,
    /// How the config was resolved (`annotation`, `policy-strict`, ...).
    pub source: String,
    pub policy_name: Option<String>,
    pub enforcement: Option<EnforcementMode>,
    pub unhealthy_pod_eviction_policy: Option<String>,
}

impl AvailabilityConfig {
    /// Enforcement mode label written to the PDB, `none` for annotation-only configs.
    #[must_use]
    pub fn enforcement_label(&self) -> &str {
        self.enforcement
            .as_ref()
            .map_or("none", EnforcementMode::as_str)
    }

    /// Rebuild the config for a different class, keeping policy identity.
    ///
    /// Used when flexible enforcement raises an annotation to the policy minimum.
    #[must_use]
    pub fn with_class(&self, class: AvailabilityClass) -> Self {
        let min_available = default_min_available(&class, &self.component_function)
            .unwrap_or_else(|| self.min_available.clone());
        Self {
            description: describe(&class, &self.component_function, &min_available),
            availability_class: class,
            min_available,
            ..self.clone()
        }
    }
}

/// Default `minAvailable` for a class and component function.
///
/// Returns `None` for `custom` and unknown classes, which carry no default.
#[must_use]
pub fn default_min_available(
    class: &AvailabilityClass,
    function: &ComponentFunction,
) -> Option<IntOrString> {
    let security = *function == ComponentFunction::Security;
    let percent = match class {
        AvailabilityClass::NonCritical if security => "50%",
        AvailabilityClass::NonCritical => "20%",
        AvailabilityClass::Standard if security => "75%",
        AvailabilityClass::Standard => "50%",
        AvailabilityClass::HighAvailability => "75%",
        AvailabilityClass::MissionCritical => "90%",
        AvailabilityClass::Custom | AvailabilityClass::Unknown(_) => return None,
    };
    Some(IntOrString::String(percent.to_string()))
}

/// Render an `IntOrString` the way it appears in a manifest.
#[must_use]
pub fn int_or_string_to_string(value: &IntOrString) -> String {
    match value {
        IntOrString::Int(n) => n.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}

/// `minAvailable` equivalent of a `maxUnavailable` setting.
///
/// A percentage `p%` becomes `(100 - p)%`; an absolute `n` becomes
/// `max(replicas - n, 0)`. Returns `None` for malformed percentages.
#[must_use]
pub fn complement_of_max_unavailable(
    max_unavailable: &IntOrString,
    replicas: i32,
) -> Option<IntOrString> {
    match max_unavailable {
        IntOrString::Int(n) => Some(IntOrString::Int((replicas - n).max(0))),
        IntOrString::String(s) => {
            let percent: i32 = s.trim().strip_suffix('%')?.trim().parse().ok()?;
            if !(0..=100).contains(&percent) {
                return None;
            }
            Some(IntOrString::String(format!("{}%", 100 - percent)))
        }
    }
}

fn describe(
    class: &AvailabilityClass,
    function: &ComponentFunction,
    min_available: &IntOrString,
) -> String {
    format!(
        "{class} availability for {function} component ({} minimum available)",
        int_or_string_to_string(min_available)
    )
}

/// Format a policy maintenance window as `HH:MM-HH:MM TZ`.
#[must_use]
pub fn format_maintenance_window(window: &MaintenanceWindow) -> String {
    let timezone = if window.timezone.is_empty() {
        DEFAULT_MAINTENANCE_TIMEZONE
    } else {
        window.timezone.as_str()
    };
    format!("{}-{} {timezone}", window.start, window.end)
}

/// Parse the workload's `availability-class` annotation.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidAvailabilityClass`] when the annotation is
/// present but names no recognized class.
pub fn annotation_class(workload: &Workload) -> Result<Option<AvailabilityClass>, ReconcileError> {
    let Some(value) = workload.annotation(ANNOTATION_AVAILABILITY_CLASS) else {
        return Ok(None);
    };
    AvailabilityClass::parse(value.trim())
        .map(Some)
        .ok_or_else(|| ReconcileError::InvalidAvailabilityClass {
            workload: workload.key().to_string(),
            class: value.to_string(),
        })
}

/// Build the annotation-derived config for a workload.
///
/// `custom` carries no explicit PDB settings on a workload and falls back to the
/// `standard` default.
///
/// # Errors
///
/// Fails when the class annotation is invalid.
pub fn config_from_annotations(
    workload: &Workload,
    function: &ComponentFunction,
) -> Result<Option<AvailabilityConfig>, ReconcileError> {
    let Some(class) = annotation_class(workload)? else {
        return Ok(None);
    };

    let min_available = default_min_available(&class, function)
        .or_else(|| default_min_available(&AvailabilityClass::Standard, function))
        .unwrap_or_else(|| IntOrString::String("50%".to_string()));

    Ok(Some(AvailabilityConfig {
        description: describe(&class, function, &min_available),
        availability_class: class,
        component_function: function.clone(),
        min_available,
        maintenance_window: workload
            .annotation(ANNOTATION_MAINTENANCE_WINDOW)
            .map(str::to_string),
        source: SOURCE_ANNOTATION.to_string(),
        policy_name: None,
        enforcement: None,
        unhealthy_pod_eviction_policy: None,
    }))
}

fn custom_min_available(config: &CustomPdbConfig, replicas: i32) -> Option<IntOrString> {
    if let Some(min) = &config.min_available {
        return Some(min.clone());
    }
    config
        .max_unavailable
        .as_ref()
        .and_then(|max| complement_of_max_unavailable(max, replicas))
}

/// Convert a matching policy into a config for `workload`.
///
/// The source is the policy name; the enforcement resolver replaces it with the
/// resolution outcome.
#[must_use]
pub fn config_from_policy(
    policy: &AvailabilityPolicy,
    workload: &Workload,
    function: &ComponentFunction,
) -> AvailabilityConfig {
    let class = policy.spec.availability_class.clone();
    let custom = policy.spec.custom_pdb_config.as_ref();

    let min_available = match (&class, custom) {
        (AvailabilityClass::Custom, Some(custom)) => custom_min_available(custom, workload.replicas),
        _ => default_min_available(&class, function),
    }
    .unwrap_or_else(|| {
        warn!(
            policy = %policy.name_any(),
            class = %class,
            "Policy yields no minAvailable, falling back to the standard default"
        );
        default_min_available(&AvailabilityClass::Standard, function)
            .unwrap_or_else(|| IntOrString::String("50%".to_string()))
    });

    let maintenance_window = workload
        .annotation(ANNOTATION_MAINTENANCE_WINDOW)
        .map(str::to_string)
        .or_else(|| {
            policy
                .spec
                .maintenance_windows
                .first()
                .map(format_maintenance_window)
        });

    AvailabilityConfig {
        description: describe(&class, function, &min_available),
        availability_class: class,
        component_function: function.clone(),
        min_available,
        maintenance_window,
        source: policy.name_any(),
        policy_name: Some(policy.name_any()),
        enforcement: Some(policy.spec.enforcement_mode()),
        unhealthy_pod_eviction_policy: custom.and_then(|c| c.unhealthy_pod_eviction_policy.clone()),
    }
}

#[cfg(test)]
#[path = "availability_tests.rs"]
mod availability_tests;
