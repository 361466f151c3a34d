// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for availability management.
//!
//! This module defines the cluster-scoped [`AvailabilityPolicy`] resource and the
//! enumerated types shared by the reconcilers.
//!
//! Enumerated fields are exhaustive variants with an `Unknown` catch-all so that a
//! malformed object still deserializes at the API edge and can be rejected by the
//! validator with a field-scoped error instead of breaking the watch stream.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: availability.oda.tmforum.org/v1alpha1
//! kind: AvailabilityPolicy
//! metadata:
//!   name: security-components
//! spec:
//!   availabilityClass: high-availability
//!   enforcement: flexible
//!   minimumClass: standard
//!   priority: 200
//!   componentSelector:
//!     componentFunctions: [security]
//!     namespaces: [components]
//! ```

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Availability Class
// ============================================================================

/// Availability class requested by a workload or enforced by a policy.
///
/// Classes are totally ordered:
/// `non-critical < standard < high-availability < mission-critical < custom`.
/// Unknown values rank below every known class.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AvailabilityClass {
    NonCritical,
    #[default]
    Standard,
    HighAvailability,
    MissionCritical,
    Custom,
    Unknown(String),
}

impl AvailabilityClass {
    /// All recognized classes in ascending order.
    pub const KNOWN: [AvailabilityClass; 5] = [
        AvailabilityClass::NonCritical,
        AvailabilityClass::Standard,
        AvailabilityClass::HighAvailability,
        AvailabilityClass::MissionCritical,
        AvailabilityClass::Custom,
    ];

    /// Parse a recognized class, returning `None` for anything else.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match Self::from(value.to_string()) {
            Self::Unknown(_) => None,
            class => Some(class),
        }
    }

    /// Position in the class total order. Unknown classes rank as 0.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::NonCritical => 1,
            Self::Standard => 2,
            Self::HighAvailability => 3,
            Self::MissionCritical => 4,
            Self::Custom => 5,
            Self::Unknown(_) => 0,
        }
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::NonCritical => "non-critical",
            Self::Standard => "standard",
            Self::HighAvailability => "high-availability",
            Self::MissionCritical => "mission-critical",
            Self::Custom => "custom",
            Self::Unknown(value) => value,
        }
    }
}

impl From<String> for AvailabilityClass {
    fn from(value: String) -> Self {
        match value.as_str() {
            "non-critical" => Self::NonCritical,
            "standard" => Self::Standard,
            "high-availability" => Self::HighAvailability,
            "mission-critical" => Self::MissionCritical,
            "custom" => Self::Custom,
            _ => Self::Unknown(value),
        }
    }
}

impl From<AvailabilityClass> for String {
    fn from(value: AvailabilityClass) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AvailabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Enforcement Mode
// ============================================================================

/// How a policy interacts with a workload's own availability annotation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnforcementMode {
    /// The policy always wins.
    Strict,
    /// The annotation wins if it meets the policy's minimum class.
    Flexible,
    /// The annotation wins when the policy's override rules allow it.
    #[default]
    Advisory,
    Unknown(String),
}

impl EnforcementMode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Strict => "strict",
            Self::Flexible => "flexible",
            Self::Advisory => "advisory",
            Self::Unknown(value) => value,
        }
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<String> for EnforcementMode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "strict" => Self::Strict,
            "flexible" => Self::Flexible,
            "advisory" => Self::Advisory,
            _ => Self::Unknown(value),
        }
    }
}

impl From<EnforcementMode> for String {
    fn from(value: EnforcementMode) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Component Function
// ============================================================================

/// Functional role of a component. `security` raises the default `minAvailable`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComponentFunction {
    #[default]
    Core,
    Management,
    Security,
    Unknown(String),
}

impl ComponentFunction {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match Self::from(value.to_string()) {
            Self::Unknown(_) => None,
            function => Some(function),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Core => "core",
            Self::Management => "management",
            Self::Security => "security",
            Self::Unknown(value) => value,
        }
    }
}

impl From<String> for ComponentFunction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "core" => Self::Core,
            "management" => Self::Management,
            "security" => Self::Security,
            _ => Self::Unknown(value),
        }
    }
}

impl From<ComponentFunction> for String {
    fn from(value: ComponentFunction) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ComponentFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Selectors
// ============================================================================

/// A label selector requirement is a selector that contains values, a key, and an operator
/// that relates the key and values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LabelSelectorRequirement {
    /// The label key that the selector applies to.
    pub key: String,

    /// Operator represents a key's relationship to a set of values.
    /// Valid operators are In, `NotIn`, Exists and `DoesNotExist`.
    pub operator: String,

    /// An array of string values. If the operator is In or `NotIn`,
    /// the values array must be non-empty. If the operator is Exists or `DoesNotExist`,
    /// the values array must be empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Selects the workloads a policy applies to.
///
/// Every non-empty clause must match; empty clauses are ignored. A selector with no
/// clauses at all is rejected by the validator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSelector {
    /// Explicit component names (`component-name` annotation, falling back to the workload name).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub component_names: Vec<String>,

    /// Component functions: `core`, `management`, `security`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(with = "Vec<String>")]
    pub component_functions: Vec<ComponentFunction>,

    /// Workload labels that must be present with the given values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Set-based label requirements.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,

    /// Namespace allow-list. Empty means every namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

impl ComponentSelector {
    /// True when no clause is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.component_names.is_empty()
            && self.component_functions.is_empty()
            && self.match_labels.is_empty()
            && self.match_expressions.is_empty()
            && self.namespaces.is_empty()
    }
}

// ============================================================================
// Policy Spec
// ============================================================================

/// A recurring time range during which relaxed availability semantics may apply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindow {
    /// Start time, `HH:MM` (24h).
    pub start: String,

    /// End time, `HH:MM` (24h). An end before the start wraps midnight.
    pub end: String,

    /// IANA timezone name. Defaults to `UTC`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timezone: String,

    /// Days of the week (0 = Sunday .. 6 = Saturday). Defaults to every day.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<i32>,
}

/// Explicit PDB settings for the `custom` class. Exactly one of `minAvailable`
/// and `maxUnavailable` must be set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomPdbConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<IntOrString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    /// `IfHealthyBudget` or `AlwaysAllow`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unhealthy_pod_eviction_policy: Option<String>,
}

/// `AvailabilityPolicy` declares the availability class for a set of components.
///
/// When several policies select the same workload, the one with the highest priority
/// wins; equal priorities are broken by lexicographic `namespace/name`.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "availability.oda.tmforum.org",
    version = "v1alpha1",
    kind = "AvailabilityPolicy",
    shortname = "apol",
    category = "oda-canvas",
    doc = "AvailabilityPolicy declares the availability class and enforcement rules the operator applies when synthesizing PodDisruptionBudgets for matching components.",
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.availabilityClass"}"#,
    printcolumn = r#"{"name":"Enforcement","type":"string","jsonPath":".spec.enforcement"}"#,
    printcolumn = r#"{"name":"Priority","type":"integer","jsonPath":".spec.priority"}"#,
    printcolumn = r#"{"name":"Components","type":"integer","jsonPath":".status.componentCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "AvailabilityPolicyStatus")]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityPolicySpec {
    /// `non-critical`, `standard`, `high-availability`, `mission-critical` or `custom`.
    #[schemars(with = "String")]
    pub availability_class: AvailabilityClass,

    /// Which workloads this policy applies to.
    #[serde(default)]
    pub component_selector: ComponentSelector,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintenance_windows: Vec<MaintenanceWindow>,

    /// Required when `availabilityClass` is `custom`.
    #[serde(
        rename = "customPDBConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_pdb_config: Option<CustomPdbConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce_min_replicas: Option<bool>,

    /// 0..=1000, higher wins. Defaults to 50.
    #[serde(default)]
    pub priority: i32,

    /// `strict`, `flexible` or `advisory` (default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub enforcement: Option<EnforcementMode>,

    /// Lowest class an annotation may request under `flexible` enforcement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub minimum_class: Option<AvailabilityClass>,

    /// Whether a workload annotation may override this policy (advisory only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_override: Option<bool>,

    /// Annotation key a workload must carry for its override to be honored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_requires_annotation: Option<String>,

    /// When true an override must carry the `override-reason` annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_requires_reason: Option<bool>,
}

impl AvailabilityPolicySpec {
    /// Enforcement mode with the `advisory` default applied.
    #[must_use]
    pub fn enforcement_mode(&self) -> EnforcementMode {
        self.enforcement.clone().unwrap_or_default()
    }
}

// ============================================================================
// Status
// ============================================================================

/// Condition represents an observation of a resource's current state.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition: `Ready` or `Validated`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Generation of the policy the condition was computed from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// `AvailabilityPolicy` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityPolicyStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// `namespace/component` for every workload the policy currently applies to.
    #[serde(default)]
    pub applied_to_components: Vec<String>,

    #[serde(default)]
    pub component_count: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
