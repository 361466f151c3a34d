// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Policy matching and selection.
//!
//! This module decides which [`AvailabilityPolicy`] applies to a workload:
//!
//! 1. The workload's component function is inferred (annotation, then name heuristic).
//! 2. Every policy whose `componentSelector` clauses all match is collected.
//! 3. The highest `priority` wins; equal priorities are broken by ascending
//!    `namespace/name`.
//!
//! It also provides the watch mappers that fan policy and workload changes out
//! through reflector stores.
//!
//! # Example
//!
//! ```rust,no_run
//! use pdb_operator::selector::{infer_component_function, select_policy};
//! use pdb_operator::crd::AvailabilityPolicy;
//! use pdb_operator::workload::Workload;
//!
//! # fn example(policies: Vec<AvailabilityPolicy>, workload: Workload) {
//! let function = infer_component_function(&workload, false);
//! if let Some(selection) = select_policy(&policies, &workload, &function) {
//!     println!("policy {} wins", selection.key);
//! }
//! # }
//! ```

use crate::constants::{ANNOTATION_COMPONENT_FUNCTION, ANNOTATION_COMPONENT_NAME};
use crate::crd::{AvailabilityPolicy, ComponentFunction, ComponentSelector, LabelSelectorRequirement};
use crate::workload::Workload;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Name fragments that mark a security component.
const SECURITY_TOKENS: &[&str] = &[
    "auth", "security", "identity", "keycloak", "oauth", "jwt", "rbac",
];

/// Name fragments that mark a management component.
const MANAGEMENT_TOKENS: &[&str] = &["operator", "controller", "manager", "webhook", "admission"];

// ============================================================================
// Label selectors
// ============================================================================

/// Evaluate a set-based requirement against a label map.
///
/// Unknown operators never match.
#[must_use]
pub fn requirement_matches(
    requirement: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> bool {
    let value = labels.get(&requirement.key);
    match requirement.operator.as_str() {
        "In" => value.is_some_and(|v| requirement.values.contains(v)),
        "NotIn" => value.is_none_or(|v| !requirement.values.contains(v)),
        "Exists" => value.is_some(),
        "DoesNotExist" => value.is_none(),
        _ => false,
    }
}

/// True when every entry of `subset` is present in `superset` with the same value.
fn is_subset(subset: &BTreeMap<String, String>, superset: &BTreeMap<String, String>) -> bool {
    subset
        .iter()
        .all(|(key, value)| superset.get(key) == Some(value))
}

/// Two equality selectors overlap when either one is a subset of the other.
///
/// Empty selectors never overlap anything, so a PDB with an empty selector is
/// never mistaken for a duplicate.
#[must_use]
pub fn selectors_overlap(a: &BTreeMap<String, String>, b: &BTreeMap<String, String>) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    is_subset(a, b) || is_subset(b, a)
}

// ============================================================================
// Component identity
// ============================================================================

/// Infer the component function of a workload.
///
/// Precedence: a valid `component-function` annotation, then (unless `strict`)
/// a substring match of the workload name against known tokens, then `core`.
#[must_use]
pub fn infer_component_function(workload: &Workload, strict: bool) -> ComponentFunction {
    if let Some(function) = workload
        .annotation(ANNOTATION_COMPONENT_FUNCTION)
        .and_then(|value| ComponentFunction::parse(value.trim()))
    {
        return function;
    }

    if !strict {
        let name = workload.name.to_lowercase();
        if SECURITY_TOKENS.iter().any(|token| name.contains(token)) {
            return ComponentFunction::Security;
        }
        if MANAGEMENT_TOKENS.iter().any(|token| name.contains(token)) {
            return ComponentFunction::Management;
        }
    }

    ComponentFunction::Core
}

/// Component name of a workload: the `component-name` annotation, else the workload name.
#[must_use]
pub fn component_name(workload: &Workload) -> &str {
    workload
        .annotation(ANNOTATION_COMPONENT_NAME)
        .filter(|name| !name.is_empty())
        .unwrap_or(&workload.name)
}

// ============================================================================
// Policy matching
// ============================================================================

/// True when every non-empty clause of `selector` matches the workload.
///
/// A selector without clauses matches nothing.
#[must_use]
pub fn selector_matches(
    selector: &ComponentSelector,
    workload: &Workload,
    function: &ComponentFunction,
) -> bool {
    if selector.is_empty() {
        return false;
    }

    if !selector.namespaces.is_empty() && !selector.namespaces.contains(&workload.namespace) {
        return false;
    }

    if !selector.component_names.is_empty() {
        let name = component_name(workload);
        if !selector.component_names.iter().any(|n| n == name) {
            return false;
        }
    }

    if !selector.component_functions.is_empty()
        && !selector.component_functions.contains(function)
    {
        return false;
    }

    if !is_subset(&selector.match_labels, &workload.labels) {
        return false;
    }

    selector
        .match_expressions
        .iter()
        .all(|requirement| requirement_matches(requirement, &workload.labels))
}

/// True when `policy` selects `workload`. Policies being deleted select nothing.
#[must_use]
pub fn policy_matches(
    policy: &AvailabilityPolicy,
    workload: &Workload,
    function: &ComponentFunction,
) -> bool {
    policy.metadata.deletion_timestamp.is_none()
        && selector_matches(&policy.spec.component_selector, workload, function)
}

/// Ordering key used for tie-breaks: `namespace/name`.
#[must_use]
pub fn policy_key(policy: &AvailabilityPolicy) -> String {
    format!(
        "{}/{}",
        policy.namespace().unwrap_or_default(),
        policy.name_any()
    )
}

/// Outcome of policy selection for one workload.
#[derive(Clone, Debug)]
pub struct PolicySelection {
    pub policy: AvailabilityPolicy,
    /// `namespace/name` of the selected policy.
    pub key: String,
    /// Number of policies that matched.
    pub matched: usize,
    /// Keys of the other policies sharing the winning priority.
    pub tied_with: Vec<String>,
}

impl PolicySelection {
    #[must_use]
    pub fn is_tie(&self) -> bool {
        !self.tied_with.is_empty()
    }
}

/// Select the policy that applies to `workload`.
///
/// The result is independent of the order of `policies`.
#[must_use]
pub fn select_policy(
    policies: &[AvailabilityPolicy],
    workload: &Workload,
    function: &ComponentFunction,
) -> Option<PolicySelection> {
    let mut matching: Vec<(i32, String, &AvailabilityPolicy)> = policies
        .iter()
        .filter(|policy| policy_matches(policy, workload, function))
        .map(|policy| (policy.spec.priority, policy_key(policy), policy))
        .collect();

    // Highest priority first, then ascending key.
    matching.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let (priority, key, winner) = matching.first()?;
    let tied_with = matching
        .iter()
        .skip(1)
        .filter(|(p, _, _)| p == priority)
        .map(|(_, k, _)| k.clone())
        .collect();

    Some(PolicySelection {
        policy: (*winner).clone(),
        key: key.clone(),
        matched: matching.len(),
        tied_with,
    })
}

// ============================================================================
// Watch mappers
// ============================================================================

/// Find every policy in the reflector store that selects `deployment`.
///
/// Used by the policy controller so a workload change refreshes the status of
/// each policy it matches.
pub fn find_policies_for_workload(
    store: &Store<AvailabilityPolicy>,
    deployment: &Deployment,
    strict_inference: bool,
) -> Vec<ObjectRef<AvailabilityPolicy>> {
    let workload = Workload::from_deployment(deployment);
    let function = infer_component_function(&workload, strict_inference);

    store
        .state()
        .iter()
        .filter(|policy| selector_matches(&policy.spec.component_selector, &workload, &function))
        .map(|policy| ObjectRef::from_obj(&**policy))
        .collect()
}

/// Fans policy changes out to the deployments they affect.
///
/// The last seen selector of every policy is kept, so an edit that narrows a
/// policy also re-enqueues the deployments it no longer selects.
#[derive(Debug, Default)]
pub struct PolicyFanout {
    previous: Mutex<HashMap<String, ComponentSelector>>,
}

impl PolicyFanout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deployments in `store` selected by the current or the previous version of `policy`.
    pub fn workloads_for(
        &self,
        store: &Store<Deployment>,
        policy: &AvailabilityPolicy,
        strict_inference: bool,
    ) -> Vec<ObjectRef<Deployment>> {
        let previous = {
            let mut seen = self
                .previous
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if policy.metadata.deletion_timestamp.is_some() {
                seen.remove(&policy.name_any())
            } else {
                seen.insert(policy.name_any(), policy.spec.component_selector.clone())
            }
        };
        let current = &policy.spec.component_selector;

        store
            .state()
            .iter()
            .filter(|deployment| {
                let workload = Workload::from_deployment(deployment);
                let function = infer_component_function(&workload, strict_inference);
                selector_matches(current, &workload, &function)
                    || previous.as_ref().is_some_and(|old| {
                        old != current && selector_matches(old, &workload, &function)
                    })
            })
            .map(|deployment| ObjectRef::from_obj(&**deployment))
            .collect()
    }

    /// Number of policies whose selector is remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.previous
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod selector_tests;
