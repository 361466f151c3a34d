// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers and the `AvailabilityPolicy` status updater.
//!
//! # Condition Format
//!
//! Conditions follow the Kubernetes conventions:
//! - `type`: `Ready` or `Validated`
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: A programmatic identifier (CamelCase)
//! - `message`: A human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp of the last status flip
//! - `observedGeneration`: policy generation the condition was computed from
//!
//! # Example
//!
//! ```rust,no_run
//! use pdb_operator::reconcilers::status::create_condition;
//!
//! let condition = create_condition(
//!     "Ready",
//!     "True",
//!     "ComponentsMatched",
//!     "Policy applies to 3 component(s)",
//!     Some(2),
//! );
//! ```

use crate::crd::{AvailabilityPolicy, AvailabilityPolicyStatus, Condition};
use crate::errors::ReconcileError;
use crate::reconcilers::retry::retry_store_call;
use crate::store::{ObjectStore, StoreError};
use chrono::Utc;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Condition types written on policies.
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_VALIDATED: &str = "Validated";

/// Condition reasons written on policies.
pub const REASON_COMPONENTS_MATCHED: &str = "ComponentsMatched";
pub const REASON_NO_MATCHING_COMPONENTS: &str = "NoMatchingComponents";
pub const REASON_VALIDATION_PASSED: &str = "ValidationPassed";
pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";

/// Create a new condition with the current timestamp.
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
        observed_generation,
    }
}

/// Find a condition by type in a list of conditions.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Update or add a condition in a mutable conditions list (in-memory, no API call).
///
/// The `lastTransitionTime` is preserved when the status value is unchanged and
/// reset to now when it flips.
pub fn update_condition_in_memory(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        let last_transition_time = if existing.status == status {
            existing
                .last_transition_time
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339())
        } else {
            Utc::now().to_rfc3339()
        };

        existing.status = status.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
        existing.last_transition_time = Some(last_transition_time);
        existing.observed_generation = observed_generation;
    } else {
        conditions.push(create_condition(
            condition_type,
            status,
            reason,
            message,
            observed_generation,
        ));
    }
}

/// Compare two condition lists, ignoring `lastTransitionTime`.
#[must_use]
pub fn conditions_equal(current: &[Condition], new: &[Condition]) -> bool {
    if current.len() != new.len() {
        return false;
    }

    new.iter().all(|new_cond| {
        find_condition(current, &new_cond.r#type).is_some_and(|curr_cond| {
            curr_cond.status == new_cond.status
                && curr_cond.reason == new_cond.reason
                && curr_cond.message == new_cond.message
                && curr_cond.observed_generation == new_cond.observed_generation
        })
    })
}

/// Collects status changes for one `AvailabilityPolicy` and writes them in a
/// single compare-and-swap replace.
///
/// # Example
///
/// ```rust,ignore
/// let mut status = PolicyStatusUpdater::new(&policy);
/// status.set_condition(CONDITION_VALIDATED, "True", REASON_VALIDATION_PASSED, "Spec is valid");
/// status.set_applied_components(components);
/// status.set_observed_generation(policy.metadata.generation);
/// status.apply(store, &cancel).await?;
/// ```
pub struct PolicyStatusUpdater {
    policy: AvailabilityPolicy,
    current_status: Option<AvailabilityPolicyStatus>,
    new_status: AvailabilityPolicyStatus,
}

impl PolicyStatusUpdater {
    #[must_use]
    pub fn new(policy: &AvailabilityPolicy) -> Self {
        let current_status = policy.status.clone();
        Self {
            policy: policy.clone(),
            new_status: current_status.clone().unwrap_or_default(),
            current_status,
        }
    }

    /// Update or add a condition (in-memory only).
    pub fn set_condition(&mut self, condition_type: &str, status: &str, reason: &str, message: &str) {
        update_condition_in_memory(
            &mut self.new_status.conditions,
            condition_type,
            status,
            reason,
            message,
            self.policy.metadata.generation,
        );
    }

    /// Set the `namespace/component` list and its count.
    pub fn set_applied_components(&mut self, components: Vec<String>) {
        self.new_status.component_count = i32::try_from(components.len()).unwrap_or(i32::MAX);
        self.new_status.applied_to_components = components;
    }

    pub fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.new_status.observed_generation = generation;
    }

    /// True when the collected status differs semantically from the stored one.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        match &self.current_status {
            None => true,
            Some(current) => {
                current.applied_to_components != self.new_status.applied_to_components
                    || current.component_count != self.new_status.component_count
                    || current.observed_generation != self.new_status.observed_generation
                    || !conditions_equal(&current.conditions, &self.new_status.conditions)
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> &AvailabilityPolicyStatus {
        &self.new_status
    }

    /// Write the collected status if it changed.
    ///
    /// The first attempt uses the policy as observed; a conflict refetches the
    /// latest version before retrying. Returns `true` when a write happened.
    ///
    /// # Errors
    ///
    /// Returns the store error once retries are exhausted.
    pub async fn apply(
        &mut self,
        store: &dyn ObjectStore,
        cancel: &CancellationToken,
    ) -> Result<bool, ReconcileError> {
        let name = self.policy.name_any();
        if !self.has_changes() {
            debug!("AvailabilityPolicy {} status unchanged, skipping update", name);
            return Ok(false);
        }

        self.new_status.last_updated = Some(Utc::now().to_rfc3339());
        let status = self.new_status.clone();
        let observed = self.policy.clone();
        let mut first_attempt = true;

        retry_store_call(
            || {
                let refetch = !std::mem::replace(&mut first_attempt, false);
                let mut target = observed.clone();
                let status = status.clone();
                let name = name.clone();
                async move {
                    if refetch {
                        target = store.get_policy(&name).await?.ok_or_else(|| {
                            StoreError::NotFound {
                                resource: format!("AvailabilityPolicy {name}"),
                            }
                        })?;
                    }
                    target.status = Some(status);
                    store.replace_policy_status(&target).await
                }
            },
            "update policy status",
            cancel,
        )
        .await?;

        debug!(
            "Updated AvailabilityPolicy {} status: {} condition(s), {} component(s)",
            name,
            self.new_status.conditions.len(),
            self.new_status.component_count
        );
        Ok(true)
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
