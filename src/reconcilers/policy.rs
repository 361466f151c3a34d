// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `AvailabilityPolicy` reconciliation.
//!
//! Keeps the policy cache fresh, owns the policy finalizer, validates the
//! defaulted spec and reports which components the policy applies to. The
//! PDBs themselves are written by the workload reconciler, which the
//! controller wiring re-triggers for every workload a policy selects.
//!
//! Policies are re-validated every `REQUEUE_INTERVAL_SECONDS` (5 minutes by
//! default) even without changes.

use crate::audit::actions as audit_actions;
use crate::constants::{FINALIZER_AVAILABILITY_POLICY, KIND_AVAILABILITY_POLICY};
use crate::context::Context;
use crate::crd::AvailabilityPolicy;
use crate::errors::ReconcileError;
use crate::events::{actions, policy_reference, reasons, PendingEvent};
use crate::metrics;
use crate::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
use crate::reconcilers::retry::retry_store_call;
use crate::reconcilers::status::{
    PolicyStatusUpdater, CONDITION_READY, CONDITION_VALIDATED, REASON_COMPONENTS_MATCHED,
    REASON_NO_MATCHING_COMPONENTS, REASON_VALIDATION_FAILED, REASON_VALIDATION_PASSED,
};
use crate::reconcilers::{should_reconcile, ReconcileOutcome};
use crate::selector::{component_name, infer_component_function, policy_matches};
use crate::telemetry::ReconcileScope;
use crate::validation;
use crate::workload::Workload;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Namespace label used for policies without a namespace allow-list.
pub const ALL_NAMESPACES: &str = "*";

/// Reconcile the policy named `name`.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidPolicy`] when the defaulted spec fails
/// validation, or a store error after retries.
pub async fn reconcile_policy(
    ctx: &Context,
    name: &str,
    scope: &ReconcileScope,
) -> Result<ReconcileOutcome, ReconcileError> {
    let store = ctx.store.as_ref();

    let Some(policy) = retry_store_call(|| store.get_policy(name), "get policy", &scope.cancel).await?
    else {
        debug!("AvailabilityPolicy not found, invalidating cache");
        ctx.cache.invalidate_policy(name);
        refresh_active_policies(ctx, scope).await?;
        return Ok(ReconcileOutcome::done());
    };

    ctx.cache.set(name, policy.clone());

    if policy.metadata.deletion_timestamp.is_some() {
        return handle_deletion(ctx, &policy, scope).await;
    }

    let policy = if ensure_finalizer(store, &policy, FINALIZER_AVAILABILITY_POLICY, &scope.cancel)
        .await?
    {
        retry_store_call(|| store.get_policy(name), "get policy", &scope.cancel)
            .await?
            .unwrap_or(policy)
    } else {
        policy
    };

    for warning in validation::warnings(&policy.spec) {
        warn!(policy = name, "{warning}");
    }

    let defaulted = validation::defaulted(&policy);
    let errors = validation::validate(&defaulted.spec);
    let mut status = PolicyStatusUpdater::new(&policy);
    status.set_observed_generation(policy.metadata.generation);

    if !errors.is_empty() {
        let message = validation::format_errors(&errors);
        warn!(policy = name, errors = %message, "AvailabilityPolicy failed validation");
        status.set_condition(
            CONDITION_VALIDATED,
            "False",
            REASON_VALIDATION_FAILED,
            &message,
        );
        status.set_condition(
            CONDITION_READY,
            "False",
            REASON_VALIDATION_FAILED,
            "Policy is not applied until validation errors are fixed",
        );
        status.set_applied_components(Vec::new());
        if status.apply(store, &scope.cancel).await? {
            ctx.events
                .publish_pending(
                    &policy_reference(&policy),
                    &PendingEvent::warning(
                        reasons::POLICY_VALIDATION_FAILED,
                        actions::VALIDATE,
                        message.clone(),
                    ),
                )
                .await;
        }
        refresh_active_policies(ctx, scope).await?;
        return Err(ReconcileError::InvalidPolicy {
            policy: name.to_string(),
            message,
        });
    }

    let workloads =
        retry_store_call(|| store.list_workloads(), "list workloads", &scope.cancel).await?;
    let components = matching_components(&defaulted, &workloads, ctx.config.strict_function_inference);
    let count = components.len();

    status.set_condition(
        CONDITION_VALIDATED,
        "True",
        REASON_VALIDATION_PASSED,
        "Policy spec is valid",
    );
    if count > 0 {
        status.set_condition(
            CONDITION_READY,
            "True",
            REASON_COMPONENTS_MATCHED,
            &format!("Policy applies to {count} component(s)"),
        );
    } else {
        status.set_condition(
            CONDITION_READY,
            "False",
            REASON_NO_MATCHING_COMPONENTS,
            "No workload matches the component selector",
        );
    }
    status.set_applied_components(components);

    let spec_changed = policy.status.as_ref().is_some_and(|s| {
        s.observed_generation.is_some()
            && should_reconcile(policy.metadata.generation, s.observed_generation)
    });

    if status.apply(store, &scope.cancel).await? {
        let reference = policy_reference(&policy);
        if spec_changed {
            ctx.events
                .publish_pending(
                    &reference,
                    &PendingEvent::normal(
                        reasons::POLICY_UPDATED,
                        actions::UPDATE,
                        format!(
                            "Policy spec changed to generation {}",
                            policy.metadata.generation.unwrap_or_default()
                        ),
                    ),
                )
                .await;
        }
        ctx.events
            .publish_pending(
                &reference,
                &PendingEvent::normal(
                    reasons::POLICY_APPLIED,
                    actions::RECONCILE,
                    format!(
                        "Policy with class {} applies to {count} component(s)",
                        defaulted.spec.availability_class
                    ),
                ),
            )
            .await;
        ctx.audit.record(
            scope
                .audit(audit_actions::POLICY_APPLY, KIND_AVAILABILITY_POLICY, "", name)
                .with("componentCount", count)
                .with("availabilityClass", defaulted.spec.availability_class.as_str())
                .with("enforcement", defaulted.spec.enforcement_mode().as_str()),
        );
        info!(components = count, "Applied AvailabilityPolicy");
    }

    refresh_active_policies(ctx, scope).await?;
    Ok(ReconcileOutcome::after(ctx.config.policy_requeue_interval()))
}

/// Sorted, de-duplicated `namespace/component` list of workloads `policy` selects.
#[must_use]
pub fn matching_components(
    policy: &AvailabilityPolicy,
    workloads: &[Workload],
    strict_inference: bool,
) -> Vec<String> {
    let mut components: Vec<String> = workloads
        .iter()
        .filter(|w| !w.is_being_deleted())
        .filter(|w| {
            let function = infer_component_function(w, strict_inference);
            policy_matches(policy, w, &function)
        })
        .map(|w| format!("{}/{}", w.namespace, component_name(w)))
        .collect();
    components.sort();
    components.dedup();
    components
}

async fn handle_deletion(
    ctx: &Context,
    policy: &AvailabilityPolicy,
    scope: &ReconcileScope,
) -> Result<ReconcileOutcome, ReconcileError> {
    let name = policy.name_any();
    info!("AvailabilityPolicy is being deleted");

    if remove_finalizer(
        ctx.store.as_ref(),
        policy,
        FINALIZER_AVAILABILITY_POLICY,
        &scope.cancel,
    )
    .await?
    {
        ctx.events
            .publish_pending(
                &policy_reference(policy),
                &PendingEvent::normal(
                    reasons::POLICY_REMOVED,
                    actions::DELETE,
                    "Policy removed; matching workloads fall back to annotations or other policies",
                ),
            )
            .await;
        ctx.audit.record(scope.audit(
            audit_actions::POLICY_REMOVE,
            KIND_AVAILABILITY_POLICY,
            "",
            &name,
        ));
    }

    ctx.cache.invalidate_policy(&name);
    refresh_active_policies(ctx, scope).await?;
    Ok(ReconcileOutcome::done())
}

/// Recount the active-policies gauge: one entry per namespace a live policy
/// targets, [`ALL_NAMESPACES`] for cluster-wide policies.
async fn refresh_active_policies(
    ctx: &Context,
    scope: &ReconcileScope,
) -> Result<(), ReconcileError> {
    let store = ctx.store.as_ref();
    let policies =
        retry_store_call(|| store.list_policies(), "list policies", &scope.cancel).await?;

    let counts = active_policy_counts(&policies);
    metrics::reset_active_policies();
    for (namespace, count) in &counts {
        metrics::set_active_policies(namespace, *count);
    }
    Ok(())
}

/// Live policies per targeted namespace.
#[must_use]
pub fn active_policy_counts(policies: &[AvailabilityPolicy]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for policy in policies
        .iter()
        .filter(|p| p.metadata.deletion_timestamp.is_none())
    {
        let namespaces = &policy.spec.component_selector.namespaces;
        if namespaces.is_empty() {
            *counts.entry(ALL_NAMESPACES.to_string()).or_insert(0) += 1;
        }
        for namespace in namespaces {
            *counts.entry(namespace.clone()).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod policy_tests;
