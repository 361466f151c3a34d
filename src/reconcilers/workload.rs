// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Workload reconciliation.
//!
//! Drives each `Deployment` toward a managed PDB that matches its resolved
//! availability configuration. One pass walks these states in order:
//!
//! 1. **Fetch** - a missing workload is finished and its fingerprint dropped
//! 2. **Deletion** - delete the owned PDB, then release the cleanup finalizer
//! 3. **Replicas** - fewer than two replicas skips the workload and removes its PDB
//! 4. **Resolve** - annotation config, policy selection, enforcement
//! 5. **Change detection** - an unchanged fingerprint ends the pass with no writes
//! 6. **Finalizer** - added on first management, followed by a requeue
//! 7. **PDB** - create, patch or leave the PDB, then record the new fingerprint
//!
//! The same pass serves the direct (annotation-only) controller with policy
//! lookup switched off; see [`Resolution`].

use crate::audit::actions as audit_actions;
use crate::availability::{config_from_annotations, config_from_policy, AvailabilityConfig};
use crate::constants::{
    CACHE_KEY_ALL_POLICIES, FINALIZER_PDB_CLEANUP, KIND_DEPLOYMENT, MIN_REPLICAS_FOR_PDB,
};
use crate::context::Context;
use crate::crd::AvailabilityPolicy;
use crate::enforcement::{resolve, EnforcementDecision};
use crate::errors::ReconcileError;
use crate::events::{actions, reasons, workload_reference, PendingEvent};
use crate::fingerprint;
use crate::maintenance;
use crate::metrics;
use crate::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
use crate::reconcilers::pdb::{self, PdbAction};
use crate::reconcilers::retry::retry_store_call;
use crate::reconcilers::ReconcileOutcome;
use crate::selector::{infer_component_function, select_policy, PolicySelection};
use crate::store::ObjectKey;
use crate::telemetry::ReconcileScope;
use crate::validation;
use crate::workload::Workload;
use tracing::{debug, info, warn};

/// Compliance gauge values.
pub mod compliance {
    pub const MANAGED: &str = "managed";
    pub const INSUFFICIENT_REPLICAS: &str = "insufficient_replicas";
    pub const CREATION_FAILED: &str = "creation_failed";
    pub const UPDATE_FAILED: &str = "update_failed";
    pub const DELETED: &str = "deleted";
    pub const UNMANAGED: &str = "unmanaged";
}

/// Where a workload's availability configuration may come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Annotation and matching policies, fused by the enforcement resolver.
    PolicyAware,
    /// The `availability-class` annotation and the defaults table only.
    AnnotationOnly,
}

/// Reconcile the workload identified by `key` with policy support.
///
/// # Errors
///
/// Returns an error when a store call fails after retries or when the
/// workload's `availability-class` annotation is invalid.
pub async fn reconcile_workload(
    ctx: &Context,
    key: &ObjectKey,
    scope: &ReconcileScope,
) -> Result<ReconcileOutcome, ReconcileError> {
    reconcile(ctx, key, scope, Resolution::PolicyAware).await
}

/// Policies that may apply to workloads: cached, defaulted and valid.
///
/// # Errors
///
/// Fails when listing policies fails after retries.
pub(crate) async fn load_policies(
    ctx: &Context,
    scope: &ReconcileScope,
) -> Result<Vec<AvailabilityPolicy>, ReconcileError> {
    if let Some(policies) = ctx.cache.get_list(CACHE_KEY_ALL_POLICIES) {
        return Ok(policies);
    }

    let store = ctx.store.as_ref();
    let listed = retry_store_call(|| store.list_policies(), "list policies", &scope.cancel).await?;
    let policies: Vec<AvailabilityPolicy> = listed
        .iter()
        .map(validation::defaulted)
        .filter(|policy| validation::validate(&policy.spec).is_empty())
        .collect();

    debug!(
        listed = listed.len(),
        usable = policies.len(),
        "Loaded availability policies"
    );
    ctx.cache.set_list(CACHE_KEY_ALL_POLICIES, policies.clone());
    Ok(policies)
}

/// Shared reconcile pass for both workload controllers.
pub(crate) async fn reconcile(
    ctx: &Context,
    key: &ObjectKey,
    scope: &ReconcileScope,
    resolution: Resolution,
) -> Result<ReconcileOutcome, ReconcileError> {
    let store = ctx.store.as_ref();

    let Some(workload) =
        retry_store_call(|| store.get_workload(key), "get workload", &scope.cancel).await?
    else {
        debug!("Workload not found, nothing to reconcile");
        ctx.deployment_state.clear(key);
        return Ok(ReconcileOutcome::done());
    };

    if workload.is_being_deleted() {
        return handle_deletion(ctx, &workload, scope).await;
    }

    if workload.replicas < MIN_REPLICAS_FOR_PDB {
        return skip_insufficient_replicas(ctx, &workload, scope).await;
    }

    let function = infer_component_function(&workload, ctx.config.strict_function_inference);
    let annotation_config = match config_from_annotations(&workload, &function) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Invalid availability configuration");
            ctx.events
                .publish_pending(
                    &workload_reference(&workload),
                    &PendingEvent::warning(
                        reasons::INVALID_CONFIGURATION,
                        actions::VALIDATE,
                        e.to_string(),
                    ),
                )
                .await;
            return Err(e);
        }
    };

    let selection = match resolution {
        Resolution::PolicyAware => {
            let policies = load_policies(ctx, scope).await?;
            select_policy(&policies, &workload, &function)
        }
        Resolution::AnnotationOnly => None,
    };
    let policy = selection.as_ref().map(|s| &s.policy);
    let policy_config = policy.map(|p| config_from_policy(p, &workload, &function));
    let decision = resolve(
        &workload,
        annotation_config.as_ref(),
        policy_config.as_ref(),
        policy,
    );

    let Some(config) = decision.config.clone() else {
        return release_unmanaged(ctx, &workload, scope).await;
    };

    if let Some(window) = config.maintenance_window.as_deref() {
        match maintenance::is_window_active(&ctx.cache, window) {
            Ok(active) => debug!(window, active, "Evaluated maintenance window"),
            Err(e) => warn!(window, error = %e, "Ignoring unparseable maintenance window"),
        }
    }

    let pdb_key = pdb::pdb_key(&workload);
    let current = retry_store_call(|| store.get_pdb(&pdb_key), "get pdb", &scope.cancel).await?;
    let fingerprint = fingerprint::compute(&workload, &config, current.as_ref());
    if !ctx.deployment_state.has_changed(&workload.key(), &fingerprint) {
        debug!("No changes detected, skipping reconcile");
        return Ok(ReconcileOutcome::done());
    }

    if ensure_finalizer(store, &workload, FINALIZER_PDB_CLEANUP, &scope.cancel).await? {
        ctx.events
            .publish_pending(
                &workload_reference(&workload),
                &PendingEvent::normal(
                    reasons::DEPLOYMENT_MANAGED,
                    actions::RECONCILE,
                    format!(
                        "Managing PodDisruptionBudget with class {} ({})",
                        config.availability_class, config.source
                    ),
                ),
            )
            .await;
        return Ok(ReconcileOutcome::requeue());
    }

    publish_decision(ctx, &workload, &config, selection.as_ref(), &decision, scope).await;

    let existed = current.is_some();
    match pdb::reconcile_pdb(ctx, &workload, &config, scope).await {
        Ok(outcome) => {
            if outcome.action != PdbAction::OwnershipConflict {
                metrics::set_compliance_status(
                    &workload.namespace,
                    &workload.name,
                    compliance::MANAGED,
                );
            }
            if outcome.changed() {
                ctx.events
                    .publish_pending(
                        &workload_reference(&workload),
                        &PendingEvent::normal(
                            reasons::COMPLIANCE_ACHIEVED,
                            actions::RECONCILE,
                            format!(
                                "PodDisruptionBudget matches class {}",
                                config.availability_class
                            ),
                        ),
                    )
                    .await;
            }
            let applied = fingerprint::compute(&workload, &config, outcome.pdb.as_ref());
            ctx.deployment_state.update(&workload.key(), applied);
            Ok(ReconcileOutcome::done())
        }
        Err(e) => {
            let status = if existed {
                compliance::UPDATE_FAILED
            } else {
                compliance::CREATION_FAILED
            };
            metrics::set_compliance_status(&workload.namespace, &workload.name, status);
            ctx.events
                .publish_pending(
                    &workload_reference(&workload),
                    &PendingEvent::warning(
                        reasons::COMPLIANCE_LOST,
                        actions::RECONCILE,
                        format!("PodDisruptionBudget could not be reconciled: {e}"),
                    ),
                )
                .await;
            Err(e)
        }
    }
}

/// Events, metrics and audit describing how the config was chosen.
async fn publish_decision(
    ctx: &Context,
    workload: &Workload,
    config: &AvailabilityConfig,
    selection: Option<&PolicySelection>,
    decision: &EnforcementDecision,
    scope: &ReconcileScope,
) {
    let reference = workload_reference(workload);

    if let Some(selection) = selection {
        if selection.matched > 1 {
            metrics::record_multi_policy_match();
        }
        if selection.is_tie() {
            metrics::record_policy_tiebreak();
            warn!(
                selected = %selection.key,
                tied_with = ?selection.tied_with,
                "Multiple policies match at the same priority"
            );
            ctx.events
                .publish_pending(
                    &reference,
                    &PendingEvent::warning(
                        reasons::POLICY_CONFLICT,
                        actions::ENFORCE,
                        format!(
                            "Policies {} and {} match with priority {}; selected {}",
                            selection.key,
                            selection.tied_with.join(", "),
                            selection.policy.spec.priority,
                            selection.key
                        ),
                    ),
                )
                .await;
        }
    }

    for event in &decision.events {
        ctx.events.publish_pending(&reference, event).await;
    }
    decision.record_metrics();

    if decision.override_blocked {
        ctx.audit.record(
            scope
                .audit(
                    audit_actions::OVERRIDE_BLOCKED,
                    KIND_DEPLOYMENT,
                    &workload.namespace,
                    &workload.name,
                )
                .with("enforcedClass", config.availability_class.as_str())
                .with(
                    "policy",
                    config.policy_name.clone().unwrap_or_default(),
                )
                .with("enforcement", config.enforcement_label()),
        );
    }

    info!(
        class = %config.availability_class,
        source = %config.source,
        enforcement = config.enforcement_label(),
        "Resolved availability configuration"
    );
}

/// Delete the owned PDB, then release the finalizer so deletion can finish.
async fn handle_deletion(
    ctx: &Context,
    workload: &Workload,
    scope: &ReconcileScope,
) -> Result<ReconcileOutcome, ReconcileError> {
    info!("Workload is being deleted, cleaning up PodDisruptionBudget");
    pdb::delete_owned_pdb(ctx, workload, scope).await?;
    remove_finalizer(
        ctx.store.as_ref(),
        workload,
        FINALIZER_PDB_CLEANUP,
        &scope.cancel,
    )
    .await?;
    ctx.deployment_state.clear(&workload.key());
    metrics::set_compliance_status(&workload.namespace, &workload.name, compliance::DELETED);
    Ok(ReconcileOutcome::done())
}

async fn release(
    ctx: &Context,
    workload: &Workload,
    scope: &ReconcileScope,
) -> Result<(), ReconcileError> {
    pdb::delete_owned_pdb(ctx, workload, scope).await?;
    remove_finalizer(
        ctx.store.as_ref(),
        workload,
        FINALIZER_PDB_CLEANUP,
        &scope.cancel,
    )
    .await?;
    ctx.deployment_state.clear(&workload.key());
    Ok(())
}

async fn skip_insufficient_replicas(
    ctx: &Context,
    workload: &Workload,
    scope: &ReconcileScope,
) -> Result<ReconcileOutcome, ReconcileError> {
    info!(
        replicas = workload.replicas,
        "Skipping workload with fewer than {MIN_REPLICAS_FOR_PDB} replicas"
    );
    ctx.events
        .publish_pending(
            &workload_reference(workload),
            &PendingEvent::normal(
                reasons::DEPLOYMENT_SKIPPED,
                actions::RECONCILE,
                format!(
                    "insufficient_replicas: {} replica(s), a PodDisruptionBudget needs at least {MIN_REPLICAS_FOR_PDB}",
                    workload.replicas
                ),
            ),
        )
        .await;
    release(ctx, workload, scope).await?;
    metrics::set_compliance_status(
        &workload.namespace,
        &workload.name,
        compliance::INSUFFICIENT_REPLICAS,
    );
    Ok(ReconcileOutcome::done())
}

async fn release_unmanaged(
    ctx: &Context,
    workload: &Workload,
    scope: &ReconcileScope,
) -> Result<ReconcileOutcome, ReconcileError> {
    debug!("No availability annotation or matching policy");
    ctx.events
        .publish_pending(
            &workload_reference(workload),
            &PendingEvent::normal(
                reasons::DEPLOYMENT_UNMANAGED,
                actions::RECONCILE,
                "No availability-class annotation and no matching AvailabilityPolicy",
            ),
        )
        .await;
    release(ctx, workload, scope).await?;
    metrics::set_compliance_status(&workload.namespace, &workload.name, compliance::UNMANAGED);
    Ok(ReconcileOutcome::done())
}

#[cfg(test)]
#[path = "workload_tests.rs"]
mod workload_tests;
