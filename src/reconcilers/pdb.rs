// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Managed `PodDisruptionBudget` lifecycle.
//!
//! Each managed workload owns exactly one PDB named `<workload>-pdb` in its
//! namespace. This module builds the desired PDB from an [`AvailabilityConfig`],
//! diffs it against the live object and writes at most one create or merge
//! patch per reconcile.
//!
//! # Ownership
//!
//! A PDB is only touched when it carries `app.kubernetes.io/managed-by:
//! pdb-operator`. Owner references must point at the workload; a managed PDB
//! without owner references is adopted. Anything else is an ownership conflict:
//! it is reported and left alone.
//!
//! # Duplicates
//!
//! Before writing, PDBs in the namespace whose selector overlaps the workload's
//! selector and that the workload owns, other than the canonical one, are
//! deleted.

use crate::audit::actions as audit_actions;
use crate::availability::{int_or_string_to_string, AvailabilityConfig};
use crate::constants::{
    ANNOTATION_AVAILABILITY_CLASS, ANNOTATION_CREATED_BY, ANNOTATION_CREATION_TIME,
    ANNOTATION_DESCRIPTION, ANNOTATION_ENFORCEMENT_MODE, ANNOTATION_LAST_MODIFIED,
    ANNOTATION_POLICY_SOURCE, KIND_PDB, LABEL_AVAILABILITY_CLASS, LABEL_COMPONENT,
    LABEL_COMPONENT_FUNCTION, LABEL_MANAGED_BY, OPERATOR_NAME, STALE_MAINTENANCE_ANNOTATIONS,
};
use crate::context::Context;
use crate::errors::{ErrorKind, ReconcileError};
use crate::events::{actions, reasons, workload_reference, PendingEvent};
use crate::fingerprint::pdb_state;
use crate::metrics;
use crate::reconcilers::retry::retry_store_call;
use crate::selector::{component_name, selectors_overlap};
use crate::store::ObjectKey;
use crate::telemetry::ReconcileScope;
use crate::watch::is_managed_pdb;
use crate::workload::Workload;
use chrono::Utc;
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// What [`reconcile_pdb`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PdbAction {
    Created,
    Updated,
    Unchanged,
    /// The canonical PDB exists but is not ours; nothing was written.
    OwnershipConflict,
}

/// Result of reconciling the managed PDB.
#[derive(Clone, Debug)]
pub struct PdbOutcome {
    pub action: PdbAction,
    /// The PDB as it exists after the reconcile.
    pub pdb: Option<PodDisruptionBudget>,
}

impl PdbOutcome {
    /// True when the PDB was created or updated.
    #[must_use]
    pub fn changed(&self) -> bool {
        matches!(self.action, PdbAction::Created | PdbAction::Updated)
    }
}

/// Key of the PDB a workload owns.
#[must_use]
pub fn pdb_key(workload: &Workload) -> ObjectKey {
    ObjectKey::new(&workload.namespace, &workload.pdb_name())
}

/// Labels the operator maintains on a managed PDB.
#[must_use]
pub fn desired_labels(workload: &Workload, config: &AvailabilityConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        (
            LABEL_AVAILABILITY_CLASS.to_string(),
            config.availability_class.as_str().to_string(),
        ),
        (
            LABEL_COMPONENT_FUNCTION.to_string(),
            config.component_function.as_str().to_string(),
        ),
        (LABEL_COMPONENT.to_string(), component_name(workload).to_string()),
    ])
}

/// Annotations compared on every update. Timestamps are handled separately.
fn tracked_annotations(config: &AvailabilityConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            ANNOTATION_AVAILABILITY_CLASS.to_string(),
            config.availability_class.as_str().to_string(),
        ),
        (ANNOTATION_DESCRIPTION.to_string(), config.description.clone()),
        (
            ANNOTATION_POLICY_SOURCE.to_string(),
            config
                .policy_name
                .clone()
                .unwrap_or_else(|| config.source.clone()),
        ),
        (
            ANNOTATION_ENFORCEMENT_MODE.to_string(),
            config.enforcement_label().to_string(),
        ),
    ])
}

/// Build the desired PDB for `workload`.
///
/// `now` is the RFC3339 timestamp written to `creation-time` and `last-modified`.
#[must_use]
pub fn build_pdb(workload: &Workload, config: &AvailabilityConfig, now: &str) -> PodDisruptionBudget {
    let mut annotations = tracked_annotations(config);
    annotations.insert(ANNOTATION_CREATED_BY.to_string(), OPERATOR_NAME.to_string());
    annotations.insert(ANNOTATION_CREATION_TIME.to_string(), now.to_string());
    annotations.insert(ANNOTATION_LAST_MODIFIED.to_string(), now.to_string());

    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(workload.pdb_name()),
            namespace: Some(workload.namespace.clone()),
            labels: Some(desired_labels(workload, config)),
            annotations: Some(annotations),
            owner_references: Some(vec![workload.owner_reference()]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(config.min_available.clone()),
            selector: Some(workload.selector.clone()),
            unhealthy_pod_eviction_policy: config.unhealthy_pod_eviction_policy.clone(),
            ..Default::default()
        }),
        status: None,
    }
}

/// Managed by the operator and owned by `workload`.
#[must_use]
pub fn is_owned_by(pdb: &PodDisruptionBudget, workload: &Workload) -> bool {
    is_managed_pdb(pdb)
        && pdb
            .owner_references()
            .iter()
            .any(|owner| owner.uid == workload.uid)
}

/// Managed by the operator and either owned by `workload` or orphaned.
#[must_use]
pub fn can_adopt(pdb: &PodDisruptionBudget, workload: &Workload) -> bool {
    is_managed_pdb(pdb) && (pdb.owner_references().is_empty() || is_owned_by(pdb, workload))
}

fn selector_patch(current: Option<&LabelSelector>, desired: Option<&LabelSelector>) -> Value {
    let desired_labels = desired
        .and_then(|s| s.match_labels.clone())
        .unwrap_or_default();

    let mut labels = Map::new();
    for key in current
        .and_then(|s| s.match_labels.as_ref())
        .into_iter()
        .flat_map(BTreeMap::keys)
    {
        if !desired_labels.contains_key(key) {
            labels.insert(key.clone(), Value::Null);
        }
    }
    for (key, value) in desired_labels {
        labels.insert(key, Value::String(value));
    }

    let expressions = desired
        .and_then(|s| s.match_expressions.as_ref())
        .map_or(Value::Null, |expressions| json!(expressions));

    json!({ "matchLabels": labels, "matchExpressions": expressions })
}

/// Merge patch turning `existing` into `desired`, or `None` when nothing differs.
///
/// Only fields the operator owns are compared. Stale maintenance annotations
/// are always cleared and `last-modified` is bumped whenever a patch is needed.
#[must_use]
pub fn diff_patch(
    existing: &PodDisruptionBudget,
    desired: &PodDisruptionBudget,
    now: &str,
) -> Option<Value> {
    let current_spec = existing.spec.clone().unwrap_or_default();
    let desired_spec = desired.spec.clone().unwrap_or_default();

    let mut spec = Map::new();
    if current_spec.min_available != desired_spec.min_available {
        spec.insert("minAvailable".into(), json!(desired_spec.min_available));
    }
    if current_spec.max_unavailable.is_some() {
        spec.insert("maxUnavailable".into(), Value::Null);
    }
    if current_spec.selector != desired_spec.selector {
        spec.insert(
            "selector".into(),
            selector_patch(current_spec.selector.as_ref(), desired_spec.selector.as_ref()),
        );
    }
    if desired_spec.unhealthy_pod_eviction_policy.is_some()
        && current_spec.unhealthy_pod_eviction_policy != desired_spec.unhealthy_pod_eviction_policy
    {
        spec.insert(
            "unhealthyPodEvictionPolicy".into(),
            json!(desired_spec.unhealthy_pod_eviction_policy),
        );
    }

    let mut labels = Map::new();
    for (key, value) in desired.labels() {
        if existing.labels().get(key) != Some(value) {
            labels.insert(key.clone(), Value::String(value.clone()));
        }
    }

    let mut annotations = Map::new();
    for key in [
        ANNOTATION_AVAILABILITY_CLASS,
        ANNOTATION_DESCRIPTION,
        ANNOTATION_POLICY_SOURCE,
        ANNOTATION_ENFORCEMENT_MODE,
    ] {
        let wanted = desired.annotations().get(key);
        if wanted.is_some() && existing.annotations().get(key) != wanted {
            annotations.insert(key.to_string(), json!(wanted));
        }
    }
    for key in STALE_MAINTENANCE_ANNOTATIONS {
        if existing.annotations().contains_key(*key) {
            annotations.insert((*key).to_string(), Value::Null);
        }
    }

    let adopt = existing.owner_references().is_empty();
    if spec.is_empty() && labels.is_empty() && annotations.is_empty() && !adopt {
        return None;
    }

    annotations.insert(ANNOTATION_LAST_MODIFIED.to_string(), json!(now));
    let mut metadata = Map::new();
    metadata.insert("annotations".into(), Value::Object(annotations));
    if !labels.is_empty() {
        metadata.insert("labels".into(), Value::Object(labels));
    }
    if adopt {
        metadata.insert(
            "ownerReferences".into(),
            json!(desired.owner_references()),
        );
    }

    let mut patch = Map::new();
    patch.insert("metadata".into(), Value::Object(metadata));
    if !spec.is_empty() {
        patch.insert("spec".into(), Value::Object(spec));
    }
    Some(Value::Object(patch))
}

/// Delete managed PDBs owned by `workload` whose selector overlaps its own,
/// other than the canonical `<workload>-pdb`. Returns how many were removed.
///
/// # Errors
///
/// Fails when listing or deleting fails after retries.
pub async fn remove_duplicates(
    ctx: &Context,
    workload: &Workload,
    scope: &ReconcileScope,
) -> Result<usize, ReconcileError> {
    let store = ctx.store.as_ref();
    let namespace = workload.namespace.as_str();
    let pdbs = retry_store_call(|| store.list_pdbs(namespace), "list pdbs", &scope.cancel).await?;

    let canonical = workload.pdb_name();
    let selector = workload.match_labels();
    let mut removed = 0;

    for pdb in pdbs {
        let name = pdb.name_any();
        if name == canonical {
            continue;
        }
        let (_, pdb_selector) = pdb_state(&pdb);
        if !selectors_overlap(&selector, &pdb_selector) {
            continue;
        }
        if !is_owned_by(&pdb, workload) {
            debug!(pdb = %name, "Overlapping PDB is not owned by this workload, leaving it");
            continue;
        }

        let key = ObjectKey::new(namespace, &name);
        match retry_store_call(|| store.delete_pdb(&key), "delete duplicate pdb", &scope.cancel)
            .await
        {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }

        removed += 1;
        info!(pdb = %key, "Removed duplicate PodDisruptionBudget");
        metrics::record_pdb_deleted(namespace);
        ctx.events
            .publish_pending(
                &workload_reference(workload),
                &PendingEvent::normal(
                    reasons::DUPLICATE_PDB_REMOVED,
                    actions::DELETE,
                    format!("Removed duplicate PodDisruptionBudget {name}"),
                ),
            )
            .await;
        ctx.audit.record(
            scope
                .audit(audit_actions::DELETE, KIND_PDB, namespace, &name)
                .with("reason", "duplicate"),
        );
    }

    Ok(removed)
}

async fn create_pdb(
    ctx: &Context,
    workload: &Workload,
    config: &AvailabilityConfig,
    desired: PodDisruptionBudget,
    scope: &ReconcileScope,
) -> Result<PdbOutcome, ReconcileError> {
    let store = ctx.store.as_ref();
    let reference = workload_reference(workload);
    let name = workload.pdb_name();
    let min_available = int_or_string_to_string(&config.min_available);

    match retry_store_call(|| store.create_pdb(&desired), "create pdb", &scope.cancel).await {
        Ok(created) => {
            info!(
                pdb = %name,
                min_available = %min_available,
                source = %config.source,
                "Created PodDisruptionBudget"
            );
            metrics::record_pdb_created(&workload.namespace);
            ctx.events
                .publish_pending(
                    &reference,
                    &PendingEvent::normal(
                        reasons::PDB_CREATED,
                        actions::CREATE,
                        format!("Created PodDisruptionBudget {name} with minAvailable {min_available}"),
                    ),
                )
                .await;
            ctx.audit.record(
                scope
                    .audit(audit_actions::CREATE, KIND_PDB, &workload.namespace, &name)
                    .with("minAvailable", min_available)
                    .with("availabilityClass", config.availability_class.as_str())
                    .with("source", config.source.clone()),
            );
            Ok(PdbOutcome {
                action: PdbAction::Created,
                pdb: Some(created),
            })
        }
        Err(e) => {
            error!(pdb = %name, error = %e, "Failed to create PodDisruptionBudget");
            ctx.events
                .publish_pending(
                    &reference,
                    &PendingEvent::warning(
                        reasons::PDB_CREATION_FAILED,
                        actions::CREATE,
                        format!("Failed to create PodDisruptionBudget {name}: {e}"),
                    ),
                )
                .await;
            ctx.audit.record(
                scope
                    .audit(audit_actions::CREATE, KIND_PDB, &workload.namespace, &name)
                    .with("error", e.to_string())
                    .failed(),
            );
            Err(e)
        }
    }
}

async fn update_pdb(
    ctx: &Context,
    workload: &Workload,
    config: &AvailabilityConfig,
    patch: Value,
    scope: &ReconcileScope,
) -> Result<PdbOutcome, ReconcileError> {
    let store = ctx.store.as_ref();
    let reference = workload_reference(workload);
    let key = pdb_key(workload);
    let min_available = int_or_string_to_string(&config.min_available);

    match retry_store_call(|| store.patch_pdb(&key, &patch), "patch pdb", &scope.cancel).await {
        Ok(updated) => {
            info!(
                pdb = %key,
                min_available = %min_available,
                source = %config.source,
                "Updated PodDisruptionBudget"
            );
            metrics::record_pdb_updated(&workload.namespace);
            ctx.events
                .publish_pending(
                    &reference,
                    &PendingEvent::normal(
                        reasons::PDB_UPDATED,
                        actions::UPDATE,
                        format!(
                            "Updated PodDisruptionBudget {} with minAvailable {min_available}",
                            key.name
                        ),
                    ),
                )
                .await;
            ctx.audit.record(
                scope
                    .audit(audit_actions::UPDATE, KIND_PDB, &key.namespace, &key.name)
                    .with("minAvailable", min_available)
                    .with("availabilityClass", config.availability_class.as_str())
                    .with("source", config.source.clone()),
            );
            Ok(PdbOutcome {
                action: PdbAction::Updated,
                pdb: Some(updated),
            })
        }
        Err(e) => {
            error!(pdb = %key, error = %e, "Failed to update PodDisruptionBudget");
            ctx.events
                .publish_pending(
                    &reference,
                    &PendingEvent::warning(
                        reasons::PDB_UPDATE_FAILED,
                        actions::UPDATE,
                        format!("Failed to update PodDisruptionBudget {}: {e}", key.name),
                    ),
                )
                .await;
            ctx.audit.record(
                scope
                    .audit(audit_actions::UPDATE, KIND_PDB, &key.namespace, &key.name)
                    .with("error", e.to_string())
                    .failed(),
            );
            Err(e)
        }
    }
}

async fn report_conflict(ctx: &Context, workload: &Workload, pdb: &PodDisruptionBudget) {
    warn!(
        pdb = %pdb.name_any(),
        "PodDisruptionBudget exists but is not managed by this operator for this workload, leaving it untouched"
    );
    ctx.events
        .publish_pending(
            &workload_reference(workload),
            &PendingEvent::warning(
                reasons::PDB_OWNERSHIP_CONFLICT,
                actions::RECONCILE,
                format!(
                    "PodDisruptionBudget {} exists and is not owned by {OPERATOR_NAME}",
                    pdb.name_any()
                ),
            ),
        )
        .await;
}

/// Create, update or leave the managed PDB of `workload`.
///
/// # Errors
///
/// Fails when a store call fails after retries. Failures emit a warning event
/// and a failed audit record first.
pub async fn reconcile_pdb(
    ctx: &Context,
    workload: &Workload,
    config: &AvailabilityConfig,
    scope: &ReconcileScope,
) -> Result<PdbOutcome, ReconcileError> {
    remove_duplicates(ctx, workload, scope).await?;

    let store = ctx.store.as_ref();
    let key = pdb_key(workload);
    let now = Utc::now().to_rfc3339();
    let desired = build_pdb(workload, config, &now);

    let existing = retry_store_call(|| store.get_pdb(&key), "get pdb", &scope.cancel).await?;
    let Some(existing) = existing else {
        return create_pdb(ctx, workload, config, desired, scope).await;
    };

    if !can_adopt(&existing, workload) {
        report_conflict(ctx, workload, &existing).await;
        return Ok(PdbOutcome {
            action: PdbAction::OwnershipConflict,
            pdb: Some(existing),
        });
    }

    match diff_patch(&existing, &desired, &now) {
        Some(patch) => update_pdb(ctx, workload, config, patch, scope).await,
        None => {
            debug!(pdb = %key, "PodDisruptionBudget already up to date");
            Ok(PdbOutcome {
                action: PdbAction::Unchanged,
                pdb: Some(existing),
            })
        }
    }
}

/// Delete the PDB `workload` owns, if any. Returns `true` when a PDB was deleted.
///
/// A canonical PDB that the workload does not own is reported and kept.
///
/// # Errors
///
/// Fails when the lookup or delete fails after retries.
pub async fn delete_owned_pdb(
    ctx: &Context,
    workload: &Workload,
    scope: &ReconcileScope,
) -> Result<bool, ReconcileError> {
    let store = ctx.store.as_ref();
    let key = pdb_key(workload);

    let Some(existing) = retry_store_call(|| store.get_pdb(&key), "get pdb", &scope.cancel).await?
    else {
        return Ok(false);
    };

    if !is_managed_pdb(&existing) {
        report_conflict(ctx, workload, &existing).await;
        return Ok(false);
    }
    if !is_owned_by(&existing, workload) {
        warn!(pdb = %key, "Managed PodDisruptionBudget is not owned by this workload, keeping it");
        return Ok(false);
    }

    match retry_store_call(|| store.delete_pdb(&key), "delete pdb", &scope.cancel).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            error!(pdb = %key, error = %e, "Failed to delete PodDisruptionBudget");
            ctx.events
                .publish_pending(
                    &workload_reference(workload),
                    &PendingEvent::warning(
                        reasons::PDB_DELETION_FAILED,
                        actions::DELETE,
                        format!("Failed to delete PodDisruptionBudget {}: {e}", key.name),
                    ),
                )
                .await;
            ctx.audit.record(
                scope
                    .audit(audit_actions::DELETE, KIND_PDB, &key.namespace, &key.name)
                    .with("error", e.to_string())
                    .failed(),
            );
            return Err(e);
        }
    }

    info!(pdb = %key, "Deleted PodDisruptionBudget");
    metrics::record_pdb_deleted(&key.namespace);
    ctx.events
        .publish_pending(
            &workload_reference(workload),
            &PendingEvent::normal(
                reasons::PDB_DELETED,
                actions::DELETE,
                format!("Deleted PodDisruptionBudget {}", key.name),
            ),
        )
        .await;
    ctx.audit
        .record(scope.audit(audit_actions::DELETE, KIND_PDB, &key.namespace, &key.name));
    Ok(true)
}

#[cfg(test)]
#[path = "pdb_tests.rs"]
mod pdb_tests;
