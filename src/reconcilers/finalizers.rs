// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic finalizer management.
//!
//! Workloads carry the PDB cleanup finalizer while they own a managed PDB;
//! policies carry their own finalizer so removal is observed. Both are
//! maintained with the same two idempotent helpers, which merge-patch
//! `metadata.finalizers` through the retry wrapper.
//!
//! # Example
//!
//! ```rust,ignore
//! use pdb_operator::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
//!
//! if workload.is_being_deleted() {
//!     delete_owned_pdb(..).await?;
//!     remove_finalizer(store, &workload, FINALIZER_PDB_CLEANUP, &cancel).await?;
//!     return Ok(ReconcileOutcome::done());
//! }
//! if ensure_finalizer(store, &workload, FINALIZER_PDB_CLEANUP, &cancel).await? {
//!     return Ok(ReconcileOutcome::requeue());
//! }
//! ```

use crate::crd::AvailabilityPolicy;
use crate::errors::{ErrorKind, ReconcileError};
use crate::reconcilers::retry::retry_store_call;
use crate::store::{ObjectStore, StoreError};
use crate::workload::Workload;
use async_trait::async_trait;
use kube::ResourceExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// An object whose finalizers the operator maintains.
#[async_trait]
pub trait FinalizerTarget: Send + Sync {
    /// Current finalizers, in order.
    fn finalizer_list(&self) -> Vec<String>;

    /// `Kind namespace/name`, for logs.
    fn describe(&self) -> String;

    /// Replace the finalizer list with a merge patch.
    async fn patch_finalizers(
        &self,
        store: &dyn ObjectStore,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError>;
}

fn finalizer_patch(finalizers: &[String]) -> serde_json::Value {
    json!({ "metadata": { "finalizers": finalizers } })
}

#[async_trait]
impl FinalizerTarget for Workload {
    fn finalizer_list(&self) -> Vec<String> {
        self.finalizers.clone()
    }

    fn describe(&self) -> String {
        format!("Deployment {}", self.key())
    }

    async fn patch_finalizers(
        &self,
        store: &dyn ObjectStore,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError> {
        store
            .patch_workload_metadata(&self.key(), &finalizer_patch(&finalizers))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl FinalizerTarget for AvailabilityPolicy {
    fn finalizer_list(&self) -> Vec<String> {
        self.finalizers().to_vec()
    }

    fn describe(&self) -> String {
        format!("AvailabilityPolicy {}", self.name_any())
    }

    async fn patch_finalizers(
        &self,
        store: &dyn ObjectStore,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError> {
        store
            .patch_policy_metadata(&self.name_any(), &finalizer_patch(&finalizers))
            .await
            .map(|_| ())
    }
}

/// Add `finalizer` to `target` if not already present.
///
/// Returns `true` when a patch was written.
///
/// # Errors
///
/// Returns the store error once retries are exhausted.
pub async fn ensure_finalizer<T: FinalizerTarget>(
    store: &dyn ObjectStore,
    target: &T,
    finalizer: &str,
    cancel: &CancellationToken,
) -> Result<bool, ReconcileError> {
    let mut finalizers = target.finalizer_list();
    if finalizers.iter().any(|f| f == finalizer) {
        return Ok(false);
    }

    info!("Adding finalizer {} to {}", finalizer, target.describe());
    finalizers.push(finalizer.to_string());

    retry_store_call(
        || target.patch_finalizers(store, finalizers.clone()),
        "add finalizer",
        cancel,
    )
    .await?;
    Ok(true)
}

/// Remove `finalizer` from `target` if present.
///
/// Returns `true` when a patch was written. A target that disappeared in the
/// meantime counts as done.
///
/// # Errors
///
/// Returns the store error once retries are exhausted.
pub async fn remove_finalizer<T: FinalizerTarget>(
    store: &dyn ObjectStore,
    target: &T,
    finalizer: &str,
    cancel: &CancellationToken,
) -> Result<bool, ReconcileError> {
    let finalizers = target.finalizer_list();
    if !finalizers.iter().any(|f| f == finalizer) {
        return Ok(false);
    }

    info!("Removing finalizer {} from {}", finalizer, target.describe());
    let remaining: Vec<String> = finalizers.into_iter().filter(|f| f != finalizer).collect();

    match retry_store_call(
        || target.patch_finalizers(store, remaining.clone()),
        "remove finalizer",
        cancel,
    )
    .await
    {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} already gone, nothing to remove", target.describe());
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
