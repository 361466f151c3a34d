// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation controllers.
//!
//! # Reconciliation Architecture
//!
//! The operator follows the standard Kubernetes controller pattern:
//!
//! 1. **Watch** - Workloads, PDBs and policies are watched by kube-runtime
//! 2. **Reconcile** - The desired PDB is computed from annotations and policies
//! 3. **Update** - At most one create, patch or delete is issued per pass
//! 4. **Status** - Policies report matched components and validation results
//!
//! # Available Reconcilers
//!
//! - [`reconcile_workload`] - Policy-aware PDB management for a `Deployment`
//! - [`reconcile_direct_pdb`] - Annotation-only PDB management (`ENABLE_PDB=true`)
//! - [`reconcile_policy`] - `AvailabilityPolicy` status and finalizer
//!
//! # Example: Using a Reconciler
//!
//! ```rust,ignore
//! use pdb_operator::context::Context;
//! use pdb_operator::reconcilers::reconcile_workload;
//! use pdb_operator::store::ObjectKey;
//!
//! let key = ObjectKey::new("default", "my-app");
//! let scope = ctx.scope("workload", &key, None);
//! let outcome = reconcile_workload(&ctx, &key, &scope).await?;
//! ```

pub mod direct;
pub mod finalizers;
pub mod pdb;
pub mod policy;
pub mod retry;
pub mod status;
pub mod workload;

pub use direct::reconcile_direct_pdb;
pub use policy::reconcile_policy;
pub use workload::reconcile_workload;

use crate::constants::FINALIZER_REQUEUE_SECS;
use kube::runtime::controller::Action;
use std::time::Duration;

/// What the controller runtime should do after a successful reconcile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Run again shortly, typically after a metadata patch.
    pub requeue: bool,
    /// Run again after this delay.
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    #[must_use]
    pub fn done() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    #[must_use]
    pub fn after(delay: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: Some(delay),
        }
    }

    /// Convert to a kube-runtime [`Action`].
    #[must_use]
    pub fn into_action(self) -> Action {
        match (self.requeue_after, self.requeue) {
            (Some(delay), _) => Action::requeue(delay),
            (None, true) => Action::requeue(Duration::from_secs(FINALIZER_REQUEUE_SECS)),
            (None, false) => Action::await_change(),
        }
    }
}

/// Check if a resource's spec has changed by comparing generation with `observed_generation`.
///
/// # Returns
///
/// * `true` - The spec changed since it was last observed, or it was never observed
/// * `false` - Status-only update, or no generation tracking available
#[must_use]
pub fn should_reconcile(current_generation: Option<i64>, observed_generation: Option<i64>) -> bool {
    match (current_generation, observed_generation) {
        (Some(current), Some(observed)) => current != observed,
        (Some(_), None) => true, // First reconciliation
        _ => false,
    }
}
