// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-reconcile identity and tracing.
//!
//! Every reconcile runs inside a [`ReconcileScope`]: a reconcile id of the form
//! `<controller>-<uuid>`, a correlation id shared with any reconcile it was
//! triggered from, a cancellation token derived from the process shutdown token,
//! and an `info` span named `<controller>.Reconcile`.
//!
//! Log lines emitted inside the span inherit `reconcile.id` and `correlation.id`
//! from it, so the ids appear exactly once per entry.

use crate::audit::AuditEvent;
use crate::constants::{CONTROLLER_DIRECT_PDB, CONTROLLER_POLICY, CONTROLLER_WORKLOAD};
use crate::store::ObjectKey;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Span};
use uuid::Uuid;

/// Identity, span and cancellation of one reconcile.
#[derive(Clone, Debug)]
pub struct ReconcileScope {
    pub controller: &'static str,
    pub reconcile_id: String,
    pub correlation_id: String,
    pub cancel: CancellationToken,
    span: Span,
}

/// Span names are static metadata, so each controller gets its own literal.
macro_rules! reconcile_span {
    ($name:literal, $key:ident, $reconcile_id:ident, $correlation_id:ident) => {
        info_span!(
            $name,
            namespace = %$key.namespace,
            name = %$key.name,
            reconcile.id = %$reconcile_id,
            correlation.id = %$correlation_id
        )
    };
}

impl ReconcileScope {
    /// Open a scope for `key`.
    ///
    /// `correlation_id` is inherited when present, otherwise a fresh one is
    /// generated. Cancelling `parent` cancels the scope.
    #[must_use]
    pub fn new(
        controller: &'static str,
        key: &ObjectKey,
        correlation_id: Option<&str>,
        parent: &CancellationToken,
    ) -> Self {
        let reconcile_id = format!("{controller}-{}", Uuid::new_v4());
        let correlation_id = correlation_id
            .filter(|id| !id.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

        let span = match controller {
            CONTROLLER_WORKLOAD => {
                reconcile_span!("workload.Reconcile", key, reconcile_id, correlation_id)
            }
            CONTROLLER_POLICY => {
                reconcile_span!("availabilitypolicy.Reconcile", key, reconcile_id, correlation_id)
            }
            CONTROLLER_DIRECT_PDB => {
                reconcile_span!("pdb.Reconcile", key, reconcile_id, correlation_id)
            }
            _ => reconcile_span!("controller.Reconcile", key, reconcile_id, correlation_id),
        };

        Self {
            controller,
            reconcile_id,
            correlation_id,
            cancel: parent.child_token(),
            span,
        }
    }

    /// Scope with no parent, used by tests and one-off tools.
    #[must_use]
    pub fn detached(controller: &'static str, key: &ObjectKey) -> Self {
        Self::new(controller, key, None, &CancellationToken::new())
    }

    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Start an audit record carrying this scope's correlation id.
    #[must_use]
    pub fn audit(
        &self,
        action: &str,
        resource_type: &str,
        namespace: &str,
        name: &str,
    ) -> AuditEvent {
        AuditEvent::new(action, resource_type, namespace, name, &self.correlation_id)
            .with("reconcileId", self.reconcile_id.clone())
    }
}
