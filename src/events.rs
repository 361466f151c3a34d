// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes Event recording.
//!
//! Events are best-effort: a failed publish is logged and never fails the
//! reconcile that emitted it.

use crate::constants::{
    API_GROUP, API_VERSION, DEPLOYMENT_API_VERSION, KIND_AVAILABILITY_POLICY, KIND_DEPLOYMENT,
};
use crate::crd::AvailabilityPolicy;
use crate::workload::Workload;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, ResourceExt};
use std::sync::Mutex;
use tracing::warn;

/// Event reasons. They appear under the REASON column of `kubectl get events`.
pub mod reasons {
    // PDB lifecycle
    pub const PDB_CREATED: &str = "PDBCreated";
    pub const PDB_UPDATED: &str = "PDBUpdated";
    pub const PDB_DELETED: &str = "PDBDeleted";
    pub const PDB_CREATION_FAILED: &str = "PDBCreationFailed";
    pub const PDB_UPDATE_FAILED: &str = "PDBUpdateFailed";
    pub const PDB_DELETION_FAILED: &str = "PDBDeletionFailed";
    /// A PDB with the canonical name exists but is not managed by the operator
    pub const PDB_OWNERSHIP_CONFLICT: &str = "PDBOwnershipConflict";
    pub const DUPLICATE_PDB_REMOVED: &str = "DuplicatePDBRemoved";

    // Policy lifecycle
    pub const POLICY_APPLIED: &str = "PolicyApplied";
    pub const POLICY_REMOVED: &str = "PolicyRemoved";
    pub const POLICY_UPDATED: &str = "PolicyUpdated";
    pub const POLICY_VALIDATION_FAILED: &str = "PolicyValidationFailed";

    // Workload lifecycle
    pub const DEPLOYMENT_SKIPPED: &str = "DeploymentSkipped";
    pub const DEPLOYMENT_UNMANAGED: &str = "DeploymentUnmanaged";
    pub const DEPLOYMENT_MANAGED: &str = "DeploymentManaged";
    pub const INVALID_CONFIGURATION: &str = "InvalidConfiguration";

    // Enforcement
    pub const POLICY_CONFLICT: &str = "PolicyConflict";
    pub const OVERRIDE_REQUIRES_ANNOTATION: &str = "OverrideRequiresAnnotation";
    pub const OVERRIDE_REQUIRES_REASON: &str = "OverrideRequiresReason";
    pub const OVERRIDE_NOT_ALLOWED: &str = "OverrideNotAllowed";
    pub const ANNOTATION_ACCEPTED: &str = "AnnotationAccepted";
    pub const BELOW_MINIMUM: &str = "BelowMinimum";
    pub const POLICY_ENFORCED: &str = "PolicyEnforced";

    // Compliance
    pub const COMPLIANCE_ACHIEVED: &str = "ComplianceAchieved";
    pub const COMPLIANCE_LOST: &str = "ComplianceLost";
}

/// Event actions. They appear under the ACTION column.
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const CREATE: &str = "Create";
    pub const UPDATE: &str = "Update";
    pub const DELETE: &str = "Delete";
    pub const ENFORCE: &str = "Enforce";
    pub const VALIDATE: &str = "Validate";
}

/// An event decided during a reconcile, published once the outcome is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEvent {
    pub warning: bool,
    pub reason: &'static str,
    pub action: &'static str,
    pub note: String,
}

impl PendingEvent {
    #[must_use]
    pub fn normal(reason: &'static str, action: &'static str, note: impl Into<String>) -> Self {
        Self {
            warning: false,
            reason,
            action,
            note: note.into(),
        }
    }

    #[must_use]
    pub fn warning(reason: &'static str, action: &'static str, note: impl Into<String>) -> Self {
        Self {
            warning: true,
            reason,
            action,
            note: note.into(),
        }
    }

    #[must_use]
    pub fn event_type(&self) -> EventType {
        if self.warning {
            EventType::Warning
        } else {
            EventType::Normal
        }
    }
}

/// Reference used as the `regarding` object of workload events.
#[must_use]
pub fn workload_reference(workload: &Workload) -> ObjectReference {
    ObjectReference {
        api_version: Some(DEPLOYMENT_API_VERSION.to_string()),
        kind: Some(KIND_DEPLOYMENT.to_string()),
        namespace: Some(workload.namespace.clone()),
        name: Some(workload.name.clone()),
        uid: Some(workload.uid.clone()).filter(|uid| !uid.is_empty()),
        resource_version: workload.resource_version.clone(),
        ..Default::default()
    }
}

/// Reference used as the `regarding` object of policy events.
#[must_use]
pub fn policy_reference(policy: &AvailabilityPolicy) -> ObjectReference {
    ObjectReference {
        api_version: Some(format!("{API_GROUP}/{API_VERSION}")),
        kind: Some(KIND_AVAILABILITY_POLICY.to_string()),
        name: Some(policy.name_any()),
        uid: policy.uid(),
        resource_version: policy.resource_version(),
        ..Default::default()
    }
}

/// Publishes Kubernetes Events.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Publish an event on `target`. Never fails.
    async fn publish(
        &self,
        target: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );

    /// Publish a [`PendingEvent`].
    async fn publish_pending(&self, target: &ObjectReference, event: &PendingEvent) {
        self.publish(
            target,
            event.event_type(),
            event.reason,
            event.action,
            Some(event.note.clone()),
        )
        .await;
    }
}

/// Recorder backed by `kube::runtime::events::Recorder`.
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    /// The controller name becomes the event's `reportingComponent`.
    #[must_use]
    pub fn new(client: Client, controller_name: &str, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn publish(
        &self,
        target: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, target).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// An event captured by [`MemoryEventRecorder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub warning: bool,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

/// In-memory recorder for tests.
#[derive(Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RecordedEvent>> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().clone()
    }

    /// Reasons of every event published so far, in order.
    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.reason.clone()).collect()
    }

    /// Number of events published with `reason`.
    #[must_use]
    pub fn count(&self, reason: &str) -> usize {
        self.lock().iter().filter(|e| e.reason == reason).count()
    }

    #[must_use]
    pub fn has(&self, reason: &str) -> bool {
        self.count(reason) > 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[async_trait]
impl EventRecorder for MemoryEventRecorder {
    async fn publish(
        &self,
        target: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.lock().push(RecordedEvent {
            kind: target.kind.clone().unwrap_or_default(),
            namespace: target.namespace.clone().unwrap_or_default(),
            name: target.name.clone().unwrap_or_default(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}
