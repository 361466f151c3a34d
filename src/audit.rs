// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Audit trail of operator decisions.
//!
//! Every PDB mutation, blocked override and policy application produces one
//! [`AuditEvent`]. The production sink writes them as JSON lines on the `audit`
//! tracing target so log pipelines can route them separately.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::info;

/// Audit action names.
pub mod actions {
    pub const CREATE: &str = "CREATE";
    pub const UPDATE: &str = "UPDATE";
    pub const DELETE: &str = "DELETE";
    pub const OVERRIDE_BLOCKED: &str = "OVERRIDE_BLOCKED";
    pub const POLICY_APPLY: &str = "POLICY_APPLY";
    pub const POLICY_REMOVE: &str = "POLICY_REMOVE";
}

pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_FAILURE: &str = "failure";

/// One audit record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub action: String,
    /// `namespace/name` of the affected object.
    pub resource: String,
    pub resource_type: String,
    pub namespace: String,
    pub name: String,
    pub result: String,
    pub correlation_id: String,
    pub metadata: BTreeMap<String, Value>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(
        action: &str,
        resource_type: &str,
        namespace: &str,
        name: &str,
        correlation_id: &str,
    ) -> Self {
        let resource = if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{namespace}/{name}")
        };
        Self {
            action: action.to_string(),
            resource,
            resource_type: resource_type.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            result: RESULT_SUCCESS.to_string(),
            correlation_id: correlation_id.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn failed(mut self) -> Self {
        self.result = RESULT_FAILURE.to_string();
        self
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit records as JSON on the `audit` tracing target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!(target: "audit", audit = %json, "audit"),
            Err(e) => info!(target: "audit", action = %event.action, resource = %event.resource, error = %e, "audit"),
        }
    }
}

/// Keeps audit records in memory for tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn actions(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.action).collect()
    }

    #[must_use]
    pub fn count(&self, action: &str) -> usize {
        self.events().iter().filter(|e| e.action == action).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}
