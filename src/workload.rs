// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Typed view of a managed workload.
//!
//! Reconcilers never touch raw `apps/v1` objects. The object store converts a
//! `Deployment` into a [`Workload`] once, at the API edge, and the rest of the
//! operator works with these plain values.

use crate::constants::{DEPLOYMENT_API_VERSION, KIND_DEPLOYMENT};
use crate::store::ObjectKey;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::ResourceExt;
use std::collections::BTreeMap;

/// A managed pod-replica set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub replicas: i32,
    pub selector: LabelSelector,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub generation: i64,
    /// RFC3339 deletion timestamp, set once deletion has been requested.
    pub deletion_timestamp: Option<String>,
    pub finalizers: Vec<String>,
    pub resource_version: Option<String>,
}

impl Workload {
    /// Convert a `Deployment` into a workload. Replicas default to 1 like the API server does.
    #[must_use]
    pub fn from_deployment(deployment: &Deployment) -> Self {
        let spec = deployment.spec.as_ref();
        Self {
            namespace: deployment.namespace().unwrap_or_default(),
            name: deployment.name_any(),
            uid: deployment.uid().unwrap_or_default(),
            replicas: spec.and_then(|s| s.replicas).unwrap_or(1),
            selector: spec.map(|s| s.selector.clone()).unwrap_or_default(),
            labels: deployment.labels().clone(),
            annotations: deployment.annotations().clone(),
            generation: deployment.metadata.generation.unwrap_or_default(),
            deletion_timestamp: deployment.metadata.deletion_timestamp.as_ref().map(|ts| {
                serde_json::to_value(ts)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default()
            }),
            finalizers: deployment.finalizers().to_vec(),
            resource_version: deployment.resource_version(),
        }
    }

    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    #[must_use]
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Equality part of the pod selector, empty when only expressions are used.
    #[must_use]
    pub fn match_labels(&self) -> BTreeMap<String, String> {
        self.selector.match_labels.clone().unwrap_or_default()
    }

    /// Name of the PDB this workload owns.
    #[must_use]
    pub fn pdb_name(&self) -> String {
        format!("{}-pdb", self.name)
    }

    /// Controller owner reference pointing at this workload.
    #[must_use]
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: DEPLOYMENT_API_VERSION.to_string(),
            kind: KIND_DEPLOYMENT.to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

#[cfg(test)]
#[path = "workload_tests.rs"]
mod workload_tests;
