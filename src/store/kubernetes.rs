// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes-backed [`ObjectStore`].
//!
//! Workloads are `apps/v1` Deployments, converted to [`Workload`] on read.
//! PDBs are `policy/v1` objects and policies are the cluster-scoped
//! [`AvailabilityPolicy`] custom resource.

use super::{ObjectKey, ObjectStore, StoreError};
use crate::crd::AvailabilityPolicy;
use crate::workload::Workload;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::debug;

/// Object store talking to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pdbs(&self, namespace: &str) -> Api<PodDisruptionBudget> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn policies(&self) -> Api<AvailabilityPolicy> {
        Api::all(self.client.clone())
    }
}

/// Classify an API status response.
///
/// # Mapping
///
/// - 409 with reason `AlreadyExists` → [`StoreError::AlreadyExists`], other 409 → [`StoreError::Conflict`]
/// - 404 → [`StoreError::NotFound`]
/// - 400 / 422 → [`StoreError::Invalid`]
/// - 429 → [`StoreError::TooManyRequests`]
/// - 504, or reason `Timeout`/`ServerTimeout` → [`StoreError::Timeout`]
/// - other 5xx → [`StoreError::ServerError`]
#[must_use]
pub fn classify_api_error(resource: &str, code: u16, reason: &str, message: &str) -> StoreError {
    let resource = resource.to_string();
    let message = message.to_string();
    match code {
        409 if reason == "AlreadyExists" => StoreError::AlreadyExists { resource },
        409 => StoreError::Conflict { resource, message },
        404 => StoreError::NotFound { resource },
        400 | 422 => StoreError::Invalid { resource, message },
        429 => StoreError::TooManyRequests { resource, message },
        504 => StoreError::Timeout { resource, message },
        _ if reason == "Timeout" || reason == "ServerTimeout" => {
            StoreError::Timeout { resource, message }
        }
        500..=599 => StoreError::ServerError { resource, message },
        _ => StoreError::Other(format!("{resource}: {message} ({code} {reason})")),
    }
}

fn map_kube_error(resource: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(status) => {
            classify_api_error(resource, status.code, &status.reason, &status.message)
        }
        kube::Error::Service(e) => StoreError::ServerError {
            resource: resource.to_string(),
            message: e.to_string(),
        },
        other => StoreError::Other(format!("{resource}: {other}")),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_workload(&self, key: &ObjectKey) -> Result<Option<Workload>, StoreError> {
        let resource = format!("Deployment {key}");
        self.deployments(&key.namespace)
            .get_opt(&key.name)
            .await
            .map(|d| d.as_ref().map(Workload::from_deployment))
            .map_err(|e| map_kube_error(&resource, e))
    }

    async fn list_workloads(&self) -> Result<Vec<Workload>, StoreError> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error("Deployment list", e))?;
        Ok(list.items.iter().map(Workload::from_deployment).collect())
    }

    async fn patch_workload_metadata(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<Workload, StoreError> {
        let resource = format!("Deployment {key}");
        let patched = self
            .deployments(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_kube_error(&resource, e))?;
        Ok(Workload::from_deployment(&patched))
    }

    async fn get_pdb(&self, key: &ObjectKey) -> Result<Option<PodDisruptionBudget>, StoreError> {
        let resource = format!("PodDisruptionBudget {key}");
        self.pdbs(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| map_kube_error(&resource, e))
    }

    async fn list_pdbs(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>, StoreError> {
        let resource = format!("PodDisruptionBudget list in {namespace}");
        self.pdbs(namespace)
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| map_kube_error(&resource, e))
    }

    async fn create_pdb(
        &self,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget, StoreError> {
        let namespace = pdb.namespace().unwrap_or_default();
        let resource = format!("PodDisruptionBudget {namespace}/{}", pdb.name_any());
        self.pdbs(&namespace)
            .create(&PostParams::default(), pdb)
            .await
            .map_err(|e| map_kube_error(&resource, e))
    }

    async fn patch_pdb(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<PodDisruptionBudget, StoreError> {
        let resource = format!("PodDisruptionBudget {key}");
        self.pdbs(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_kube_error(&resource, e))
    }

    async fn delete_pdb(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let resource = format!("PodDisruptionBudget {key}");
        self.pdbs(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(&resource, e))
    }

    async fn get_policy(&self, name: &str) -> Result<Option<AvailabilityPolicy>, StoreError> {
        let resource = format!("AvailabilityPolicy {name}");
        self.policies()
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(&resource, e))
    }

    async fn list_policies(&self) -> Result<Vec<AvailabilityPolicy>, StoreError> {
        self.policies()
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| map_kube_error("AvailabilityPolicy list", e))
    }

    async fn patch_policy_metadata(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<AvailabilityPolicy, StoreError> {
        let resource = format!("AvailabilityPolicy {name}");
        self.policies()
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_kube_error(&resource, e))
    }

    async fn replace_policy_status(
        &self,
        policy: &AvailabilityPolicy,
    ) -> Result<AvailabilityPolicy, StoreError> {
        let name = policy.name_any();
        let resource = format!("AvailabilityPolicy {name} status");

        // Carrying resourceVersion makes the API server reject stale writes with 409.
        let patch = json!({
            "metadata": { "resourceVersion": policy.resource_version() },
            "status": policy.status,
        });
        debug!(policy = %name, "Replacing AvailabilityPolicy status");

        self.policies()
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(&resource, e))
    }
}
