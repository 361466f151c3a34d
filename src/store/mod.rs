// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Object-store abstraction used by every reconciler.
//!
//! The reconcilers only need a small capability set: typed get/list, create,
//! merge patch, status replace (compare-and-swap on `resourceVersion`) and delete.
//! [`KubeStore`] implements it on top of the Kubernetes API; [`MemoryStore`]
//! implements the same contract in memory for tests.
//!
//! All failures are reported as [`StoreError`], whose [`StoreError::is_transient`]
//! classification drives the retry wrapper in [`crate::reconcilers::retry`].

pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeStore;
pub use memory::MemoryStore;

use crate::crd::AvailabilityPolicy;
use crate::workload::Workload;
use async_trait::async_trait;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use std::fmt;
use thiserror::Error;

/// `(namespace, name)` key identifying an object. Cluster-scoped objects use an
/// empty namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Key for a cluster-scoped object.
    #[must_use]
    pub fn cluster(name: &str) -> Self {
        Self::new("", name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Failure of an object-store operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic-concurrency conflict (stale `resourceVersion`).
    #[error("conflict on {resource}: {message}")]
    Conflict { resource: String, message: String },

    /// The API server timed out handling the request.
    #[error("server timeout on {resource}: {message}")]
    Timeout { resource: String, message: String },

    /// The API server is rate limiting the operator.
    #[error("too many requests on {resource}: {message}")]
    TooManyRequests { resource: String, message: String },

    /// Unexpected server-side or transport failure.
    #[error("server error on {resource}: {message}")]
    ServerError { resource: String, message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{resource} already exists")]
    AlreadyExists { resource: String },

    /// The request was rejected as invalid.
    #[error("invalid request for {resource}: {message}")]
    Invalid { resource: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// True for errors worth retrying in-process: conflict, server timeout,
    /// rate limiting and unexpected server errors.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::Timeout { .. }
                | Self::TooManyRequests { .. }
                | Self::ServerError { .. }
        )
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Short label used in metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "conflict",
            Self::Timeout { .. } => "timeout",
            Self::TooManyRequests { .. } => "too_many_requests",
            Self::ServerError { .. } => "server_error",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Invalid { .. } => "invalid",
            Self::Other(_) => "other",
        }
    }
}

/// Capability set the reconcilers consume.
///
/// `get_*` return `Ok(None)` when the object does not exist; mutations on missing
/// objects fail with [`StoreError::NotFound`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_workload(&self, key: &ObjectKey) -> Result<Option<Workload>, StoreError>;

    async fn list_workloads(&self) -> Result<Vec<Workload>, StoreError>;

    /// Merge-patch the workload's metadata (used for finalizers).
    async fn patch_workload_metadata(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<Workload, StoreError>;

    async fn get_pdb(&self, key: &ObjectKey) -> Result<Option<PodDisruptionBudget>, StoreError>;

    async fn list_pdbs(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>, StoreError>;

    async fn create_pdb(
        &self,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget, StoreError>;

    /// JSON merge patch (RFC 7386) of a PDB.
    async fn patch_pdb(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<PodDisruptionBudget, StoreError>;

    async fn delete_pdb(&self, key: &ObjectKey) -> Result<(), StoreError>;

    async fn get_policy(&self, name: &str) -> Result<Option<AvailabilityPolicy>, StoreError>;

    async fn list_policies(&self) -> Result<Vec<AvailabilityPolicy>, StoreError>;

    /// Merge-patch the policy's metadata (used for finalizers).
    async fn patch_policy_metadata(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<AvailabilityPolicy, StoreError>;

    /// Replace the status subresource. Fails with [`StoreError::Conflict`] when the
    /// policy's `resourceVersion` is stale.
    async fn replace_policy_status(
        &self,
        policy: &AvailabilityPolicy,
    ) -> Result<AvailabilityPolicy, StoreError>;
}
