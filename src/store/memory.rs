// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`ObjectStore`] used by unit and scenario tests.
//!
//! The store mimics the API-server behavior the reconcilers depend on:
//!
//! - JSON merge patch (RFC 7386) for metadata and PDB patches
//! - `resourceVersion` bumps on every write and compare-and-swap on status replace
//! - deletion with finalizers: a deleted object lingers with a deletion timestamp
//!   until its last finalizer is removed
//! - a write journal so tests can assert how many mutations a reconcile performed
//! - fault injection for exercising the retry wrapper

use super::{ObjectKey, ObjectStore, StoreError};
use crate::crd::AvailabilityPolicy;
use crate::workload::Workload;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Store operations, used for the write journal and fault injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    GetWorkload,
    ListWorkloads,
    PatchWorkload,
    GetPdb,
    ListPdbs,
    CreatePdb,
    PatchPdb,
    DeletePdb,
    GetPolicy,
    ListPolicies,
    PatchPolicy,
    ReplacePolicyStatus,
}

impl Operation {
    /// True for operations that mutate the store.
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::PatchWorkload
                | Self::CreatePdb
                | Self::PatchPdb
                | Self::DeletePdb
                | Self::PatchPolicy
                | Self::ReplacePolicyStatus
        )
    }
}

/// A journaled mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub operation: Operation,
    pub key: ObjectKey,
}

#[derive(Default)]
struct Inner {
    workloads: BTreeMap<ObjectKey, Workload>,
    pdbs: BTreeMap<ObjectKey, PodDisruptionBudget>,
    policies: BTreeMap<String, AvailabilityPolicy>,
    version: u64,
    uid: u64,
    writes: Vec<WriteRecord>,
    faults: VecDeque<(Operation, StoreError)>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn next_uid(&mut self) -> String {
        self.uid += 1;
        format!("uid-{}", self.uid)
    }

    fn take_fault(&mut self, operation: Operation) -> Result<(), StoreError> {
        if let Some(index) = self.faults.iter().position(|(op, _)| *op == operation) {
            if let Some((_, err)) = self.faults.remove(index) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn journal(&mut self, operation: Operation, key: ObjectKey) {
        self.writes.push(WriteRecord { operation, key });
    }
}

/// Apply a JSON merge patch (RFC 7386) to `target`.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn to_value<T: serde::Serialize>(resource: &str, object: &T) -> Result<Value, StoreError> {
    serde_json::to_value(object).map_err(|e| StoreError::Invalid {
        resource: resource.to_string(),
        message: e.to_string(),
    })
}

fn from_value<T: serde::de::DeserializeOwned>(resource: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Invalid {
        resource: resource.to_string(),
        message: e.to_string(),
    })
}

fn workload_metadata(workload: &Workload) -> Value {
    json!({
        "metadata": {
            "finalizers": workload.finalizers,
            "labels": workload.labels,
            "annotations": workload.annotations,
        }
    })
}

/// In-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // External actors
    // ------------------------------------------------------------------

    /// Create or replace a workload as an external actor would. A missing uid is
    /// assigned and the generation is bumped when an existing workload is replaced.
    pub fn apply_workload(&self, mut workload: Workload) {
        let mut inner = self.lock();
        let key = workload.key();
        match inner.workloads.get(&key) {
            Some(existing) => {
                workload.uid.clone_from(&existing.uid);
                workload.generation = existing.generation + 1;
            }
            None => {
                if workload.uid.is_empty() {
                    workload.uid = inner.next_uid();
                }
                if workload.generation == 0 {
                    workload.generation = 1;
                }
            }
        }
        workload.resource_version = Some(inner.next_version());
        inner.workloads.insert(key, workload);
    }

    /// Request deletion of a workload. It disappears immediately when it carries
    /// no finalizers, otherwise it lingers with a deletion timestamp.
    pub fn delete_workload(&self, key: &ObjectKey) {
        let mut inner = self.lock();
        let version = inner.next_version();
        let remove = match inner.workloads.get_mut(key) {
            Some(workload) if workload.finalizers.is_empty() => true,
            Some(workload) => {
                workload.deletion_timestamp = Some(Utc::now().to_rfc3339());
                workload.resource_version = Some(version);
                false
            }
            None => false,
        };
        if remove {
            inner.workloads.remove(key);
        }
    }

    /// Insert a PDB as an external actor would.
    pub fn insert_pdb(&self, mut pdb: PodDisruptionBudget) {
        let mut inner = self.lock();
        let key = ObjectKey::new(&pdb.namespace().unwrap_or_default(), &pdb.name_any());
        if pdb.metadata.uid.is_none() {
            pdb.metadata.uid = Some(inner.next_uid());
        }
        pdb.metadata.resource_version = Some(inner.next_version());
        inner.pdbs.insert(key, pdb);
    }

    /// Remove a PDB as an external actor would (not journaled).
    pub fn remove_pdb(&self, key: &ObjectKey) -> Option<PodDisruptionBudget> {
        self.lock().pdbs.remove(key)
    }

    /// Create or replace a policy. Generation is bumped on replace.
    pub fn apply_policy(&self, mut policy: AvailabilityPolicy) {
        let mut inner = self.lock();
        let name = policy.name_any();
        match inner.policies.get(&name) {
            Some(existing) => {
                policy.metadata.uid.clone_from(&existing.metadata.uid);
                policy.metadata.generation = existing.metadata.generation.map(|g| g + 1);
                if policy.status.is_none() {
                    policy.status.clone_from(&existing.status);
                }
                if policy.metadata.finalizers.is_none() {
                    policy.metadata.finalizers.clone_from(&existing.metadata.finalizers);
                }
            }
            None => {
                if policy.metadata.uid.is_none() {
                    policy.metadata.uid = Some(inner.next_uid());
                }
                if policy.metadata.generation.is_none() {
                    policy.metadata.generation = Some(1);
                }
            }
        }
        policy.metadata.resource_version = Some(inner.next_version());
        inner.policies.insert(name, policy);
    }

    /// Request deletion of a policy, honoring finalizers.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy cannot be re-encoded with a deletion timestamp.
    pub fn delete_policy(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let Some(policy) = inner.policies.get(name).cloned() else {
            return Ok(());
        };
        if policy.finalizers().is_empty() {
            inner.policies.remove(name);
            return Ok(());
        }
        let resource = format!("AvailabilityPolicy {name}");
        let mut value = to_value(&resource, &policy)?;
        merge_patch(
            &mut value,
            &json!({
                "metadata": {
                    "deletionTimestamp": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    "resourceVersion": inner.next_version(),
                }
            }),
        );
        let updated: AvailabilityPolicy = from_value(&resource, value)?;
        inner.policies.insert(name.to_string(), updated);
        Ok(())
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: Operation, error: StoreError) {
        self.lock().faults.push_back((operation, error));
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    #[must_use]
    pub fn workload(&self, key: &ObjectKey) -> Option<Workload> {
        self.lock().workloads.get(key).cloned()
    }

    #[must_use]
    pub fn pdb(&self, key: &ObjectKey) -> Option<PodDisruptionBudget> {
        self.lock().pdbs.get(key).cloned()
    }

    #[must_use]
    pub fn pdbs_in(&self, namespace: &str) -> Vec<PodDisruptionBudget> {
        self.lock()
            .pdbs
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(_, pdb)| pdb.clone())
            .collect()
    }

    #[must_use]
    pub fn policy(&self, name: &str) -> Option<AvailabilityPolicy> {
        self.lock().policies.get(name).cloned()
    }

    /// All mutations performed through the [`ObjectStore`] interface.
    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_workload(&self, key: &ObjectKey) -> Result<Option<Workload>, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(Operation::GetWorkload)?;
        Ok(inner.workloads.get(key).cloned())
    }

    async fn list_workloads(&self) -> Result<Vec<Workload>, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(Operation::ListWorkloads)?;
        Ok(inner.workloads.values().cloned().collect())
    }

    async fn patch_workload_metadata(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<Workload, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(Operation::PatchWorkload)?;
        let resource = format!("Deployment {key}");
        let Some(mut workload) = inner.workloads.get(key).cloned() else {
            return Err(StoreError::NotFound { resource });
        };

        let mut value = workload_metadata(&workload);
        merge_patch(&mut value, patch);
        let metadata = &value["metadata"];
        workload.finalizers = from_value(&resource, metadata["finalizers"].clone())
            .unwrap_or_default();
        workload.labels = from_value(&resource, metadata["labels"].clone()).unwrap_or_default();
        workload.annotations =
            from_value(&resource, metadata["annotations"].clone()).unwrap_or_default();
        workload.resource_version = Some(inner.next_version());
        inner.journal(Operation::PatchWorkload, key.clone());

        if workload.is_being_deleted() && workload.finalizers.is_empty() {
            inner.workloads.remove(key);
        } else {
            inner.workloads.insert(key.clone(), workload.clone());
        }
        Ok(workload)
    }

    async fn get_pdb(&self, key: &ObjectKey) -> Result<Option<PodDisruptionBudget>, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(Operation::GetPdb)?;
        Ok(inner.pdbs.get(key).cloned())
    }

    async fn list_pdbs(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(Operation::ListPdbs)?;
        Ok(inner
            .pdbs
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(_, pdb)| pdb.clone())
            .collect())
    }

    async fn create_pdb(
        &self,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(Operation::CreatePdb)?;
        let key = ObjectKey::new(&pdb.namespace().unwrap_or_default(), &pdb.name_any());
        if inner.pdbs.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                resource: format!("PodDisruptionBudget {key}"),
            });
        }
        let mut created = pdb.clone();
        created.metadata.uid = Some(inner.next_uid());
        created.metadata.resource_version = Some(inner.next_version());
        created.metadata.generation = Some(1);
        inner.journal(Operation::CreatePdb, key.clone());
        inner.pdbs.insert(key, created.clone());
        Ok(created)
    }

    async fn patch_pdb(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<PodDisruptionBudget, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(Operation::PatchPdb)?;
        let resource = format!("PodDisruptionBudget {key}");
        let Some(existing) = inner.pdbs.get(key).cloned() else {
            return Err(StoreError::NotFound { resource });
        };
        let mut value = to_value(&resource, &existing)?;
        merge_patch(&mut value, patch);
        let mut patched: PodDisruptionBudget = from_value(&resource, value)?;
        patched.metadata.resource_version = Some(inner.next_version());
        if patched.spec != existing.spec {
            patched.metadata.generation = existing.metadata.generation.map(|g| g + 1);
        }
        inner.journal(Operation::PatchPdb, key.clone());
        inner.pdbs.insert(key.clone(), patched.clone());
        Ok(patched)
    }

    async fn delete_pdb(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.take_fault(Operation::DeletePdb)?;
        if inner.pdbs.remove(key).is_none() {
            return Err(StoreError::NotFound {
                resource: format!("PodDisruptionBudget {key}"),
            });
        }
        inner.journal(Operation::DeletePdb, key.clone());
        Ok(())
    }

    async fn get_policy(&self, name: &str) -> Result<Option<AvailabilityPolicy>, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(Operation::GetPolicy)?;
        Ok(inner.policies.get(name).cloned())
    }

    async fn list_policies(&self) -> Result<Vec<AvailabilityPolicy>, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(Operation::ListPolicies)?;
        Ok(inner.policies.values().cloned().collect())
    }

    async fn patch_policy_metadata(
        &self,
        name: &str,
        patch: &Value,
    ) -> Result<AvailabilityPolicy, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(Operation::PatchPolicy)?;
        let resource = format!("AvailabilityPolicy {name}");
        let Some(existing) = inner.policies.get(name).cloned() else {
            return Err(StoreError::NotFound { resource });
        };
        let mut value = to_value(&resource, &existing)?;
        merge_patch(&mut value, patch);
        let mut patched: AvailabilityPolicy = from_value(&resource, value)?;
        patched.metadata.resource_version = Some(inner.next_version());
        inner.journal(Operation::PatchPolicy, ObjectKey::cluster(name));

        if patched.metadata.deletion_timestamp.is_some() && patched.finalizers().is_empty() {
            inner.policies.remove(name);
        } else {
            inner.policies.insert(name.to_string(), patched.clone());
        }
        Ok(patched)
    }

    async fn replace_policy_status(
        &self,
        policy: &AvailabilityPolicy,
    ) -> Result<AvailabilityPolicy, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(Operation::ReplacePolicyStatus)?;
        let name = policy.name_any();
        let resource = format!("AvailabilityPolicy {name} status");
        let Some(existing) = inner.policies.get(&name).cloned() else {
            return Err(StoreError::NotFound { resource });
        };
        if existing.metadata.resource_version != policy.metadata.resource_version {
            return Err(StoreError::Conflict {
                resource,
                message: "the object has been modified; please apply your changes to the latest version".to_string(),
            });
        }
        let mut updated = existing;
        updated.status.clone_from(&policy.status);
        updated.metadata.resource_version = Some(inner.next_version());
        inner.journal(Operation::ReplacePolicyStatus, ObjectKey::cluster(&name));
        inner.policies.insert(name, updated.clone());
        Ok(updated)
    }
}
