// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Change detection for the workload reconciler.
//!
//! A fingerprint is the SHA-256 of a canonical JSON document built from every
//! input that influences the desired PDB, plus the state of the PDB as it
//! currently exists. Maps are `BTreeMap`s so key order is deterministic.
//!
//! The current PDB is part of the input so that an externally deleted or
//! edited PDB changes the fingerprint even when the workload did not.

use crate::availability::{int_or_string_to_string, AvailabilityConfig};
use crate::constants::{
    ANNOTATION_AVAILABILITY_CLASS, ANNOTATION_COMPONENT_FUNCTION, ANNOTATION_MAINTENANCE_WINDOW,
    ANNOTATION_OVERRIDE_REASON, FINALIZER_PDB_CLEANUP,
};
use crate::store::ObjectKey;
use crate::workload::Workload;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Workload annotations that take part in the fingerprint.
const FINGERPRINT_ANNOTATIONS: &[&str] = &[
    ANNOTATION_AVAILABILITY_CLASS,
    ANNOTATION_MAINTENANCE_WINDOW,
    ANNOTATION_COMPONENT_FUNCTION,
    ANNOTATION_OVERRIDE_REASON,
];

#[derive(Serialize)]
struct ResolvedPart<'a> {
    class: &'a str,
    source: &'a str,
    policy: Option<&'a str>,
    enforcement: &'a str,
    min_available: String,
}

#[derive(Serialize)]
struct CurrentPdbPart {
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_available: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selector: Option<BTreeMap<String, String>>,
}

#[derive(Serialize)]
struct ExpectedPdbPart {
    min_available: String,
    selector: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    generation: i64,
    replicas: i32,
    annotations: BTreeMap<&'a str, &'a str>,
    labels: &'a BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
    finalizer: bool,
    resolved: ResolvedPart<'a>,
    current: CurrentPdbPart,
    expected: ExpectedPdbPart,
}

/// `spec.minAvailable` and `spec.selector.matchLabels` of a PDB.
#[must_use]
pub fn pdb_state(pdb: &PodDisruptionBudget) -> (Option<String>, BTreeMap<String, String>) {
    let spec = pdb.spec.as_ref();
    let min_available = spec
        .and_then(|s| s.min_available.as_ref())
        .map(int_or_string_to_string);
    let selector = spec
        .and_then(|s| s.selector.as_ref())
        .and_then(|s| s.match_labels.clone())
        .unwrap_or_default();
    (min_available, selector)
}

/// Compute the fingerprint of a reconcile.
#[must_use]
pub fn compute(
    workload: &Workload,
    config: &AvailabilityConfig,
    current_pdb: Option<&PodDisruptionBudget>,
) -> String {
    let annotations = FINGERPRINT_ANNOTATIONS
        .iter()
        .filter_map(|key| workload.annotation(key).map(|value| (*key, value)))
        .collect();

    let current = match current_pdb {
        Some(pdb) => {
            let (min_available, selector) = pdb_state(pdb);
            CurrentPdbPart {
                exists: true,
                min_available,
                selector: Some(selector),
            }
        }
        None => CurrentPdbPart {
            exists: false,
            min_available: None,
            selector: None,
        },
    };

    let input = FingerprintInput {
        generation: workload.generation,
        replicas: workload.replicas,
        annotations,
        labels: &workload.labels,
        selector: workload.match_labels(),
        finalizer: workload.has_finalizer(FINALIZER_PDB_CLEANUP),
        resolved: ResolvedPart {
            class: config.availability_class.as_str(),
            source: &config.source,
            policy: config.policy_name.as_deref(),
            enforcement: config.enforcement_label(),
            min_available: int_or_string_to_string(&config.min_available),
        },
        current,
        expected: ExpectedPdbPart {
            min_available: int_or_string_to_string(&config.min_available),
            selector: workload.match_labels(),
        },
    };

    hash(&input)
}

fn hash<T: Serialize>(data: &T) -> String {
    let json = serde_json::to_string(data).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Last fingerprint applied per workload.
#[derive(Debug, Default)]
pub struct DeploymentState {
    fingerprints: RwLock<HashMap<ObjectKey, String>>,
}

impl DeploymentState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `fingerprint` differs from the stored one. Unknown keys are always changed.
    #[must_use]
    pub fn has_changed(&self, key: &ObjectKey, fingerprint: &str) -> bool {
        self.fingerprints
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .is_none_or(|stored| stored != fingerprint)
    }

    pub fn update(&self, key: &ObjectKey, fingerprint: String) {
        self.fingerprints
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.clone(), fingerprint);
    }

    pub fn clear(&self, key: &ObjectKey) {
        self.fingerprints
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }

    #[must_use]
    pub fn get(&self, key: &ObjectKey) -> Option<String> {
        self.fingerprints
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fingerprints
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "fingerprint_tests.rs"]
mod fingerprint_tests;
