// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Watch-event filtering and mapping.
//!
//! kube-runtime watchers report objects as they are now. The controllers need
//! to know *what changed* to skip noise, so a [`WatchTracker`] keeps the last
//! seen copy of every object and turns raw watcher events into
//! [`WatchEvent::Created`], [`WatchEvent::Updated`] or [`WatchEvent::Deleted`].
//! A predicate per resource type then decides whether the event triggers a
//! reconcile:
//!
//! - workloads: created, deleted, generation changed, deletion requested, or a
//!   label or availability annotation changed
//! - PDBs: only operator-managed ones, only when deleted or edited by someone
//!   else (detected through an unchanged `last-modified` annotation)
//! - policies: always

use crate::constants::{
    ANNOTATION_AVAILABILITY_CLASS, ANNOTATION_COMPONENT_FUNCTION, ANNOTATION_COMPONENT_NAME,
    ANNOTATION_LAST_MODIFIED, ANNOTATION_MAINTENANCE_WINDOW, ANNOTATION_OVERRIDE_REASON,
    KIND_DEPLOYMENT, LABEL_MANAGED_BY, OPERATOR_NAME,
};
use crate::crd::AvailabilityPolicy;
use crate::store::ObjectKey;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Workload annotations whose change triggers a reconcile.
const WATCHED_WORKLOAD_ANNOTATIONS: &[&str] = &[
    ANNOTATION_AVAILABILITY_CLASS,
    ANNOTATION_COMPONENT_FUNCTION,
    ANNOTATION_COMPONENT_NAME,
    ANNOTATION_MAINTENANCE_WINDOW,
    ANNOTATION_OVERRIDE_REASON,
];

/// A change to a watched object.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<K> {
    Created(K),
    Updated { old: K, new: K },
    Deleted(K),
}

impl<K> WatchEvent<K> {
    /// The most recent state of the object.
    pub fn object(&self) -> &K {
        match self {
            Self::Created(obj) | Self::Deleted(obj) => obj,
            Self::Updated { new, .. } => new,
        }
    }

    pub fn into_object(self) -> K {
        match self {
            Self::Created(obj) | Self::Deleted(obj) => obj,
            Self::Updated { new, .. } => new,
        }
    }
}

/// Decides whether an event triggers a reconcile.
pub type Predicate<K> = fn(&WatchEvent<K>) -> bool;

fn object_key<K: Resource>(obj: &K) -> ObjectKey {
    ObjectKey::new(
        obj.meta().namespace.as_deref().unwrap_or_default(),
        obj.meta().name.as_deref().unwrap_or_default(),
    )
}

fn annotations_differ(
    old: &std::collections::BTreeMap<String, String>,
    new: &std::collections::BTreeMap<String, String>,
    keys: &[&str],
) -> bool {
    keys.iter().any(|key| old.get(*key) != new.get(*key))
}

// ============================================================================
// Predicates
// ============================================================================

/// Workload events worth reconciling.
#[must_use]
pub fn workload_changed(event: &WatchEvent<Deployment>) -> bool {
    match event {
        WatchEvent::Created(_) | WatchEvent::Deleted(_) => true,
        WatchEvent::Updated { old, new } => {
            old.metadata.generation != new.metadata.generation
                || old.metadata.deletion_timestamp.is_some()
                    != new.metadata.deletion_timestamp.is_some()
                || old.labels() != new.labels()
                || annotations_differ(
                    old.annotations(),
                    new.annotations(),
                    WATCHED_WORKLOAD_ANNOTATIONS,
                )
        }
    }
}

/// True when the PDB carries the operator's `managed-by` label.
#[must_use]
pub fn is_managed_pdb(pdb: &PodDisruptionBudget) -> bool {
    pdb.labels().get(LABEL_MANAGED_BY).map(String::as_str) == Some(OPERATOR_NAME)
}

/// PDB events worth reconciling: deletions and external edits of managed PDBs.
///
/// Every write the operator makes bumps `last-modified`, so an update that
/// leaves it untouched came from someone else. Status-only updates are ignored.
#[must_use]
pub fn pdb_changed(event: &WatchEvent<PodDisruptionBudget>) -> bool {
    match event {
        WatchEvent::Created(_) => false,
        WatchEvent::Deleted(pdb) => is_managed_pdb(pdb),
        WatchEvent::Updated { old, new } => {
            let external = old.annotations().get(ANNOTATION_LAST_MODIFIED)
                == new.annotations().get(ANNOTATION_LAST_MODIFIED);
            let relevant = old.spec != new.spec
                || old.labels() != new.labels()
                || old.annotations() != new.annotations();
            (is_managed_pdb(old) || is_managed_pdb(new)) && external && relevant
        }
    }
}

/// Policy events always reconcile.
#[must_use]
pub fn policy_changed(_event: &WatchEvent<AvailabilityPolicy>) -> bool {
    true
}

// ============================================================================
// Mapping
// ============================================================================

/// Key of the workload owning `pdb`.
///
/// Uses the controller owner reference, falling back to the `<workload>-pdb`
/// naming convention for managed PDBs without one.
#[must_use]
pub fn pdb_owner_key(pdb: &PodDisruptionBudget) -> Option<ObjectKey> {
    let namespace = pdb.namespace()?;
    let owner = pdb
        .owner_references()
        .iter()
        .find(|owner| owner.kind == KIND_DEPLOYMENT && owner.controller == Some(true))
        .map(|owner| owner.name.clone());

    let name = owner.or_else(|| {
        is_managed_pdb(pdb)
            .then(|| pdb.name_any().strip_suffix("-pdb").map(str::to_string))
            .flatten()
    })?;
    Some(ObjectKey::new(&namespace, &name))
}

/// Map a PDB event to the reconcile request of its owning workload.
#[must_use]
pub fn pdb_to_workload(pdb: &PodDisruptionBudget) -> Option<ObjectRef<Deployment>> {
    pdb_owner_key(pdb).map(|key| ObjectRef::new(&key.name).within(&key.namespace))
}

// ============================================================================
// Snapshot tracking
// ============================================================================

/// Turns raw watcher events into [`WatchEvent`]s and filters them.
pub struct WatchTracker<K> {
    seen: HashMap<ObjectKey, K>,
    relisted: Option<HashSet<ObjectKey>>,
    predicate: Predicate<K>,
}

impl<K> WatchTracker<K>
where
    K: Resource + Clone,
{
    #[must_use]
    pub fn new(predicate: Predicate<K>) -> Self {
        Self {
            seen: HashMap::new(),
            relisted: None,
            predicate,
        }
    }

    fn applied(&mut self, obj: K) -> WatchEvent<K> {
        match self.seen.insert(object_key(&obj), obj.clone()) {
            Some(old) => WatchEvent::Updated { old, new: obj },
            None => WatchEvent::Created(obj),
        }
    }

    /// Classify a watcher event.
    ///
    /// A relist (`Init` .. `InitDone`) reports every object again; objects that
    /// were known before the relist and are missing from it are reported deleted.
    pub fn classify(&mut self, event: watcher::Event<K>) -> Vec<WatchEvent<K>> {
        match event {
            watcher::Event::Apply(obj) => vec![self.applied(obj)],
            watcher::Event::Delete(obj) => {
                self.seen.remove(&object_key(&obj));
                vec![WatchEvent::Deleted(obj)]
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(object_key(&obj));
                }
                vec![self.applied(obj)]
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<ObjectKey> = self
                    .seen
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();
                gone.iter()
                    .filter_map(|key| self.seen.remove(key))
                    .map(WatchEvent::Deleted)
                    .collect()
            }
        }
    }

    /// Objects whose events pass the predicate.
    pub fn admit(&mut self, event: watcher::Event<K>) -> Vec<K> {
        let predicate = self.predicate;
        self.classify(event)
            .into_iter()
            .filter(|event| {
                let admitted = predicate(event);
                if !admitted {
                    trace!(key = %object_key(event.object()), "Watch event filtered out");
                }
                admitted
            })
            .map(WatchEvent::into_object)
            .collect()
    }

    /// Number of objects currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Filter a watcher event stream through a tracker, yielding the objects to reconcile.
pub fn filtered<K, S>(
    stream: S,
    mut tracker: WatchTracker<K>,
) -> impl Stream<Item = Result<K, watcher::Error>> + Send
where
    K: Resource + Clone + Send + 'static,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send,
{
    stream.flat_map(move |event| {
        let items: Vec<Result<K, watcher::Error>> = match event {
            Ok(event) => tracker.admit(event).into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        futures::stream::iter(items)
    })
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod watch_tests;
