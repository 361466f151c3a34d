// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Process-local policy cache.
//!
//! Holds single policies, policy lists and TTL'd maintenance-window results.
//! One [`RwLock`] guards all three maps; lookups take it shared, mutations
//! exclusive. Storing or invalidating any single policy also drops the
//! `all-policies` list so a stale list is never served after a change.
//!
//! The cache is passed explicitly to the reconcilers; there is no global instance.

use crate::constants::{CACHE_KEY_ALL_POLICIES, POLICY_CACHE_MAX_ENTRIES};
use crate::crd::AvailabilityPolicy;
use crate::metrics;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

const KIND_POLICY: &str = "policy";
const KIND_LIST: &str = "list";
const KIND_MAINTENANCE: &str = "maintenance";

#[derive(Debug)]
struct Entry<T> {
    value: T,
    inserted: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    policies: HashMap<String, Entry<AvailabilityPolicy>>,
    lists: HashMap<String, Entry<Vec<AvailabilityPolicy>>>,
    maintenance: HashMap<String, (bool, Instant)>,
}

/// Snapshot of cache occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub policies: usize,
    pub lists: usize,
    pub maintenance_windows: usize,
    pub entries: usize,
}

/// Bounded cache of policies and derived lookups.
#[derive(Debug)]
pub struct PolicyCache {
    inner: RwLock<Inner>,
    max_entries: usize,
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove the oldest entry when `map` is full and `key` is new.
fn make_room<T>(map: &mut HashMap<String, Entry<T>>, key: &str, max_entries: usize) {
    if map.len() < max_entries || map.contains_key(key) {
        return;
    }
    if let Some(oldest) = map
        .iter()
        .min_by_key(|(_, entry)| entry.inserted)
        .map(|(k, _)| k.clone())
    {
        map.remove(&oldest);
    }
}

impl PolicyCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(POLICY_CACHE_MAX_ENTRIES)
    }

    /// Cache holding at most `max_entries` items per map.
    #[must_use]
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_entries: max_entries.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn observe<T>(kind: &str, value: Option<T>) -> Option<T> {
        if value.is_some() {
            metrics::record_cache_hit(kind);
        } else {
            metrics::record_cache_miss(kind);
        }
        value
    }

    // ------------------------------------------------------------------
    // Single policies
    // ------------------------------------------------------------------

    #[must_use]
    pub fn get(&self, key: &str) -> Option<AvailabilityPolicy> {
        let value = self.read().policies.get(key).map(|e| e.value.clone());
        Self::observe(KIND_POLICY, value)
    }

    /// Store a policy. Invalidates the `all-policies` list.
    pub fn set(&self, key: &str, policy: AvailabilityPolicy) {
        let mut inner = self.write();
        make_room(&mut inner.policies, key, self.max_entries);
        inner.policies.insert(
            key.to_string(),
            Entry {
                value: policy,
                inserted: Instant::now(),
            },
        );
        inner.lists.remove(CACHE_KEY_ALL_POLICIES);
    }

    pub fn delete(&self, key: &str) {
        self.write().policies.remove(key);
    }

    /// Drop a policy and the `all-policies` list.
    pub fn invalidate_policy(&self, key: &str) {
        let mut inner = self.write();
        inner.policies.remove(key);
        inner.lists.remove(CACHE_KEY_ALL_POLICIES);
    }

    // ------------------------------------------------------------------
    // Policy lists
    // ------------------------------------------------------------------

    #[must_use]
    pub fn get_list(&self, key: &str) -> Option<Vec<AvailabilityPolicy>> {
        let value = self.read().lists.get(key).map(|e| e.value.clone());
        Self::observe(KIND_LIST, value)
    }

    pub fn set_list(&self, key: &str, policies: Vec<AvailabilityPolicy>) {
        let mut inner = self.write();
        make_room(&mut inner.lists, key, self.max_entries);
        inner.lists.insert(
            key.to_string(),
            Entry {
                value: policies,
                inserted: Instant::now(),
            },
        );
    }

    // ------------------------------------------------------------------
    // Maintenance windows
    // ------------------------------------------------------------------

    /// Cached window activity, `None` when absent or expired.
    #[must_use]
    pub fn get_maintenance_window(&self, key: &str) -> Option<bool> {
        let now = Instant::now();
        let value = self
            .read()
            .maintenance
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map(|(active, _)| *active);
        Self::observe(KIND_MAINTENANCE, value)
    }

    pub fn set_maintenance_window(&self, key: &str, active: bool, ttl: Duration) {
        let now = Instant::now();
        let mut inner = self.write();
        inner.maintenance.retain(|_, (_, expires)| *expires > now);
        if inner.maintenance.len() >= self.max_entries && !inner.maintenance.contains_key(key) {
            if let Some(soonest) = inner
                .maintenance
                .iter()
                .min_by_key(|(_, (_, expires))| *expires)
                .map(|(k, _)| k.clone())
            {
                inner.maintenance.remove(&soonest);
            }
        }
        inner
            .maintenance
            .insert(key.to_string(), (active, now + ttl));
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.read();
        let policies = inner.policies.len();
        let lists = inner.lists.len();
        let maintenance_windows = inner.maintenance.len();
        CacheStats {
            policies,
            lists,
            maintenance_windows,
            entries: policies + lists + maintenance_windows,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.policies.clear();
        inner.lists.clear();
        inner.maintenance.clear();
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod cache_tests;
