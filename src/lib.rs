// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # pdb-operator - PodDisruptionBudget operator for Kubernetes
//!
//! The operator keeps a `PodDisruptionBudget` next to every Deployment that
//! asks for one, either through an `availability-class` annotation or through a
//! cluster-scoped `AvailabilityPolicy` that selects it.
//!
//! ## Overview
//!
//! - Policies with overlapping selectors are resolved by priority, then by name
//! - Annotation and policy conflicts are settled by the policy's enforcement
//!   mode (`strict`, `flexible` or `advisory`)
//! - Unchanged workloads are skipped through a content fingerprint
//! - Finalizers guarantee owned PDBs are removed before their workload goes
//!
//! ## Modules
//!
//! - [`crd`] - `AvailabilityPolicy` custom resource
//! - [`reconcilers`] - workload, policy and direct PDB control loops
//! - [`context`] - shared state handed to every reconcile
//! - [`selector`] - selector evaluation and policy selection
//! - [`enforcement`] - annotation-versus-policy resolution
//! - [`store`] - object-store abstraction over the Kubernetes API
//!
//! ## Example
//!
//! ```rust,no_run
//! use pdb_operator::crd::{AvailabilityClass, AvailabilityPolicy, AvailabilityPolicySpec, ComponentSelector};
//! use std::collections::BTreeMap;
//!
//! let policy = AvailabilityPolicy::new(
//!     "payments",
//!     AvailabilityPolicySpec {
//!         availability_class: AvailabilityClass::MissionCritical,
//!         component_selector: ComponentSelector {
//!             match_labels: BTreeMap::from([("team".to_string(), "payments".to_string())]),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     },
//! );
//! ```

pub mod audit;
pub mod availability;
pub mod cache;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod enforcement;
pub mod errors;
pub mod events;
pub mod fingerprint;
pub mod maintenance;
pub mod metrics;
pub mod reconcilers;
pub mod selector;
pub mod store;
pub mod telemetry;
pub mod validation;
pub mod watch;
pub mod workload;
