// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Annotation-vs-policy resolution.
//!
//! A workload may request an availability class through its annotation while a
//! policy also selects it. The policy's enforcement mode decides who wins:
//!
//! | Annotation | strict | flexible | advisory |
//! |---|---|---|---|
//! | absent | policy | policy | policy |
//! | at or above minimum | policy, override blocked | annotation | annotation if allowed |
//! | below minimum | policy | policy at `minimumClass` | annotation if allowed |
//!
//! Resolution is pure: it returns the final config plus the events, audit flag
//! and metric labels describing the decision, and the reconciler decides when
//! to publish them.

use crate::availability::AvailabilityConfig;
use crate::constants::ANNOTATION_OVERRIDE_REASON;
use crate::crd::{AvailabilityPolicy, EnforcementMode};
use crate::events::{actions, reasons, PendingEvent};
use crate::metrics;
use crate::workload::Workload;
use kube::ResourceExt;

// ============================================================================
// Source tags
// ============================================================================

pub const SOURCE_POLICY_STRICT: &str = "policy-strict";
pub const SOURCE_POLICY_FLEXIBLE: &str = "policy-flexible";
pub const SOURCE_POLICY_ADVISORY: &str = "policy-advisory";
pub const SOURCE_POLICY_DEFAULT: &str = "policy-default";
pub const SOURCE_ANNOTATION_FLEXIBLE: &str = "annotation-flexible";
pub const SOURCE_ANNOTATION_ADVISORY: &str = "annotation-advisory";
pub const SOURCE_POLICY_FLEXIBLE_MINIMUM: &str = "policy-flexible-minimum";
pub const SOURCE_POLICY_OVERRIDE_REQUIRES_ANNOTATION: &str = "policy-override-requires-annotation";
pub const SOURCE_POLICY_OVERRIDE_REQUIRES_REASON: &str = "policy-override-requires-reason";
pub const SOURCE_POLICY_OVERRIDE_DISALLOWED: &str = "policy-override-disallowed";

// ============================================================================
// Override outcomes (metric label values)
// ============================================================================

pub const OVERRIDE_ACCEPTED: &str = "accepted";
pub const OVERRIDE_BLOCKED: &str = "blocked";
pub const OVERRIDE_BELOW_MINIMUM: &str = "below_minimum";
pub const OVERRIDE_REQUIRES_ANNOTATION: &str = "requires_annotation";
pub const OVERRIDE_REQUIRES_REASON: &str = "requires_reason";
pub const OVERRIDE_DISALLOWED: &str = "disallowed";

/// Result of resolving a workload's availability.
#[derive(Clone, Debug, PartialEq)]
pub struct EnforcementDecision {
    /// Final config, `None` when the workload is not managed.
    pub config: Option<AvailabilityConfig>,
    /// Events describing the decision, published on the workload.
    pub events: Vec<PendingEvent>,
    /// True when a strict policy blocked an annotation override.
    pub override_blocked: bool,
    /// Override outcome when the workload tried to override a policy.
    pub override_outcome: Option<&'static str>,
    /// Enforcement mode label (`none` without a policy).
    pub mode: String,
    /// `policy` or `annotation`.
    pub winner: &'static str,
}

impl EnforcementDecision {
    fn unmanaged() -> Self {
        Self {
            config: None,
            events: Vec::new(),
            override_blocked: false,
            override_outcome: None,
            mode: "none".to_string(),
            winner: "none",
        }
    }

    fn annotation_only(config: AvailabilityConfig) -> Self {
        Self {
            config: Some(config),
            winner: "annotation",
            ..Self::unmanaged()
        }
    }

    /// Record the enforcement and override metrics for this decision.
    pub fn record_metrics(&self) {
        if self.config.is_none() {
            return;
        }
        metrics::record_enforcement_decision(&self.mode, self.winner);
        if let Some(outcome) = self.override_outcome {
            metrics::record_override_attempt(outcome);
        }
    }
}

fn policy_wins(
    policy_config: &AvailabilityConfig,
    source: &str,
    mode: &EnforcementMode,
) -> EnforcementDecision {
    let mut config = policy_config.clone();
    config.source = source.to_string();
    EnforcementDecision {
        config: Some(config),
        events: Vec::new(),
        override_blocked: false,
        override_outcome: None,
        mode: mode.as_str().to_string(),
        winner: "policy",
    }
}

fn annotation_wins(
    annotation_config: &AvailabilityConfig,
    policy_config: &AvailabilityConfig,
    source: &str,
    mode: &EnforcementMode,
) -> EnforcementDecision {
    let mut config = annotation_config.clone();
    config.source = source.to_string();
    config.policy_name = policy_config.policy_name.clone();
    config.enforcement = Some(mode.clone());
    if config.maintenance_window.is_none() {
        config.maintenance_window = policy_config.maintenance_window.clone();
    }
    EnforcementDecision {
        config: Some(config),
        events: Vec::new(),
        override_blocked: false,
        override_outcome: Some(OVERRIDE_ACCEPTED),
        mode: mode.as_str().to_string(),
        winner: "annotation",
    }
}

fn default_policy_source(mode: &EnforcementMode) -> &'static str {
    match mode {
        EnforcementMode::Strict => SOURCE_POLICY_STRICT,
        EnforcementMode::Flexible => SOURCE_POLICY_FLEXIBLE,
        EnforcementMode::Advisory => SOURCE_POLICY_ADVISORY,
        EnforcementMode::Unknown(_) => SOURCE_POLICY_DEFAULT,
    }
}

/// Resolve the final availability config of a workload.
///
/// `policy_config` must have been derived from `policy`; both are `None` when no
/// policy selects the workload.
#[must_use]
pub fn resolve(
    workload: &Workload,
    annotation_config: Option<&AvailabilityConfig>,
    policy_config: Option<&AvailabilityConfig>,
    policy: Option<&AvailabilityPolicy>,
) -> EnforcementDecision {
    let (Some(policy_config), Some(policy)) = (policy_config, policy) else {
        return annotation_config
            .cloned()
            .map_or_else(EnforcementDecision::unmanaged, EnforcementDecision::annotation_only);
    };

    let mode = policy.spec.enforcement_mode();
    let Some(annotation) = annotation_config else {
        return policy_wins(policy_config, default_policy_source(&mode), &mode);
    };

    let policy_name = policy.name_any();
    let requested = &annotation.availability_class;

    match &mode {
        EnforcementMode::Strict => {
            let mut decision = policy_wins(policy_config, SOURCE_POLICY_STRICT, &mode);
            if *requested != policy_config.availability_class {
                decision.override_blocked = true;
                decision.override_outcome = Some(OVERRIDE_BLOCKED);
                decision.events.push(PendingEvent::warning(
                    reasons::POLICY_ENFORCED,
                    actions::ENFORCE,
                    format!(
                        "Policy {policy_name} enforces class {} (strict); annotation {requested} ignored",
                        policy_config.availability_class
                    ),
                ));
            }
            decision
        }
        EnforcementMode::Flexible => {
            let minimum = policy
                .spec
                .minimum_class
                .clone()
                .unwrap_or_else(|| policy.spec.availability_class.clone());
            if requested.rank() >= minimum.rank() {
                let mut decision =
                    annotation_wins(annotation, policy_config, SOURCE_ANNOTATION_FLEXIBLE, &mode);
                decision.events.push(PendingEvent::normal(
                    reasons::ANNOTATION_ACCEPTED,
                    actions::ENFORCE,
                    format!(
                        "Annotation class {requested} meets minimum {minimum} of policy {policy_name}"
                    ),
                ));
                decision
            } else {
                let raised = policy_config.with_class(minimum.clone());
                let mut decision = policy_wins(&raised, SOURCE_POLICY_FLEXIBLE_MINIMUM, &mode);
                decision.override_outcome = Some(OVERRIDE_BELOW_MINIMUM);
                decision.events.push(PendingEvent::warning(
                    reasons::BELOW_MINIMUM,
                    actions::ENFORCE,
                    format!(
                        "Annotation class {requested} is below minimum {minimum} of policy {policy_name}; using {minimum}"
                    ),
                ));
                decision
            }
        }
        EnforcementMode::Advisory => resolve_advisory(workload, annotation, policy_config, policy),
        EnforcementMode::Unknown(_) => policy_wins(policy_config, SOURCE_POLICY_DEFAULT, &mode),
    }
}

fn resolve_advisory(
    workload: &Workload,
    annotation: &AvailabilityConfig,
    policy_config: &AvailabilityConfig,
    policy: &AvailabilityPolicy,
) -> EnforcementDecision {
    let mode = EnforcementMode::Advisory;
    let policy_name = policy.name_any();

    if policy.spec.allow_override == Some(false) {
        let mut decision = policy_wins(policy_config, SOURCE_POLICY_OVERRIDE_DISALLOWED, &mode);
        decision.override_outcome = Some(OVERRIDE_DISALLOWED);
        decision.events.push(PendingEvent::warning(
            reasons::OVERRIDE_NOT_ALLOWED,
            actions::ENFORCE,
            format!("Policy {policy_name} does not allow annotation overrides"),
        ));
        return decision;
    }

    if let Some(required) = policy
        .spec
        .override_requires_annotation
        .as_deref()
        .filter(|key| !key.is_empty())
    {
        if workload.annotation(required).is_none() {
            let mut decision =
                policy_wins(policy_config, SOURCE_POLICY_OVERRIDE_REQUIRES_ANNOTATION, &mode);
            decision.override_outcome = Some(OVERRIDE_REQUIRES_ANNOTATION);
            decision.events.push(PendingEvent::warning(
                reasons::OVERRIDE_REQUIRES_ANNOTATION,
                actions::ENFORCE,
                format!("Policy {policy_name} requires annotation {required} to override"),
            ));
            return decision;
        }
    }

    if policy.spec.override_requires_reason == Some(true)
        && workload
            .annotation(ANNOTATION_OVERRIDE_REASON)
            .is_none_or(|reason| reason.trim().is_empty())
    {
        let mut decision = policy_wins(policy_config, SOURCE_POLICY_OVERRIDE_REQUIRES_REASON, &mode);
        decision.override_outcome = Some(OVERRIDE_REQUIRES_REASON);
        decision.events.push(PendingEvent::warning(
            reasons::OVERRIDE_REQUIRES_REASON,
            actions::ENFORCE,
            format!(
                "Policy {policy_name} requires annotation {ANNOTATION_OVERRIDE_REASON} to override"
            ),
        ));
        return decision;
    }

    let mut decision = annotation_wins(annotation, policy_config, SOURCE_ANNOTATION_ADVISORY, &mode);
    decision.events.push(PendingEvent::normal(
        reasons::ANNOTATION_ACCEPTED,
        actions::ENFORCE,
        format!(
            "Annotation class {} overrides advisory policy {policy_name}",
            annotation.availability_class
        ),
    ));
    decision
}

#[cfg(test)]
#[path = "enforcement_tests.rs"]
mod enforcement_tests;
