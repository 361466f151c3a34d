// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconcile error types.
//!
//! Every failure a reconciler surfaces carries an [`ErrorKind`] so callers can
//! decide between in-process retry, runtime requeue, or reporting the problem to
//! the user through conditions and events.

use crate::store::StoreError;
use thiserror::Error;

/// Classification of a reconcile failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient failure; the runtime requeues with backoff.
    Retryable,
    /// User configuration is invalid; surfaced via conditions and events.
    Validation,
    /// The object disappeared; terminal success for the current key.
    NotFound,
    /// A conflict that was resolved by a later write.
    ConflictResolved,
    /// Internal invariant violation.
    Fatal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::ConflictResolved => "conflict_resolved",
            Self::Fatal => "fatal",
        }
    }
}

/// Error returned by reconcilers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// An object-store call failed after retries.
    #[error("{operation} failed: {source}")]
    Store {
        operation: String,
        #[source]
        source: StoreError,
    },

    /// A workload requested an availability class the operator does not know.
    #[error("invalid availability class '{class}' on {workload}")]
    InvalidAvailabilityClass { workload: String, class: String },

    /// An `AvailabilityPolicy` spec failed validation.
    #[error("policy {policy} is invalid: {message}")]
    InvalidPolicy { policy: String, message: String },

    /// The reconcile was cancelled (shutdown).
    #[error("reconcile of {key} cancelled")]
    Cancelled { key: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    #[must_use]
    pub fn store(operation: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            operation: operation.into(),
            source,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store { source, .. } if source.is_not_found() => ErrorKind::NotFound,
            Self::Store { source, .. } if source.is_already_exists() => {
                ErrorKind::ConflictResolved
            }
            Self::Store { source, .. } if source.is_transient() => ErrorKind::Retryable,
            Self::Store { source, .. } => match source {
                StoreError::Invalid { .. } => ErrorKind::Validation,
                _ => ErrorKind::Fatal,
            },
            Self::InvalidAvailabilityClass { .. } | Self::InvalidPolicy { .. } => {
                ErrorKind::Validation
            }
            Self::Cancelled { .. } => ErrorKind::Retryable,
            Self::Internal(_) => ErrorKind::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_classify() {
        let transient = ReconcileError::store(
            "update",
            StoreError::Conflict {
                resource: "x".into(),
                message: "stale".into(),
            },
        );
        assert_eq!(transient.kind(), ErrorKind::Retryable);

        let gone = ReconcileError::store("get", StoreError::NotFound { resource: "x".into() });
        assert_eq!(gone.kind(), ErrorKind::NotFound);

        let exists =
            ReconcileError::store("create", StoreError::AlreadyExists { resource: "x".into() });
        assert_eq!(exists.kind(), ErrorKind::ConflictResolved);

        let invalid = ReconcileError::store(
            "create",
            StoreError::Invalid {
                resource: "x".into(),
                message: "bad".into(),
            },
        );
        assert_eq!(invalid.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_invalid_class_is_validation() {
        let err = ReconcileError::InvalidAvailabilityClass {
            workload: "default/app".into(),
            class: "platinum".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("platinum"));
    }
}
