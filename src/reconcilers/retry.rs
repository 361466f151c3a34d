// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry logic with exponential backoff for object-store calls.
//!
//! Transient failures (conflict, server timeout, rate limiting, unexpected
//! server errors) are retried in-process with jittered exponential backoff.
//! Everything else fails immediately. Backoff sleeps are raced against the
//! reconcile's cancellation token, so a shutdown never waits out a retry.

use crate::errors::ReconcileError;
use crate::metrics;
use crate::store::StoreError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Initial retry interval (100ms)
const INITIAL_INTERVAL_MILLIS: u64 = 100;

/// Maximum interval between retries (30 seconds)
const MAX_INTERVAL_SECS: u64 = 30;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Total attempts, including the first one
const MAX_ATTEMPTS: u32 = 5;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
    /// Attempts allowed before giving up
    pub max_attempts: u32,
    retries: u32,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
            max_attempts,
            retries: 0,
        }
    }

    /// Get the next backoff interval, or None once every attempt has been used.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries + 1 >= self.max_attempts {
            return None;
        }
        self.retries += 1;

        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Default backoff for object-store calls.
///
/// # Configuration
///
/// - **Initial interval**: 100ms
/// - **Max interval**: 30 seconds
/// - **Multiplier**: 2.0
/// - **Randomization**: ±10%
/// - **Attempts**: 5 (waits of roughly 100ms, 200ms, 400ms, 800ms)
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(MAX_INTERVAL_SECS),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
        MAX_ATTEMPTS,
    )
}

/// Retry an object-store call with exponential backoff.
///
/// # Arguments
///
/// * `operation` - Async closure performing the call; invoked once per attempt
/// * `operation_name` - Human-readable name for logs and the retry metric
/// * `cancel` - Cancellation token; cancelling it aborts the pending backoff sleep
///
/// # Errors
///
/// - [`ReconcileError::Store`] for non-transient errors (immediately) and for
///   transient errors once all attempts are used
/// - [`ReconcileError::Cancelled`] when `cancel` fires while waiting
pub async fn retry_store_call<T, F, Fut>(
    mut operation: F,
    operation_name: &str,
    cancel: &CancellationToken,
) -> Result<T, ReconcileError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut backoff = default_backoff();
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Object store call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => {
                debug!(
                    operation = operation_name,
                    error = %e,
                    "Non-retryable object store error, failing immediately"
                );
                return Err(ReconcileError::store(operation_name, e));
            }
            Err(e) => {
                let Some(duration) = backoff.next_backoff() else {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        error = %e,
                        "Backoff exhausted, giving up"
                    );
                    return Err(ReconcileError::store(operation_name, e));
                };

                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    retry_after = ?duration,
                    error = %e,
                    "Retryable object store error, will retry"
                );
                metrics::record_store_retry(operation_name);

                tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(ReconcileError::Cancelled {
                            key: operation_name.to_string(),
                        });
                    }
                    () = tokio::time::sleep(duration) => {}
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
