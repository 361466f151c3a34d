// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Maintenance windows.
//!
//! A window is written `HH:MM-HH:MM TZ` on workloads, or as a structured
//! [`MaintenanceWindow`] on policies. It is active at an instant when the local
//! weekday is in its day set and the local wall-clock time falls inside the
//! range. A range whose end precedes its start wraps midnight.
//!
//! Windows are informational: they are evaluated and logged, never used to
//! relax or remove a PDB.

use crate::cache::PolicyCache;
use crate::constants::{DEFAULT_MAINTENANCE_TIMEZONE, MAINTENANCE_WINDOW_CACHE_TTL_SECS};
use crate::crd::MaintenanceWindow;
use chrono::{DateTime, Datelike, NaiveTime, Utc};
use chrono_tz::Tz;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceError {
    #[error("maintenance window '{0}' is not of the form HH:MM-HH:MM [TZ]")]
    InvalidFormat(String),

    #[error("'{0}' is not a valid HH:MM time")]
    InvalidTime(String),

    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),
}

/// Parse a 24h `HH:MM` time.
///
/// # Errors
///
/// Returns [`MaintenanceError::InvalidTime`] for anything else.
pub fn parse_hhmm(value: &str) -> Result<NaiveTime, MaintenanceError> {
    let invalid = || MaintenanceError::InvalidTime(value.to_string());
    let (hours, minutes) = value.split_once(':').ok_or_else(invalid)?;
    if hours.len() != 2 || minutes.len() != 2 {
        return Err(invalid());
    }
    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hours, minutes, 0).ok_or_else(invalid)
}

/// Resolve an IANA timezone. An empty string means UTC.
///
/// # Errors
///
/// Returns [`MaintenanceError::InvalidTimezone`] when the name is unknown.
pub fn parse_timezone(value: &str) -> Result<Tz, MaintenanceError> {
    let name = if value.is_empty() {
        DEFAULT_MAINTENANCE_TIMEZONE
    } else {
        value
    };
    name.parse::<Tz>()
        .map_err(|_| MaintenanceError::InvalidTimezone(value.to_string()))
}

/// A parsed maintenance window.
#[derive(Clone, Debug, PartialEq)]
pub struct Schedule {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: Tz,
    /// Days of the week, 0 = Sunday. Empty means every day.
    pub days: Vec<u32>,
}

impl Schedule {
    /// Parse the workload annotation form `HH:MM-HH:MM [TZ]`.
    ///
    /// # Errors
    ///
    /// Fails on a malformed range, time or timezone.
    pub fn parse(value: &str) -> Result<Self, MaintenanceError> {
        let mut parts = value.split_whitespace();
        let range = parts
            .next()
            .ok_or_else(|| MaintenanceError::InvalidFormat(value.to_string()))?;
        let timezone = parts.next().unwrap_or(DEFAULT_MAINTENANCE_TIMEZONE);
        if parts.next().is_some() {
            return Err(MaintenanceError::InvalidFormat(value.to_string()));
        }
        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| MaintenanceError::InvalidFormat(value.to_string()))?;

        Ok(Self {
            start: parse_hhmm(start)?,
            end: parse_hhmm(end)?,
            timezone: parse_timezone(timezone)?,
            days: Vec::new(),
        })
    }

    /// Build a schedule from a policy window.
    ///
    /// # Errors
    ///
    /// Fails on a malformed time or timezone.
    pub fn from_policy_window(window: &MaintenanceWindow) -> Result<Self, MaintenanceError> {
        Ok(Self {
            start: parse_hhmm(&window.start)?,
            end: parse_hhmm(&window.end)?,
            timezone: parse_timezone(&window.timezone)?,
            days: window
                .days_of_week
                .iter()
                .filter_map(|d| u32::try_from(*d).ok())
                .collect(),
        })
    }

    /// Whether the window is active at `at`.
    #[must_use]
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.timezone);
        let weekday = local.weekday().num_days_from_sunday();
        if !self.days.is_empty() && !self.days.contains(&weekday) {
            return false;
        }

        let time = local.time();
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    /// Stable cache key for this schedule.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let days: Vec<String> = self.days.iter().map(u32::to_string).collect();
        format!(
            "{}-{} {} [{}]",
            self.start.format("%H:%M"),
            self.end.format("%H:%M"),
            self.timezone.name(),
            days.join(",")
        )
    }
}

/// Whether the annotation-form window `value` is active now, cached per window
/// for at most one minute.
///
/// # Errors
///
/// Fails when `value` does not parse.
pub fn is_window_active(cache: &PolicyCache, value: &str) -> Result<bool, MaintenanceError> {
    let schedule = Schedule::parse(value)?;
    Ok(is_schedule_active(cache, &schedule, Utc::now()))
}

/// Evaluate `schedule` at `at`, consulting the cache first.
#[must_use]
pub fn is_schedule_active(cache: &PolicyCache, schedule: &Schedule, at: DateTime<Utc>) -> bool {
    let key = schedule.cache_key();
    if let Some(active) = cache.get_maintenance_window(&key) {
        return active;
    }
    let active = schedule.is_active_at(at);
    cache.set_maintenance_window(
        &key,
        active,
        Duration::from_secs(MAINTENANCE_WINDOW_CACHE_TTL_SECS),
    );
    active
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod maintenance_tests;
