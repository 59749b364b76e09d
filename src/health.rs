//! Health classification and aggregate health reporting types.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Runtime condition of a single service.
///
/// Derivation rules never upgrade a probe result: a service that reports
/// [`Degraded`](HealthState::Degraded) or [`Unhealthy`](HealthState::Unhealthy)
/// stays that way until its own probe says otherwise. Only the probe itself,
/// or a running state with no probe supplied, can report `Healthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    /// Operating normally.
    Healthy,
    /// Operating with reduced capacity or elevated error rates.
    Degraded,
    /// Not operating correctly; a candidate for automatic recovery.
    Unhealthy,
    /// Condition could not be determined.
    Unknown,
}

impl HealthState {
    /// Whether this state is `Healthy`.
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Whether this state is `Unhealthy`.
    pub fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Outcome of one aggregate health evaluation.
///
/// Rebuilt from scratch on every monitor tick, never mutated in place.
/// Check keys are service names plus the monitor's process-level checks
/// (`process.memory`, `process.error_rate`, `process.providers`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Logical AND of every individual check.
    pub healthy: bool,
    /// Per-check pass/fail, keyed by service name or process check name.
    pub checks: BTreeMap<String, bool>,
    /// Messages for checks that failed with a reportable cause.
    pub errors: Vec<String>,
    /// Wall-clock time the evaluation completed.
    pub timestamp: SystemTime,
}

impl HealthCheckResult {
    /// Names of the checks that failed in this evaluation.
    pub fn failed_checks(&self) -> impl Iterator<Item = &str> {
        self.checks
            .iter()
            .filter(|(_, passed)| !**passed)
            .map(|(name, _)| name.as_str())
    }
}

/// Process-level health gauges, recomputed from live counters on each read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Resident memory in bytes, as reported by the process stats source.
    pub memory_usage: u64,
    /// CPU utilization fraction in `[0.0, 1.0]`.
    pub cpu_usage: f64,
    /// Errors per second over the process's recent window.
    pub error_rate: f64,
    /// When the monitor last completed an evaluation, if it ever has.
    pub last_check: Option<SystemTime>,
    /// How long the monitor has been alive.
    pub uptime: Duration,
}
