//! Configuration types for the rampart engine.

use serde::{Deserialize, Serialize};

/// Top-level rampart configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RampartConfig {
    /// Master enable/disable for the subsystem.
    pub enabled: bool,
    /// Sliding-window attack detection configuration.
    pub detection: DetectionConfig,
    /// Remediation engine configuration.
    pub remediation: RemediationConfig,
    /// Quarantine service configuration.
    pub quarantine: QuarantineConfig,
}

impl Default for RampartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detection: DetectionConfig::default(),
            remediation: RemediationConfig::default(),
            quarantine: QuarantineConfig::default(),
        }
    }
}

/// Sliding-window detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Failed attempts within the window before an identifier is blocked.
    pub max_attempts: u64,
    /// Sliding window length in seconds.
    pub window_secs: u64,
    /// Block duration once `max_attempts` is reached, in seconds.
    pub lockout_secs: u64,
    /// Attempt-count tiers that raise the emitted threat level.
    pub escalation: EscalationThresholds,
    /// Distinct source identifiers against one target before a distributed
    /// attack is flagged.
    pub distributed_sources: u64,
    /// Distinct usernames from one source before credential stuffing is
    /// flagged.
    pub stuffing_usernames: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_secs: 300,
            lockout_secs: 900,
            escalation: EscalationThresholds::default(),
            distributed_sources: 10,
            stuffing_usernames: 20,
        }
    }
}

/// Attempt-count tiers mapping to threat levels.
///
/// Counts in `[warning, elevated)` are tracked but below block-worthy;
/// `[elevated, critical)` yields a high-level threat, `critical` and above
/// yields a critical one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationThresholds {
    pub warning: u64,
    pub elevated: u64,
    pub critical: u64,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            warning: 3,
            elevated: 10,
            critical: 20,
        }
    }
}

/// Remediation engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Total attempts for a step with `on_failure: retry` (including the
    /// first), before degrading to abort semantics.
    pub retry_max_attempts: u32,
    /// Fixed pause between retry attempts, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Remediation history entries kept per incident.
    pub history_limit: usize,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: 3,
            retry_backoff_ms: 250,
            history_limit: 100,
        }
    }
}

/// Quarantine service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    /// Interval for the expired-entry reconciliation sweep, in seconds.
    pub cleanup_interval_secs: u64,
    /// Duration applied to quarantines created without an explicit one, in
    /// seconds. `None` (the default) makes them permanent: an entry only
    /// expires when a duration was asked for.
    pub default_duration_secs: Option<u64>,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 300,
            default_duration_secs: None,
        }
    }
}
