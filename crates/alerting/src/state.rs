//! Alert state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use telemetry::MonitorKey;
use thiserror::Error;

/// Alerting errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("Unknown health status: {0}")]
    UnknownStatus(String),

    #[error("Invalid hysteresis config: {0}")]
    InvalidConfig(String),
}

/// Health of a monitored key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Degraded,
    Down,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Degraded => "DEGRADED",
            Self::Down => "DOWN",
        }
    }

    pub fn parse(status: &str) -> Result<Self, StateError> {
        match status {
            "UP" => Ok(Self::Up),
            "DEGRADED" => Ok(Self::Degraded),
            "DOWN" => Ok(Self::Down),
            other => Err(StateError::UnknownStatus(other.to_string())),
        }
    }

    /// Whether this status is an alerting condition
    pub fn is_alerting(self) -> bool {
        !matches!(self, Self::Up)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-key alert state. The only mutable entity in the pipeline; every
/// persisted update bumps `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub key: MonitorKey,
    pub current_status: HealthStatus,
    pub last_transition_at: DateTime<Utc>,
    /// Last time an alerting notification went out
    pub last_alert_at: Option<DateTime<Utc>>,
    /// Condition announced at `last_alert_at`
    pub last_alert_status: Option<HealthStatus>,
    /// Last announcement of `DEGRADED`
    pub degraded_alert_at: Option<DateTime<Utc>>,
    /// Last announcement of `DOWN`
    pub down_alert_at: Option<DateTime<Utc>>,
    /// Whether the current alerting episode has been announced
    pub episode_notified: bool,
    /// Consecutive failed soft-recovery attempts while degraded
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl AlertState {
    /// Optimistic initial state: `UP` with no history
    pub fn new(key: MonitorKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            current_status: HealthStatus::Up,
            last_transition_at: now,
            last_alert_at: None,
            last_alert_status: None,
            degraded_alert_at: None,
            down_alert_at: None,
            episode_notified: false,
            consecutive_failures: 0,
            created_at: now,
            version: 0,
        }
    }

    /// When `status` was last announced; `UP` is never cooled down
    pub fn alerted_at(&self, status: HealthStatus) -> Option<DateTime<Utc>> {
        match status {
            HealthStatus::Up => None,
            HealthStatus::Degraded => self.degraded_alert_at,
            HealthStatus::Down => self.down_alert_at,
        }
    }

    /// Record an announcement of an alerting condition
    pub fn record_alert(&mut self, status: HealthStatus, at: DateTime<Utc>) {
        match status {
            HealthStatus::Up => return,
            HealthStatus::Degraded => self.degraded_alert_at = Some(at),
            HealthStatus::Down => self.down_alert_at = Some(at),
        }
        self.last_alert_at = Some(at);
        self.last_alert_status = Some(status);
    }

    /// Same logical content, ignoring `version`
    pub fn same_content(&self, other: &Self) -> bool {
        Self {
            version: other.version,
            ..self.clone()
        } == *other
    }
}
