//! Hysteresis State Machine
//!
//! Moore machine: a notification depends only on the transition taken, never
//! on staying in a state, so repeated ticks in one state are idempotent.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use telemetry::MonitorKey;
use tracing::{debug, info};

use crate::state::{AlertState, HealthStatus, StateError};

/// State machine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct HysteresisConfig {
    /// Fused score at or above which `UP` becomes `DEGRADED`
    pub warn_threshold: f64,
    /// Fused score below which an alerting state recovers to `UP`
    pub recover_threshold: f64,
    /// Consecutive failed soft-recovery attempts before `DEGRADED` becomes `DOWN`
    pub max_soft_failures: u32,
    /// Minimum time between two notifications for the same alerting condition
    pub cooldown: Duration,
    /// Expected heartbeat period; `None` disables stall detection
    pub heartbeat_interval: Option<Duration>,
    /// Missed beats tolerated before a stall is declared
    pub missed_beats: u32,
    /// Time after state creation before the first stall judgment
    pub grace_period: Duration,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            warn_threshold: 70.0,
            recover_threshold: 60.0,
            max_soft_failures: 3,
            cooldown: Duration::minutes(30),
            heartbeat_interval: None,
            missed_beats: 3,
            grace_period: Duration::minutes(5),
        }
    }
}

impl HysteresisConfig {
    pub fn validate(&self) -> Result<(), StateError> {
        let in_range = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);
        if !in_range(self.warn_threshold) || !in_range(self.recover_threshold) {
            return Err(StateError::InvalidConfig(format!(
                "thresholds must lie in [0, 100] (warn={}, recover={})",
                self.warn_threshold, self.recover_threshold
            )));
        }
        if self.recover_threshold > self.warn_threshold {
            return Err(StateError::InvalidConfig(format!(
                "recover threshold {} exceeds warn threshold {}",
                self.recover_threshold, self.warn_threshold
            )));
        }
        if self.max_soft_failures == 0 {
            return Err(StateError::InvalidConfig("max_soft_failures must be at least 1".into()));
        }
        if self.missed_beats == 0 {
            return Err(StateError::InvalidConfig("missed_beats must be at least 1".into()));
        }
        if self.cooldown < Duration::zero() || self.grace_period < Duration::zero() {
            return Err(StateError::InvalidConfig("durations must not be negative".into()));
        }
        if matches!(self.heartbeat_interval, Some(i) if i <= Duration::zero()) {
            return Err(StateError::InvalidConfig("heartbeat interval must be positive".into()));
        }
        Ok(())
    }
}

/// Inputs for one evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickInput {
    pub fused_score: f64,
    /// Time since the last heartbeat, when heartbeats are tracked
    pub heartbeat_gap: Option<Duration>,
    /// Soft-recovery outcome this tick; `None` while degraded counts as a failure
    pub probe_ok: Option<bool>,
}

/// Why a transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Threshold,
    HeartbeatStall,
    SoftRecoveryExhausted,
    Recovered,
}

impl TransitionCause {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Threshold => "fused score above warn threshold",
            Self::HeartbeatStall => "heartbeat stalled",
            Self::SoftRecoveryExhausted => "soft recovery exhausted",
            Self::Recovered => "back under recover threshold",
        }
    }
}

/// Notification emitted on a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Degraded,
    Down,
    Recovered,
}

/// An outgoing notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub key: MonitorKey,
    pub kind: NotificationKind,
    pub from: HealthStatus,
    pub to: HealthStatus,
    pub cause: TransitionCause,
    pub fused_score: f64,
    pub heartbeat_gap_secs: Option<i64>,
    pub at: DateTime<Utc>,
}

impl Notification {
    /// Human-readable message
    pub fn message(&self) -> String {
        let head = match self.kind {
            NotificationKind::Degraded => format!("[DEGRADED] {} is degraded", self.key),
            NotificationKind::Down => format!("[DOWN] {} is DOWN", self.key),
            NotificationKind::Recovered => format!("[RECOVERED] {} recovered ({} -> UP)", self.key, self.from),
        };
        let mut msg = format!(
            "{}\nCause: {}\nFused score: {:.1}\nAt: {}",
            head,
            self.cause.as_str(),
            self.fused_score,
            self.at.to_rfc3339()
        );
        if let Some(gap) = self.heartbeat_gap_secs {
            msg.push_str(&format!("\nHeartbeat gap: {}s", gap));
        }
        msg
    }
}

/// Result of evaluating one tick
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub previous: HealthStatus,
    /// State after this tick; `version` is left for the caller to bump
    pub next: AlertState,
    pub cause: Option<TransitionCause>,
    pub notification: Option<Notification>,
    /// A transition happened but its notification was held back by cooldown
    pub suppressed: bool,
}

impl Evaluation {
    pub fn transitioned(&self) -> bool {
        self.previous != self.next.current_status
    }
}

/// Hysteresis state machine
#[derive(Debug, Clone)]
pub struct HysteresisMachine {
    config: HysteresisConfig,
}

impl HysteresisMachine {
    pub fn new(config: HysteresisConfig) -> Result<Self, StateError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &HysteresisConfig {
        &self.config
    }

    /// Whether heartbeats are tracked at all
    pub fn tracks_heartbeats(&self) -> bool {
        self.config.heartbeat_interval.is_some()
    }

    /// Heartbeat gap exceeds `missed_beats * interval`, past the grace period
    pub fn is_stalled(&self, state: &AlertState, gap: Option<Duration>, now: DateTime<Utc>) -> bool {
        let (Some(interval), Some(gap)) = (self.config.heartbeat_interval, gap) else {
            return false;
        };
        let limit = interval * self.config.missed_beats as i32;
        gap > limit && now - state.created_at >= self.config.grace_period
    }

    fn has_recovered(&self, input: &TickInput, stalled: bool) -> bool {
        input.fused_score < self.config.recover_threshold && !stalled
    }

    /// A soft-recovery attempt is due when degraded and not yet recovered
    pub fn needs_probe(&self, state: &AlertState, input: &TickInput, now: DateTime<Utc>) -> bool {
        state.current_status == HealthStatus::Degraded
            && !self.has_recovered(input, self.is_stalled(state, input.heartbeat_gap, now))
    }

    fn in_cooldown(&self, state: &AlertState, target: HealthStatus, now: DateTime<Utc>) -> bool {
        state
            .alerted_at(target)
            .is_some_and(|at| now - at < self.config.cooldown)
    }

    /// Record an alerting announcement unless the same condition is cooling down
    fn announce(&self, next: &mut AlertState, target: HealthStatus, now: DateTime<Utc>) -> bool {
        if self.in_cooldown(next, target, now) {
            return false;
        }
        next.record_alert(target, now);
        next.episode_notified = true;
        true
    }

    /// Evaluate one tick against `state`
    pub fn evaluate(&self, state: &AlertState, input: &TickInput, now: DateTime<Utc>) -> Evaluation {
        let stalled = self.is_stalled(state, input.heartbeat_gap, now);
        let previous = state.current_status;
        let mut next = state.clone();
        let mut cause = None;
        let mut announced = false;

        match previous {
            HealthStatus::Up => {
                next.consecutive_failures = 0;
                let entered = if input.fused_score >= self.config.warn_threshold {
                    Some(TransitionCause::Threshold)
                } else if stalled {
                    Some(TransitionCause::HeartbeatStall)
                } else {
                    None
                };
                if let Some(c) = entered {
                    next.current_status = HealthStatus::Degraded;
                    next.last_transition_at = now;
                    next.episode_notified = false;
                    announced = self.announce(&mut next, HealthStatus::Degraded, now);
                    cause = Some(c);
                }
            }
            HealthStatus::Degraded => {
                if self.has_recovered(input, stalled) {
                    announced = self.recover(&mut next, now);
                    cause = Some(TransitionCause::Recovered);
                } else {
                    if input.probe_ok == Some(true) {
                        next.consecutive_failures = 0;
                    } else {
                        next.consecutive_failures = next.consecutive_failures.saturating_add(1);
                    }
                    debug!(
                        "{} degraded: soft recovery failures {}/{}",
                        state.key, next.consecutive_failures, self.config.max_soft_failures
                    );
                    if next.consecutive_failures >= self.config.max_soft_failures {
                        next.current_status = HealthStatus::Down;
                        next.last_transition_at = now;
                        announced = self.announce(&mut next, HealthStatus::Down, now);
                        cause = Some(TransitionCause::SoftRecoveryExhausted);
                    }
                }
            }
            HealthStatus::Down => {
                if self.has_recovered(input, stalled) {
                    announced = self.recover(&mut next, now);
                    cause = Some(TransitionCause::Recovered);
                }
            }
        }

        let transitioned = previous != next.current_status;
        let suppressed = transitioned && !announced;
        if transitioned {
            info!(
                "{}: {} -> {} ({}){}",
                state.key,
                previous,
                next.current_status,
                cause.map_or("", TransitionCause::as_str),
                if suppressed { ", notification suppressed" } else { "" }
            );
        }

        let notification = match (announced, cause) {
            (true, Some(cause)) => Some(Notification {
                key: state.key.clone(),
                kind: match next.current_status {
                    HealthStatus::Degraded => NotificationKind::Degraded,
                    HealthStatus::Down => NotificationKind::Down,
                    HealthStatus::Up => NotificationKind::Recovered,
                },
                from: previous,
                to: next.current_status,
                cause,
                fused_score: input.fused_score,
                heartbeat_gap_secs: input.heartbeat_gap.map(|g| g.num_seconds()),
                at: now,
            }),
            _ => None,
        };

        Evaluation {
            previous,
            next,
            cause,
            notification,
            suppressed,
        }
    }

    /// Move to `UP`. The recovery is announced only if the episode was.
    fn recover(&self, next: &mut AlertState, now: DateTime<Utc>) -> bool {
        let announce = next.episode_notified;
        next.current_status = HealthStatus::Up;
        next.last_transition_at = now;
        next.consecutive_failures = 0;
        next.episode_notified = false;
        announce
    }
}
