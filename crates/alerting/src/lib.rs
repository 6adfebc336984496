//! Alerting State Machine
//!
//! Tracks `UP -> DEGRADED -> DOWN` health per monitored key with distinct
//! enter/exit thresholds, soft-recovery accounting, and cooldown-gated
//! notifications.

mod machine;
mod state;

pub use machine::{
    Evaluation, HysteresisConfig, HysteresisMachine, Notification, NotificationKind, TickInput,
    TransitionCause,
};
pub use state::{AlertState, HealthStatus, StateError};
