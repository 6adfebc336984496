//! Monitor
//!
//! Runs the alerting pipeline for each tracked `(service, metric)` key:
//! read observations, fuse decayed scores, drive the hysteresis machine and
//! hand notifications to the dispatcher.

mod config;
mod error;
mod monitor;
mod probe;
mod runner;
mod synthetic;

pub use config::MonitorConfig;
pub use error::MonitorError;
pub use monitor::{Monitor, MonitorContext, TickReport};
pub use probe::{HttpProbe, NoProbe, ProbeConfig, RecoveryProbe};
pub use runner::{run_key_loop, spawn_monitor_loops};
pub use synthetic::SyntheticFeed;
