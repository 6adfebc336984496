//! Monitor configuration

use serde::{Deserialize, Serialize};
use telemetry::MonitorKey;

use crate::error::MonitorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Tracked `(service, metric)` pairs
    pub keys: Vec<MonitorKey>,
    /// Seconds between two ticks of one key
    pub tick_interval_secs: u64,
    /// How far back observations are read on each tick (minutes)
    pub lookback_minutes: i64,
    /// Fused score at which a soft-trigger log is written back
    pub alert_threshold: f64,
    /// Source name of soft-trigger logs
    pub soft_trigger_source: String,
    /// Decayed scores kept in memory per key
    pub score_history: usize,
    /// Write random observations instead of waiting for real telemetry
    pub synthetic_mode: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            keys: vec![
                MonitorKey::new("backend", "api_latency_ms"),
                MonitorKey::new("backend", "error_rate"),
            ],
            tick_interval_secs: 300,
            lookback_minutes: 120,
            alert_threshold: 70.0,
            soft_trigger_source: "fusion".to_string(),
            score_history: 256,
            synthetic_mode: false,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.keys.is_empty() {
            return Err(MonitorError::Config("at least one monitored key is required".into()));
        }
        if let Some(key) = self
            .keys
            .iter()
            .find(|k| k.service.trim().is_empty() || k.metric.trim().is_empty())
        {
            return Err(MonitorError::Config(format!("monitored key {:?} has an empty part", key)));
        }
        if self.tick_interval_secs == 0 {
            return Err(MonitorError::Config("tick_interval_secs must be positive".into()));
        }
        if self.lookback_minutes <= 0 {
            return Err(MonitorError::Config("lookback_minutes must be positive".into()));
        }
        if !self.alert_threshold.is_finite() || !(0.0..=100.0).contains(&self.alert_threshold) {
            return Err(MonitorError::Config(format!(
                "alert_threshold must lie in [0, 100], got {}",
                self.alert_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_keys() {
        let config = MonitorConfig {
            keys: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MonitorConfig {
            keys: vec![MonitorKey::new("backend", " ")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
