//! Soft-recovery probes

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use telemetry::MonitorKey;
use tracing::{debug, warn};

/// One soft-recovery attempt for a degraded key
#[async_trait]
pub trait RecoveryProbe: Send + Sync {
    /// Whether the attempt succeeded
    async fn attempt(&self, key: &MonitorKey) -> bool;
}

/// Never recovers; a persisting condition escalates on its own
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

#[async_trait]
impl RecoveryProbe for NoProbe {
    async fn attempt(&self, _key: &MonitorKey) -> bool {
        false
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Health URL per service
    pub health_urls: HashMap<String, String>,
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            health_urls: HashMap::new(),
            timeout_secs: 10,
        }
    }
}

/// GETs the service's health URL; any 2xx counts as recovered
pub struct HttpProbe {
    client: reqwest::Client,
    health_urls: HashMap<String, String>,
}

impl HttpProbe {
    pub fn new(config: ProbeConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            health_urls: config.health_urls,
        })
    }
}

#[async_trait]
impl RecoveryProbe for HttpProbe {
    async fn attempt(&self, key: &MonitorKey) -> bool {
        let Some(url) = self.health_urls.get(&key.service) else {
            debug!("No health URL for {}, probe counts as failed", key.service);
            return false;
        };

        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!("Health check for {} returned {}", key, resp.status());
                false
            }
            Err(e) => {
                warn!("Health check for {} failed: {}", key, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_probe_fails() {
        assert!(!NoProbe.attempt(&MonitorKey::new("backend", "error_rate")).await);
    }

    #[tokio::test]
    async fn test_http_probe_without_url_fails() {
        let probe = HttpProbe::new(ProbeConfig::default()).unwrap();
        assert!(!probe.attempt(&MonitorKey::new("backend", "error_rate")).await);
    }
}
