//! Monitor key

use serde::{Deserialize, Serialize};
use std::fmt;

/// A tracked `(service, metric)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonitorKey {
    pub service: String,
    pub metric: String,
}

impl MonitorKey {
    /// Create a new key
    pub fn new(service: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            metric: metric.into(),
        }
    }

    /// Parse a `service:metric` pair. Surrounding whitespace is ignored.
    pub fn parse(pair: &str) -> Option<Self> {
        let (service, metric) = pair.split_once(':')?;
        let (service, metric) = (service.trim(), metric.trim());
        if service.is_empty() || metric.is_empty() {
            return None;
        }
        Some(Self::new(service, metric))
    }
}

impl fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.metric)
    }
}
