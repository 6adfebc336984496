//! Observation model

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::severity::SeverityLevel;

/// Kind of telemetry an observation carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    /// System log line
    Log,
    /// Alert raised by another component
    Alert,
    /// Predictive risk forecast (value is a risk score)
    Forecast,
    /// Liveness beat from a service
    Heartbeat,
}

impl ObservationKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "log" => Some(Self::Log),
            "alert" => Some(Self::Alert),
            "forecast" => Some(Self::Forecast),
            "heartbeat" => Some(Self::Heartbeat),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Alert => "alert",
            Self::Forecast => "forecast",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Whether this kind feeds the realtime score
    pub fn is_realtime(self) -> bool {
        matches!(self, Self::Log | Self::Alert)
    }
}

/// Either a severity label or a raw numeric reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeverityOrValue {
    Severity(String),
    Value(f64),
}

/// A validated observation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Emitting service
    pub source: String,
    /// Metric the reading refers to, if any
    pub metric: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub reading: SeverityOrValue,
    pub kind: ObservationKind,
}

impl Observation {
    /// Log line with a severity label
    pub fn log(source: impl Into<String>, severity: SeverityLevel, timestamp: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            metric: None,
            timestamp,
            reading: SeverityOrValue::Severity(severity.as_str().to_string()),
            kind: ObservationKind::Log,
        }
    }

    /// Alert with a severity label
    pub fn alert(source: impl Into<String>, severity: SeverityLevel, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: ObservationKind::Alert,
            ..Self::log(source, severity, timestamp)
        }
    }

    /// Risk forecast for a metric
    pub fn forecast(
        source: impl Into<String>,
        metric: impl Into<String>,
        risk_score: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            metric: Some(metric.into()),
            timestamp,
            reading: SeverityOrValue::Value(risk_score),
            kind: ObservationKind::Forecast,
        }
    }

    /// Heartbeat from a service
    pub fn heartbeat(source: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            metric: None,
            timestamp,
            reading: SeverityOrValue::Value(0.0),
            kind: ObservationKind::Heartbeat,
        }
    }

    /// Numeric reading, if this observation carries one
    pub fn value(&self) -> Option<f64> {
        match self.reading {
            SeverityOrValue::Value(v) => Some(v),
            SeverityOrValue::Severity(_) => None,
        }
    }
}

/// A row as stored by the datastore. Every field may be missing or malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub source: Option<String>,
    pub metric: Option<String>,
    pub timestamp: Option<String>,
    pub severity: Option<String>,
    pub value: Option<String>,
    pub kind: Option<String>,
}

impl From<&Observation> for RawObservation {
    fn from(obs: &Observation) -> Self {
        let (severity, value) = match &obs.reading {
            SeverityOrValue::Severity(label) => (Some(label.clone()), None),
            SeverityOrValue::Value(v) => (None, Some(v.to_string())),
        };
        Self {
            source: Some(obs.source.clone()),
            metric: obs.metric.clone(),
            timestamp: Some(obs.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)),
            severity,
            value,
            kind: Some(obs.kind.as_str().to_string()),
        }
    }
}

impl From<Observation> for RawObservation {
    fn from(obs: Observation) -> Self {
        Self::from(&obs)
    }
}
