//! Severity Normalization
//!
//! Maps heterogeneous severities onto a common `[0, 100]` scale.

use crate::observation::SeverityOrValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Score assigned to labels outside the known vocabulary
pub const DEFAULT_UNKNOWN_SCORE: f64 = 30.0;

/// Known severity labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeverityLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl SeverityLevel {
    /// Parse a label, case-insensitively. `WARN` is accepted for `WARNING`.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" | "WARN" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Normalized score for this level
    pub fn score(self) -> f64 {
        match self {
            Self::Debug => 10.0,
            Self::Info => 20.0,
            Self::Warning => 55.0,
            Self::Error => 75.0,
            Self::Critical => 95.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity normalizer with a configurable fallback for unknown labels
#[derive(Debug, Clone, Copy)]
pub struct SeverityNormalizer {
    unknown_score: f64,
}

impl SeverityNormalizer {
    /// Create a normalizer. The fallback score is clamped into `[0, 100]`.
    pub fn new(unknown_score: f64) -> Self {
        let unknown_score = if unknown_score.is_finite() {
            unknown_score.clamp(0.0, 100.0)
        } else {
            DEFAULT_UNKNOWN_SCORE
        };
        Self { unknown_score }
    }

    /// Normalize a severity label
    pub fn normalize_label(&self, label: &str) -> f64 {
        SeverityLevel::parse(label).map_or(self.unknown_score, SeverityLevel::score)
    }

    /// Normalize a reading. Numeric readings are clamped, labels are mapped.
    pub fn normalize(&self, reading: &SeverityOrValue) -> f64 {
        match reading {
            SeverityOrValue::Severity(label) => self.normalize_label(label),
            SeverityOrValue::Value(value) if value.is_finite() => value.clamp(0.0, 100.0),
            SeverityOrValue::Value(_) => self.unknown_score,
        }
    }

    /// Fallback score for unknown labels
    pub fn unknown_score(&self) -> f64 {
        self.unknown_score
    }
}

impl Default for SeverityNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_UNKNOWN_SCORE)
    }
}
