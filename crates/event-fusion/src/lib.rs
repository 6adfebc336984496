//! Signal Fusion Engine
//!
//! Blends three independently computed risk scores into one fused score:
//! - realtime (decayed severity of recent logs and alerts)
//! - predictive (worst recent forecast after decay)
//! - context (momentum from earlier fused signals of the same key)
//!
//! Every fused score is bucketed into a [`RiskLabel`].

use chrono::{DateTime, Utc};
use decay::{decay_factor, minutes_between, DecayAggregator};
use serde::{Deserialize, Serialize};
use std::fmt;
use telemetry::{MonitorKey, SeverityNormalizer};
use thiserror::Error;
use tracing::debug;

/// Fusion error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Invalid {name} weight: {value}")]
    InvalidWeight { name: &'static str, value: f64 },

    #[error("Label thresholds must satisfy 0 <= medium <= high <= critical <= 100 (got {medium}/{high}/{critical})")]
    NonMonotonicThresholds { medium: f64, high: f64, critical: f64 },

    #[error("Invalid half-life: {0} minutes")]
    InvalidHalfLife(f64),
}

/// Risk label for a fused score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLabel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds of each label above `Low`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for LabelThresholds {
    fn default() -> Self {
        Self {
            medium: 50.0,
            high: 70.0,
            critical: 90.0,
        }
    }
}

impl LabelThresholds {
    /// Thresholds must be ordered inside `[0, 100]` so the labels partition the range
    pub fn validate(&self) -> Result<(), FusionError> {
        let ordered = 0.0 <= self.medium
            && self.medium <= self.high
            && self.high <= self.critical
            && self.critical <= 100.0;
        if ordered {
            Ok(())
        } else {
            Err(FusionError::NonMonotonicThresholds {
                medium: self.medium,
                high: self.high,
                critical: self.critical,
            })
        }
    }

    /// Bucket a score. Each boundary belongs to the higher label.
    pub fn label(&self, score: f64) -> RiskLabel {
        if score >= self.critical {
            RiskLabel::Critical
        } else if score >= self.high {
            RiskLabel::High
        } else if score >= self.medium {
            RiskLabel::Medium
        } else {
            RiskLabel::Low
        }
    }
}

/// Component weights. By convention they sum to 1 but need not.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub realtime: f64,
    pub predictive: f64,
    pub context: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            realtime: 0.55,
            predictive: 0.35,
            context: 0.10,
        }
    }
}

impl FusionWeights {
    pub fn validate(&self) -> Result<(), FusionError> {
        for (name, value) in [
            ("realtime", self.realtime),
            ("predictive", self.predictive),
            ("context", self.context),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(FusionError::InvalidWeight { name, value });
            }
        }
        Ok(())
    }
}

/// Per-component scores for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub realtime: f64,
    pub predictive: f64,
    pub context: f64,
}

/// Components recorded alongside a fused signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionComponents {
    pub realtime: f64,
    pub predictive: f64,
    pub context: f64,
    pub weights: FusionWeights,
    pub half_life_minutes: f64,
}

/// One fused row per tick per tracked key. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedSignal {
    pub service: String,
    pub metric: String,
    pub fused_score: f64,
    pub label: RiskLabel,
    pub components: FusionComponents,
    pub created_at: DateTime<Utc>,
}

impl FusedSignal {
    pub fn key(&self) -> MonitorKey {
        MonitorKey::new(self.service.clone(), self.metric.clone())
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// `clamp(w_r*realtime + w_p*predictive + w_c*context, 0, 100)`
pub fn fused_score(scores: &ComponentScores, weights: &FusionWeights) -> f64 {
    let raw = weights.realtime * finite_or_zero(scores.realtime)
        + weights.predictive * finite_or_zero(scores.predictive)
        + weights.context * finite_or_zero(scores.context);
    finite_or_zero(raw).clamp(0.0, 100.0)
}

/// Fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub weights: FusionWeights,
    pub labels: LabelThresholds,
    /// Decay half-life shared by every component (minutes)
    pub half_life_minutes: f64,
    /// Most recent forecasts considered for the predictive component
    pub forecast_window: usize,
    /// Most recent fused signals considered for the context component
    pub context_window: usize,
    /// Upper bound of the context component
    pub context_cap: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            labels: LabelThresholds::default(),
            half_life_minutes: 45.0,
            forecast_window: 10,
            context_window: 5,
            context_cap: 20.0,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), FusionError> {
        self.weights.validate()?;
        self.labels.validate()?;
        if !self.half_life_minutes.is_finite() || self.half_life_minutes <= 0.0 {
            return Err(FusionError::InvalidHalfLife(self.half_life_minutes));
        }
        Ok(())
    }
}

/// Fusion engine
#[derive(Debug, Clone)]
pub struct FusionEngine {
    config: FusionConfig,
    aggregator: DecayAggregator,
}

impl FusionEngine {
    /// Create a fusion engine, rejecting invalid weights or thresholds
    pub fn new(config: FusionConfig, normalizer: SeverityNormalizer) -> Result<Self, FusionError> {
        config.validate()?;
        let aggregator = DecayAggregator::new(config.half_life_minutes, normalizer);
        Ok(Self { config, aggregator })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Aggregator sharing this engine's half-life
    pub fn aggregator(&self) -> &DecayAggregator {
        &self.aggregator
    }

    pub fn label(&self, score: f64) -> RiskLabel {
        self.config.labels.label(score)
    }

    /// Worst of the most recent forecasts after decay
    pub fn predictive_component(&self, forecasts: &[(DateTime<Utc>, f64)], now: DateTime<Utc>) -> f64 {
        let mut recent = forecasts.to_vec();
        recent.sort_by(|a, b| b.0.cmp(&a.0));
        recent.truncate(self.config.forecast_window);
        self.aggregator.max_decayed(recent, now)
    }

    /// Momentum from earlier fused signals: each of the most recent ones adds
    /// `(score / 100) * decay * cap`, and the sum is capped.
    pub fn context_component(&self, prior: &[FusedSignal], now: DateTime<Utc>) -> f64 {
        let mut recent: Vec<&FusedSignal> = prior.iter().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let boost: f64 = recent
            .into_iter()
            .take(self.config.context_window)
            .map(|signal| {
                let age = minutes_between(signal.created_at, now);
                (signal.fused_score.clamp(0.0, 100.0) / 100.0)
                    * decay_factor(age, self.config.half_life_minutes)
                    * self.config.context_cap
            })
            .sum();
        boost.min(self.config.context_cap)
    }

    /// Fuse component scores into a signal for `key`
    pub fn fuse(&self, key: &MonitorKey, scores: ComponentScores, now: DateTime<Utc>) -> FusedSignal {
        let fused = fused_score(&scores, &self.config.weights);
        let label = self.label(fused);
        debug!(
            "Fused {}: realtime={:.1} predictive={:.1} context={:.1} -> {:.1} ({})",
            key, scores.realtime, scores.predictive, scores.context, fused, label
        );

        FusedSignal {
            service: key.service.clone(),
            metric: key.metric.clone(),
            fused_score: fused,
            label,
            components: FusionComponents {
                realtime: scores.realtime,
                predictive: scores.predictive,
                context: scores.context,
                weights: self.config.weights,
                half_life_minutes: self.config.half_life_minutes,
            },
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn engine() -> FusionEngine {
        FusionEngine::new(FusionConfig::default(), SeverityNormalizer::default()).unwrap()
    }

    #[test]
    fn test_weighted_fusion_scenario() {
        let scores = ComponentScores {
            realtime: 100.0,
            predictive: 90.0,
            context: 50.0,
        };
        let signal = engine().fuse(&MonitorKey::new("backend", "error_rate"), scores, now());
        assert!((signal.fused_score - 91.5).abs() < 1e-9);
        assert_eq!(signal.label, RiskLabel::Critical);
        assert_eq!(signal.created_at, now());
    }

    #[test]
    fn test_label_boundaries() {
        let labels = LabelThresholds::default();
        assert_eq!(labels.label(0.0), RiskLabel::Low);
        assert_eq!(labels.label(49.999), RiskLabel::Low);
        assert_eq!(labels.label(50.0), RiskLabel::Medium);
        assert_eq!(labels.label(69.999), RiskLabel::Medium);
        assert_eq!(labels.label(70.0), RiskLabel::High);
        assert_eq!(labels.label(89.999), RiskLabel::High);
        assert_eq!(labels.label(90.0), RiskLabel::Critical);
        assert_eq!(labels.label(100.0), RiskLabel::Critical);
    }

    #[test]
    fn test_fused_score_clamped() {
        let weights = FusionWeights {
            realtime: 1.0,
            predictive: 1.0,
            context: 1.0,
        };
        let scores = ComponentScores {
            realtime: 80.0,
            predictive: 80.0,
            context: 20.0,
        };
        assert_eq!(fused_score(&scores, &weights), 100.0);
        let nan = ComponentScores {
            realtime: f64::NAN,
            ..Default::default()
        };
        assert_eq!(fused_score(&nan, &weights), 0.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = FusionConfig::default();
        config.weights.context = -0.1;
        assert!(matches!(
            FusionEngine::new(config, SeverityNormalizer::default()),
            Err(FusionError::InvalidWeight { name: "context", .. })
        ));

        let mut config = FusionConfig::default();
        config.labels.high = 95.0;
        assert!(matches!(
            config.validate(),
            Err(FusionError::NonMonotonicThresholds { .. })
        ));
    }

    #[test]
    fn test_predictive_uses_recent_window() {
        let mut config = FusionConfig::default();
        config.forecast_window = 2;
        config.half_life_minutes = 60.0;
        let engine = FusionEngine::new(config, SeverityNormalizer::default()).unwrap();

        let forecasts = vec![
            (now() - Duration::minutes(90), 100.0), // outside the window of two
            (now() - Duration::minutes(5), 30.0),
            (now(), 40.0),
        ];
        assert!((engine.predictive_component(&forecasts, now()) - 40.0).abs() < 1e-9);
        assert_eq!(engine.predictive_component(&[], now()), 0.0);
    }

    #[test]
    fn test_context_momentum_capped() {
        let e = engine();
        let key = MonitorKey::new("backend", "error_rate");
        let prior: Vec<FusedSignal> = (0..5)
            .map(|_| e.fuse(&key, ComponentScores { realtime: 100.0, predictive: 100.0, context: 100.0 }, now()))
            .collect();
        assert_eq!(e.context_component(&prior, now()), 20.0);

        let single = vec![e.fuse(&key, ComponentScores { realtime: 100.0, predictive: 0.0, context: 0.0 }, now())];
        // fused 55 -> 0.55 * 1.0 * 20
        assert!((e.context_component(&single, now()) - 11.0).abs() < 1e-9);
        assert_eq!(e.context_component(&[], now()), 0.0);
    }

    #[test]
    fn test_label_round_trip() {
        for label in [RiskLabel::Low, RiskLabel::Medium, RiskLabel::High, RiskLabel::Critical] {
            assert_eq!(RiskLabel::parse(label.as_str()), Some(label));
        }
        assert_eq!(RiskLabel::parse("SEVERE"), None);
    }

    proptest! {
        #[test]
        fn prop_fuse_monotonic(
            r in 0.0f64..100.0, p in 0.0f64..100.0, c in 0.0f64..100.0,
            bump in 0.0f64..100.0, which in 0usize..3,
            wr in 0.0f64..1.0, wp in 0.0f64..1.0, wc in 0.0f64..1.0,
        ) {
            let weights = FusionWeights { realtime: wr, predictive: wp, context: wc };
            let base = ComponentScores { realtime: r, predictive: p, context: c };
            let mut raised = base;
            match which {
                0 => raised.realtime += bump,
                1 => raised.predictive += bump,
                _ => raised.context += bump,
            }
            prop_assert!(fused_score(&raised, &weights) >= fused_score(&base, &weights));
        }

        #[test]
        fn prop_labels_partition(score in 0.0f64..=100.0) {
            let labels = LabelThresholds::default();
            let hits = [
                score < labels.medium,
                score >= labels.medium && score < labels.high,
                score >= labels.high && score < labels.critical,
                score >= labels.critical,
            ];
            prop_assert_eq!(hits.iter().filter(|h| **h).count(), 1);
            let expected = match hits.iter().position(|h| *h) {
                Some(0) => RiskLabel::Low,
                Some(1) => RiskLabel::Medium,
                Some(2) => RiskLabel::High,
                _ => RiskLabel::Critical,
            };
            prop_assert_eq!(labels.label(score), expected);
        }
    }
}
