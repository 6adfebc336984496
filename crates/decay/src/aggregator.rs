//! Decay Aggregator Implementation

use chrono::{DateTime, Utc};
use telemetry::{Observation, SeverityNormalizer};

/// Half-lives below this are raised to it
pub const MIN_HALF_LIFE_MINUTES: f64 = 1.0;

/// Weight of an observation `minutes_ago` old: `0.5^(age / half_life)`.
///
/// Negative ages (clock skew, future timestamps) weigh as fresh observations.
pub fn decay_factor(minutes_ago: f64, half_life_minutes: f64) -> f64 {
    let half_life = if half_life_minutes.is_finite() {
        half_life_minutes.max(MIN_HALF_LIFE_MINUTES)
    } else {
        MIN_HALF_LIFE_MINUTES
    };
    0.5_f64.powf(minutes_ago.max(0.0) / half_life)
}

/// Elapsed minutes from `earlier` to `now`
pub fn minutes_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - earlier).num_milliseconds() as f64 / 60_000.0
}

/// Aggregate observations with the default severity normalizer
pub fn aggregate(observations: &[Observation], now: DateTime<Utc>, half_life_minutes: f64) -> f64 {
    DecayAggregator::new(half_life_minutes, SeverityNormalizer::default()).aggregate(observations, now)
}

/// Decay-weighted aggregator
#[derive(Debug, Clone, Copy)]
pub struct DecayAggregator {
    half_life_minutes: f64,
    normalizer: SeverityNormalizer,
}

impl DecayAggregator {
    pub fn new(half_life_minutes: f64, normalizer: SeverityNormalizer) -> Self {
        Self {
            half_life_minutes,
            normalizer,
        }
    }

    pub fn half_life_minutes(&self) -> f64 {
        self.half_life_minutes
    }

    /// Weight for an observation taken at `at`
    pub fn weight(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        decay_factor(minutes_between(at, now), self.half_life_minutes)
    }

    /// Weighted mean of normalized severities, clamped to `[0, 100]`.
    /// An empty window yields `0.0`.
    pub fn aggregate(&self, observations: &[Observation], now: DateTime<Utc>) -> f64 {
        self.aggregate_scores(
            observations
                .iter()
                .map(|obs| (obs.timestamp, self.normalizer.normalize(&obs.reading))),
            now,
        )
    }

    /// Weighted mean of already-normalized `(timestamp, score)` samples
    pub fn aggregate_scores<I>(&self, samples: I, now: DateTime<Utc>) -> f64
    where
        I: IntoIterator<Item = (DateTime<Utc>, f64)>,
    {
        let mut total = 0.0;
        let mut weight = 0.0;
        for (at, score) in samples {
            let w = self.weight(at, now);
            total += score * w;
            weight += w;
        }

        if weight <= 0.0 {
            return 0.0;
        }
        (total / weight).clamp(0.0, 100.0)
    }

    /// Highest sample after decay: the worst recent value, not a mean.
    /// An empty set yields `0.0`.
    pub fn max_decayed<I>(&self, samples: I, now: DateTime<Utc>) -> f64
    where
        I: IntoIterator<Item = (DateTime<Utc>, f64)>,
    {
        samples
            .into_iter()
            .map(|(at, score)| score.clamp(0.0, 100.0) * self.weight(at, now))
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use telemetry::SeverityOrValue;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn value_at(minutes_ago: i64, value: f64) -> Observation {
        Observation {
            source: "backend".to_string(),
            metric: None,
            timestamp: now() - Duration::minutes(minutes_ago),
            reading: SeverityOrValue::Value(value),
            kind: telemetry::ObservationKind::Log,
        }
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(aggregate(&[], now(), 60.0), 0.0);
    }

    #[test]
    fn test_half_life_weight() {
        assert!((decay_factor(0.0, 60.0) - 1.0).abs() < 1e-12);
        assert!((decay_factor(60.0, 60.0) - 0.5).abs() < 1e-12);
        assert!((decay_factor(120.0, 60.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_future_timestamp_weighs_as_now() {
        assert_eq!(decay_factor(-30.0, 60.0), 1.0);
    }

    #[test]
    fn test_half_life_floor() {
        assert_eq!(decay_factor(1.0, 0.0), 0.5);
        assert_eq!(decay_factor(1.0, f64::NAN), 0.5);
    }

    #[test]
    fn test_recent_dominates_old() {
        // weights 1.0 and 0.25: (90 + 0.25 * 20) / 1.25
        let obs = vec![value_at(0, 90.0), value_at(120, 20.0)];
        let score = aggregate(&obs, now(), 60.0);
        assert!((score - 76.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_observation_is_its_score() {
        let obs = vec![value_at(300, 55.0)];
        assert!((aggregate(&obs, now(), 45.0) - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_labels_are_normalized() {
        let obs = vec![Observation::log("backend", telemetry::SeverityLevel::Critical, now())];
        assert!((aggregate(&obs, now(), 45.0) - 95.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_decayed_picks_worst_recent() {
        let agg = DecayAggregator::new(60.0, SeverityNormalizer::default());
        let samples = vec![
            (now() - Duration::minutes(120), 100.0), // decays to 25
            (now() - Duration::minutes(10), 40.0),
            (now() - Duration::minutes(60), 70.0), // decays to 35
        ];
        let best = agg.max_decayed(samples, now());
        let expected = 40.0 * decay_factor(10.0, 60.0);
        assert!((best - expected).abs() < 1e-9);
        assert_eq!(agg.max_decayed(Vec::new(), now()), 0.0);
    }

    proptest! {
        #[test]
        fn prop_aggregate_in_range(
            samples in proptest::collection::vec((0i64..10_000, -1_000.0f64..1_000.0), 0..40),
            half_life in 0.0f64..500.0,
        ) {
            let obs: Vec<_> = samples.iter().map(|&(age, v)| value_at(age, v)).collect();
            let score = aggregate(&obs, now(), half_life);
            prop_assert!((0.0..=100.0).contains(&score));
        }

        #[test]
        fn prop_older_never_weighs_more(
            a in 0.0f64..100_000.0,
            b in 0.0f64..100_000.0,
            half_life in 0.001f64..10_000.0,
        ) {
            let (young, old) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(decay_factor(old, half_life) <= decay_factor(young, half_life));
        }
    }
}
