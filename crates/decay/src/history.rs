//! Bounded history of decayed scores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One aggregation result. A fresh value is produced on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayedScore {
    pub source: String,
    pub metric: String,
    pub score: f64,
    pub computed_at: DateTime<Utc>,
}

/// Sliding window of recent scores; the oldest entry is evicted when full
#[derive(Debug, Clone)]
pub struct ScoreHistory {
    data: VecDeque<DecayedScore>,
    capacity: usize,
}

impl ScoreHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, score: DecayedScore) {
        if self.data.len() >= self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(score);
    }

    /// Most recent score
    pub fn latest(&self) -> Option<&DecayedScore> {
        self.data.back()
    }

    /// Scores oldest first
    pub fn iter(&self) -> impl Iterator<Item = &DecayedScore> {
        self.data.iter()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(v: f64) -> DecayedScore {
        DecayedScore {
            source: "backend".to_string(),
            metric: "error_rate".to_string(),
            score: v,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_evicts_oldest() {
        let mut history = ScoreHistory::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            history.push(score(v));
        }
        assert_eq!(history.len(), 3);
        let values: Vec<f64> = history.iter().map(|s| s.score).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert_eq!(history.latest().map(|s| s.score), Some(4.0));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut history = ScoreHistory::new(0);
        history.push(score(1.0));
        history.push(score(2.0));
        assert_eq!(history.len(), 1);
        assert_eq!(history.capacity(), 1);
    }
}
