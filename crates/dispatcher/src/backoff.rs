//! Exponential backoff with jitter

use rand::Rng;
use std::time::Duration;

/// `delay = min(2^(attempt+1), cap) + uniform(0, jitter_ratio * base)` seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    cap_secs: f64,
    jitter_ratio: f64,
}

impl BackoffPolicy {
    pub fn new(cap_secs: f64, jitter_ratio: f64) -> Self {
        Self {
            cap_secs: if cap_secs.is_finite() { cap_secs.max(0.0) } else { 60.0 },
            jitter_ratio: if jitter_ratio.is_finite() { jitter_ratio.clamp(0.0, 1.0) } else { 0.0 },
        }
    }

    /// Delay before retrying after `attempt` failed attempts, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_add(1).min(62) as i32;
        Duration::from_secs_f64(2_f64.powi(exponent).min(self.cap_secs))
    }

    /// Delay with jitter in `[base, base * (1 + jitter_ratio)]`
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let spread = base.as_secs_f64() * self.jitter_ratio;
        if spread <= 0.0 {
            return base;
        }
        base + Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=spread))
    }

    pub fn cap_secs(&self) -> f64 {
        self.cap_secs
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(60.0, 0.3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_increasing_until_cap() {
        let policy = BackoffPolicy::new(60.0, 0.0);
        let delays: Vec<u64> = (1..=8).map(|a| policy.delay(a).as_secs()).collect();
        assert_eq!(delays, vec![4, 8, 16, 32, 60, 60, 60, 60]);
    }

    #[test]
    fn test_three_failures_increase() {
        let policy = BackoffPolicy::default();
        let d: Vec<Duration> = (1..=3).map(|a| policy.base_delay(a)).collect();
        assert!(d[0] < d[1] && d[1] < d[2]);
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = BackoffPolicy::new(60.0, 0.3);
        for attempt in 0..12 {
            let base = policy.base_delay(attempt);
            for _ in 0..50 {
                let d = policy.delay(attempt);
                assert!(d >= base);
                assert!(d.as_secs_f64() <= base.as_secs_f64() * 1.3 + 1e-9);
            }
        }
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = BackoffPolicy::new(30.0, 0.0);
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(30));
    }
}
