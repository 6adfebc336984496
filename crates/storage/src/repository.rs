//! Repository Implementation

use crate::{Datastore, StorageError};
use alerting::AlertState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatcher::DeliveryRecord;
use event_fusion::FusedSignal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use telemetry::{parse_timestamp, MonitorKey, RawObservation};
use tracing::{debug, info};

/// Row caps for the in-memory repository. Oldest rows go first.
#[derive(Debug, Clone, Copy)]
pub struct RetentionLimits {
    pub max_observations: usize,
    pub max_fused_signals: usize,
    pub max_deliveries: usize,
}

impl Default for RetentionLimits {
    fn default() -> Self {
        Self {
            max_observations: 100_000,
            max_fused_signals: 50_000,
            max_deliveries: 10_000,
        }
    }
}

struct StoredObservation {
    received_at: DateTime<Utc>,
    observed_at: Option<DateTime<Utc>>,
    raw: RawObservation,
}

/// Repository for data access (in-memory implementation)
pub struct Repository {
    observations: Mutex<VecDeque<StoredObservation>>,
    fused_signals: Mutex<VecDeque<FusedSignal>>,
    alert_states: Mutex<HashMap<MonitorKey, AlertState>>,
    deliveries: Mutex<VecDeque<DeliveryRecord>>,
    limits: RetentionLimits,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
}

impl Repository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self::with_limits(RetentionLimits::default())
    }

    pub fn with_limits(limits: RetentionLimits) -> Self {
        info!("Creating in-memory repository with limits {:?}", limits);
        Self {
            observations: Mutex::new(VecDeque::with_capacity(1024)),
            fused_signals: Mutex::new(VecDeque::with_capacity(1024)),
            alert_states: Mutex::new(HashMap::new()),
            deliveries: Mutex::new(VecDeque::with_capacity(256)),
            limits,
        }
    }

    /// Get total observation count
    pub fn observation_count(&self) -> usize {
        self.observations.lock().map(|o| o.len()).unwrap_or(0)
    }

    /// Get total fused signal count
    pub fn fused_signal_count(&self) -> usize {
        self.fused_signals.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Datastore for Repository {
    async fn insert_observation(&self, raw: &RawObservation) -> Result<(), StorageError> {
        let mut rows = lock(&self.observations)?;
        while rows.len() >= self.limits.max_observations {
            rows.pop_front();
        }
        rows.push_back(StoredObservation {
            received_at: Utc::now(),
            observed_at: raw.timestamp.as_deref().and_then(|ts| parse_timestamp(ts).ok()),
            raw: raw.clone(),
        });
        Ok(())
    }

    async fn observations_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RawObservation>, StorageError> {
        let rows = lock(&self.observations)?;
        let in_window = |ts: DateTime<Utc>| ts >= since && ts <= until;
        Ok(rows
            .iter()
            .filter(|row| match row.observed_at {
                Some(ts) => in_window(ts),
                None => in_window(row.received_at),
            })
            .map(|row| row.raw.clone())
            .collect())
    }

    async fn insert_fused_signal(&self, signal: &FusedSignal) -> Result<(), StorageError> {
        let mut signals = lock(&self.fused_signals)?;
        while signals.len() >= self.limits.max_fused_signals {
            signals.pop_front();
        }
        signals.push_back(signal.clone());
        Ok(())
    }

    async fn fused_signals_since(
        &self,
        key: &MonitorKey,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FusedSignal>, StorageError> {
        let signals = lock(&self.fused_signals)?;
        let mut matching: Vec<FusedSignal> = signals
            .iter()
            .filter(|s| s.service == key.service && s.metric == key.metric && s.created_at >= since)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn load_alert_state(&self, key: &MonitorKey) -> Result<Option<AlertState>, StorageError> {
        Ok(lock(&self.alert_states)?.get(key).cloned())
    }

    async fn swap_alert_state(
        &self,
        next: &AlertState,
        expected_version: Option<u64>,
    ) -> Result<bool, StorageError> {
        let mut states = lock(&self.alert_states)?;
        let current = states.get(&next.key).map(|s| s.version);
        if current != expected_version {
            debug!(
                "Alert state swap for {} lost: expected {:?}, found {:?}",
                next.key, expected_version, current
            );
            return Ok(false);
        }
        states.insert(next.key.clone(), next.clone());
        Ok(true)
    }

    async fn alert_states(&self) -> Result<Vec<AlertState>, StorageError> {
        let mut states: Vec<AlertState> = lock(&self.alert_states)?.values().cloned().collect();
        states.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(states)
    }

    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), StorageError> {
        let mut deliveries = lock(&self.deliveries)?;
        while deliveries.len() >= self.limits.max_deliveries {
            deliveries.pop_front();
        }
        deliveries.push_back(record.clone());
        Ok(())
    }

    async fn update_delivery(&self, record: &DeliveryRecord) -> Result<(), StorageError> {
        let mut deliveries = lock(&self.deliveries)?;
        let stored = deliveries
            .iter_mut()
            .find(|d| d.id == record.id)
            .ok_or(StorageError::NotFound)?;
        *stored = record.clone();
        Ok(())
    }

    async fn recent_deliveries(&self, limit: usize) -> Result<Vec<DeliveryRecord>, StorageError> {
        let mut records: Vec<DeliveryRecord> = lock(&self.deliveries)?.iter().cloned().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use event_fusion::{FusionComponents, FusionWeights, RiskLabel};

    fn raw(source: &str, timestamp: Option<String>, severity: &str) -> RawObservation {
        RawObservation {
            source: Some(source.to_string()),
            timestamp,
            severity: Some(severity.to_string()),
            kind: Some("log".to_string()),
            ..Default::default()
        }
    }

    fn signal(key: &MonitorKey, score: f64, at: DateTime<Utc>) -> FusedSignal {
        FusedSignal {
            service: key.service.clone(),
            metric: key.metric.clone(),
            fused_score: score,
            label: RiskLabel::Low,
            components: FusionComponents {
                realtime: score,
                predictive: 0.0,
                context: 0.0,
                weights: FusionWeights::default(),
                half_life_minutes: 45.0,
            },
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_observation_window() {
        let repo = Repository::new();
        let now = Utc::now();
        let recent = (now - Duration::minutes(5)).to_rfc3339();
        let stale = (now - Duration::hours(10)).to_rfc3339();

        repo.insert_observation(&raw("api", Some(recent), "ERROR")).await.unwrap();
        repo.insert_observation(&raw("api", Some(stale), "ERROR")).await.unwrap();
        repo.insert_observation(&raw("api", Some("yesterday-ish".into()), "ERROR")).await.unwrap();

        let rows = repo
            .observations_between(now - Duration::hours(1), now + Duration::minutes(1))
            .await
            .unwrap();
        // the malformed row was received just now, so it is returned for counting
        assert_eq!(rows.len(), 2);
        assert_eq!(repo.observation_count(), 3);
    }

    #[tokio::test]
    async fn test_retention_limit() {
        let repo = Repository::with_limits(RetentionLimits {
            max_observations: 2,
            ..Default::default()
        });
        for severity in ["INFO", "WARNING", "ERROR"] {
            repo.insert_observation(&raw("api", None, severity)).await.unwrap();
        }
        assert_eq!(repo.observation_count(), 2);
    }

    #[tokio::test]
    async fn test_fused_signals_newest_first() {
        let repo = Repository::new();
        let key = MonitorKey::new("api", "latency");
        let other = MonitorKey::new("db", "latency");
        let now = Utc::now();
        for i in 0..4 {
            repo.insert_fused_signal(&signal(&key, i as f64, now - Duration::minutes(i)))
                .await
                .unwrap();
        }
        repo.insert_fused_signal(&signal(&other, 99.0, now)).await.unwrap();

        let found = repo
            .fused_signals_since(&key, now - Duration::minutes(2), 10)
            .await
            .unwrap();
        let scores: Vec<f64> = found.iter().map(|s| s.fused_score).collect();
        assert_eq!(scores, vec![0.0, 1.0, 2.0]);
        assert_eq!(repo.fused_signal_count(), 5);
    }

    #[tokio::test]
    async fn test_alert_state_compare_and_swap() {
        let repo = Repository::new();
        let key = MonitorKey::new("api", "latency");
        let mut state = AlertState::new(key.clone(), Utc::now());

        assert!(repo.swap_alert_state(&state, None).await.unwrap());
        assert!(!repo.swap_alert_state(&state, None).await.unwrap());

        state.version = 1;
        assert!(repo.swap_alert_state(&state, Some(0)).await.unwrap());
        // stale writer still believes version 0
        assert!(!repo.swap_alert_state(&state, Some(0)).await.unwrap());

        let stored = repo.load_alert_state(&key).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_delivery_update() {
        let repo = Repository::new();
        let mut record = DeliveryRecord::new("hello", "log");
        repo.insert_delivery(&record).await.unwrap();
        record.attempt_count = 3;
        repo.update_delivery(&record).await.unwrap();

        let recent = repo.recent_deliveries(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].attempt_count, 3);

        let unknown = DeliveryRecord::new("ghost", "log");
        assert!(matches!(
            repo.update_delivery(&unknown).await,
            Err(StorageError::NotFound)
        ));
    }
}
