//! Synthetic observation feed
//!
//! Writes random telemetry for every monitored key so the pipeline can run
//! without real producers. Every log line it emits carries `synthetic = true`.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use storage::Datastore;
use telemetry::{MonitorKey, Observation, RawObservation, SeverityLevel};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LEVELS: [SeverityLevel; 5] = [
    SeverityLevel::Debug,
    SeverityLevel::Info,
    SeverityLevel::Warning,
    SeverityLevel::Error,
    SeverityLevel::Critical,
];

pub struct SyntheticFeed {
    store: Arc<dyn Datastore>,
    keys: Vec<MonitorKey>,
    period: Duration,
}

impl SyntheticFeed {
    pub fn new(store: Arc<dyn Datastore>, keys: Vec<MonitorKey>, period: Duration) -> Self {
        Self { store, keys, period }
    }

    /// One log, one forecast and one heartbeat per key
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, key: &MonitorKey, now: DateTime<Utc>) -> Vec<RawObservation> {
        let level = LEVELS.choose(rng).copied().unwrap_or(SeverityLevel::Info);
        let risk: f64 = rng.gen_range(0.0..100.0);
        vec![
            Observation::log(key.service.clone(), level, now).into(),
            Observation::forecast(key.service.clone(), key.metric.clone(), risk, now).into(),
            Observation::heartbeat(key.service.clone(), now).into(),
        ]
    }

    /// Write one batch for every key
    pub async fn emit(&self, now: DateTime<Utc>) -> usize {
        let rows: Vec<RawObservation> = {
            let mut rng = rand::thread_rng();
            self.keys
                .iter()
                .flat_map(|key| Self::generate(&mut rng, key, now))
                .collect()
        };

        let mut written = 0;
        for row in &rows {
            match self.store.insert_observation(row).await {
                Ok(()) => written += 1,
                Err(e) => warn!(synthetic = true, "Writing synthetic observation failed: {}", e),
            }
        }
        debug!(synthetic = true, "Wrote {} synthetic observations", written);
        written
    }

    pub async fn run(self, cancel: CancellationToken) {
        warn!(
            synthetic = true,
            "Synthetic mode is on: random observations are written for {} keys",
            self.keys.len()
        );
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.emit(Utc::now()).await;
        }
        info!(synthetic = true, "Synthetic feed stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use storage::Repository;
    use telemetry::{ObservationKind, Validator};

    #[test]
    fn test_generated_rows_validate() {
        let mut rng = StdRng::seed_from_u64(7);
        let key = MonitorKey::new("backend", "error_rate");
        let rows = SyntheticFeed::generate(&mut rng, &key, Utc::now());

        let report = Validator::new().validate_batch(&rows);
        assert_eq!(report.skipped, 0);
        let kinds: Vec<ObservationKind> = report.observations.iter().map(|o| o.kind).collect();
        assert_eq!(
            kinds,
            vec![ObservationKind::Log, ObservationKind::Forecast, ObservationKind::Heartbeat]
        );
        let risk = report.observations[1].value().unwrap();
        assert!((0.0..100.0).contains(&risk));
    }

    #[tokio::test]
    async fn test_emit_writes_every_key() {
        let store = Arc::new(Repository::new());
        let keys = vec![MonitorKey::new("backend", "latency"), MonitorKey::new("db", "latency")];
        let feed = SyntheticFeed::new(store.clone(), keys, Duration::from_secs(60));
        assert_eq!(feed.emit(Utc::now()).await, 6);
        assert_eq!(store.observation_count(), 6);
    }
}
