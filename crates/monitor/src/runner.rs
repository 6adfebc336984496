//! Polling loops

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use telemetry::MonitorKey;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::monitor::Monitor;

/// Spawn one loop per monitored key onto `tracker`
pub fn spawn_monitor_loops(monitor: Arc<Monitor>, tracker: &TaskTracker, cancel: CancellationToken) {
    for key in monitor.keys().to_vec() {
        tracker.spawn(run_key_loop(monitor.clone(), key, cancel.clone()));
    }
}

/// Tick `key` on a fixed interval until `cancel` fires. Cancellation is only
/// observed between ticks; a tick in progress always runs to completion.
pub async fn run_key_loop(monitor: Arc<Monitor>, key: MonitorKey, cancel: CancellationToken) {
    let period = Duration::from_secs(monitor.config().tick_interval_secs);
    info!("Starting monitor loop for {} (every {:?})", key, period);

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match monitor.tick(&key, Utc::now()).await {
            Ok(report) => debug!(
                "{}: fused {:.1} ({}), status {}",
                key,
                report.signal.fused_score,
                report.signal.label,
                report.status.map_or("unknown", |s| s.as_str())
            ),
            Err(e) => error!("Tick for {} failed: {}", key, e),
        }
    }

    info!("Monitor loop for {} stopped", key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MonitorConfig, MonitorContext, NoProbe};
    use alerting::{HysteresisConfig, HysteresisMachine};
    use dispatcher::{Dispatcher, DispatcherConfig, LogChannel};
    use event_fusion::{FusionConfig, FusionEngine};
    use storage::{Datastore, DeliveryLog, Repository};
    use telemetry::{SeverityNormalizer, Validator};

    fn monitor(store: Arc<Repository>) -> Arc<Monitor> {
        let mut dispatcher =
            Dispatcher::new(DispatcherConfig::default(), Arc::new(DeliveryLog(store.clone()))).unwrap();
        dispatcher.register_channel(Arc::new(LogChannel::new("log")));
        Arc::new(
            Monitor::new(MonitorContext {
                store,
                dispatcher: Arc::new(dispatcher),
                probe: Arc::new(NoProbe),
                engine: FusionEngine::new(FusionConfig::default(), SeverityNormalizer::default()).unwrap(),
                machine: HysteresisMachine::new(HysteresisConfig::default()).unwrap(),
                validator: Validator::new(),
                config: MonitorConfig {
                    keys: vec![MonitorKey::new("backend", "latency"), MonitorKey::new("db", "latency")],
                    tick_interval_secs: 10,
                    ..Default::default()
                },
            })
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_tick_until_cancelled() {
        let store = Arc::new(Repository::new());
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        spawn_monitor_loops(monitor(store.clone()), &tracker, cancel.clone());

        // the first tick fires immediately, then one every 10s
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        tracker.close();
        tracker.wait().await;

        assert_eq!(store.fused_signal_count(), 6);
        assert_eq!(store.alert_states().await.unwrap().len(), 2);
    }
}
