//! Dispatcher Implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::channel::NotificationChannel;
use crate::error::DispatchError;
use crate::queue::{PendingDelivery, RetryQueue};
use crate::record::{DeliveryRecord, DeliveryStatus};

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Attempts per delivery, including the first one
    pub max_attempts: u32,
    /// Upper bound of the exponential part of the backoff (seconds)
    pub backoff_cap_secs: f64,
    /// Jitter as a fraction of the base delay
    pub jitter_ratio: f64,
    /// Retry queue capacity
    pub queue_capacity: usize,
    /// Consecutive exhausted deliveries before escalating
    pub hard_failure_ceiling: u32,
    /// Worker wake-up period when the queue is empty (seconds)
    pub idle_poll_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_cap_secs: 60.0,
            jitter_ratio: 0.3,
            queue_capacity: 1000,
            hard_failure_ceiling: 3,
            idle_poll_secs: 15,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.max_attempts == 0 {
            return Err(DispatchError::Config("max_attempts must be at least 1".into()));
        }
        if self.hard_failure_ceiling == 0 {
            return Err(DispatchError::Config("hard_failure_ceiling must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(DispatchError::Config("queue_capacity must be at least 1".into()));
        }
        if !self.backoff_cap_secs.is_finite() || self.backoff_cap_secs <= 0.0 {
            return Err(DispatchError::Config(format!(
                "backoff_cap_secs must be positive, got {}",
                self.backoff_cap_secs
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(DispatchError::Config(format!(
                "jitter_ratio must lie in [0, 1], got {}",
                self.jitter_ratio
            )));
        }
        Ok(())
    }
}

/// Dispatcher health, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatcherHealth {
    /// Last delivery succeeded
    Online,
    /// Deliveries are failing and being retried
    Degraded,
    /// Hard failure ceiling reached; the process should be restarted
    Escalated,
}

/// Persistence for delivery records
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), DispatchError>;
    async fn update_delivery(&self, record: &DeliveryRecord) -> Result<(), DispatchError>;
}

/// Notification dispatcher
pub struct Dispatcher {
    config: DispatcherConfig,
    policy: BackoffPolicy,
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
    sink: Arc<dyn DeliverySink>,
    queue: RetryQueue,
    exhausted_streak: AtomicU32,
    health: watch::Sender<DispatcherHealth>,
}

impl Dispatcher {
    /// Create a dispatcher with no channels
    pub fn new(config: DispatcherConfig, sink: Arc<dyn DeliverySink>) -> Result<Self, DispatchError> {
        config.validate()?;
        info!("Creating dispatcher with config: {:?}", config);
        let (health, _) = watch::channel(DispatcherHealth::Online);
        Ok(Self {
            policy: BackoffPolicy::new(config.backoff_cap_secs, config.jitter_ratio),
            queue: RetryQueue::new(config.queue_capacity),
            config,
            channels: HashMap::new(),
            sink,
            exhausted_streak: AtomicU32::new(0),
            health,
        })
    }

    /// Register a channel under its name, replacing any previous one
    pub fn register_channel(&mut self, channel: Arc<dyn NotificationChannel>) {
        info!("Registering notification channel {}", channel.name());
        self.channels.insert(channel.name().to_string(), channel);
    }

    /// Registered channel names, sorted
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Subscribe to health changes
    pub fn health(&self) -> watch::Receiver<DispatcherHealth> {
        self.health.subscribe()
    }

    pub fn current_health(&self) -> DispatcherHealth {
        *self.health.borrow()
    }

    /// Deliveries waiting for a retry
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Send `message` through `channel`. A failed first attempt is queued for
    /// retry and the returned record is `Pending`.
    pub async fn send(&self, message: &str, channel: &str) -> Result<DeliveryRecord, DispatchError> {
        let target = self
            .channels
            .get(channel)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownChannel(channel.to_string()))?;

        let mut record = DeliveryRecord::new(message, channel);
        self.persist(&record, true).await;

        self.attempt(target.as_ref(), &mut record).await;
        if record.status == DeliveryStatus::Pending {
            let delay = self.policy.delay(record.attempt_count);
            debug!("Delivery {} queued for retry in {:?}", record.id, delay);
            self.enqueue(PendingDelivery {
                record: record.clone(),
                next_attempt_at: Instant::now() + delay,
            })
            .await;
        }
        self.persist(&record, false).await;
        Ok(record)
    }

    /// Send `message` through every registered channel
    pub async fn broadcast(&self, message: &str) -> Vec<DeliveryRecord> {
        let mut records = Vec::with_capacity(self.channels.len());
        for name in self.channel_names() {
            match self.send(message, &name).await {
                Ok(record) => records.push(record),
                Err(e) => warn!("Broadcast to {} failed: {}", name, e),
            }
        }
        records
    }

    /// Retry every queued delivery due at `now`. Returns how many were attempted.
    pub async fn retry_due(&self, now: Instant) -> usize {
        let due = self.queue.take_due(now);
        let attempted = due.len();

        for mut item in due {
            match self.channels.get(&item.record.channel).cloned() {
                Some(channel) => self.attempt(channel.as_ref(), &mut item.record).await,
                None => {
                    let reason = format!("channel {} no longer registered", item.record.channel);
                    item.record.mark_failed_attempt(reason, true);
                }
            }

            if item.record.status == DeliveryStatus::Pending {
                let delay = self.policy.delay(item.record.attempt_count);
                debug!(
                    "Delivery {} failed attempt {}, next in {:?}",
                    item.record.id, item.record.attempt_count, delay
                );
                item.next_attempt_at = Instant::now() + delay;
                let record = item.record.clone();
                self.enqueue(item).await;
                self.persist(&record, false).await;
            } else {
                self.persist(&item.record, false).await;
            }
        }

        metrics::gauge!("vigil_retry_queue_depth").set(self.queue.len() as f64);
        attempted
    }

    /// Retry worker. Runs until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Starting dispatcher retry worker");
        let idle = Duration::from_secs(self.config.idle_poll_secs.max(1));

        loop {
            let deadline = self.queue.next_due().unwrap_or_else(|| Instant::now() + idle);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    self.retry_due(Instant::now()).await;
                }
            }
        }

        info!("Dispatcher retry worker stopped ({} deliveries still queued)", self.queue.len());
    }

    async fn attempt(&self, channel: &dyn NotificationChannel, record: &mut DeliveryRecord) {
        record.attempt_count += 1;
        match channel.send(&record.message).await {
            Ok(()) => {
                record.mark_sent();
                metrics::counter!("vigil_deliveries_total", "channel" => record.channel.clone(), "outcome" => "sent")
                    .increment(1);
                self.exhausted_streak.store(0, Ordering::Relaxed);
                self.set_health(DispatcherHealth::Online);
                if record.attempt_count > 1 {
                    info!(
                        "Delivery {} on {} succeeded after {} attempts",
                        record.id, record.channel, record.attempt_count
                    );
                }
            }
            Err(e) => {
                let terminal = record.attempt_count >= self.config.max_attempts;
                warn!(
                    "Delivery {} on {} failed (attempt {}/{}): {}",
                    record.id, record.channel, record.attempt_count, self.config.max_attempts, e
                );
                record.mark_failed_attempt(e.to_string(), terminal);
                if terminal {
                    self.on_exhausted(record);
                } else {
                    self.set_health(DispatcherHealth::Degraded);
                }
            }
        }
    }

    async fn enqueue(&self, item: PendingDelivery) {
        if let Some(mut dropped) = self.queue.push(item) {
            metrics::counter!("vigil_deliveries_total", "channel" => dropped.record.channel.clone(), "outcome" => "dropped")
                .increment(1);
            dropped.record.mark_failed_attempt("dropped: retry queue full".to_string(), true);
            self.persist(&dropped.record, false).await;
        }
    }

    fn on_exhausted(&self, record: &DeliveryRecord) {
        metrics::counter!("vigil_deliveries_total", "channel" => record.channel.clone(), "outcome" => "failed")
            .increment(1);
        let streak = self.exhausted_streak.fetch_add(1, Ordering::Relaxed) + 1;
        error!(
            "Delivery {} on {} exhausted after {} attempts ({} consecutive)",
            record.id, record.channel, record.attempt_count, streak
        );

        if streak >= self.config.hard_failure_ceiling {
            error!(
                "Hard failure ceiling of {} reached, escalating for restart",
                self.config.hard_failure_ceiling
            );
            self.set_health(DispatcherHealth::Escalated);
        } else {
            self.set_health(DispatcherHealth::Degraded);
        }
    }

    /// Escalation is sticky: only a restart clears it
    fn set_health(&self, next: DispatcherHealth) {
        self.health.send_if_modified(|current| {
            if *current == next || *current == DispatcherHealth::Escalated {
                return false;
            }
            *current = next;
            true
        });
    }

    async fn persist(&self, record: &DeliveryRecord, created: bool) {
        let result = if created {
            self.sink.insert_delivery(record).await
        } else {
            self.sink.update_delivery(record).await
        };
        if let Err(e) = result {
            warn!("Failed to persist delivery {}: {}", record.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LogChannel;
    use crate::error::ChannelError;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<HashMap<Uuid, DeliveryRecord>>,
    }

    impl MemorySink {
        fn get(&self, id: Uuid) -> Option<DeliveryRecord> {
            self.records.lock().unwrap().get(&id).cloned()
        }
    }

    #[async_trait]
    impl DeliverySink for MemorySink {
        async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), DispatchError> {
            self.records.lock().unwrap().insert(record.id, record.clone());
            Ok(())
        }

        async fn update_delivery(&self, record: &DeliveryRecord) -> Result<(), DispatchError> {
            self.records.lock().unwrap().insert(record.id, record.clone());
            Ok(())
        }
    }

    /// Fails the first `failures` sends, then succeeds
    struct FlakyChannel {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyChannel {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl NotificationChannel for FlakyChannel {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn send(&self, _text: &str) -> Result<(), ChannelError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let left = self.failures.load(Ordering::Relaxed);
            if left > 0 {
                self.failures.store(left - 1, Ordering::Relaxed);
                return Err(ChannelError::Rejected {
                    status: 502,
                    body: "bad gateway".to_string(),
                });
            }
            Ok(())
        }
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            jitter_ratio: 0.0,
            ..Default::default()
        }
    }

    fn dispatcher(config: DispatcherConfig, channel: Arc<dyn NotificationChannel>) -> (Dispatcher, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let mut dispatcher = Dispatcher::new(config, sink.clone()).unwrap();
        dispatcher.register_channel(channel);
        (dispatcher, sink)
    }

    #[tokio::test]
    async fn test_immediate_success() {
        let (dispatcher, sink) = dispatcher(config(), Arc::new(LogChannel::new("log")));
        let record = dispatcher.send("hello", "log").await.unwrap();
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert_eq!(record.attempt_count, 1);
        assert_eq!(sink.get(record.id).unwrap().status, DeliveryStatus::Sent);
        assert_eq!(dispatcher.queued(), 0);
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let (dispatcher, _) = dispatcher(config(), Arc::new(LogChannel::new("log")));
        assert!(matches!(
            dispatcher.send("hello", "pager").await,
            Err(DispatchError::UnknownChannel(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_queued_then_retried() {
        let channel = Arc::new(FlakyChannel::new(2));
        let (dispatcher, sink) = dispatcher(config(), channel.clone());

        let record = dispatcher.send("disk full", "flaky").await.unwrap();
        assert_eq!(record.status, DeliveryStatus::Pending);
        assert_eq!(dispatcher.queued(), 1);
        assert_eq!(dispatcher.current_health(), DispatcherHealth::Degraded);

        // not due yet: first retry waits 2^(1+1) seconds
        assert_eq!(dispatcher.retry_due(Instant::now() + Duration::from_secs(3)).await, 0);
        assert_eq!(dispatcher.retry_due(Instant::now() + Duration::from_secs(4)).await, 1);
        assert_eq!(sink.get(record.id).unwrap().attempt_count, 2);

        // second failure waited 8s more
        assert_eq!(dispatcher.retry_due(Instant::now() + Duration::from_secs(7)).await, 0);
        assert_eq!(dispatcher.retry_due(Instant::now() + Duration::from_secs(8)).await, 1);

        let stored = sink.get(record.id).unwrap();
        assert_eq!(stored.status, DeliveryStatus::Sent);
        assert_eq!(stored.attempt_count, 3);
        assert_eq!(channel.calls.load(Ordering::Relaxed), 3);
        assert_eq!(dispatcher.current_health(), DispatcherHealth::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_marks_failed() {
        let cfg = DispatcherConfig {
            max_attempts: 2,
            ..config()
        };
        let (dispatcher, sink) = dispatcher(cfg, Arc::new(FlakyChannel::new(u32::MAX)));
        let record = dispatcher.send("db down", "flaky").await.unwrap();
        dispatcher.retry_due(Instant::now() + Duration::from_secs(3600)).await;

        let stored = sink.get(record.id).unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.attempt_count, 2);
        assert!(stored.error.unwrap().contains("502"));
        assert_eq!(dispatcher.queued(), 0);
    }

    #[tokio::test]
    async fn test_hard_failure_ceiling_escalates() {
        let cfg = DispatcherConfig {
            max_attempts: 1,
            hard_failure_ceiling: 2,
            ..config()
        };
        let (dispatcher, _) = dispatcher(cfg, Arc::new(FlakyChannel::new(u32::MAX)));
        let health = dispatcher.health();

        dispatcher.send("one", "flaky").await.unwrap();
        assert_eq!(*health.borrow(), DispatcherHealth::Degraded);
        dispatcher.send("two", "flaky").await.unwrap();
        assert_eq!(*health.borrow(), DispatcherHealth::Escalated);
    }

    #[tokio::test]
    async fn test_escalation_is_sticky() {
        let cfg = DispatcherConfig {
            max_attempts: 1,
            hard_failure_ceiling: 1,
            ..config()
        };
        let (dispatcher, _) = dispatcher(cfg, Arc::new(FlakyChannel::new(1)));
        dispatcher.send("one", "flaky").await.unwrap();
        dispatcher.send("two", "flaky").await.unwrap();
        assert_eq!(dispatcher.current_health(), DispatcherHealth::Escalated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_overflow_fails_oldest() {
        let cfg = DispatcherConfig {
            queue_capacity: 1,
            ..config()
        };
        let (dispatcher, sink) = dispatcher(cfg, Arc::new(FlakyChannel::new(u32::MAX)));
        let first = dispatcher.send("first", "flaky").await.unwrap();
        let second = dispatcher.send("second", "flaky").await.unwrap();

        assert_eq!(dispatcher.queued(), 1);
        let dropped = sink.get(first.id).unwrap();
        assert_eq!(dropped.status, DeliveryStatus::Failed);
        assert!(dropped.error.unwrap().contains("retry queue full"));
        assert_eq!(sink.get(second.id).unwrap().status, DeliveryStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_drains_queue_and_stops() {
        let channel = Arc::new(FlakyChannel::new(1));
        let (dispatcher, sink) = dispatcher(config(), channel);
        let dispatcher = Arc::new(dispatcher);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(dispatcher.clone().run(cancel.clone()));

        let record = dispatcher.send("late", "flaky").await.unwrap();
        assert_eq!(record.status, DeliveryStatus::Pending);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.get(record.id).unwrap().status, DeliveryStatus::Sent);

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_channel() {
        let sink = Arc::new(MemorySink::default());
        let mut dispatcher = Dispatcher::new(config(), sink).unwrap();
        dispatcher.register_channel(Arc::new(LogChannel::new("a")));
        dispatcher.register_channel(Arc::new(LogChannel::new("b")));
        let records = dispatcher.broadcast("fan out").await;
        let channels: Vec<&str> = records.iter().map(|r| r.channel.as_str()).collect();
        assert_eq!(channels, vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_config() {
        let bad = DispatcherConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = DispatcherConfig {
            jitter_ratio: 2.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
