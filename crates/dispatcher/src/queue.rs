//! Bounded retry queue

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

use crate::record::DeliveryRecord;

/// A delivery waiting for its next attempt
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub record: DeliveryRecord,
    pub next_attempt_at: Instant,
}

/// Bounded FIFO of pending deliveries. When full, the oldest entry is dropped
/// so that enqueueing never blocks.
pub struct RetryQueue {
    items: Mutex<VecDeque<PendingDelivery>>,
    capacity: usize,
    notify: Notify,
}

impl RetryQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Enqueue, returning the entry dropped to make room, if any
    pub fn push(&self, item: PendingDelivery) -> Option<PendingDelivery> {
        let dropped = {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            let dropped = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(item);
            dropped
        };

        if let Some(old) = &dropped {
            warn!(
                "Retry queue full ({}), dropping oldest delivery {} on {}",
                self.capacity, old.record.id, old.record.channel
            );
        }
        self.notify.notify_one();
        dropped
    }

    /// Remove and return every entry due at `now`, oldest first
    pub fn take_due(&self, now: Instant) -> Vec<PendingDelivery> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let (due, waiting): (VecDeque<_>, VecDeque<_>) =
            items.drain(..).partition(|item| item.next_attempt_at <= now);
        *items = waiting;
        due.into()
    }

    /// Earliest scheduled attempt
    pub fn next_due(&self) -> Option<Instant> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.iter().map(|item| item.next_attempt_at).min()
    }

    /// Wait until something is enqueued
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
