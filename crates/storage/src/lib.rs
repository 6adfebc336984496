//! Storage Layer
//!
//! The datastore boundary of the pipeline: raw observations in, fused
//! signals, alert state and delivery records out. Two implementations share
//! the [`Datastore`] trait: an in-memory [`Repository`] with retention limits
//! and a SQLite-backed [`SqliteStore`].

mod repository;
mod sqlite;

pub use repository::{Repository, RetentionLimits};
pub use sqlite::SqliteStore;

use alerting::AlertState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatcher::{DeliveryRecord, DeliverySink, DispatchError};
use event_fusion::FusedSignal;
use std::sync::Arc;
use telemetry::{MonitorKey, RawObservation};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Record not found")]
    NotFound,
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            other => StorageError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}

/// Everything the monitor reads and writes
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Append a raw observation row, stamped with the time it was received
    async fn insert_observation(&self, raw: &RawObservation) -> Result<(), StorageError>;

    /// Rows whose timestamp lies in `[since, until]`. Rows with an unusable
    /// timestamp are returned when they were received inside the window, so
    /// validation can count them.
    async fn observations_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RawObservation>, StorageError>;

    async fn insert_fused_signal(&self, signal: &FusedSignal) -> Result<(), StorageError>;

    /// Fused signals for `key` created at or after `since`, newest first
    async fn fused_signals_since(
        &self,
        key: &MonitorKey,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FusedSignal>, StorageError>;

    async fn load_alert_state(&self, key: &MonitorKey) -> Result<Option<AlertState>, StorageError>;

    /// Compare-and-swap: store `next` only if the stored version equals
    /// `expected_version` (`None`: only if no state exists yet). Returns
    /// whether the write won.
    async fn swap_alert_state(
        &self,
        next: &AlertState,
        expected_version: Option<u64>,
    ) -> Result<bool, StorageError>;

    async fn alert_states(&self) -> Result<Vec<AlertState>, StorageError>;

    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), StorageError>;

    async fn update_delivery(&self, record: &DeliveryRecord) -> Result<(), StorageError>;

    /// Most recently updated delivery records, newest first
    async fn recent_deliveries(&self, limit: usize) -> Result<Vec<DeliveryRecord>, StorageError>;
}

/// Adapts a [`Datastore`] into the dispatcher's delivery sink
#[derive(Clone)]
pub struct DeliveryLog(pub Arc<dyn Datastore>);

#[async_trait]
impl DeliverySink for DeliveryLog {
    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), DispatchError> {
        self.0
            .insert_delivery(record)
            .await
            .map_err(|e| DispatchError::Sink(e.to_string()))
    }

    async fn update_delivery(&self, record: &DeliveryRecord) -> Result<(), DispatchError> {
        self.0
            .update_delivery(record)
            .await
            .map_err(|e| DispatchError::Sink(e.to_string()))
    }
}

/// Fixed-width RFC3339 so text columns sort chronologically
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
