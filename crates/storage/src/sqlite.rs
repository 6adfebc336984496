//! SQLite-backed datastore

use crate::{encode_ts, Datastore, StorageError};
use alerting::{AlertState, HealthStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatcher::{DeliveryRecord, DeliveryStatus};
use event_fusion::{FusedSignal, RiskLabel};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use telemetry::{parse_timestamp, MonitorKey, RawObservation};
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS observations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT,
        metric TEXT,
        timestamp TEXT,
        severity TEXT,
        value TEXT,
        kind TEXT,
        observed_at TEXT,
        received_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_observations_observed_at ON observations (observed_at)",
    "CREATE TABLE IF NOT EXISTS fused_signals (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        service TEXT NOT NULL,
        metric TEXT NOT NULL,
        fused_score REAL NOT NULL,
        label TEXT NOT NULL,
        components TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_fused_signals_key ON fused_signals (service, metric, created_at)",
    "CREATE TABLE IF NOT EXISTS alert_states (
        service TEXT NOT NULL,
        metric TEXT NOT NULL,
        current_status TEXT NOT NULL,
        last_transition_at TEXT NOT NULL,
        last_alert_at TEXT,
        last_alert_status TEXT,
        degraded_alert_at TEXT,
        down_alert_at TEXT,
        episode_notified INTEGER NOT NULL,
        consecutive_failures INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        version INTEGER NOT NULL,
        PRIMARY KEY (service, metric)
    )",
    "CREATE TABLE IF NOT EXISTS deliveries (
        id TEXT PRIMARY KEY,
        message TEXT NOT NULL,
        channel TEXT NOT NULL,
        status TEXT NOT NULL,
        attempt_count INTEGER NOT NULL,
        error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
];

/// Datastore on a SQLite connection pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create the schema if it is missing
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        info!("Opening SQLite datastore at {}", url);
        let in_memory = url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections.max(1));
        if in_memory {
            // an in-memory database lives exactly as long as its connection,
            // and every connection would open a database of its own
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>);
        }
        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_ts(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::SerializationError(format!("bad timestamp {:?}: {}", value, e)))
}

fn decode_status(value: &str) -> Result<HealthStatus, StorageError> {
    HealthStatus::parse(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn fused_from_row(row: &SqliteRow) -> Result<FusedSignal, StorageError> {
    let label: String = row.try_get("label")?;
    let components: String = row.try_get("components")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(FusedSignal {
        service: row.try_get("service")?,
        metric: row.try_get("metric")?,
        fused_score: row.try_get("fused_score")?,
        label: RiskLabel::parse(&label)
            .ok_or_else(|| StorageError::SerializationError(format!("unknown risk label {}", label)))?,
        components: serde_json::from_str(&components)?,
        created_at: decode_ts(&created_at)?,
    })
}

fn state_from_row(row: &SqliteRow) -> Result<AlertState, StorageError> {
    let status: String = row.try_get("current_status")?;
    let last_transition_at: String = row.try_get("last_transition_at")?;
    let last_alert_at: Option<String> = row.try_get("last_alert_at")?;
    let last_alert_status: Option<String> = row.try_get("last_alert_status")?;
    let degraded_alert_at: Option<String> = row.try_get("degraded_alert_at")?;
    let down_alert_at: Option<String> = row.try_get("down_alert_at")?;
    let episode_notified: i64 = row.try_get("episode_notified")?;
    let consecutive_failures: i64 = row.try_get("consecutive_failures")?;
    let created_at: String = row.try_get("created_at")?;
    let version: i64 = row.try_get("version")?;

    Ok(AlertState {
        key: MonitorKey::new(
            row.try_get::<String, _>("service")?,
            row.try_get::<String, _>("metric")?,
        ),
        current_status: decode_status(&status)?,
        last_transition_at: decode_ts(&last_transition_at)?,
        last_alert_at: last_alert_at.as_deref().map(decode_ts).transpose()?,
        last_alert_status: last_alert_status.as_deref().map(decode_status).transpose()?,
        degraded_alert_at: degraded_alert_at.as_deref().map(decode_ts).transpose()?,
        down_alert_at: down_alert_at.as_deref().map(decode_ts).transpose()?,
        episode_notified: episode_notified != 0,
        consecutive_failures: consecutive_failures.max(0) as u32,
        created_at: decode_ts(&created_at)?,
        version: version.max(0) as u64,
    })
}

fn delivery_from_row(row: &SqliteRow) -> Result<DeliveryRecord, StorageError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let attempt_count: i64 = row.try_get("attempt_count")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(DeliveryRecord {
        id: Uuid::parse_str(&id).map_err(|e| StorageError::SerializationError(e.to_string()))?,
        message: row.try_get("message")?,
        channel: row.try_get("channel")?,
        status: DeliveryStatus::parse(&status)
            .ok_or_else(|| StorageError::SerializationError(format!("unknown delivery status {}", status)))?,
        attempt_count: attempt_count.max(0) as u32,
        error: row.try_get("error")?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}

#[async_trait]
impl Datastore for SqliteStore {
    async fn insert_observation(&self, raw: &RawObservation) -> Result<(), StorageError> {
        let observed_at = raw
            .timestamp
            .as_deref()
            .and_then(|ts| parse_timestamp(ts).ok())
            .map(encode_ts);

        sqlx::query(
            "INSERT INTO observations (source, metric, timestamp, severity, value, kind, observed_at, received_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&raw.source)
        .bind(&raw.metric)
        .bind(&raw.timestamp)
        .bind(&raw.severity)
        .bind(&raw.value)
        .bind(&raw.kind)
        .bind(observed_at)
        .bind(encode_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn observations_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RawObservation>, StorageError> {
        let (since, until) = (encode_ts(since), encode_ts(until));
        let rows = sqlx::query(
            "SELECT source, metric, timestamp, severity, value, kind FROM observations
             WHERE (observed_at IS NOT NULL AND observed_at >= ? AND observed_at <= ?)
                OR (observed_at IS NULL AND received_at >= ? AND received_at <= ?)
             ORDER BY id",
        )
        .bind(&since)
        .bind(&until)
        .bind(&since)
        .bind(&until)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RawObservation {
                    source: row.try_get("source")?,
                    metric: row.try_get("metric")?,
                    timestamp: row.try_get("timestamp")?,
                    severity: row.try_get("severity")?,
                    value: row.try_get("value")?,
                    kind: row.try_get("kind")?,
                })
            })
            .collect()
    }

    async fn insert_fused_signal(&self, signal: &FusedSignal) -> Result<(), StorageError> {
        let components = serde_json::to_string(&signal.components)?;
        sqlx::query(
            "INSERT INTO fused_signals (service, metric, fused_score, label, components, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&signal.service)
        .bind(&signal.metric)
        .bind(signal.fused_score)
        .bind(signal.label.as_str())
        .bind(components)
        .bind(encode_ts(signal.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fused_signals_since(
        &self,
        key: &MonitorKey,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FusedSignal>, StorageError> {
        let rows = sqlx::query(
            "SELECT service, metric, fused_score, label, components, created_at FROM fused_signals
             WHERE service = ? AND metric = ? AND created_at >= ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(&key.service)
        .bind(&key.metric)
        .bind(encode_ts(since))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(fused_from_row).collect()
    }

    async fn load_alert_state(&self, key: &MonitorKey) -> Result<Option<AlertState>, StorageError> {
        let row = sqlx::query("SELECT * FROM alert_states WHERE service = ? AND metric = ?")
            .bind(&key.service)
            .bind(&key.metric)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(state_from_row).transpose()
    }

    async fn swap_alert_state(
        &self,
        next: &AlertState,
        expected_version: Option<u64>,
    ) -> Result<bool, StorageError> {
        let last_alert_at = next.last_alert_at.map(encode_ts);
        let last_alert_status = next.last_alert_status.map(|s| s.as_str());
        let degraded_alert_at = next.degraded_alert_at.map(encode_ts);
        let down_alert_at = next.down_alert_at.map(encode_ts);

        let result = match expected_version {
            None => {
                sqlx::query(
                    "INSERT INTO alert_states (service, metric, current_status, last_transition_at,
                        last_alert_at, last_alert_status, degraded_alert_at, down_alert_at,
                        episode_notified, consecutive_failures, created_at, version)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (service, metric) DO NOTHING",
                )
                .bind(&next.key.service)
                .bind(&next.key.metric)
                .bind(next.current_status.as_str())
                .bind(encode_ts(next.last_transition_at))
                .bind(last_alert_at)
                .bind(last_alert_status)
                .bind(degraded_alert_at)
                .bind(down_alert_at)
                .bind(next.episode_notified as i64)
                .bind(next.consecutive_failures as i64)
                .bind(encode_ts(next.created_at))
                .bind(next.version as i64)
                .execute(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query(
                    "UPDATE alert_states SET current_status = ?, last_transition_at = ?,
                        last_alert_at = ?, last_alert_status = ?, degraded_alert_at = ?,
                        down_alert_at = ?, episode_notified = ?,
                        consecutive_failures = ?, created_at = ?, version = ?
                     WHERE service = ? AND metric = ? AND version = ?",
                )
                .bind(next.current_status.as_str())
                .bind(encode_ts(next.last_transition_at))
                .bind(last_alert_at)
                .bind(last_alert_status)
                .bind(degraded_alert_at)
                .bind(down_alert_at)
                .bind(next.episode_notified as i64)
                .bind(next.consecutive_failures as i64)
                .bind(encode_ts(next.created_at))
                .bind(next.version as i64)
                .bind(&next.key.service)
                .bind(&next.key.metric)
                .bind(expected as i64)
                .execute(&self.pool)
                .await?
            }
        };

        let won = result.rows_affected() == 1;
        if !won {
            debug!("Alert state swap for {} lost (expected {:?})", next.key, expected_version);
        }
        Ok(won)
    }

    async fn alert_states(&self) -> Result<Vec<AlertState>, StorageError> {
        let rows = sqlx::query("SELECT * FROM alert_states ORDER BY service, metric")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(state_from_row).collect()
    }

    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO deliveries (id, message, channel, status, attempt_count, error, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.message)
        .bind(&record.channel)
        .bind(record.status.as_str())
        .bind(record.attempt_count as i64)
        .bind(&record.error)
        .bind(encode_ts(record.created_at))
        .bind(encode_ts(record.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_delivery(&self, record: &DeliveryRecord) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE deliveries SET status = ?, attempt_count = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(record.status.as_str())
        .bind(record.attempt_count as i64)
        .bind(&record.error)
        .bind(encode_ts(record.updated_at))
        .bind(record.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn recent_deliveries(&self, limit: usize) -> Result<Vec<DeliveryRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM deliveries ORDER BY updated_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(delivery_from_row).collect()
    }
}
