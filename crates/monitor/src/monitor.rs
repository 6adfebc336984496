//! Tick pipeline

use alerting::{AlertState, HealthStatus, HysteresisMachine, Notification, TickInput, TransitionCause};
use chrono::{DateTime, Duration, Utc};
use decay::{DecayedScore, ScoreHistory};
use dispatcher::{DeliveryRecord, Dispatcher};
use event_fusion::{ComponentScores, FusedSignal, FusionEngine};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use storage::Datastore;
use telemetry::{MonitorKey, Observation, ObservationKind, RawObservation, SeverityLevel, Validator};
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::probe::RecoveryProbe;

/// Everything a tick needs, passed in explicitly
pub struct MonitorContext {
    pub store: Arc<dyn Datastore>,
    pub dispatcher: Arc<Dispatcher>,
    pub probe: Arc<dyn RecoveryProbe>,
    pub engine: FusionEngine,
    pub machine: HysteresisMachine,
    pub validator: Validator,
    pub config: MonitorConfig,
}

/// Outcome of one tick
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub key: MonitorKey,
    pub signal: FusedSignal,
    /// `None` when the alert state could not be read and evaluation was skipped
    pub previous: Option<HealthStatus>,
    pub status: Option<HealthStatus>,
    pub cause: Option<TransitionCause>,
    pub notification: Option<Notification>,
    /// A transition happened but cooldown held its notification back
    pub suppressed: bool,
    /// False when another writer updated the state first
    pub committed: bool,
    /// Malformed rows skipped this tick
    pub skipped: usize,
    pub deliveries: Vec<DeliveryRecord>,
}

pub struct Monitor {
    ctx: MonitorContext,
    last_heartbeat: Mutex<HashMap<String, DateTime<Utc>>>,
    histories: Mutex<HashMap<MonitorKey, ScoreHistory>>,
}

impl Monitor {
    pub fn new(ctx: MonitorContext) -> Result<Self, MonitorError> {
        ctx.config.validate()?;
        info!(
            "Monitoring {} keys every {}s (lookback {}m)",
            ctx.config.keys.len(),
            ctx.config.tick_interval_secs,
            ctx.config.lookback_minutes
        );
        Ok(Self {
            ctx,
            last_heartbeat: Mutex::new(HashMap::new()),
            histories: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.ctx.config
    }

    pub fn keys(&self) -> &[MonitorKey] {
        &self.ctx.config.keys
    }

    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.ctx.store
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.ctx.dispatcher
    }

    /// Current alert state of `key`, if it has been ticked at least once
    pub async fn get_state(&self, key: &MonitorKey) -> Result<Option<AlertState>, MonitorError> {
        Ok(self.ctx.store.load_alert_state(key).await?)
    }

    /// Realtime scores computed for `key`, oldest first
    pub fn recent_scores(&self, key: &MonitorKey) -> Vec<DecayedScore> {
        let histories = self.histories.lock().unwrap_or_else(|e| e.into_inner());
        histories
            .get(key)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Run one aggregate, fuse, evaluate and notify cycle for `key`
    pub async fn tick(&self, key: &MonitorKey, now: DateTime<Utc>) -> Result<TickReport, MonitorError> {
        metrics::counter!("vigil_ticks_total").increment(1);
        let since = now - Duration::minutes(self.ctx.config.lookback_minutes);

        let rows = match self.ctx.store.observations_between(since, now).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Reading observations for {} failed, treating as no data: {}", key, e);
                Vec::new()
            }
        };
        let report = self.ctx.validator.validate_batch(&rows);
        if report.skipped > 0 {
            metrics::counter!("vigil_observations_skipped_total").increment(report.skipped as u64);
            debug!("{}: skipped {} malformed observations", key, report.skipped);
        }
        let observations = report.observations;

        let signal = self.fuse(key, &observations, since, now).await;
        if let Err(e) = self.ctx.store.insert_fused_signal(&signal).await {
            warn!("Storing fused signal for {} failed: {}", key, e);
        }
        if signal.fused_score >= self.ctx.config.alert_threshold {
            self.soft_trigger(key, &signal, now).await;
        }

        let stored = match self.ctx.store.load_alert_state(key).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Reading alert state for {} failed, skipping evaluation: {}", key, e);
                return Ok(TickReport {
                    key: key.clone(),
                    signal,
                    previous: None,
                    status: None,
                    cause: None,
                    notification: None,
                    suppressed: false,
                    committed: false,
                    skipped: report.skipped,
                    deliveries: Vec::new(),
                });
            }
        };
        let expected_version = stored.as_ref().map(|s| s.version);
        let state = stored.unwrap_or_else(|| AlertState::new(key.clone(), now));

        let mut input = TickInput {
            fused_score: signal.fused_score,
            heartbeat_gap: self.heartbeat_gap(key, &observations, &state, now),
            probe_ok: None,
        };
        if self.ctx.machine.needs_probe(&state, &input, now) {
            input.probe_ok = Some(self.ctx.probe.attempt(key).await);
        }

        let evaluation = self.ctx.machine.evaluate(&state, &input, now);
        let mut next = evaluation.next.clone();

        let committed = if expected_version.is_none() || !state.same_content(&next) {
            next.version = expected_version.map_or(0, |v| v + 1);
            self.ctx.store.swap_alert_state(&next, expected_version).await?
        } else {
            true
        };

        if !committed {
            warn!("{}: alert state changed concurrently, discarding this tick's transition", key);
            metrics::counter!("vigil_state_conflicts_total").increment(1);
        } else if evaluation.transitioned() {
            metrics::counter!(
                "vigil_transitions_total",
                "from" => evaluation.previous.as_str(),
                "to" => next.current_status.as_str()
            )
            .increment(1);
        }

        let notification = evaluation.notification.filter(|_| committed);
        let deliveries = match &notification {
            Some(n) => self.ctx.dispatcher.broadcast(&n.message()).await,
            None => Vec::new(),
        };

        Ok(TickReport {
            key: key.clone(),
            signal,
            previous: Some(evaluation.previous),
            status: Some(if committed { next.current_status } else { state.current_status }),
            cause: evaluation.cause,
            notification,
            suppressed: committed && evaluation.suppressed,
            committed,
            skipped: report.skipped,
            deliveries,
        })
    }

    async fn fuse(
        &self,
        key: &MonitorKey,
        observations: &[Observation],
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> FusedSignal {
        let engine = &self.ctx.engine;

        let realtime_obs: Vec<Observation> = observations
            .iter()
            .filter(|o| o.kind.is_realtime() && o.source == key.service)
            .cloned()
            .collect();
        let realtime = engine.aggregator().aggregate(&realtime_obs, now);
        self.record_score(key, realtime, now);

        let forecasts: Vec<(DateTime<Utc>, f64)> = observations
            .iter()
            .filter(|o| {
                o.kind == ObservationKind::Forecast
                    && o.source == key.service
                    && o.metric.as_deref() == Some(key.metric.as_str())
            })
            .filter_map(|o| o.value().map(|v| (o.timestamp, v)))
            .collect();
        let predictive = engine.predictive_component(&forecasts, now);

        let prior = match self
            .ctx
            .store
            .fused_signals_since(key, since, engine.config().context_window)
            .await
        {
            Ok(prior) => prior,
            Err(e) => {
                warn!("Reading prior fused signals for {} failed: {}", key, e);
                Vec::new()
            }
        };
        let context = engine.context_component(&prior, now);

        engine.fuse(
            key,
            ComponentScores {
                realtime,
                predictive,
                context,
            },
            now,
        )
    }

    fn record_score(&self, key: &MonitorKey, score: f64, now: DateTime<Utc>) {
        let mut histories = self.histories.lock().unwrap_or_else(|e| e.into_inner());
        let capacity = self.ctx.config.score_history;
        histories
            .entry(key.clone())
            .or_insert_with(|| ScoreHistory::new(capacity))
            .push(DecayedScore {
                source: key.service.clone(),
                metric: key.metric.clone(),
                score,
                computed_at: now,
            });
    }

    /// Write a log row back so downstream listeners see high fused risk
    async fn soft_trigger(&self, key: &MonitorKey, signal: &FusedSignal, now: DateTime<Utc>) {
        let severity = if signal.fused_score < 90.0 {
            SeverityLevel::Warning
        } else {
            SeverityLevel::Critical
        };
        let row = RawObservation {
            source: Some(self.ctx.config.soft_trigger_source.clone()),
            metric: Some(key.metric.clone()),
            timestamp: Some(now.to_rfc3339()),
            severity: Some(severity.as_str().to_string()),
            value: None,
            kind: Some(ObservationKind::Log.as_str().to_string()),
        };
        debug!(
            "Fused risk {} ({:.1}) for {}, writing {} log",
            signal.label, signal.fused_score, key, severity
        );
        if let Err(e) = self.ctx.store.insert_observation(&row).await {
            warn!("Soft trigger for {} failed: {}", key, e);
        }
    }

    /// Time since the service's last heartbeat. Before any heartbeat the
    /// state's creation time stands in.
    fn heartbeat_gap(
        &self,
        key: &MonitorKey,
        observations: &[Observation],
        state: &AlertState,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        if !self.ctx.machine.tracks_heartbeats() {
            return None;
        }

        let latest = observations
            .iter()
            .filter(|o| o.kind == ObservationKind::Heartbeat && o.source == key.service && o.timestamp <= now)
            .map(|o| o.timestamp)
            .max();

        let mut seen = self.last_heartbeat.lock().unwrap_or_else(|e| e.into_inner());
        let last = match (latest, seen.get(&key.service).copied()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if let Some(last) = last {
            seen.insert(key.service.clone(), last);
        }

        let since = last.unwrap_or(state.created_at);
        Some((now - since).max(Duration::zero()))
    }
}
