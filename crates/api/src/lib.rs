//! Vigil Service
//!
//! Wires configuration, logging, metrics, the datastore, the dispatcher and
//! the monitor together, and serves the HTTP surface.

use anyhow::Context;
use axum::{extract::State, routing::get, routing::post, Json, Router};
use dispatcher::{
    Dispatcher, DispatcherHealth, LogChannel, NotificationChannel, TelegramChannel, TelegramConfig,
};
use event_fusion::FusionEngine;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use monitor::{HttpProbe, Monitor, MonitorContext, NoProbe, RecoveryProbe};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use storage::{Datastore, DeliveryLog, Repository, SqliteStore};
use telemetry::{SeverityNormalizer, Validator};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod config;
mod routes;

pub use crate::config::{AppConfig, ChannelConfig, ConfigError, LoggingConfig, StorageConfig};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Application state shared across handlers
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub prometheus: PrometheusHandle,
    pub version: String,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(monitor: Arc<Monitor>, prometheus: PrometheusHandle) -> Self {
        Self {
            monitor,
            prometheus,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: DispatcherHealth,
    pub version: String,
    pub uptime_seconds: u64,
    pub monitored_keys: usize,
    pub queued_deliveries: usize,
    pub channels: Vec<String>,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/tick/:service/:metric", post(routes::pipeline::tick))
        .route("/api/v1/state/:service/:metric", get(routes::pipeline::get_state))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let dispatcher = state.monitor.dispatcher();
    Json(HealthResponse {
        status: dispatcher.current_health(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        monitored_keys: state.monitor.keys().len(),
        queued_deliveries: dispatcher.queued(),
        channels: dispatcher.channel_names(),
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.prometheus.render()
}

/// Initialize logging. Only the first call installs a subscriber.
pub fn init_logging(config: &LoggingConfig) {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    if installed.is_err() {
        warn!("Tracing subscriber already installed, keeping the existing one");
    }
}

/// Install the Prometheus recorder once and return its handle
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to install Prometheus recorder ({}), metrics stay local", e);
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Open the configured datastore
pub async fn build_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn Datastore>> {
    Ok(match config {
        StorageConfig::Memory => Arc::new(Repository::new()),
        StorageConfig::Sqlite { url, max_connections } => Arc::new(
            SqliteStore::connect(url, *max_connections)
                .await
                .with_context(|| format!("opening sqlite datastore {}", url))?,
        ),
    })
}

fn build_channel(config: &ChannelConfig) -> anyhow::Result<Arc<dyn NotificationChannel>> {
    Ok(match config {
        ChannelConfig::Log { name } => Arc::new(LogChannel::new(name.clone())),
        ChannelConfig::Telegram {
            name,
            bot_token,
            chat_id,
            api_base,
            parse_mode,
            timeout_secs,
        } => {
            let telegram = TelegramConfig {
                bot_token: bot_token.clone(),
                chat_id: chat_id.clone(),
                api_base: api_base
                    .clone()
                    .unwrap_or_else(|| "https://api.telegram.org".to_string()),
                parse_mode: parse_mode.clone(),
                timeout_secs: timeout_secs.unwrap_or(10),
            };
            Arc::new(
                TelegramChannel::new(name.clone(), telegram)
                    .with_context(|| format!("building telegram channel {}", name))?,
            )
        }
    })
}

/// Build the dispatcher and monitor from a validated config
pub fn build_monitor(config: &AppConfig, store: Arc<dyn Datastore>) -> anyhow::Result<Arc<Monitor>> {
    let mut dispatcher = Dispatcher::new(
        config.dispatcher.clone(),
        Arc::new(DeliveryLog(store.clone())),
    )?;
    for channel in &config.channels {
        dispatcher.register_channel(build_channel(channel)?);
    }

    let probe: Arc<dyn RecoveryProbe> = match &config.probe {
        Some(probe) => Arc::new(HttpProbe::new(probe.clone()).context("building health probe")?),
        None => Arc::new(NoProbe),
    };

    let normalizer = SeverityNormalizer::new(config.severity.unknown_score);
    let ctx = MonitorContext {
        store,
        dispatcher: Arc::new(dispatcher),
        probe,
        engine: FusionEngine::new(config.fusion.clone(), normalizer)?,
        machine: alerting::HysteresisMachine::new(config.hysteresis.to_config()?)?,
        validator: Validator::new(),
        config: config.monitor.clone(),
    };
    Ok(Arc::new(Monitor::new(ctx)?))
}

/// Resolves once the dispatcher escalates; never if its sender is gone
pub async fn wait_for_escalation(mut health: watch::Receiver<DispatcherHealth>) {
    if health
        .wait_for(|h| *h == DispatcherHealth::Escalated)
        .await
        .is_err()
    {
        std::future::pending::<()>().await;
    }
}

/// Serve the router until `cancel` fires
pub async fn run_server(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let app = create_router(state);
    info!("Starting API server on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
