//! Vigil - Main Entry Point

use anyhow::Context;
use api::{
    build_monitor, build_store, init_logging, init_metrics, run_server, wait_for_escalation, AppConfig,
    AppState,
};
use monitor::{spawn_monitor_loops, SyntheticFeed};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).or_else(|| std::env::var("VIGIL_CONFIG").ok());
    let config = AppConfig::load(path.as_deref()).context("loading configuration")?;
    init_logging(&config.logging);
    config.validate().context("invalid configuration")?;

    info!("=== Vigil v{} ===", env!("CARGO_PKG_VERSION"));
    let prometheus = init_metrics();

    let store = build_store(&config.storage).await?;
    let monitor = build_monitor(&config, store.clone())?;

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    tracker.spawn(monitor.dispatcher().clone().run(cancel.clone()));
    spawn_monitor_loops(monitor.clone(), &tracker, cancel.clone());
    if config.monitor.synthetic_mode {
        let feed = SyntheticFeed::new(
            store,
            config.monitor.keys.clone(),
            Duration::from_secs(config.monitor.tick_interval_secs),
        );
        tracker.spawn(feed.run(cancel.clone()));
    }

    let listener = tokio::net::TcpListener::bind(config.socket_addr()?)
        .await
        .context("binding API listener")?;
    let state = Arc::new(AppState::new(monitor.clone(), prometheus));
    let server = tokio::spawn(run_server(listener, state, cancel.clone()));

    let escalated = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            false
        }
        _ = wait_for_escalation(monitor.dispatcher().health()) => {
            error!("Dispatcher escalated after repeated delivery failures, stopping for restart");
            true
        }
    };

    cancel.cancel();
    tracker.close();
    tracker.wait().await;
    server.await?.context("API server failed")?;

    if escalated {
        anyhow::bail!("notification delivery escalated");
    }
    info!("Vigil stopped");
    Ok(())
}
