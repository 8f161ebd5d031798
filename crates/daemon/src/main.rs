// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! droverd: the proxy configuration agent daemon.
//!
//! Loads config, wires the file-backed environment source and the stock
//! bootstrap generator into the reconcile loop, polls discovery on a
//! ticker, and translates SIGTERM/SIGINT into graceful teardown.

use drover_core::{AgentConfig, ConfigError, SystemClock};
use drover_daemon::{bootstrap_generator, env, Agent, FileEnvironment, ReconcileError, ReconcileHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

fn load_config() -> Result<AgentConfig, ConfigError> {
    let path = env::config_path();
    let mut config = if path.exists() {
        AgentConfig::load(&path)?
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        AgentConfig::default()
    };

    if let Some(dir) = env::scratch_dir() {
        config.config_dir = dir;
    }
    if let Some(delay) = env::refresh_delay_override() {
        config.discovery_refresh_delay = delay;
    }
    if config.service_node.is_empty() {
        config.service_node = env::local_node_name();
    }
    config.validate()?;
    Ok(config)
}

/// Poll discovery at the configured cadence; each tick posts one
/// (coalescing) reconcile request.
fn spawn_discovery_ticker(refresh: Duration, handle: ReconcileHandle, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => handle.request(),
            }
        }
    });
}

fn spawn_signal_watcher(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
        cancel.cancel();
    });
}

async fn run() -> Result<(), DaemonError> {
    let config = load_config()?;
    tracing::info!(
        proxy = %config.proxy_binary.display(),
        scratch = %config.config_dir.display(),
        discovery = %config.discovery_address,
        cluster = %config.service_cluster,
        node = %config.service_node,
        "droverd starting"
    );

    let snapshot_path =
        env::mesh_snapshot_path().unwrap_or_else(|| config.config_dir.join("mesh.json"));
    let environment = Arc::new(FileEnvironment::new(snapshot_path));
    let generator = bootstrap_generator(&config);
    let cancel = CancellationToken::new();
    let refresh = config.discovery_refresh_delay;

    let (agent, handle) = Agent::new(config, generator, environment, SystemClock, cancel.clone());

    spawn_signal_watcher(cancel.clone());
    spawn_discovery_ticker(refresh, handle.clone(), cancel);

    // Kick the first reconcile immediately; the ticker sustains it.
    handle.request();

    let metrics = agent.run().await?;
    tracing::info!(?metrics, "droverd exited cleanly");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "droverd failed");
        std::process::exit(1);
    }
}
