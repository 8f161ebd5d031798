// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proxy process supervision.
//!
//! One watcher task per live child. The watcher owns the `Child`, is
//! attached before `start` returns (an exit can never be lost), and is
//! write-only onto the shared exit channel; policy decisions stay with
//! the reconcile worker. Graceful stop sends SIGTERM to request drain
//! and escalates to SIGKILL once `parent_shutdown_duration` passes.

use drover_core::{AgentConfig, ConfigArtifact, Epoch, NodeIdentity, ProxyExit};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Launch failure. The agent counts this against the retry budget.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn proxy binary {binary} for epoch {epoch}: {source}")]
    Spawn {
        binary: String,
        epoch: Epoch,
        #[source]
        source: std::io::Error,
    },
}

enum StopMode {
    Graceful,
    Forced,
}

/// Handle to a launched proxy epoch. Dropping it does not stop the
/// child; the watcher keeps running until the process exits.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    pub epoch: Epoch,
    pub pid: Option<u32>,
    stop_tx: mpsc::Sender<StopMode>,
}

impl std::fmt::Debug for StopMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StopMode::Graceful => "graceful",
            StopMode::Forced => "forced",
        })
    }
}

/// Launches and terminates proxy epoch instances.
pub struct Supervisor {
    binary: PathBuf,
    node: NodeIdentity,
    drain: Duration,
    parent_shutdown: Duration,
    exit_tx: mpsc::Sender<ProxyExit>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(config: &AgentConfig, exit_tx: mpsc::Sender<ProxyExit>, cancel: CancellationToken) -> Self {
        Self {
            binary: config.proxy_binary.clone(),
            node: config.node_identity(),
            drain: config.drain_duration,
            parent_shutdown: config.parent_shutdown_duration,
            exit_tx,
            cancel,
        }
    }

    /// CLI arguments for one proxy epoch.
    pub fn command_args(&self, epoch: Epoch, artifact_path: &Path) -> Vec<String> {
        vec![
            "-c".to_string(),
            artifact_path.display().to_string(),
            "--restart-epoch".to_string(),
            epoch.to_string(),
            "--drain-time-s".to_string(),
            self.drain.as_secs().to_string(),
            "--parent-shutdown-time-s".to_string(),
            self.parent_shutdown.as_secs().to_string(),
            "--service-cluster".to_string(),
            self.node.service_cluster.clone(),
            "--service-node".to_string(),
            self.node.service_node.clone(),
        ]
    }

    /// Launch the proxy for `epoch`. Returns once fork+exec completed;
    /// readiness is not awaited here. The watcher task is attached
    /// before this returns.
    pub fn start(&self, epoch: Epoch, artifact: &ConfigArtifact) -> Result<ProxyHandle, SpawnError> {
        let mut command = Command::new(&self.binary);
        command.args(self.command_args(epoch, &artifact.path)).stdin(Stdio::null());

        let child = command.spawn().map_err(|source| SpawnError::Spawn {
            binary: self.binary.display().to_string(),
            epoch,
            source,
        })?;
        let pid = child.id();

        let (stop_tx, stop_rx) = mpsc::channel(2);
        tokio::spawn(watch(
            epoch,
            child,
            stop_rx,
            self.exit_tx.clone(),
            self.parent_shutdown,
            self.cancel.child_token(),
        ));

        tracing::info!(epoch, pid, "proxy epoch launched");
        Ok(ProxyHandle { epoch, pid, stop_tx })
    }

    /// Request termination. Graceful asks the child to drain and bounds
    /// the wait by `parent_shutdown_duration`; forced kills immediately.
    /// A no-op when the child has already exited.
    pub async fn stop(&self, handle: &ProxyHandle, graceful: bool) {
        let mode = if graceful { StopMode::Graceful } else { StopMode::Forced };
        tracing::debug!(epoch = handle.epoch, mode = ?mode, "stopping proxy epoch");
        // Fails only when the watcher is gone, i.e. the child exited.
        let _ = handle.stop_tx.send(mode).await;
    }
}

/// Ask the child to drain: SIGTERM now, SIGKILL at the deadline.
fn request_drain(
    epoch: Epoch,
    child: &Child,
    force_at: &mut Option<tokio::time::Instant>,
    parent_shutdown: Duration,
) {
    if force_at.is_some() {
        return; // already stopping
    }
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::warn!(epoch, pid, error = %e, "failed to signal proxy for drain");
        }
    }
    *force_at = Some(tokio::time::Instant::now() + parent_shutdown);
}

/// Per-child watcher. Owns the child, reaps it exactly once, and emits
/// the exit report onto the agent's exit channel.
async fn watch(
    epoch: Epoch,
    mut child: Child,
    mut stop_rx: mpsc::Receiver<StopMode>,
    exit_tx: mpsc::Sender<ProxyExit>,
    parent_shutdown: Duration,
    cancel: CancellationToken,
) {
    let mut force_at: Option<tokio::time::Instant> = None;
    let mut cancel_seen = false;

    loop {
        let deadline = force_at;
        let force_timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            status = child.wait() => {
                let exit = match status {
                    Ok(status) => ProxyExit { epoch, code: status.code(), signal: status.signal() },
                    Err(e) => {
                        tracing::error!(epoch, error = %e, "failed to reap proxy child");
                        ProxyExit { epoch, code: None, signal: None }
                    }
                };
                tracing::debug!(epoch, code = ?exit.code, signal = ?exit.signal, "proxy epoch exited");
                let _ = exit_tx.send(exit).await;
                return;
            }
            Some(mode) = stop_rx.recv() => match mode {
                StopMode::Graceful => request_drain(epoch, &child, &mut force_at, parent_shutdown),
                StopMode::Forced => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(epoch, error = %e, "failed to kill proxy");
                    }
                }
            },
            _ = force_timer => {
                tracing::warn!(epoch, "drain deadline passed, killing proxy");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(epoch, error = %e, "failed to kill proxy");
                }
                force_at = None;
            }
            _ = cancel.cancelled(), if !cancel_seen => {
                // Backstop: agent teardown stops epochs explicitly, but a
                // watcher must never outlive a cancelled agent.
                cancel_seen = true;
                request_drain(epoch, &child, &mut force_at, parent_shutdown);
            }
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
