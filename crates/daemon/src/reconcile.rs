// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconcile loop.
//!
//! One logical worker drains three input sources (the reconcile inbox,
//! the retry timer, and the supervisor's exit channel) and is the sole
//! writer of the epoch table. A reconcile pass snapshots the
//! environment, renders, compares fingerprints, and on change swaps in
//! a new proxy epoch: the new epoch is Running before any predecessor
//! is asked to drain, so there is always overlap, never a gap.
//!
//! Failure policy lives here and nowhere else: transient failures burn
//! the retry budget and back off; permanent generator failures leave
//! the running epoch intact; a crash of the current epoch re-applies
//! the cached artifact. The budget replenishes when an epoch stays
//! Running through the stabilization delay.

use crate::environment::EnvironmentSource;
use crate::generator::Generator;
use crate::materialize;
use crate::metrics::AgentMetrics;
use crate::supervisor::{ProxyHandle, Supervisor};
use drover_core::{
    AgentConfig, Backoff, Clock, ConfigArtifact, Epoch, EpochError, EpochRecord, EpochStatus,
    EpochTable, NodeIdentity, ProxyExit, RenderError, Rendered, TokenBucket,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Fatal reconcile outcomes. Everything transient is absorbed by the
/// retry budget; these two end the agent.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("retry budget of {budget} exhausted: {last_error}")]
    BudgetExhausted { budget: u32, last_error: String },
    #[error("epoch table invariant violated: {0}")]
    Table(#[from] EpochError),
}

/// Posting side of the reconcile inbox.
///
/// The channel has depth 1 and `request` never blocks: notifications
/// arriving while one is already queued coalesce into a single pass.
#[derive(Clone)]
pub struct ReconcileHandle {
    tx: mpsc::Sender<()>,
}

impl ReconcileHandle {
    /// Signal that the environment may have changed.
    pub fn request(&self) {
        let _ = self.tx.try_send(());
    }
}

/// The epoch currently expected to be serving.
struct CurrentEpoch {
    epoch: Epoch,
    artifact: ConfigArtifact,
    /// Set once the epoch survives the stabilization delay; decides
    /// whether an exit is a startup failure or a crash.
    stable: bool,
}

/// The per-node reconciler. Owns the epoch table, the supervisor, and
/// all retry state; see the module docs for the loop structure.
pub struct Agent<C: Clock> {
    config: AgentConfig,
    node: NodeIdentity,
    generator: Generator,
    environment: Arc<dyn EnvironmentSource>,
    supervisor: Supervisor,
    table: EpochTable,
    handles: HashMap<Epoch, ProxyHandle>,
    inbox_rx: mpsc::Receiver<()>,
    exit_rx: mpsc::Receiver<ProxyExit>,
    limiter: TokenBucket<C>,
    backoff: Backoff,
    budget_left: u32,
    crashes: u32,
    current: Option<CurrentEpoch>,
    pending: bool,
    /// Wakeup for a rate-limited pass already reserved.
    gate: Option<Instant>,
    /// Wakeup for a back-off retry.
    retry_at: Option<Instant>,
    /// Wakeup that declares the current epoch stable.
    stabilize_at: Option<Instant>,
    cancel: CancellationToken,
    metrics: AgentMetrics,
}

async fn sleep_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl<C: Clock> Agent<C> {
    pub fn new(
        config: AgentConfig,
        generator: Generator,
        environment: Arc<dyn EnvironmentSource>,
        clock: C,
        cancel: CancellationToken,
    ) -> (Self, ReconcileHandle) {
        let (inbox_tx, inbox_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = mpsc::channel(32);
        let supervisor = Supervisor::new(&config, exit_tx, cancel.child_token());
        let limiter = TokenBucket::new(config.rate_limit.rate, config.rate_limit.burst, clock);
        let backoff = Backoff::new(config.retry_initial_delay, config.retry_max_delay);
        let budget_left = config.retry_budget;
        let node = config.node_identity();

        let agent = Self {
            config,
            node,
            generator,
            environment,
            supervisor,
            table: EpochTable::new(),
            handles: HashMap::new(),
            inbox_rx,
            exit_rx,
            limiter,
            backoff,
            budget_left,
            crashes: 0,
            current: None,
            pending: false,
            gate: None,
            retry_at: None,
            stabilize_at: None,
            cancel,
            metrics: AgentMetrics::default(),
        };
        (agent, ReconcileHandle { tx: inbox_tx })
    }

    /// Drive the agent until cancellation or a fatal error. Either way
    /// every live epoch is stopped before this returns.
    pub async fn run(mut self) -> Result<AgentMetrics, ReconcileError> {
        let swept = materialize::sweep(&self.config.config_dir);
        if swept > 0 {
            tracing::info!(
                swept,
                dir = %self.config.config_dir.display(),
                "removed stale artifacts from prior run"
            );
        }

        let outcome = self.event_loop().await;
        self.shutdown().await;
        tracing::info!(metrics = ?self.metrics, "agent stopped");
        outcome.map(|()| self.metrics)
    }

    async fn event_loop(&mut self) -> Result<(), ReconcileError> {
        loop {
            let gate = self.gate;
            let retry_at = self.retry_at;
            let stabilize_at = self.stabilize_at;

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                Some(exit) = self.exit_rx.recv() => {
                    self.handle_exit(exit).await?;
                }
                Some(()) = self.inbox_rx.recv() => {
                    self.pending = true;
                    self.try_reconcile().await?;
                }
                _ = sleep_opt(gate), if gate.is_some() => {
                    self.gate = None;
                    self.reconcile_now().await?;
                }
                _ = sleep_opt(retry_at), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.pending = true;
                    self.try_reconcile().await?;
                }
                _ = sleep_opt(stabilize_at), if stabilize_at.is_some() => {
                    self.stabilize_at = None;
                    self.mark_stabilized();
                }
            }
        }
    }

    /// Run a pass now if a token is available, otherwise schedule one
    /// wakeup at next-token time. Requests behind a scheduled wakeup
    /// coalesce into it.
    async fn try_reconcile(&mut self) -> Result<(), ReconcileError> {
        if !self.pending {
            return Ok(());
        }
        if self.gate.is_some() {
            return Ok(());
        }
        let wait = self.limiter.reserve();
        if wait.is_zero() {
            self.reconcile_now().await
        } else {
            self.metrics.deferred += 1;
            self.gate = Some(Instant::now() + wait);
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, deferring reconcile");
            Ok(())
        }
    }

    /// One full pass: snapshot, render, compare, possibly swap.
    async fn reconcile_now(&mut self) -> Result<(), ReconcileError> {
        self.pending = false;
        self.metrics.passes += 1;

        let snapshot = self.environment.snapshot().await;
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return self.transient_failure("environment snapshot failed", &e.to_string());
            }
        };

        let rendered = (self.generator)(&snapshot, &self.node);
        let rendered = match rendered {
            Ok(rendered) => rendered,
            Err(RenderError::Transient(reason)) => {
                return self.transient_failure("generator failed", &reason);
            }
            Err(RenderError::Permanent(reason)) => {
                self.metrics.permanent_failures += 1;
                tracing::error!(
                    error = %reason,
                    epoch = self.current_epoch(),
                    "permanent generator failure; running epoch left intact"
                );
                return Ok(());
            }
        };

        if let Some(current) = &self.current {
            if current.artifact.fingerprint == rendered.fingerprint {
                self.metrics.unchanged += 1;
                tracing::debug!(
                    epoch = current.epoch,
                    fingerprint = %rendered.fingerprint,
                    "configuration unchanged"
                );
                return Ok(());
            }
        }

        self.apply(rendered).await
    }

    /// Steps 4-8 of a pass: allocate, materialize, spawn, drain
    /// predecessors, update the active-epoch pointer. Also the re-entry
    /// point for re-applying a cached artifact after a crash.
    async fn apply(&mut self, rendered: Rendered) -> Result<(), ReconcileError> {
        let epoch = self.table.allocate();
        let artifact = match materialize::materialize(&self.config.config_dir, epoch, &rendered) {
            Ok(artifact) => artifact,
            // The issued id is skipped, never reused.
            Err(e) => return self.transient_failure("artifact materialization failed", &e.to_string()),
        };

        self.table.insert(EpochRecord::starting(epoch, artifact.clone()))?;

        let handle = match self.supervisor.start(epoch, &artifact) {
            Ok(handle) => handle,
            Err(e) => {
                self.table.transition(epoch, EpochStatus::Failed { reason: e.to_string() })?;
                self.cleanup(epoch);
                return self.transient_failure("proxy spawn failed", &e.to_string());
            }
        };
        self.table.set_pid(epoch, handle.pid)?;

        // The proxy's hot-restart protocol guarantees a newer instance
        // takes over bindings; readiness is externally observable, so
        // Running is recorded immediately.
        self.table.transition(epoch, EpochStatus::Running)?;
        self.metrics.epochs_started += 1;

        // Hitless handover: predecessors drain only once the new epoch
        // is Running.
        let predecessors: Vec<Epoch> = self
            .table
            .active()
            .into_iter()
            .filter(|e| *e < epoch && self.table.status(*e) == Some(&EpochStatus::Running))
            .collect();
        for prior in predecessors {
            self.table.transition(prior, EpochStatus::Draining)?;
            if let Some(prior_handle) = self.handles.get(&prior) {
                self.supervisor.stop(prior_handle, true).await;
            }
        }

        self.handles.insert(epoch, handle);
        let fingerprint = artifact.fingerprint;
        self.current = Some(CurrentEpoch { epoch, artifact, stable: false });
        self.stabilize_at = Some(Instant::now() + self.config.stabilization_delay);

        tracing::info!(
            epoch,
            fingerprint = %fingerprint,
            retries = self.retries_consumed(),
            "proxy reconfigured"
        );
        Ok(())
    }

    /// Route an exit report from the supervisor.
    async fn handle_exit(&mut self, exit: ProxyExit) -> Result<(), ReconcileError> {
        self.handles.remove(&exit.epoch);

        let is_current = self.current.as_ref().is_some_and(|c| c.epoch == exit.epoch);
        if !is_current {
            if self.table.status(exit.epoch) == Some(&EpochStatus::Draining) {
                self.table.transition(
                    exit.epoch,
                    EpochStatus::Exited { code: exit.code, signal: exit.signal },
                )?;
            }
            tracing::info!(
                epoch = exit.epoch,
                code = ?exit.code,
                signal = ?exit.signal,
                "superseded proxy epoch exited"
            );
            self.cleanup(exit.epoch);
            return Ok(());
        }

        let Some(current) = self.current.take() else {
            return Ok(());
        };
        self.stabilize_at = None;

        if !current.stable {
            // Startup-window exit: the active configuration itself is
            // considered broken.
            self.metrics.startup_crashes += 1;
            self.table.transition(
                exit.epoch,
                EpochStatus::Failed {
                    reason: format!("startup crash (code={:?}, signal={:?})", exit.code, exit.signal),
                },
            )?;
            self.cleanup(exit.epoch);
            tracing::warn!(
                epoch = exit.epoch,
                code = ?exit.code,
                signal = ?exit.signal,
                "proxy exited during startup window"
            );
            // The fingerprint gate is already clear (`current` is None),
            // so the retry re-applies the current environment snapshot.
            self.transient_failure("proxy startup crash", &exit.to_string())
        } else {
            self.metrics.crashes += 1;
            self.crashes += 1;
            self.table.transition(
                exit.epoch,
                EpochStatus::Exited { code: exit.code, signal: exit.signal },
            )?;
            self.cleanup(exit.epoch);
            tracing::warn!(
                epoch = exit.epoch,
                code = ?exit.code,
                signal = ?exit.signal,
                crashes = self.crashes,
                "proxy crashed after stabilization, re-applying configuration"
            );
            self.consume_budget("proxy crashed", &exit.to_string())?;
            // Deterministic recovery: the identical bytes, a new epoch.
            self.apply(current.artifact.to_rendered()).await
        }
    }

    fn mark_stabilized(&mut self) {
        let Some(current) = &mut self.current else { return };
        if current.stable {
            return;
        }
        current.stable = true;
        self.budget_left = self.config.retry_budget;
        self.crashes = 0;
        self.backoff.reset();
        tracing::info!(epoch = current.epoch, "proxy epoch stabilized, retry budget replenished");
    }

    /// Burn one unit of retry budget; fatal when it runs out.
    fn consume_budget(&mut self, what: &str, reason: &str) -> Result<(), ReconcileError> {
        self.budget_left = self.budget_left.saturating_sub(1);
        if self.budget_left == 0 {
            tracing::error!(
                error = reason,
                context = what,
                epoch = self.current_epoch(),
                fingerprint = ?self.current.as_ref().map(|c| c.artifact.fingerprint.short()),
                retries = self.retries_consumed(),
                budget = self.config.retry_budget,
                "retry budget exhausted"
            );
            return Err(ReconcileError::BudgetExhausted {
                budget: self.config.retry_budget,
                last_error: format!("{what}: {reason}"),
            });
        }
        Ok(())
    }

    /// Budget-consuming failure with a back-off retry.
    fn transient_failure(&mut self, what: &str, reason: &str) -> Result<(), ReconcileError> {
        self.consume_budget(what, reason)?;
        let delay = self.backoff.next_delay();
        self.retry_at = Some(Instant::now() + delay);
        self.metrics.retries += 1;
        tracing::warn!(
            error = reason,
            context = what,
            epoch = self.current_epoch(),
            fingerprint = ?self.current.as_ref().map(|c| c.artifact.fingerprint.short()),
            retries = self.retries_consumed(),
            delay_ms = delay.as_millis() as u64,
            budget_left = self.budget_left,
            "reconcile failed, retry scheduled"
        );
        Ok(())
    }

    /// Unlink the artifact of a terminal epoch and prune the table.
    fn cleanup(&mut self, epoch: Epoch) {
        if let Some(record) = self.table.get(epoch) {
            if record.status.is_terminal() {
                materialize::unlink(&record.artifact.path);
            }
        }
        let pruned = self.table.prune();
        if !pruned.is_empty() {
            self.metrics.pruned += pruned.len() as u64;
            tracing::debug!(?pruned, "pruned terminal epochs");
        }
    }

    fn current_epoch(&self) -> Option<Epoch> {
        self.current.as_ref().map(|c| c.epoch)
    }

    fn retries_consumed(&self) -> u32 {
        self.config.retry_budget.saturating_sub(self.budget_left)
    }

    /// Graceful teardown: stop accepting work, drain every live epoch,
    /// bound the whole thing by `parent_shutdown_duration`.
    async fn shutdown(&mut self) {
        // Also covers the fatal path, where the token was never
        // cancelled: watchers must not outlive the agent.
        self.cancel.cancel();
        self.inbox_rx.close();
        self.pending = false;

        let active = self.table.active();
        if !active.is_empty() {
            tracing::info!(count = active.len(), "stopping active proxy epochs");
        }
        for epoch in active {
            if self.table.status(epoch) == Some(&EpochStatus::Running) {
                if let Err(e) = self.table.transition(epoch, EpochStatus::Draining) {
                    tracing::error!(epoch, error = %e, "shutdown transition failed");
                }
            }
            if let Some(handle) = self.handles.get(&epoch) {
                self.supervisor.stop(handle, true).await;
            }
        }

        let deadline = Instant::now() + self.config.parent_shutdown_duration;
        while !self.table.active().is_empty() {
            tokio::select! {
                Some(exit) = self.exit_rx.recv() => self.record_shutdown_exit(exit),
                _ = tokio::time::sleep_until(deadline) => {
                    let survivors = self.table.active();
                    tracing::warn!(?survivors, "graceful shutdown deadline passed, killing survivors");
                    for epoch in &survivors {
                        if let Some(handle) = self.handles.get(epoch) {
                            self.supervisor.stop(handle, false).await;
                        }
                    }
                    // Brief grace for the kills to be reaped.
                    let grace = Instant::now() + Duration::from_millis(500);
                    while !self.table.active().is_empty() {
                        tokio::select! {
                            Some(exit) = self.exit_rx.recv() => self.record_shutdown_exit(exit),
                            _ = tokio::time::sleep_until(grace) => return,
                        }
                    }
                    return;
                }
            }
        }
    }

    fn record_shutdown_exit(&mut self, exit: ProxyExit) {
        self.handles.remove(&exit.epoch);
        if self.table.status(exit.epoch) == Some(&EpochStatus::Draining) {
            if let Err(e) = self
                .table
                .transition(exit.epoch, EpochStatus::Exited { code: exit.code, signal: exit.signal })
            {
                tracing::error!(epoch = exit.epoch, error = %e, "shutdown transition failed");
            }
        }
        self.cleanup(exit.epoch);
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
