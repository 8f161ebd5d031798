// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconcile outcome counters.
//!
//! Owned by the reconcile worker, so plain integers suffice. Returned
//! from [`crate::reconcile::Agent::run`] and included in the shutdown
//! summary log line.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentMetrics {
    /// Reconcile passes that ran (post rate-limit).
    pub passes: u64,
    /// Passes that matched the current fingerprint and did nothing.
    pub unchanged: u64,
    /// Epochs that reached Running.
    pub epochs_started: u64,
    /// Reconcile requests deferred to a rate-limit wakeup.
    pub deferred: u64,
    /// Back-off retries scheduled for transient failures.
    pub retries: u64,
    /// Permanent generator failures (never retried).
    pub permanent_failures: u64,
    /// Exits of the current epoch inside the startup window.
    pub startup_crashes: u64,
    /// Exits of the current epoch after stabilization.
    pub crashes: u64,
    /// Terminal records removed from the epoch table.
    pub pruned: u64,
}
