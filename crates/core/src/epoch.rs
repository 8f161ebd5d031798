// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Epoch records and the epoch table.
//!
//! An epoch is one generation of the managed proxy process. The table
//! issues strictly increasing epoch ids, tracks the per-epoch status
//! state machine, and prunes terminal records once their on-disk
//! artifacts are gone. The reconcile worker is the only writer; the
//! table lives on the agent instance, never in process-wide state.

use crate::artifact::ConfigArtifact;
use std::collections::BTreeMap;

/// A single generation of the managed proxy, identified by an
/// increasing integer. Ids start at 0 and are never reused within a
/// process lifetime.
pub type Epoch = u64;

/// Per-epoch lifecycle status.
///
/// ```text
/// Starting ──success──► Running ──supersede──► Draining ──exit──► Exited
///     │                    │
///     └─fail─► Failed      └─crash─► Exited | Failed
/// ```
///
/// `Running → Failed` is reserved for a crash inside the startup window,
/// where the active configuration itself is considered broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpochStatus {
    /// Process launched, not yet confirmed up.
    Starting,
    /// Serving; all earlier epochs are draining or terminal.
    Running,
    /// Superseded; finishing in-flight connections.
    Draining,
    /// Process exited (terminal).
    Exited { code: Option<i32>, signal: Option<i32> },
    /// Launch or startup failed (terminal).
    Failed { reason: String },
}

impl EpochStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EpochStatus::Exited { .. } | EpochStatus::Failed { .. })
    }

    /// Whether the state machine admits `self → next`.
    fn admits(&self, next: &EpochStatus) -> bool {
        use EpochStatus::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Failed { .. })
                | (Running, Draining)
                | (Running, Exited { .. })
                | (Running, Failed { .. })
                | (Draining, Exited { .. })
        )
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            EpochStatus::Starting => "starting",
            EpochStatus::Running => "running",
            EpochStatus::Draining => "draining",
            EpochStatus::Exited { .. } => "exited",
            EpochStatus::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for EpochStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpochStatus::Exited { code, signal } => {
                write!(f, "exited(code={:?}, signal={:?})", code, signal)
            }
            EpochStatus::Failed { reason } => write!(f, "failed({})", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// One tracked proxy generation: id, its artifact, the child pid while
/// known, and the lifecycle status.
#[derive(Debug, Clone)]
pub struct EpochRecord {
    pub epoch: Epoch,
    pub artifact: ConfigArtifact,
    pub pid: Option<u32>,
    pub status: EpochStatus,
}

impl EpochRecord {
    /// A fresh record in `Starting`, the only state `insert` accepts.
    pub fn starting(epoch: Epoch, artifact: ConfigArtifact) -> Self {
        Self { epoch, artifact, pid: None, status: EpochStatus::Starting }
    }
}

/// Epoch table violations. These are programmer errors in the reconcile
/// worker, not user errors; the agent treats them as fatal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EpochError {
    #[error("epoch {0} not in table")]
    Unknown(Epoch),
    #[error("epoch {epoch}: illegal transition {from} -> {to}")]
    IllegalTransition { epoch: Epoch, from: String, to: String },
    #[error("epoch {0}: record must be inserted in Starting")]
    NotStarting(Epoch),
    #[error("epoch {epoch} cannot start while epoch {starting} is still starting")]
    AlreadyStarting { epoch: Epoch, starting: Epoch },
    #[error("epoch {0} already recorded")]
    Duplicate(Epoch),
    #[error("epoch {0} was never issued")]
    NotIssued(Epoch),
}

/// Tracks live proxy epochs and enforces monotonic epoch ids.
#[derive(Debug, Default)]
pub struct EpochTable {
    next: Epoch,
    records: BTreeMap<Epoch, EpochRecord>,
}

impl EpochTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next epoch id. Ids are never reused, even when the
    /// reconcile that requested one fails before inserting a record.
    pub fn allocate(&mut self) -> Epoch {
        let epoch = self.next;
        self.next += 1;
        epoch
    }

    /// Store a new record. The record must be `Starting`, its id must
    /// have been issued by `allocate`, and at most one epoch may be
    /// starting at any time.
    pub fn insert(&mut self, record: EpochRecord) -> Result<(), EpochError> {
        if record.status != EpochStatus::Starting {
            return Err(EpochError::NotStarting(record.epoch));
        }
        if record.epoch >= self.next {
            return Err(EpochError::NotIssued(record.epoch));
        }
        if self.records.contains_key(&record.epoch) {
            return Err(EpochError::Duplicate(record.epoch));
        }
        if let Some(starting) = self
            .records
            .values()
            .find(|r| r.status == EpochStatus::Starting)
        {
            return Err(EpochError::AlreadyStarting {
                epoch: record.epoch,
                starting: starting.epoch,
            });
        }
        self.records.insert(record.epoch, record);
        Ok(())
    }

    /// Apply a status transition, asserting it is legal.
    pub fn transition(&mut self, epoch: Epoch, status: EpochStatus) -> Result<(), EpochError> {
        let record = self.records.get_mut(&epoch).ok_or(EpochError::Unknown(epoch))?;
        if !record.status.admits(&status) {
            return Err(EpochError::IllegalTransition {
                epoch,
                from: record.status.to_string(),
                to: status.to_string(),
            });
        }
        record.status = status;
        Ok(())
    }

    /// Record the child pid once the supervisor has launched the epoch.
    pub fn set_pid(&mut self, epoch: Epoch, pid: Option<u32>) -> Result<(), EpochError> {
        let record = self.records.get_mut(&epoch).ok_or(EpochError::Unknown(epoch))?;
        record.pid = pid;
        Ok(())
    }

    pub fn get(&self, epoch: Epoch) -> Option<&EpochRecord> {
        self.records.get(&epoch)
    }

    pub fn status(&self, epoch: Epoch) -> Option<&EpochStatus> {
        self.records.get(&epoch).map(|r| &r.status)
    }

    /// Epochs in non-terminal status, oldest first.
    pub fn active(&self) -> Vec<Epoch> {
        self.records
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.epoch)
            .collect()
    }

    /// Remove terminal records whose artifact files have been unlinked.
    /// Returns the pruned epoch ids.
    pub fn prune(&mut self) -> Vec<Epoch> {
        let doomed: Vec<Epoch> = self
            .records
            .values()
            .filter(|r| r.status.is_terminal() && !r.artifact.path.exists())
            .map(|r| r.epoch)
            .collect();
        for epoch in &doomed {
            self.records.remove(epoch);
        }
        doomed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &EpochRecord> {
        self.records.values()
    }
}

#[cfg(test)]
#[path = "epoch_tests.rs"]
mod tests;
