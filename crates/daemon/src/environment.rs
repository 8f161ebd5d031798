// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment model: what the agent reads, never writes.
//!
//! A [`MeshSnapshot`] is a point-in-time view of the discovery data the
//! generator renders from: host-local workload instances, the service
//! catalog, management ports, and the mesh-wide config record. Sources
//! are read-only from the agent's perspective; snapshot failures are
//! retried by the reconcile loop as transient.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A workload instance co-located on this node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadInstance {
    pub service: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A named port on a catalog service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPort {
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: String,
}

/// One service in the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub hostname: String,
    #[serde(default)]
    pub ports: Vec<NamedPort>,
}

/// Point-in-time view of the environment the generator renders from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSnapshot {
    pub instances: Vec<WorkloadInstance>,
    pub services: Vec<ServiceEntry>,
    pub management_ports: Vec<u16>,
    /// Mesh-wide config record, opaque key-value pairs.
    pub mesh: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("failed to read environment snapshot {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode environment snapshot: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Read-only source of environment snapshots.
#[async_trait]
pub trait EnvironmentSource: Send + Sync {
    async fn snapshot(&self) -> Result<MeshSnapshot, EnvironmentError>;
}

/// File-backed source: a JSON snapshot maintained by an external
/// discovery client. The file is re-read on every snapshot call.
pub struct FileEnvironment {
    path: PathBuf,
}

impl FileEnvironment {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl EnvironmentSource for FileEnvironment {
    async fn snapshot(&self) -> Result<MeshSnapshot, EnvironmentError> {
        let raw = tokio::fs::read(&self.path).await.map_err(|source| EnvironmentError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// In-memory source for embedding and tests. Clones share the snapshot.
#[derive(Clone, Default)]
pub struct MemoryEnvironment {
    snapshot: Arc<Mutex<MeshSnapshot>>,
}

impl MemoryEnvironment {
    pub fn new(snapshot: MeshSnapshot) -> Self {
        Self { snapshot: Arc::new(Mutex::new(snapshot)) }
    }

    /// Replace the snapshot; the next reconcile pass observes it.
    pub fn set(&self, snapshot: MeshSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    /// Mutate the snapshot in place.
    pub fn update(&self, f: impl FnOnce(&mut MeshSnapshot)) {
        f(&mut self.snapshot.lock());
    }
}

#[async_trait]
impl EnvironmentSource for MemoryEnvironment {
    async fn snapshot(&self) -> Result<MeshSnapshot, EnvironmentError> {
        Ok(self.snapshot.lock().clone())
    }
}

#[cfg(test)]
#[path = "environment_tests.rs"]
mod tests;
