// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain values exchanged between the supervisor and the agent.

use crate::epoch::Epoch;
use serde::{Deserialize, Serialize};

/// Labels identifying this node to the proxy and the discovery service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub service_cluster: String,
    pub service_node: String,
}

/// Exit report emitted by a proxy watcher onto the agent's exit channel.
///
/// Carried as a plain value so the supervisor holds no reference back
/// into the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyExit {
    pub epoch: Epoch,
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ProxyExit {
    /// Exit code 0 with no signal; the only exit the agent treats as clean.
    pub fn is_clean(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }
}

impl std::fmt::Display for ProxyExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "epoch {} (code={:?}, signal={:?})", self.epoch, self.code, self.signal)
    }
}
