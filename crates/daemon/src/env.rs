// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Config file path: DROVER_CONFIG, falling back to /etc/drover/drover.toml
pub fn config_path() -> PathBuf {
    std::env::var("DROVER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/drover/drover.toml"))
}

/// Scratch directory override. Takes precedence over the config file so
/// operators can relocate artifacts without editing config.
pub fn scratch_dir() -> Option<PathBuf> {
    std::env::var("DROVER_SCRATCH_DIR").ok().map(PathBuf::from)
}

/// Environment snapshot file override for the file-backed source.
pub fn mesh_snapshot_path() -> Option<PathBuf> {
    std::env::var("DROVER_MESH_SNAPSHOT").ok().map(PathBuf::from)
}

/// Discovery polling cadence override, in milliseconds.
pub fn refresh_delay_override() -> Option<Duration> {
    std::env::var("DROVER_REFRESH_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Service-node fallback: the local hostname when the config leaves
/// `service_node` empty.
pub fn local_node_name() -> String {
    std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()).unwrap_or_else(|| "localhost".into())
}
