// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

// Fixture helpers may panic; they never ship in default builds.
#![allow(clippy::panic)]

use crate::artifact::{ConfigArtifact, Rendered};
use crate::config::AgentConfig;
use crate::epoch::Epoch;
use std::path::Path;
use std::time::Duration;

// ── Proptest strategies ─────────────────────────────────────────────────

/// Proptest strategies for core domain types.
pub mod strategies {
    use crate::artifact::Rendered;
    use crate::epoch::EpochStatus;
    use proptest::prelude::*;

    pub fn arb_epoch_status() -> impl Strategy<Value = EpochStatus> {
        prop_oneof![
            Just(EpochStatus::Starting),
            Just(EpochStatus::Running),
            Just(EpochStatus::Draining),
            (any::<Option<i32>>(), any::<Option<i32>>())
                .prop_map(|(code, signal)| EpochStatus::Exited { code, signal }),
            "[a-z ]{1,24}".prop_map(|reason| EpochStatus::Failed { reason }),
        ]
    }

    pub fn arb_rendered() -> impl Strategy<Value = Rendered> {
        proptest::collection::vec(any::<u8>(), 0..256).prop_map(Rendered::new)
    }
}

// ── Fixture factory functions ───────────────────────────────────────────

/// A rendered payload with recognizable content per revision.
pub fn rendered_fixture(revision: u32) -> Rendered {
    Rendered::new(format!("{{\"revision\":{revision}}}").into_bytes())
}

/// An artifact whose file really exists under `dir`, named the way the
/// materializer names epoch files.
pub fn artifact_on_disk(dir: &Path, epoch: Epoch, rendered: &Rendered) -> ConfigArtifact {
    let path = dir.join(format!("envoy-rev{epoch}.json"));
    std::fs::write(&path, &rendered.payload).unwrap_or_else(|e| {
        panic!("failed to write artifact fixture {}: {e}", path.display());
    });
    ConfigArtifact::new(rendered, path)
}

/// Config tuned for tests: tight timings, tiny budget windows, and a
/// scratch dir under the caller's tempdir.
pub fn test_config(scratch: &Path) -> AgentConfig {
    AgentConfig {
        config_dir: scratch.to_path_buf(),
        service_cluster: "test-cluster".into(),
        service_node: "test-node".into(),
        discovery_refresh_delay: Duration::from_millis(10),
        connect_timeout: Duration::from_millis(100),
        drain_duration: Duration::from_millis(100),
        parent_shutdown_duration: Duration::from_millis(500),
        stabilization_delay: Duration::from_millis(50),
        retry_initial_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(10),
        rate_limit: crate::config::RateLimitConfig { rate: 1000.0, burst: 100 },
        ..AgentConfig::default()
    }
}
