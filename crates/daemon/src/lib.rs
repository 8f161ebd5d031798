// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-daemon: the proxy configuration agent.
//!
//! `droverd` keeps one data-plane proxy process per node in sync with
//! configuration rendered from the service-discovery environment. Change
//! notifications are debounced into epoch-stamped reconfigurations; each
//! epoch is materialized atomically on disk and hot-swapped into the
//! running proxy with hitless overlap. Crashes are retried against a
//! bounded budget.

pub mod env;
pub mod environment;
pub mod generator;
pub mod materialize;
pub mod metrics;
pub mod reconcile;
pub mod supervisor;

pub use environment::{
    EnvironmentError, EnvironmentSource, FileEnvironment, MemoryEnvironment, MeshSnapshot,
    NamedPort, ServiceEntry, WorkloadInstance,
};
pub use generator::{bootstrap_generator, Generator};
pub use metrics::AgentMetrics;
pub use reconcile::{Agent, ReconcileError, ReconcileHandle};
pub use supervisor::{ProxyHandle, SpawnError, Supervisor};
