// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The generator seam.
//!
//! The agent treats config generation as a pure function value injected
//! at construction: `(snapshot, node) -> rendered bytes`. It never
//! inspects the payload; equality is decided by fingerprint alone.
//!
//! [`bootstrap_generator`] is the stock generator shipped with the
//! daemon. It renders a canonical proxy bootstrap: key order is fixed by
//! the serde structs and every collection is sorted before serializing,
//! so byte-equal snapshots always produce byte-equal payloads.

use crate::environment::{MeshSnapshot, ServiceEntry, WorkloadInstance};
use drover_core::{AgentConfig, NodeIdentity, RenderError, Rendered};
use serde::Serialize;
use std::sync::Arc;

/// Pure render function injected into the agent.
pub type Generator =
    Arc<dyn Fn(&MeshSnapshot, &NodeIdentity) -> Result<Rendered, RenderError> + Send + Sync>;

#[derive(Serialize)]
struct Bootstrap {
    admin: Admin,
    node: Node,
    discovery: Discovery,
    drain: Drain,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats_sink: Option<StatsSink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<Tls>,
    listeners: Vec<Listener>,
    clusters: Vec<Cluster>,
    management_ports: Vec<u16>,
    mesh: std::collections::BTreeMap<String, String>,
}

#[derive(Serialize)]
struct Admin {
    address: String,
}

#[derive(Serialize)]
struct Node {
    cluster: String,
    id: String,
}

#[derive(Serialize)]
struct Discovery {
    address: String,
    refresh_delay_ms: u64,
    connect_timeout_ms: u64,
}

#[derive(Serialize)]
struct Drain {
    drain_time_s: u64,
    parent_shutdown_time_s: u64,
}

#[derive(Serialize)]
struct StatsSink {
    kind: &'static str,
    address: String,
}

#[derive(Serialize)]
struct Tls {
    cert_chain: String,
    private_key: String,
    root_cert: String,
}

#[derive(Serialize)]
struct Listener {
    service: String,
    address: String,
    port: u16,
}

#[derive(Serialize)]
struct Cluster {
    hostname: String,
    ports: Vec<u16>,
}

fn listeners(instances: &[WorkloadInstance]) -> Vec<Listener> {
    let mut out: Vec<Listener> = instances
        .iter()
        .map(|i| Listener { service: i.service.clone(), address: i.address.clone(), port: i.port })
        .collect();
    out.sort_by(|a, b| (&a.service, &a.address, a.port).cmp(&(&b.service, &b.address, b.port)));
    out
}

fn clusters(services: &[ServiceEntry]) -> Vec<Cluster> {
    let mut out: Vec<Cluster> = services
        .iter()
        .map(|s| {
            let mut ports: Vec<u16> = s.ports.iter().map(|p| p.port).collect();
            ports.sort_unstable();
            Cluster { hostname: s.hostname.clone(), ports }
        })
        .collect();
    out.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    out
}

/// The stock generator: canonical bootstrap JSON from snapshot + config.
pub fn bootstrap_generator(config: &AgentConfig) -> Generator {
    let admin_port = config.proxy_admin_port;
    let discovery = Discovery {
        address: config.discovery_address.clone(),
        refresh_delay_ms: config.discovery_refresh_delay.as_millis() as u64,
        connect_timeout_ms: config.connect_timeout.as_millis() as u64,
    };
    let drain = Drain {
        drain_time_s: config.drain_duration.as_secs(),
        parent_shutdown_time_s: config.parent_shutdown_duration.as_secs(),
    };
    let statsd = config.statsd_address.clone();
    let certs = config.cert_paths();

    Arc::new(move |snapshot: &MeshSnapshot, node: &NodeIdentity| {
        let mut management_ports = snapshot.management_ports.clone();
        management_ports.sort_unstable();
        management_ports.dedup();

        let bootstrap = Bootstrap {
            admin: Admin { address: format!("tcp://127.0.0.1:{admin_port}") },
            node: Node { cluster: node.service_cluster.clone(), id: node.service_node.clone() },
            discovery: Discovery {
                address: discovery.address.clone(),
                refresh_delay_ms: discovery.refresh_delay_ms,
                connect_timeout_ms: discovery.connect_timeout_ms,
            },
            drain: Drain {
                drain_time_s: drain.drain_time_s,
                parent_shutdown_time_s: drain.parent_shutdown_time_s,
            },
            stats_sink: statsd
                .as_ref()
                .map(|address| StatsSink { kind: "statsd", address: address.clone() }),
            tls: certs.as_ref().map(|c| Tls {
                cert_chain: c.cert_chain.display().to_string(),
                private_key: c.private_key.display().to_string(),
                root_cert: c.root_cert.display().to_string(),
            }),
            listeners: listeners(&snapshot.instances),
            clusters: clusters(&snapshot.services),
            management_ports,
            mesh: snapshot.mesh.clone(),
        };

        let payload = serde_json::to_vec_pretty(&bootstrap)
            .map_err(|e| RenderError::Permanent(format!("bootstrap serialization: {e}")))?;
        Ok(Rendered::new(payload))
    })
}

#[cfg(test)]
#[path = "generator_tests.rs"]
mod tests;
