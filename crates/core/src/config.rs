// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration model.
//!
//! Loaded from TOML; durations are written as strings ("45s", "1m").
//! Validation happens once at load so the reconcile loop never sees an
//! unusable config.

use crate::duration::serde_str;
use crate::proxy::NodeIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Token-bucket parameters gating reconcile passes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Tokens per second.
    pub rate: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { rate: 1.0, burst: 10 }
    }
}

/// Authentication mode the proxy is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPolicy {
    #[default]
    None,
    MutualTls,
}

/// Credential file locations under `auth_certs_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPaths {
    pub cert_chain: PathBuf,
    pub private_key: PathBuf,
    pub root_cert: PathBuf,
}

/// Full agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Proxy binary to launch for each epoch.
    pub proxy_binary: PathBuf,
    /// Scratch directory for materialized artifacts.
    pub config_dir: PathBuf,
    /// Service-cluster label passed to the proxy.
    pub service_cluster: String,
    /// Service-node label passed to the proxy. Empty means the daemon
    /// substitutes the local hostname at startup.
    pub service_node: String,
    /// UDP sink for proxy metrics, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statsd_address: Option<String>,
    /// TCP port for the proxy's own admin API.
    pub proxy_admin_port: u16,
    /// host:port of the upstream discovery service.
    pub discovery_address: String,
    /// Polling cadence hint for the discovery client.
    #[serde(with = "serde_str")]
    pub discovery_refresh_delay: Duration,
    /// Upstream dial deadline.
    #[serde(with = "serde_str")]
    pub connect_timeout: Duration,
    /// How long a draining epoch tolerates in-flight connections.
    #[serde(with = "serde_str")]
    pub drain_duration: Duration,
    /// Ceiling on graceful stop before forced termination.
    #[serde(with = "serde_str")]
    pub parent_shutdown_duration: Duration,
    /// Time in Running after which an exit counts as a crash rather
    /// than a startup failure; also replenishes the retry budget.
    #[serde(with = "serde_str")]
    pub stabilization_delay: Duration,
    /// First retry delay; doubles up to `retry_max_delay`.
    #[serde(with = "serde_str")]
    pub retry_initial_delay: Duration,
    #[serde(with = "serde_str")]
    pub retry_max_delay: Duration,
    pub rate_limit: RateLimitConfig,
    /// Transient failures tolerated before surfacing a fatal error.
    pub retry_budget: u32,
    pub auth_policy: AuthPolicy,
    /// Credential directory, required when `auth_policy` is mutual_tls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_certs_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            proxy_binary: PathBuf::from("envoy"),
            config_dir: PathBuf::from("/var/lib/drover"),
            service_cluster: "proxy".to_string(),
            service_node: String::new(),
            statsd_address: None,
            proxy_admin_port: 15000,
            discovery_address: "localhost:8080".to_string(),
            discovery_refresh_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            drain_duration: Duration::from_secs(45),
            parent_shutdown_duration: Duration::from_secs(60),
            stabilization_delay: Duration::from_secs(10),
            retry_initial_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_secs(30),
            rate_limit: RateLimitConfig::default(),
            retry_budget: 10,
            auth_policy: AuthPolicy::None,
            auth_certs_path: None,
        }
    }
}

impl AgentConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Parse and validate TOML config text.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rate_limit.rate.is_finite() && self.rate_limit.rate > 0.0) {
            return Err(ConfigError::Invalid("rate_limit.rate must be positive".into()));
        }
        if self.rate_limit.burst == 0 {
            return Err(ConfigError::Invalid("rate_limit.burst must be at least 1".into()));
        }
        if self.retry_budget == 0 {
            return Err(ConfigError::Invalid("retry_budget must be at least 1".into()));
        }
        if self.discovery_address.is_empty() {
            return Err(ConfigError::Invalid("discovery_address must not be empty".into()));
        }
        if self.drain_duration > self.parent_shutdown_duration {
            return Err(ConfigError::Invalid(
                "drain_duration must not exceed parent_shutdown_duration".into(),
            ));
        }
        if self.stabilization_delay.is_zero() {
            return Err(ConfigError::Invalid("stabilization_delay must not be zero".into()));
        }
        if self.auth_policy == AuthPolicy::MutualTls && self.auth_certs_path.is_none() {
            return Err(ConfigError::Invalid(
                "auth_policy = \"mutual_tls\" requires auth_certs_path".into(),
            ));
        }
        Ok(())
    }

    pub fn node_identity(&self) -> NodeIdentity {
        NodeIdentity {
            service_cluster: self.service_cluster.clone(),
            service_node: self.service_node.clone(),
        }
    }

    /// Credential file paths, present only under mutual TLS.
    pub fn cert_paths(&self) -> Option<CertPaths> {
        if self.auth_policy != AuthPolicy::MutualTls {
            return None;
        }
        let dir = self.auth_certs_path.as_ref()?;
        Some(CertPaths {
            cert_chain: dir.join("cert-chain.pem"),
            private_key: dir.join("key.pem"),
            root_cert: dir.join("root-cert.pem"),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
