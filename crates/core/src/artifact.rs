// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Config artifacts and their fingerprints.
//!
//! The agent never interprets proxy configuration: a rendered config is
//! opaque payload bytes plus a content fingerprint. The fingerprint only
//! needs to be stable within one process run; it decides whether a new
//! epoch is required.

use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;

/// Content hash of a rendered configuration payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint the given payload bytes.
    pub fn of(payload: &[u8]) -> Self {
        Self(Sha256::digest(payload).into())
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in self.0 {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }

    /// Truncated hex form for log lines.
    pub fn short(&self) -> String {
        let mut out = String::with_capacity(12);
        for byte in &self.0[..6] {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.short())
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// Output of one generator invocation: payload bytes plus fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub payload: Vec<u8>,
    pub fingerprint: Fingerprint,
}

impl Rendered {
    pub fn new(payload: Vec<u8>) -> Self {
        let fingerprint = Fingerprint::of(&payload);
        Self { payload, fingerprint }
    }
}

/// A rendered configuration materialized on disk for one epoch.
///
/// The payload is retained in memory so a crashed epoch can be re-applied
/// byte-for-byte without consulting the generator again.
#[derive(Debug, Clone)]
pub struct ConfigArtifact {
    pub payload: Arc<[u8]>,
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
}

impl ConfigArtifact {
    pub fn new(rendered: &Rendered, path: PathBuf) -> Self {
        Self {
            payload: Arc::from(rendered.payload.as_slice()),
            fingerprint: rendered.fingerprint,
            path,
        }
    }

    /// Rebuild the `Rendered` value for re-applying this artifact.
    pub fn to_rendered(&self) -> Rendered {
        Rendered { payload: self.payload.to_vec(), fingerprint: self.fingerprint }
    }
}

/// Generator failure, classified for retry policy.
///
/// Only `Transient` errors are retried; `Permanent` errors leave the
/// running epoch untouched and wait for the next change notification.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    #[error("transient render failure: {0}")]
    Transient(String),
    #[error("permanent render failure: {0}")]
    Permanent(String),
}

impl RenderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RenderError::Transient(_))
    }
}

#[cfg(test)]
#[path = "artifact_tests.rs"]
mod tests;
