// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact materialization in the scratch directory.
//!
//! One file per epoch, `envoy-rev<epoch>.json`; the filename is the
//! index. Writes go to `<name>.tmp` first and are renamed into place, so
//! the proxy never observes a partial file. Nothing is ever mutated in
//! place; only the owning epoch's terminal-state cleanup unlinks a file.

use drover_core::{ConfigArtifact, Epoch, Rendered};
use std::path::{Path, PathBuf};

const ARTIFACT_PREFIX: &str = "envoy-rev";
const ARTIFACT_SUFFIX: &str = ".json";

/// Filesystem failures while materializing. The reconcile loop treats
/// all of these as transient.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("failed to create scratch dir {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write artifact {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to rename artifact into place at {path}: {source}")]
    Rename {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The on-disk location for an epoch's artifact.
pub fn artifact_path(scratch: &Path, epoch: Epoch) -> PathBuf {
    scratch.join(format!("{ARTIFACT_PREFIX}{epoch}{ARTIFACT_SUFFIX}"))
}

/// Write the rendered payload for `epoch` with write-rename atomicity.
pub fn materialize(
    scratch: &Path,
    epoch: Epoch,
    rendered: &Rendered,
) -> Result<ConfigArtifact, MaterializeError> {
    std::fs::create_dir_all(scratch).map_err(|source| MaterializeError::CreateDir {
        path: scratch.display().to_string(),
        source,
    })?;

    let path = artifact_path(scratch, epoch);
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &rendered.payload).map_err(|source| MaterializeError::Write {
        path: tmp.display().to_string(),
        source,
    })?;
    std::fs::rename(&tmp, &path).map_err(|source| MaterializeError::Rename {
        path: path.display().to_string(),
        source,
    })?;

    Ok(ConfigArtifact::new(rendered, path))
}

/// Unlink an artifact file. Missing files are fine; anything else is
/// logged and swallowed, since a leftover file only delays pruning.
pub fn unlink(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to unlink artifact");
        }
    }
}

/// Remove stale artifacts from prior runs. Epochs restart at 0 after a
/// daemon restart, so any surviving `envoy-rev*` file is garbage.
/// Returns how many entries were removed.
pub fn sweep(scratch: &Path) -> usize {
    let entries = match std::fs::read_dir(scratch) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(ARTIFACT_PREFIX) {
            continue;
        }
        if !(name.ends_with(ARTIFACT_SUFFIX) || name.ends_with(".json.tmp")) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "startup sweep failed to remove stale artifact");
            }
        }
    }
    removed
}

#[cfg(test)]
#[path = "materialize_tests.rs"]
mod tests;
