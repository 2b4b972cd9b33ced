// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Artifact identity store
//!
//! Computes stable content fingerprints for files, directories and
//! parameter subsets, and combines them into a per-stage recipe fingerprint.
//! All methods do blocking filesystem IO; async callers run them on the
//! blocking pool.

mod canonical;
mod hash;

pub use canonical::to_canonical_json;
pub use hash::{hash_directory, hash_file, hash_string, ContentHasher, DirectoryDigest};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::ConfigSnapshot;
use crate::errors::{DanglingKind, StagehandError, StagehandResult};
use crate::pipeline::StageSpec;

/// Kind of artifact a fingerprint describes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    File,
    Directory,
    Params,
}

/// Content-derived identity of one artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactFingerprint {
    /// BLAKE3 hex digest of the content
    pub digest: String,
    pub kind: ArtifactKind,
    /// Size in bytes (summed over members for directories)
    #[serde(default)]
    pub size: u64,
    /// Last observed modification time, nanoseconds since the epoch.
    /// Informational only: never part of the identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
}

impl ArtifactFingerprint {
    /// Whether two fingerprints describe the same content
    pub fn same_content(&self, other: &ArtifactFingerprint) -> bool {
        self.kind == other.kind && self.digest == other.digest
    }

    /// Human readable size
    pub fn formatted_size(&self) -> String {
        format_size(self.size)
    }
}

/// Render a byte count the way listings show it
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("~ {} KB", (bytes as f64 / KB as f64).round())
    } else {
        format!("{} bytes", bytes)
    }
}

/// Fingerprint of one declared input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFingerprint {
    /// Declared path, as written in the pipeline
    pub path: String,
    pub fingerprint: ArtifactFingerprint,
}

/// Identity of everything that determines a stage's outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFingerprint {
    /// Combined digest
    pub digest: String,
    /// Digest of the command and declarations
    pub recipe: String,
    /// Declared inputs, in declaration order
    pub inputs: Vec<InputFingerprint>,
    /// Digest of the declared parameter subset
    pub params: String,
}

/// Portable key for a declared path, used in the ledger
pub fn path_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Computes fingerprints relative to a project root
#[derive(Debug, Clone)]
pub struct IdentityStore {
    root: PathBuf,
}

impl IdentityStore {
    /// Create a store resolving relative paths against `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a declared path against the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Fingerprint a file or directory; `Ok(None)` if it does not exist
    pub fn try_fingerprint(&self, path: &Path) -> StagehandResult<Option<ArtifactFingerprint>> {
        let full = self.resolve(path);
        let read_error = |e: std::io::Error| StagehandError::FileReadError {
            path: full.clone(),
            error: e.to_string(),
        };

        let meta = match std::fs::metadata(&full) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(read_error(e)),
        };

        let fingerprint = if meta.is_dir() {
            let dir = hash_directory(&full).map_err(read_error)?;
            ArtifactFingerprint {
                digest: dir.digest,
                kind: ArtifactKind::Directory,
                size: dir.size,
                modified: dir.modified,
            }
        } else {
            ArtifactFingerprint {
                digest: hash_file(&full).map_err(read_error)?,
                kind: ArtifactKind::File,
                size: meta.len(),
                modified: hash::modified_nanos(&meta),
            }
        };

        Ok(Some(fingerprint))
    }

    /// Fingerprint a declared input of `stage`
    pub fn fingerprint(&self, stage: &str, path: &Path) -> StagehandResult<ArtifactFingerprint> {
        self.try_fingerprint(path)?
            .ok_or_else(|| StagehandError::MissingInput {
                stage: stage.to_string(),
                path: path.to_path_buf(),
            })
    }

    /// Fingerprint the subset of `snapshot` named by `keys`
    ///
    /// The subset is serialized canonically, so neither the order of `keys`
    /// nor the key order of the source documents affects the digest.
    pub fn params_fingerprint(
        &self,
        stage: &str,
        snapshot: &ConfigSnapshot,
        keys: &[String],
    ) -> StagehandResult<ArtifactFingerprint> {
        let subset = snapshot
            .subset(keys)
            .map_err(|key| StagehandError::DanglingDependency {
                stage: stage.to_string(),
                dependency: key,
                kind: DanglingKind::Param,
            })?;
        let canonical = to_canonical_json(&subset);

        Ok(ArtifactFingerprint {
            digest: hash_string(&canonical),
            kind: ArtifactKind::Params,
            size: canonical.len() as u64,
            modified: None,
        })
    }

    /// Digest of the parts of a stage declaration that affect its outputs
    pub fn recipe_fingerprint(&self, stage: &StageSpec) -> StagehandResult<String> {
        let identity = serde_json::to_value(stage.recipe())?;
        Ok(hash_string(&to_canonical_json(&identity)))
    }

    /// Compute the current fingerprint of a stage
    pub fn stage_fingerprint(
        &self,
        stage: &StageSpec,
        snapshot: &ConfigSnapshot,
    ) -> StagehandResult<StageFingerprint> {
        let recipe = self.recipe_fingerprint(stage)?;
        let params = self.params_fingerprint(&stage.name, snapshot, &stage.params)?;

        let mut inputs = Vec::with_capacity(stage.deps.len());
        for dep in &stage.deps {
            inputs.push(InputFingerprint {
                path: path_key(dep),
                fingerprint: self.fingerprint(&stage.name, dep)?,
            });
        }

        let mut hasher = ContentHasher::new("stagehand/stage/v1");
        hasher.field(&recipe);
        for input in &inputs {
            hasher.field(&input.path).field(&input.fingerprint.digest);
        }
        hasher.field(&params.digest);

        Ok(StageFingerprint {
            digest: hasher.finalize(),
            recipe,
            inputs,
            params: params.digest,
        })
    }

    /// Fingerprint every declared output of a stage
    ///
    /// Missing outputs map to `None` rather than failing, since a missing
    /// output only means the stage has to run.
    pub fn output_fingerprints(
        &self,
        stage: &StageSpec,
    ) -> StagehandResult<Vec<(String, Option<ArtifactFingerprint>)>> {
        stage
            .outs
            .iter()
            .map(|out| Ok((path_key(out), self.try_fingerprint(out)?)))
            .collect()
    }
}
