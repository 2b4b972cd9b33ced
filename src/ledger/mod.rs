// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Execution ledger
//!
//! Durable record of the last successful execution of each stage: the
//! fingerprint it ran under and what its outputs looked like afterwards.

mod store;

pub use store::LedgerStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use crate::fingerprint::{ArtifactFingerprint, StageFingerprint};

/// On-disk format version
pub const LEDGER_VERSION: u32 = 1;

/// Every stage's most recent successful execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ledger {
    pub version: u32,
    #[serde(default)]
    pub stages: BTreeMap<String, LedgerEntry>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            stages: BTreeMap::new(),
        }
    }
}

impl Ledger {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }
}

/// One stage's last successful execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    /// Combined stage fingerprint
    pub fingerprint: String,
    /// Recipe digest
    pub recipe: String,
    /// Input digests keyed by declared path
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Parameter subset digest
    pub params: String,
    /// Output fingerprints keyed by declared path
    #[serde(default)]
    pub outputs: BTreeMap<String, ArtifactFingerprint>,
    /// Configuration snapshot version the stage ran under
    #[serde(default)]
    pub config_version: String,
    pub recorded_at: SystemTime,
    #[serde(default)]
    pub duration_ms: u64,
}

impl LedgerEntry {
    /// Build an entry from a fresh fingerprint and the outputs it produced
    pub fn new(
        fingerprint: &StageFingerprint,
        outputs: impl IntoIterator<Item = (String, ArtifactFingerprint)>,
        config_version: &str,
        duration: Duration,
    ) -> Self {
        Self {
            fingerprint: fingerprint.digest.clone(),
            recipe: fingerprint.recipe.clone(),
            inputs: fingerprint
                .inputs
                .iter()
                .map(|i| (i.path.clone(), i.fingerprint.digest.clone()))
                .collect(),
            params: fingerprint.params.clone(),
            outputs: outputs.into_iter().collect(),
            config_version: config_version.to_string(),
            recorded_at: SystemTime::now(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Seconds since the entry was recorded
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.recorded_at)
            .unwrap_or_default()
    }

    /// Total size of the recorded outputs
    pub fn output_size(&self) -> u64 {
        self.outputs.values().map(|o| o.size).sum()
    }
}
