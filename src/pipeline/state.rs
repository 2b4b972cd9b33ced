// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Stage and run states, and the staleness decision

use serde::Serialize;
use std::fmt;

use crate::fingerprint::{ArtifactFingerprint, StageFingerprint};
use crate::ledger::LedgerEntry;

/// Lifecycle of one stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Checking,
    /// Current: fingerprint and outputs match the ledger
    Skipped,
    Running,
    Succeeded,
    Failed,
    /// Not started because an upstream stage failed
    Aborted,
    /// Not started because an upstream stage failed under continue-on-failure
    SkippedDueToFailure,
    Cancelled,
    /// Would run (dry runs only)
    Stale,
}

impl StageState {
    /// Whether the stage will not change state again in this run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Checking | Self::Running)
    }

    /// Whether downstream stages may start after this one
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Skipped | Self::Succeeded)
    }

    /// Whether the stage was held back by an upstream failure
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Aborted | Self::SkippedDueToFailure)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Checking => "checking",
            Self::Skipped => "skipped",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::SkippedDueToFailure => "skipped (upstream failed)",
            Self::Cancelled => "cancelled",
            Self::Stale => "stale",
        };
        f.write_str(label)
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage skipped or succeeded
    Completed,
    /// Every failure was covered by continue-on-failure or allow_failure
    CompletedWithFailures,
    /// A stage failed and blocked its downstream
    Aborted,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Completed => "completed",
            Self::CompletedWithFailures => "completed with failures",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Why a stage has to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StaleReason {
    NeverRun,
    Forced,
    RecipeChanged,
    InputChanged { path: String },
    ParamsChanged,
    FingerprintChanged,
    OutputMissing { path: String },
    OutputModified { path: String },
    UpstreamStale { stage: String },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeverRun => write!(f, "never run"),
            Self::Forced => write!(f, "forced"),
            Self::RecipeChanged => write!(f, "command or declarations changed"),
            Self::InputChanged { path } => write!(f, "input changed: {}", path),
            Self::ParamsChanged => write!(f, "parameters changed"),
            Self::FingerprintChanged => write!(f, "fingerprint changed"),
            Self::OutputMissing { path } => write!(f, "output missing: {}", path),
            Self::OutputModified { path } => write!(f, "output modified: {}", path),
            Self::UpstreamStale { stage } => write!(f, "upstream '{}' is stale", stage),
        }
    }
}

/// Decide whether a stage must run
///
/// `outputs` are the freshly observed fingerprints of the declared outputs.
/// Returns `None` when the recorded entry proves the stage current.
pub fn staleness(
    current: &StageFingerprint,
    previous: Option<&LedgerEntry>,
    outputs: &[(String, Option<ArtifactFingerprint>)],
) -> Option<StaleReason> {
    let Some(previous) = previous else {
        return Some(StaleReason::NeverRun);
    };

    if previous.recipe != current.recipe {
        return Some(StaleReason::RecipeChanged);
    }

    for input in &current.inputs {
        if previous.inputs.get(&input.path) != Some(&input.fingerprint.digest) {
            return Some(StaleReason::InputChanged {
                path: input.path.clone(),
            });
        }
    }

    if previous.params != current.params {
        return Some(StaleReason::ParamsChanged);
    }

    if previous.fingerprint != current.digest {
        return Some(StaleReason::FingerprintChanged);
    }

    for (path, observed) in outputs {
        let Some(observed) = observed else {
            return Some(StaleReason::OutputMissing { path: path.clone() });
        };
        match previous.outputs.get(path) {
            Some(recorded) if recorded.same_content(observed) => {}
            _ => return Some(StaleReason::OutputModified { path: path.clone() }),
        }
    }

    None
}
