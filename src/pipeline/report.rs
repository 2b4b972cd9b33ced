// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Run reports

use serde::Serialize;
use std::path::PathBuf;

use super::state::{RunStatus, StageState, StaleReason};
use crate::errors::{EXIT_CANCELLED, EXIT_STAGE_FAILURE, EXIT_SUCCESS};

/// Terminal outcome of one stage
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub state: StageState,
    pub duration_ms: u64,
    /// Why the stage ran (or would run)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StaleReason>,
    /// First error, for failed stages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failed upstream stage that kept this one from starting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Declared outputs, resolved against the project root
    pub outputs: Vec<PathBuf>,
}

impl StageReport {
    pub(crate) fn new(name: &str, outputs: Vec<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            state: StageState::Pending,
            duration_ms: 0,
            reason: None,
            error: None,
            blocked_by: None,
            warnings: Vec::new(),
            outputs,
        }
    }
}

/// Result of one traversal of the stage graph
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub status: RunStatus,
    pub dry_run: bool,
    pub duration_ms: u64,
    /// Configuration snapshot version the run used
    pub config_version: String,
    /// Selected stages in execution order
    pub stages: Vec<StageReport>,
    /// Run-level warnings (ledger recovery and the like)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RunReport {
    /// Report for a stage
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// State a stage ended in
    pub fn state_of(&self, name: &str) -> Option<StageState> {
        self.stage(name).map(|s| s.state)
    }

    /// Output paths of a stage that is current after this run
    ///
    /// `None` if the stage was not selected or did not end Skipped or
    /// Succeeded.
    pub fn artifacts(&self, stage: &str) -> Option<&[PathBuf]> {
        self.stage(stage)
            .filter(|s| s.state.is_success())
            .map(|s| s.outputs.as_slice())
    }

    /// Number of stages that ended in `state`
    pub fn count(&self, state: StageState) -> usize {
        self.stages.iter().filter(|s| s.state == state).count()
    }

    /// Stages that failed
    pub fn failures(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|s| s.state == StageState::Failed)
    }

    /// Whether every selected stage is current
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> u8 {
        match self.status {
            RunStatus::Cancelled => EXIT_CANCELLED,
            _ if self.failures().next().is_some() => EXIT_STAGE_FAILURE,
            _ => EXIT_SUCCESS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(states: &[(&str, StageState)], status: RunStatus) -> RunReport {
        RunReport {
            pipeline: "test".into(),
            status,
            dry_run: false,
            duration_ms: 0,
            config_version: "v".into(),
            stages: states
                .iter()
                .map(|(name, state)| {
                    let mut stage = StageReport::new(name, vec![PathBuf::from(format!("{}.out", name))]);
                    stage.state = *state;
                    stage
                })
                .collect(),
            warnings: vec![],
        }
    }

    #[test]
    fn test_exit_codes() {
        let ok = report(&[("a", StageState::Skipped), ("b", StageState::Succeeded)], RunStatus::Completed);
        assert_eq!(ok.exit_code(), 0);

        let failed = report(&[("a", StageState::Failed), ("b", StageState::Aborted)], RunStatus::Aborted);
        assert_eq!(failed.exit_code(), 1);

        let tolerated = report(
            &[("a", StageState::Failed), ("b", StageState::SkippedDueToFailure)],
            RunStatus::CompletedWithFailures,
        );
        assert_eq!(tolerated.exit_code(), 1);

        let cancelled = report(&[("a", StageState::Cancelled)], RunStatus::Cancelled);
        assert_eq!(cancelled.exit_code(), 130);
    }

    #[test]
    fn test_artifacts_only_for_current_stages() {
        let run = report(&[("train", StageState::Succeeded), ("predict", StageState::Aborted)], RunStatus::Aborted);
        assert_eq!(run.artifacts("train").unwrap(), [PathBuf::from("train.out")]);
        assert!(run.artifacts("predict").is_none());
        assert!(run.artifacts("unknown").is_none());
    }
}
