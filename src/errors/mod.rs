// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Error types
//!
//! Every failure in stagehand is a [`StagehandError`]. Variants fall into
//! three families: validation errors (configuration and graph problems that
//! stop a run before anything executes), stage errors (which fail one stage
//! and its downstream closure) and runtime errors (IO, ledger persistence).

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for stagehand operations
pub type StagehandResult<T> = Result<T, StagehandError>;

/// Process exit code for a fully successful run
pub const EXIT_SUCCESS: u8 = 0;
/// Process exit code when at least one stage failed
pub const EXIT_STAGE_FAILURE: u8 = 1;
/// Process exit code for configuration or graph validation errors
pub const EXIT_VALIDATION: u8 = 2;
/// Process exit code for any other runtime error
pub const EXIT_RUNTIME: u8 = 3;
/// Process exit code when the run was cancelled
pub const EXIT_CANCELLED: u8 = 130;

/// What a dangling reference pointed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingKind {
    /// An upstream stage name
    Stage,
    /// A dotted configuration key
    Param,
}

impl std::fmt::Display for DanglingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stage => write!(f, "stage"),
            Self::Param => write!(f, "parameter"),
        }
    }
}

/// Main error type for stagehand
#[derive(Error, Debug, Diagnostic)]
pub enum StagehandError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Configuration document '{path}' is invalid: {reason}")]
    #[diagnostic(code(stagehand::config))]
    Config {
        path: PathBuf,
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Configuration key '{key}' is a {first} in one document and a {second} in the other")]
    #[diagnostic(
        code(stagehand::config_conflict),
        help("A key shared by the config and params documents must have the same type in both")
    )]
    ConfigConflict {
        key: String,
        first: String,
        second: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(stagehand::pipeline_not_found),
        help("Create a pipeline with 'stagehand init' or write stagehand.yaml manually")
    )]
    PipelineNotFound { path: PathBuf },

    #[error("Invalid pipeline configuration: {reason}")]
    #[diagnostic(code(stagehand::invalid_pipeline))]
    InvalidPipeline {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Stage '{stage}' is invalid: {reason}")]
    #[diagnostic(code(stagehand::invalid_stage))]
    InvalidStage { stage: String, reason: String },

    #[error("Stage '{stage}' is declared more than once")]
    #[diagnostic(code(stagehand::duplicate_stage))]
    DuplicateStage { stage: String },

    #[error("Circular dependency detected: {}", .stages.join(" → "))]
    #[diagnostic(
        code(stagehand::circular_dependency),
        help("Review depends_on and deps/outs overlaps; visualize with 'stagehand graph'")
    )]
    CircularDependency { stages: Vec<String> },

    #[error("Stage '{stage}' depends on undeclared {kind} '{dependency}'")]
    #[diagnostic(
        code(stagehand::dangling_dependency),
        help("Check that '{dependency}' is declared in the pipeline or configuration")
    )]
    DanglingDependency {
        stage: String,
        dependency: String,
        kind: DanglingKind,
    },

    #[error("Stage '{stage}' not found in pipeline")]
    #[diagnostic(code(stagehand::stage_not_found))]
    StageNotFound { stage: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Stage Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' is missing declared input '{path}'")]
    #[diagnostic(
        code(stagehand::missing_input),
        help("Create the file, or declare the stage that produces it upstream")
    )]
    MissingInput { stage: String, path: PathBuf },

    #[error("Stage '{stage}' failed: {message}")]
    #[diagnostic(code(stagehand::stage_execution))]
    StageExecution {
        stage: String,
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("No runner registered for tool '{tool}'")]
    #[diagnostic(
        code(stagehand::runner_not_found),
        help("Available runners: shell, task")
    )]
    RunnerNotFound { tool: String },

    #[error("Stage '{stage}' was cancelled")]
    #[diagnostic(code(stagehand::cancelled))]
    Cancelled { stage: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Ledger Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Ledger '{path}' is unreadable: {reason}")]
    #[diagnostic(
        code(stagehand::ledger_corruption),
        help("The ledger was set aside and every stage will be re-executed")
    )]
    LedgerCorruption { path: PathBuf, reason: String },

    #[error("Failed to write ledger '{path}': {error}")]
    #[diagnostic(code(stagehand::ledger_write))]
    LedgerWrite { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(stagehand::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(stagehand::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(stagehand::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(stagehand::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(stagehand::json_error))]
    Json { message: String },

    #[error("Background task failed: {message}")]
    #[diagnostic(code(stagehand::task_join))]
    TaskJoin { message: String },
}

impl From<std::io::Error> for StagehandError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for StagehandError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for StagehandError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<tokio::task::JoinError> for StagehandError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::TaskJoin { message: e.to_string() }
    }
}

impl StagehandError {
    /// Whether this error invalidates the run before any stage executes
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::ConfigConflict { .. }
                | Self::PipelineNotFound { .. }
                | Self::InvalidPipeline { .. }
                | Self::InvalidStage { .. }
                | Self::DuplicateStage { .. }
                | Self::CircularDependency { .. }
                | Self::DanglingDependency { .. }
                | Self::StageNotFound { .. }
                | Self::Yaml { .. }
        )
    }

    /// Process exit code the CLI reports for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            e if e.is_validation() => EXIT_VALIDATION,
            Self::MissingInput { .. } | Self::StageExecution { .. } => EXIT_STAGE_FAILURE,
            Self::Cancelled { .. } => EXIT_CANCELLED,
            _ => EXIT_RUNTIME,
        }
    }

    /// Create a stage failure carrying the tail of the tool's stderr
    pub fn stage_failed(stage: &str, exit_code: i32, stderr: &str) -> Self {
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let help = if tail.is_empty() {
            None
        } else {
            Some(tail.into_iter().rev().collect::<Vec<_>>().join("\n"))
        };

        Self::StageExecution {
            stage: stage.to_string(),
            message: format!("command exited with status {}", exit_code),
            help,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_family() {
        let cycle = StagehandError::CircularDependency {
            stages: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(cycle.exit_code(), EXIT_VALIDATION);

        let conflict = StagehandError::ConfigConflict {
            key: "epochs".into(),
            first: "number".into(),
            second: "string".into(),
        };
        assert_eq!(conflict.exit_code(), EXIT_VALIDATION);

        let missing = StagehandError::MissingInput {
            stage: "training".into(),
            path: PathBuf::from("data.csv"),
        };
        assert_eq!(missing.exit_code(), EXIT_STAGE_FAILURE);

        let ledger = StagehandError::LedgerWrite {
            path: PathBuf::from(".stagehand/ledger.json"),
            error: "disk full".into(),
        };
        assert_eq!(ledger.exit_code(), EXIT_RUNTIME);
    }

    #[test]
    fn test_cycle_message_lists_members() {
        let err = StagehandError::CircularDependency {
            stages: vec!["train".into(), "evaluate".into(), "train".into()],
        };
        assert_eq!(
            err.to_string(),
            "Circular dependency detected: train → evaluate → train"
        );
    }

    #[test]
    fn test_stage_failed_keeps_stderr_tail() {
        let stderr = (1..=8).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let err = StagehandError::stage_failed("training", 2, &stderr);

        match err {
            StagehandError::StageExecution { message, help, .. } => {
                assert!(message.contains("status 2"));
                let help = help.unwrap();
                assert!(help.starts_with("line 4"));
                assert!(help.ends_with("line 8"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
