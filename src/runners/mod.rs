// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Stage runners
//!
//! A runner invokes a stage's external implementation: a shell command, or
//! a task closure registered by the embedding program.

mod cancel;
mod shell;
mod task;

pub use cancel::{CancelHandle, CancelSignal};
pub use shell::ShellRunner;
pub use task::{TaskFn, TaskRunner};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConfigSnapshot;
use crate::errors::StagehandResult;
use crate::fingerprint::to_canonical_json;
use crate::pipeline::StageSpec;

/// Everything a stage implementation may look at
#[derive(Debug, Clone)]
pub struct StageContext {
    pub stage: StageSpec,
    /// Project root; shell stages run here
    pub root: PathBuf,
    /// Declared inputs, resolved against the root
    pub inputs: Vec<PathBuf>,
    /// Declared outputs, resolved against the root
    pub outputs: Vec<PathBuf>,
    /// Declared parameter subset, keyed by dotted key
    pub params: Value,
    pub snapshot: Arc<ConfigSnapshot>,
    /// Pipeline env overlaid with the stage's env
    pub env: HashMap<String, String>,
    pub cancel: CancelSignal,
}

impl StageContext {
    /// Value of a declared parameter
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Variables describing the stage to a child process
    pub fn stagehand_env(&self) -> Vec<(&'static str, String)> {
        let join = |paths: &[PathBuf]| {
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join("\n")
        };

        vec![
            ("STAGEHAND_STAGE", self.stage.name.clone()),
            ("STAGEHAND_ROOT", self.root.display().to_string()),
            ("STAGEHAND_INPUTS", join(&self.inputs)),
            ("STAGEHAND_OUTPUTS", join(&self.outputs)),
            ("STAGEHAND_PARAMS", to_canonical_json(&self.params)),
            ("STAGEHAND_CONFIG_VERSION", self.snapshot.version().to_string()),
        ]
    }
}

/// What a stage implementation reported
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl RunOutput {
    /// Create a successful output
    pub fn success(stdout: String, duration: Duration) -> Self {
        Self {
            success: true,
            stdout,
            stderr: String::new(),
            exit_code: 0,
            duration,
        }
    }

    /// Create a failed output
    pub fn failure(stderr: String, exit_code: i32, duration: Duration) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr,
            exit_code,
            duration,
        }
    }
}

/// Invokes stage implementations of one tool type
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Run a stage to completion
    ///
    /// An implementation that ran and failed is `Ok` with `success: false`.
    /// `Err` is reserved for stages that could not be started or were
    /// cancelled.
    async fn run(&self, ctx: &StageContext) -> StagehandResult<RunOutput>;

    /// Check the runner can be used on this host
    async fn check_available(&self) -> StagehandResult<bool>;

    /// Validate a stage before the run starts
    fn validate_stage(&self, stage: &StageSpec) -> StagehandResult<()>;
}

/// Runners for the built-in tool types
pub fn create_default_runners(tasks: TaskRunner) -> HashMap<String, Arc<dyn StageRunner>> {
    let mut runners: HashMap<String, Arc<dyn StageRunner>> = HashMap::new();
    runners.insert("shell".to_string(), Arc::new(ShellRunner::new()));
    runners.insert("task".to_string(), Arc::new(tasks));
    runners
}
