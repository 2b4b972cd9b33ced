// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! In-process task runner

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::{RunOutput, StageContext, StageRunner};
use crate::errors::{StagehandError, StagehandResult};
use crate::pipeline::{StageSpec, Tool};

/// A stage implementation provided by the embedding program
///
/// Runs on the blocking pool, so it may do synchronous IO and heavy compute.
pub type TaskFn = Arc<dyn Fn(&StageContext) -> anyhow::Result<()> + Send + Sync>;

/// Runs registered task closures
#[derive(Clone, Default)]
pub struct TaskRunner {
    tasks: HashMap<String, TaskFn>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under `name`, replacing any previous one
    pub fn register<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Fn(&StageContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.tasks.insert(name.into(), Arc::new(task));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered task names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl StageRunner for TaskRunner {
    async fn run(&self, ctx: &StageContext) -> StagehandResult<RunOutput> {
        let Tool::Task { name } = &ctx.stage.tool else {
            return Err(StagehandError::InvalidStage {
                stage: ctx.stage.name.clone(),
                reason: "Expected Task tool".to_string(),
            });
        };

        let task = self.tasks.get(name).cloned().ok_or_else(|| StagehandError::StageExecution {
            stage: ctx.stage.name.clone(),
            message: format!("no task registered under '{}'", name),
            help: Some("Register it with Driver::register_task before running".into()),
        })?;

        let start = Instant::now();
        let owned = ctx.clone();
        let handle = tokio::task::spawn_blocking(move || task(&owned));

        // A cancelled task keeps running on its thread; its result is dropped.
        let joined = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return Err(StagehandError::Cancelled {
                    stage: ctx.stage.name.clone(),
                });
            }
            joined = handle => joined,
        };

        let duration = start.elapsed();
        match joined {
            Ok(Ok(())) => Ok(RunOutput::success(String::new(), duration)),
            Ok(Err(e)) => Ok(RunOutput::failure(format!("{:#}", e), 1, duration)),
            Err(e) if e.is_panic() => Ok(RunOutput::failure(
                format!("task '{}' panicked", name),
                101,
                duration,
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn check_available(&self) -> StagehandResult<bool> {
        Ok(true)
    }

    fn validate_stage(&self, stage: &StageSpec) -> StagehandResult<()> {
        let Tool::Task { name } = &stage.tool else {
            return Err(StagehandError::InvalidStage {
                stage: stage.name.clone(),
                reason: "Not a Task stage".to_string(),
            });
        };

        if !self.contains(name) {
            return Err(StagehandError::InvalidStage {
                stage: stage.name.clone(),
                reason: format!(
                    "task '{}' is not registered (registered: {})",
                    name,
                    if self.tasks.is_empty() {
                        "none".to_string()
                    } else {
                        self.names().join(", ")
                    }
                ),
            });
        }

        Ok(())
    }
}
