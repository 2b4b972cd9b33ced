// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Shell runner
//!
//! Runs a stage's command through a shell in the project root.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

use super::{RunOutput, StageContext, StageRunner};
use crate::errors::{StagehandError, StagehandResult};
use crate::pipeline::{StageSpec, Tool};

/// Shell runner
pub struct ShellRunner;

impl ShellRunner {
    /// Create a new shell runner
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageRunner for ShellRunner {
    async fn run(&self, ctx: &StageContext) -> StagehandResult<RunOutput> {
        let Tool::Shell { command, shell } = &ctx.stage.tool else {
            return Err(StagehandError::InvalidStage {
                stage: ctx.stage.name.clone(),
                reason: "Expected Shell tool".to_string(),
            });
        };

        if which::which(shell).is_err() {
            return Err(StagehandError::StageExecution {
                stage: ctx.stage.name.clone(),
                message: format!("shell '{}' not found", shell),
                help: Some("Install it or set 'shell:' on the stage's tool".into()),
            });
        }

        let start = Instant::now();

        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&ctx.root)
            .envs(&ctx.env)
            .envs(ctx.stagehand_env())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!("Stage '{}': {} -c {:?}", ctx.stage.name, shell, command);

        // Dropping the output future kills the child.
        let output = tokio::select! {
            output = cmd.output() => output.map_err(|e| StagehandError::StageExecution {
                stage: ctx.stage.name.clone(),
                message: format!("failed to start: {}", e),
                help: Some(format!("Shell '{}' may not be available", shell)),
            })?,
            _ = ctx.cancel.cancelled() => {
                tracing::info!("Stage '{}' killed on cancellation", ctx.stage.name);
                return Err(StagehandError::Cancelled {
                    stage: ctx.stage.name.clone(),
                });
            }
        };

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(RunOutput {
                success: true,
                stdout,
                stderr,
                exit_code: 0,
                duration,
            })
        } else {
            Ok(RunOutput {
                success: false,
                stdout,
                stderr,
                exit_code: output.status.code().unwrap_or(-1),
                duration,
            })
        }
    }

    async fn check_available(&self) -> StagehandResult<bool> {
        Ok(which::which("sh").is_ok() || which::which("bash").is_ok())
    }

    fn validate_stage(&self, stage: &StageSpec) -> StagehandResult<()> {
        let Tool::Shell { command, .. } = &stage.tool else {
            return Err(StagehandError::InvalidStage {
                stage: stage.name.clone(),
                reason: "Not a Shell stage".to_string(),
            });
        };

        if command.trim().is_empty() {
            return Err(StagehandError::InvalidStage {
                stage: stage.name.clone(),
                reason: "Shell command is empty".to_string(),
            });
        }

        Ok(())
    }
}
