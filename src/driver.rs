// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Driver
//!
//! Assembles a run from a project root: the pipeline definition, the
//! configuration snapshot, validation, the stage graph and the ledger. The
//! CLI and embedding programs (a serving front end asking for a prediction)
//! both go through here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::ConfigSnapshot;
use crate::errors::StagehandResult;
use crate::fingerprint::IdentityStore;
use crate::ledger::LedgerStore;
use crate::pipeline::{
    ExecutionOptions, Pipeline, PipelineExecutor, PipelineValidator, RunReport, StageEvent,
    StageGraph,
};
use crate::runners::{create_default_runners, CancelSignal, StageContext, TaskRunner};

/// A loaded, validated project
pub struct Driver {
    root: PathBuf,
    pipeline: Pipeline,
    snapshot: Arc<ConfigSnapshot>,
    graph: StageGraph,
    warnings: Vec<String>,
    tasks: TaskRunner,
    events: Option<mpsc::UnboundedSender<StageEvent>>,
    cancel: Option<CancelSignal>,
}

impl Driver {
    /// Load the project at `root`
    ///
    /// `pipeline_file` is resolved against `root` when relative. Fails on the
    /// first configuration or validation error; validation warnings are kept
    /// and logged.
    pub fn load(root: impl Into<PathBuf>, pipeline_file: &Path) -> StagehandResult<Self> {
        let root = root.into();
        let pipeline = Pipeline::from_file(&root.join(pipeline_file))?;
        Self::from_pipeline(root, pipeline)
    }

    /// Build a driver around an already-parsed pipeline
    pub fn from_pipeline(root: impl Into<PathBuf>, pipeline: Pipeline) -> StagehandResult<Self> {
        let root = root.into();
        let snapshot = ConfigSnapshot::load(&root.join(&pipeline.config), &root.join(&pipeline.params))?;

        let warnings = PipelineValidator::validate(&pipeline, Some(&snapshot)).into_result()?;
        for warning in &warnings {
            tracing::warn!("{}", warning);
        }

        let graph = StageGraph::from_pipeline(&pipeline)?;
        tracing::debug!(
            "Loaded pipeline '{}' with {} stages",
            pipeline.name,
            pipeline.stages.len()
        );

        Ok(Self {
            root,
            pipeline,
            snapshot: Arc::new(snapshot),
            graph,
            warnings,
            tasks: TaskRunner::new(),
            events: None,
            cancel: None,
        })
    }

    /// Provide the implementation of `task` stages named `name`
    pub fn register_task<F>(&mut self, name: impl Into<String>, task: F) -> &mut Self
    where
        F: Fn(&StageContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.tasks.register(name, task);
        self
    }

    /// Receive progress events from subsequent runs
    pub fn set_events(&mut self, tx: mpsc::UnboundedSender<StageEvent>) -> &mut Self {
        self.events = Some(tx);
        self
    }

    /// Stop subsequent runs when `cancel` fires
    pub fn set_cancel(&mut self, cancel: CancelSignal) -> &mut Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn snapshot(&self) -> &Arc<ConfigSnapshot> {
        &self.snapshot
    }

    /// Validation warnings found at load time
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Where the ledger lives
    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(&self.pipeline.ledger)
    }

    /// Open the ledger, setting a corrupt one aside
    pub fn open_ledger(&self) -> StagehandResult<(LedgerStore, Option<String>)> {
        LedgerStore::open(self.ledger_path())
    }

    /// Execute the selected stages
    ///
    /// A dry run reads the ledger but never moves a corrupt one aside.
    pub async fn run(&self, options: &ExecutionOptions) -> StagehandResult<RunReport> {
        let (ledger, ledger_warning) = if options.dry_run {
            LedgerStore::inspect(self.ledger_path())?
        } else {
            self.open_ledger()?
        };
        let executor = self.executor(Arc::new(ledger));

        let missing = executor.check_runners(&self.pipeline).await;
        for tool in &missing {
            tracing::warn!("Runner '{}' is not available on this host", tool);
        }

        let mut report = executor.execute(&self.pipeline, &self.graph, options).await?;
        report.warnings.extend(ledger_warning);
        Ok(report)
    }

    /// Check the selected stages without running anything
    pub async fn status(&self, selection: &[String]) -> StagehandResult<RunReport> {
        let options = ExecutionOptions {
            dry_run: true,
            selection: selection.to_vec(),
            ..Default::default()
        };
        self.run(&options).await
    }

    fn executor(&self, ledger: Arc<LedgerStore>) -> PipelineExecutor {
        let mut executor = PipelineExecutor::new(
            IdentityStore::new(&self.root),
            Arc::clone(&self.snapshot),
            ledger,
        )
        .with_env(self.pipeline.env.clone());

        for (name, runner) in create_default_runners(self.tasks.clone()) {
            executor.register_runner(&name, runner);
        }
        if let Some(tx) = &self.events {
            executor = executor.with_events(tx.clone());
        }
        if let Some(cancel) = &self.cancel {
            executor = executor.with_cancel(cancel.clone());
        }

        executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StagehandError;
    use std::fs;
    use tempfile::TempDir;

    fn project(pipeline: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("config")).unwrap();
        fs::write(dir.path().join("config/config.yaml"), "artifacts_root: artifacts\n").unwrap();
        fs::write(dir.path().join("params.yaml"), "EPOCHS: 1\n").unwrap();
        fs::write(dir.path().join("stagehand.yaml"), pipeline).unwrap();
        dir
    }

    #[test]
    fn test_load_rejects_cycle() {
        let dir = project(
            r#"
name: cyclic
stages:
  - { name: a, tool: { type: shell, command: x }, depends_on: [b], outs: [a.txt] }
  - { name: b, tool: { type: shell, command: y }, depends_on: [a], outs: [b.txt] }
"#,
        );

        let err = Driver::load(dir.path(), Path::new("stagehand.yaml")).err().unwrap();
        assert!(matches!(err, StagehandError::CircularDependency { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_load_rejects_unknown_param() {
        let dir = project(
            r#"
name: params
stages:
  - { name: train, tool: { type: shell, command: x }, params: [MOMENTUM], outs: [m] }
"#,
        );

        let err = Driver::load(dir.path(), Path::new("stagehand.yaml")).err().unwrap();
        assert!(err.to_string().contains("MOMENTUM"));
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_reported() {
        let dir = project(
            r#"
name: ok
stages:
  - { name: a, tool: { type: shell, command: "echo a > a.txt", shell: sh }, outs: [a.txt] }
"#,
        );
        fs::create_dir_all(dir.path().join(".stagehand")).unwrap();
        fs::write(dir.path().join(".stagehand/ledger.json"), "not json").unwrap();

        let driver = Driver::load(dir.path(), Path::new("stagehand.yaml")).unwrap();
        let report = driver.run(&ExecutionOptions::default()).await.unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("unreadable"));
        assert!(report.is_success());
        assert!(dir.path().join(".stagehand/ledger.json.corrupt").exists());
    }
}
