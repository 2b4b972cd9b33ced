// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! End-to-end behaviour of the driver on the five-stage ML pipeline, with
//! stage implementations registered as in-process tasks.

use anyhow::Context as _;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stagehand::ledger::LedgerStore;
use stagehand::pipeline::StageEvent;
use stagehand::{
    CancelHandle, Driver, ExecutionOptions, RunStatus, StageContext, StageState, StaleReason,
};
use tempfile::TempDir;

const PIPELINE: &str = r#"
version: "1"
name: classifier
stages:
  - name: data_ingestion
    tool: { type: task, name: ingest }
    deps: [raw/data.csv]
    params: [data_ingestion.source_URL]
    outs: [artifacts/data_ingestion/data.csv]

  - name: prepare_base_model
    tool: { type: task, name: prepare }
    params: [IMAGE_SIZE]
    outs: [artifacts/prepare_base_model/base.bin]

  - name: training
    tool: { type: task, name: train }
    deps:
      - artifacts/data_ingestion/data.csv
      - artifacts/prepare_base_model/base.bin
    params: [EPOCHS, BATCH_SIZE]
    outs: [artifacts/training/model.bin]
    depends_on: [data_ingestion, prepare_base_model]

  - name: evaluation
    tool: { type: task, name: evaluate }
    deps: [artifacts/training/model.bin]
    outs: [artifacts/evaluation/scores.json]
    depends_on: [training]

  - name: prediction
    tool: { type: task, name: predict }
    deps: [artifacts/training/model.bin]
    outs: [artifacts/prediction/out.json]
    depends_on: [training]
"#;

const TASKS: [&str; 5] = ["ingest", "prepare", "train", "evaluate", "predict"];

/// Writes the params subset followed by every input into every output
fn produce(ctx: &StageContext) -> anyhow::Result<()> {
    let mut content = ctx.params.to_string();
    for input in &ctx.inputs {
        let text = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
        content.push_str(&text);
    }
    for output in &ctx.outputs {
        fs::write(output, &content)?;
    }
    Ok(())
}

struct Project {
    dir: TempDir,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Project {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let project = Self {
            dir,
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        project.write(
            "config/config.yaml",
            "artifacts_root: artifacts\ndata_ingestion:\n  source_URL: https://example.com/data.zip\n",
        );
        project.write("params.yaml", "EPOCHS: 1\nBATCH_SIZE: 16\nIMAGE_SIZE: [224, 224, 3]\n");
        project.write("raw/data.csv", "x,y\n1,0\n");
        project.write("stagehand.yaml", PIPELINE);
        project
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, relative: &str, content: &str) {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Driver with every task producing its outputs, except `failing`
    fn driver_failing(&self, failing: Option<&'static str>) -> Driver {
        let mut driver = Driver::load(self.root(), Path::new("stagehand.yaml")).unwrap();
        for task in TASKS {
            let calls = Arc::clone(&self.calls);
            driver.register_task(task, move |ctx: &StageContext| {
                calls.lock().unwrap().push(ctx.stage.name.clone());
                if failing == Some(task) {
                    anyhow::bail!("{} exploded", task);
                }
                produce(ctx)
            });
        }
        driver
    }

    fn driver(&self) -> Driver {
        self.driver_failing(None)
    }

    fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_second_run_executes_nothing() {
    let project = Project::new();

    let first = project.driver().run(&ExecutionOptions::default()).await.unwrap();
    assert!(first.is_success());
    assert_eq!(first.count(StageState::Succeeded), 5);
    assert_eq!(project.take_calls().len(), 5);

    let second = project.driver().run(&ExecutionOptions::default()).await.unwrap();
    assert!(second.is_success());
    assert_eq!(second.count(StageState::Skipped), 5);
    assert!(project.take_calls().is_empty());
    assert_eq!(second.exit_code(), 0);
}

#[tokio::test]
async fn test_param_change_reruns_only_training_and_downstream() {
    let project = Project::new();
    project.driver().run(&ExecutionOptions::default()).await.unwrap();
    project.take_calls();

    project.write("params.yaml", "EPOCHS: 5\nBATCH_SIZE: 16\nIMAGE_SIZE: [224, 224, 3]\n");
    let report = project.driver().run(&ExecutionOptions::default()).await.unwrap();

    assert_eq!(report.state_of("data_ingestion"), Some(StageState::Skipped));
    assert_eq!(report.state_of("prepare_base_model"), Some(StageState::Skipped));
    assert_eq!(report.state_of("training"), Some(StageState::Succeeded));
    assert!(matches!(
        report.stage("training").unwrap().reason,
        Some(StaleReason::ParamsChanged)
    ));
    assert!(matches!(
        report.stage("evaluation").unwrap().reason,
        Some(StaleReason::InputChanged { .. })
    ));

    let calls: BTreeSet<String> = project.take_calls().into_iter().collect();
    assert_eq!(calls, set(&["training", "evaluation", "prediction"]));
}

#[tokio::test]
async fn test_reordered_params_document_is_not_a_change() {
    let project = Project::new();
    project.driver().run(&ExecutionOptions::default()).await.unwrap();
    project.take_calls();

    project.write("params.yaml", "IMAGE_SIZE: [224, 224, 3]\nBATCH_SIZE: 16\nEPOCHS: 1\n");
    let report = project.driver().run(&ExecutionOptions::default()).await.unwrap();

    assert_eq!(report.count(StageState::Skipped), 5);
    assert!(project.take_calls().is_empty());
}

#[tokio::test]
async fn test_input_change_propagates_downstream() {
    let project = Project::new();
    project.driver().run(&ExecutionOptions::default()).await.unwrap();
    project.take_calls();

    project.write("raw/data.csv", "x,y\n1,0\n2,1\n");
    let report = project.driver().run(&ExecutionOptions::default()).await.unwrap();

    assert!(matches!(
        &report.stage("data_ingestion").unwrap().reason,
        Some(StaleReason::InputChanged { path }) if path == "raw/data.csv"
    ));
    assert_eq!(report.state_of("prepare_base_model"), Some(StageState::Skipped));
    let calls: BTreeSet<String> = project.take_calls().into_iter().collect();
    assert_eq!(
        calls,
        set(&["data_ingestion", "training", "evaluation", "prediction"])
    );
}

#[tokio::test]
async fn test_tampered_output_forces_rerun() {
    let project = Project::new();
    project.driver().run(&ExecutionOptions::default()).await.unwrap();
    project.take_calls();

    project.write("artifacts/evaluation/scores.json", "{\"accuracy\": 1.0}");
    let report = project.driver().run(&ExecutionOptions::default()).await.unwrap();

    assert!(matches!(
        report.stage("evaluation").unwrap().reason,
        Some(StaleReason::OutputModified { .. })
    ));
    assert_eq!(project.take_calls(), vec!["evaluation"]);

    fs::remove_file(project.root().join("artifacts/prediction/out.json")).unwrap();
    let report = project.driver().run(&ExecutionOptions::default()).await.unwrap();

    assert!(matches!(
        report.stage("prediction").unwrap().reason,
        Some(StaleReason::OutputMissing { .. })
    ));
    assert_eq!(project.take_calls(), vec!["prediction"]);
}

#[tokio::test]
async fn test_failure_is_isolated_to_its_branch() {
    let project = Project::new();

    let report = project
        .driver_failing(Some("ingest"))
        .run(&ExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(report.state_of("data_ingestion"), Some(StageState::Failed));
    assert_eq!(report.state_of("prepare_base_model"), Some(StageState::Succeeded));
    for blocked in ["training", "evaluation", "prediction"] {
        let stage = report.stage(blocked).unwrap();
        assert_eq!(stage.state, StageState::Aborted, "{}", blocked);
        assert_eq!(stage.blocked_by.as_deref(), Some("data_ingestion"));
    }
    assert!(report
        .stage("data_ingestion")
        .unwrap()
        .error
        .as_deref()
        .unwrap()
        .contains("ingest exploded"));
    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.exit_code(), 1);
    assert!(report.artifacts("training").is_none());

    // Nothing was recorded for the failed stage, so the next run retries it
    // while the prepared base model stays current.
    project.take_calls();
    let retry = project.driver().run(&ExecutionOptions::default()).await.unwrap();
    assert!(retry.is_success());
    assert_eq!(retry.state_of("prepare_base_model"), Some(StageState::Skipped));
    assert_eq!(retry.state_of("data_ingestion"), Some(StageState::Succeeded));
}

#[tokio::test]
async fn test_keep_going_skips_downstream() {
    let project = Project::new();
    let options = ExecutionOptions {
        continue_on_failure: true,
        ..Default::default()
    };

    let report = project.driver_failing(Some("train")).run(&options).await.unwrap();

    assert_eq!(report.state_of("training"), Some(StageState::Failed));
    assert_eq!(report.state_of("evaluation"), Some(StageState::SkippedDueToFailure));
    assert_eq!(report.state_of("prediction"), Some(StageState::SkippedDueToFailure));
    assert_eq!(report.status, RunStatus::CompletedWithFailures);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_lost_ledger_entry_reruns_stage() {
    let project = Project::new();
    project.driver().run(&ExecutionOptions::default()).await.unwrap();
    project.take_calls();

    // Outputs on disk but no record: what a crash between the stage
    // finishing and the ledger write leaves behind.
    let (store, _) = LedgerStore::open(project.root().join(".stagehand/ledger.json")).unwrap();
    assert!(store.remove("training").await.unwrap());
    drop(store);

    let report = project.driver().run(&ExecutionOptions::default()).await.unwrap();

    assert!(matches!(
        report.stage("training").unwrap().reason,
        Some(StaleReason::NeverRun)
    ));
    // Same inputs produce the same model, so downstream stays current.
    assert_eq!(report.state_of("evaluation"), Some(StageState::Skipped));
    assert_eq!(report.state_of("prediction"), Some(StageState::Skipped));
    assert_eq!(project.take_calls(), vec!["training"]);
}

#[tokio::test]
async fn test_parallel_run_respects_dependencies() {
    let project = Project::new();
    let options = ExecutionOptions {
        jobs: 4,
        ..Default::default()
    };

    let report = project.driver().run(&options).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.count(StageState::Succeeded), 5);

    let calls = project.take_calls();
    let position = |stage: &str| calls.iter().position(|c| c == stage).unwrap();
    assert!(position("data_ingestion") < position("training"));
    assert!(position("prepare_base_model") < position("training"));
    assert!(position("training") < position("evaluation"));
    assert!(position("training") < position("prediction"));
}

#[tokio::test]
async fn test_selection_runs_upstream_closure_only() {
    let project = Project::new();
    let options = ExecutionOptions {
        selection: vec!["training".into()],
        ..Default::default()
    };

    let report = project.driver().run(&options).await.unwrap();

    assert_eq!(report.stages.len(), 3);
    assert_eq!(report.state_of("evaluation"), None);
    let calls: BTreeSet<String> = project.take_calls().into_iter().collect();
    assert_eq!(calls, set(&["data_ingestion", "prepare_base_model", "training"]));
}

#[tokio::test]
async fn test_artifacts_reference_prediction_outputs() {
    let project = Project::new();
    let options = ExecutionOptions {
        selection: vec!["prediction".into()],
        ..Default::default()
    };

    let report = project.driver().run(&options).await.unwrap();

    let artifacts = report.artifacts("prediction").unwrap();
    assert_eq!(
        artifacts.to_vec(),
        vec![project.root().join("artifacts/prediction/out.json")]
    );
    assert!(artifacts[0].exists());
}

#[tokio::test]
async fn test_status_reports_without_running() {
    let project = Project::new();

    let report = project.driver().status(&[]).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.count(StageState::Stale), 5);
    assert!(matches!(
        report.stage("training").unwrap().reason,
        Some(StaleReason::UpstreamStale { .. })
    ));
    assert!(project.take_calls().is_empty());
    assert!(!project.root().join(".stagehand/ledger.json").exists());
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
    let project = Project::new();
    let mut driver = project.driver();

    let calls = Arc::clone(&project.calls);
    driver.register_task("train", move |ctx: &StageContext| {
        calls.lock().unwrap().push(ctx.stage.name.clone());
        for _ in 0..1000 {
            if ctx.cancel.is_cancelled() {
                anyhow::bail!("interrupted");
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        produce(ctx)
    });

    let cancel = CancelHandle::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    driver.set_events(tx).set_cancel(cancel.signal());

    let trigger = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let StageEvent::Transition {
                    stage,
                    state: StageState::Running,
                    ..
                } = event
                {
                    if stage == "training" {
                        cancel.cancel();
                    }
                }
            }
        })
    };

    let report = driver.run(&ExecutionOptions::default()).await.unwrap();
    drop(driver);
    trigger.await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.exit_code(), 130);
    assert_eq!(report.state_of("data_ingestion"), Some(StageState::Succeeded));
    assert_eq!(report.state_of("training"), Some(StageState::Cancelled));
    assert_eq!(report.state_of("evaluation"), Some(StageState::Cancelled));

    let (store, _) = LedgerStore::open(project.root().join(".stagehand/ledger.json")).unwrap();
    assert!(store.entry("training").await.is_none());
    assert!(store.entry("data_ingestion").await.is_some());
}

#[tokio::test]
async fn test_forced_selection_keeps_upstream_cached() {
    let project = Project::new();
    project.driver().run(&ExecutionOptions::default()).await.unwrap();
    project.take_calls();

    let options = ExecutionOptions {
        force: true,
        selection: vec!["training".into()],
        ..Default::default()
    };
    let report = project.driver().run(&options).await.unwrap();

    assert_eq!(report.state_of("data_ingestion"), Some(StageState::Skipped));
    assert_eq!(report.state_of("prepare_base_model"), Some(StageState::Skipped));
    assert_eq!(report.state_of("training"), Some(StageState::Succeeded));
    assert_eq!(report.stage("training").unwrap().reason, Some(StaleReason::Forced));
    assert_eq!(project.take_calls(), vec!["training"]);
}

#[tokio::test]
async fn test_pipeline_env_change_reruns_stages() {
    let project = Project::new();
    let with_env = |kind: &str| {
        PIPELINE.replace(
            "name: classifier",
            &format!("name: classifier\nenv: {{ MODEL_KIND: {} }}", kind),
        )
    };

    project.write("stagehand.yaml", &with_env("vgg16"));
    project.driver().run(&ExecutionOptions::default()).await.unwrap();
    project.take_calls();

    let unchanged = project.driver().run(&ExecutionOptions::default()).await.unwrap();
    assert_eq!(unchanged.count(StageState::Skipped), 5);

    project.write("stagehand.yaml", &with_env("resnet50"));
    let report = project.driver().run(&ExecutionOptions::default()).await.unwrap();

    assert_eq!(report.count(StageState::Succeeded), 5);
    assert_eq!(report.stage("training").unwrap().reason, Some(StaleReason::RecipeChanged));
}

#[tokio::test]
async fn test_missing_input_fails_stage_and_blocks_downstream() {
    let project = Project::new();
    fs::remove_file(project.root().join("raw/data.csv")).unwrap();

    let report = project.driver().run(&ExecutionOptions::default()).await.unwrap();

    let ingestion = report.stage("data_ingestion").unwrap();
    assert_eq!(ingestion.state, StageState::Failed);
    assert!(ingestion.error.as_deref().unwrap().contains("missing declared input"));
    assert_eq!(report.state_of("prepare_base_model"), Some(StageState::Succeeded));
    for blocked in ["training", "evaluation", "prediction"] {
        let stage = report.stage(blocked).unwrap();
        assert_eq!(stage.state, StageState::Aborted, "{}", blocked);
        assert_eq!(stage.blocked_by.as_deref(), Some("data_ingestion"));
    }
    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(project.take_calls(), vec!["prepare_base_model"]);
}

#[tokio::test]
async fn test_status_leaves_corrupt_ledger_in_place() {
    let project = Project::new();
    let ledger = project.root().join(".stagehand/ledger.json");
    project.write(".stagehand/ledger.json", "{ truncated");

    let report = project.driver().status(&[]).await.unwrap();

    assert!(report.warnings.iter().any(|w| w.contains("unreadable")));
    assert_eq!(fs::read_to_string(&ledger).unwrap(), "{ truncated");
    assert!(!project.root().join(".stagehand/ledger.json.corrupt").exists());

    let run = project.driver().run(&ExecutionOptions::default()).await.unwrap();
    assert!(run.is_success());
    assert!(project.root().join(".stagehand/ledger.json.corrupt").exists());
}
