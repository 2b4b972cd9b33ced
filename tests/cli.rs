// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn stagehand(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("stagehand").unwrap();
    cmd.current_dir(dir).env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

fn project(pipeline: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("config")).unwrap();
    fs::write(dir.path().join("config/config.yaml"), "artifacts_root: artifacts\n").unwrap();
    fs::write(dir.path().join("params.yaml"), "EPOCHS: 2\n").unwrap();
    fs::write(dir.path().join("stagehand.yaml"), pipeline).unwrap();
    dir
}

const TWO_STAGES: &str = r#"
name: small
stages:
  - name: prepare
    tool: { type: shell, command: "echo data > prepared.txt", shell: sh }
    outs: [prepared.txt]
  - name: train
    tool: { type: shell, command: "cat prepared.txt > model.txt && echo \"$STAGEHAND_PARAMS\" >> model.txt", shell: sh }
    deps: [prepared.txt]
    params: [EPOCHS]
    outs: [model.txt]
"#;

#[test]
fn test_init_then_validate_and_status() {
    let dir = TempDir::new().unwrap();

    stagehand(dir.path())
        .args(["init", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Project initialized!"));
    assert!(dir.path().join("stagehand.yaml").exists());
    assert!(dir.path().join("artifacts/training").is_dir());

    stagehand(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline is valid"));

    stagehand(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("data_ingestion").and(predicate::str::contains("never run")));

    stagehand(dir.path())
        .arg("init")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("already"));
}

#[test]
fn test_run_then_status_is_up_to_date() {
    let dir = project(TWO_STAGES);

    stagehand(dir.path())
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));
    let model = fs::read_to_string(dir.path().join("model.txt")).unwrap();
    assert!(model.contains(r#"{"EPOCHS":2}"#));

    stagehand(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Everything is up to date."));

    fs::write(dir.path().join("params.yaml"), "EPOCHS: 3\n").unwrap();
    stagehand(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("parameters changed"));
}

#[test]
fn test_run_json_report() {
    let dir = project(TWO_STAGES);

    let output = stagehand(dir.path())
        .args(["run", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "completed");
    assert_eq!(report["stages"][0]["name"], "prepare");
    assert_eq!(report["stages"][1]["state"], "succeeded");
}

#[test]
fn test_failing_stage_exits_one() {
    let dir = project(
        r#"
name: broken
stages:
  - name: fail
    tool: { type: shell, command: "echo boom >&2; exit 4", shell: sh }
    outs: [never.txt]
  - name: after
    tool: { type: shell, command: "touch after.txt", shell: sh }
    outs: [after.txt]
    depends_on: [fail]
"#,
    );

    stagehand(dir.path())
        .arg("run")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Stage 'fail' failed").and(predicate::str::contains("boom")));
    assert!(!dir.path().join("after.txt").exists());
}

#[test]
fn test_cycle_exits_two() {
    let dir = project(
        r#"
name: cyclic
stages:
  - { name: a, tool: { type: shell, command: "true", shell: sh }, outs: [a.txt], depends_on: [b] }
  - { name: b, tool: { type: shell, command: "true", shell: sh }, outs: [b.txt], depends_on: [a] }
"#,
    );

    stagehand(dir.path())
        .arg("run")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Circular dependency"));

    stagehand(dir.path()).arg("validate").assert().code(2);
}

#[test]
fn test_missing_pipeline_exits_two() {
    let dir = TempDir::new().unwrap();

    stagehand(dir.path())
        .arg("status")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("stagehand init"));
}

#[test]
fn test_graph_formats() {
    let dir = project(TWO_STAGES);

    stagehand(dir.path())
        .args(["graph", "--format", "dot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("digraph").and(predicate::str::contains("\"prepare\" -> \"train\"")));

    stagehand(dir.path())
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. prepare (shell)"));
}

#[test]
fn test_ledger_forget_makes_stage_stale() {
    let dir = project(TWO_STAGES);
    stagehand(dir.path()).arg("run").assert().success();

    stagehand(dir.path())
        .args(["ledger", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries:  2"));

    stagehand(dir.path())
        .args(["ledger", "forget", "train"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Forgot train"));

    stagehand(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("never run"));

    stagehand(dir.path())
        .args(["ledger", "clear", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ledger cleared (1 entries)."));
}

#[test]
fn test_directory_flag() {
    let dir = project(TWO_STAGES);
    let elsewhere = TempDir::new().unwrap();

    stagehand(elsewhere.path())
        .arg("-C")
        .arg(dir.path())
        .arg("validate")
        .assert()
        .success();
}

#[test]
fn test_stage_env_change_reruns_stage() {
    let pipeline = |kind: &str| {
        format!(
            r#"
name: envs
stages:
  - name: train
    tool: {{ type: shell, command: "echo $MODEL_KIND > model.txt", shell: sh }}
    outs: [model.txt]
    env: {{ MODEL_KIND: {} }}
"#,
            kind
        )
    };
    let dir = project(&pipeline("vgg16"));
    stagehand(dir.path()).arg("run").assert().success();
    assert_eq!(fs::read_to_string(dir.path().join("model.txt")).unwrap(), "vgg16\n");

    fs::write(dir.path().join("stagehand.yaml"), pipeline("resnet50")).unwrap();
    stagehand(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("command or declarations changed"));

    stagehand(dir.path()).arg("run").assert().success();
    assert_eq!(fs::read_to_string(dir.path().join("model.txt")).unwrap(), "resnet50\n");
}
