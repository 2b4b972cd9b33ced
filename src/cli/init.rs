// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Init command - scaffold a new stagehand project
//!
//! Writes the standard five-stage image classifier pipeline (ingestion, base
//! model preparation, training, evaluation, prediction) with placeholder
//! stage scripts, the config and params documents, and the artifacts tree.

use colored::Colorize;
use std::path::{Path, PathBuf};

use crate::config::ConfigSnapshot;
use crate::errors::{StagehandError, StagehandResult, EXIT_SUCCESS};
use crate::pipeline::DEFAULT_PIPELINE_FILE;

/// Run the init command
pub async fn run(name: Option<String>, force: bool, verbose: bool) -> StagehandResult<u8> {
    let root = std::env::current_dir().map_err(|e| StagehandError::Io {
        message: format!("Failed to get current directory: {}", e),
    })?;
    let project_name = name.unwrap_or_else(|| {
        root.file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "my-pipeline".to_string())
    });

    println!("{}", "Initializing stagehand project...".bold());
    println!();

    let scaffold = scaffold(&root, &project_name, force)?;
    for path in &scaffold.written {
        println!("  {} Created {}", "✓".green(), path.display());
    }
    for path in &scaffold.kept {
        println!("  {} Kept existing {}", "○".dimmed(), path.display());
    }
    for dir in &scaffold.directories {
        println!("  {} Created {}/", "✓".green(), dir.display());
    }

    println!();
    println!("{}", "Project initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Replace the placeholder scripts in {}", "stages/".cyan());
    println!("  2. Tune {} and {}", "params.yaml".cyan(), "config/config.yaml".cyan());
    println!("  3. Run {} to see what would run", "stagehand status".cyan());
    println!("  4. Run {} to execute the pipeline", "stagehand run".cyan());
    println!();

    if verbose {
        println!("{}", "Generated pipeline:".dimmed());
        println!("{}", "─".repeat(50).dimmed());
        println!("{}", pipeline_template(&project_name).dimmed());
    }

    Ok(EXIT_SUCCESS)
}

/// What `scaffold` did, relative to the project root
#[derive(Debug, Default)]
pub struct Scaffold {
    pub written: Vec<PathBuf>,
    pub kept: Vec<PathBuf>,
    pub directories: Vec<PathBuf>,
}

/// Write the project files under `root`
///
/// An existing pipeline file is an error unless `force` is set. Other
/// existing files are kept unless `force` is set.
pub fn scaffold(root: &Path, name: &str, force: bool) -> StagehandResult<Scaffold> {
    let pipeline_path = root.join(DEFAULT_PIPELINE_FILE);
    if pipeline_path.exists() && !force {
        return Err(StagehandError::FileWriteError {
            path: pipeline_path,
            error: "file already exists (use --force to overwrite)".to_string(),
        });
    }

    let mut files: Vec<(PathBuf, String)> = vec![
        (PathBuf::from(DEFAULT_PIPELINE_FILE), pipeline_template(name)),
        (PathBuf::from("config/config.yaml"), CONFIG_TEMPLATE.to_string()),
        (PathBuf::from("params.yaml"), PARAMS_TEMPLATE.to_string()),
    ];
    for (script, body) in STAGE_SCRIPTS {
        files.push((PathBuf::from("stages").join(script), script_template(script, body)));
    }

    let mut result = Scaffold::default();
    for (relative, content) in files {
        let path = root.join(&relative);
        if path.exists() && !force {
            result.kept.push(relative);
            continue;
        }
        write_file(&path, &content)?;
        result.written.push(relative);
    }

    let snapshot = ConfigSnapshot::load(&root.join("config/config.yaml"), &root.join("params.yaml"))?;
    result.directories = create_directories(root, &artifact_directories(&snapshot))?;

    Ok(result)
}

/// The artifacts root and every `<section>.root_dir` named in the configuration
fn artifact_directories(snapshot: &ConfigSnapshot) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = snapshot
        .get_str("artifacts_root")
        .map(PathBuf::from)
        .into_iter()
        .collect();
    dirs.extend(
        snapshot
            .keys()
            .iter()
            .filter(|key| key.ends_with(".root_dir"))
            .filter_map(|key| snapshot.get_str(key))
            .map(PathBuf::from),
    );
    dirs
}

/// Create each directory that does not exist yet, returning those created
fn create_directories(root: &Path, dirs: &[PathBuf]) -> StagehandResult<Vec<PathBuf>> {
    let mut created = Vec::new();
    for dir in dirs {
        let path = root.join(dir);
        if path.is_dir() {
            continue;
        }
        std::fs::create_dir_all(&path).map_err(|e| StagehandError::FileWriteError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        tracing::info!("Created directory at: {}", dir.display());
        created.push(dir.clone());
    }
    Ok(created)
}

fn write_file(path: &Path, content: &str) -> StagehandResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StagehandError::FileWriteError {
            path: parent.to_path_buf(),
            error: e.to_string(),
        })?;
    }
    std::fs::write(path, content).map_err(|e| StagehandError::FileWriteError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

fn pipeline_template(name: &str) -> String {
    format!(
        r#"# stagehand pipeline
#
# Each stage re-runs only when its command, its inputs (deps) or the
# parameters it lists change, or when one of its outputs was altered.

version: "1"
name: "{name}"
config: config/config.yaml
params: params.yaml

stages:
  - name: data_ingestion
    description: Download and unpack the training images
    tool: {{ type: shell, command: "sh stages/01_data_ingestion.sh", shell: sh }}
    deps: [stages/01_data_ingestion.sh]
    params: [data_ingestion.source_URL]
    outs: [artifacts/data_ingestion/dataset]

  - name: prepare_base_model
    description: Build the pretrained base model with a fresh classifier head
    tool: {{ type: shell, command: "sh stages/02_prepare_base_model.sh", shell: sh }}
    deps: [stages/02_prepare_base_model.sh]
    params: [IMAGE_SIZE, INCLUDE_TOP, CLASSES, WEIGHTS, LEARNING_RATE]
    outs:
      - artifacts/prepare_base_model/base_model.h5
      - artifacts/prepare_base_model/base_model_updated.h5

  - name: training
    description: Fine-tune the base model on the ingested images
    tool: {{ type: shell, command: "sh stages/03_training.sh", shell: sh }}
    deps:
      - stages/03_training.sh
      - artifacts/data_ingestion/dataset
      - artifacts/prepare_base_model/base_model_updated.h5
    params: [IMAGE_SIZE, EPOCHS, BATCH_SIZE, AUGMENTATION]
    outs: [artifacts/training/model.h5]
    depends_on: [data_ingestion, prepare_base_model]

  - name: evaluation
    description: Score the trained model on the held-out split
    tool: {{ type: shell, command: "sh stages/04_evaluation.sh", shell: sh }}
    deps:
      - stages/04_evaluation.sh
      - artifacts/data_ingestion/dataset
      - artifacts/training/model.h5
    params: [IMAGE_SIZE, BATCH_SIZE]
    outs: [artifacts/evaluation/scores.json]
    depends_on: [data_ingestion, training]

  - name: prediction
    description: Classify the sample input with the trained model
    tool: {{ type: shell, command: "sh stages/05_prediction.sh", shell: sh }}
    deps: [stages/05_prediction.sh, artifacts/training/model.h5]
    outs: [artifacts/prediction/predictions.json]
    depends_on: [training]
"#
    )
}

const CONFIG_TEMPLATE: &str = r#"artifacts_root: artifacts

data_ingestion:
  root_dir: artifacts/data_ingestion
  source_URL: https://example.com/dataset.zip
  local_data_file: artifacts/data_ingestion/data.zip
  unzip_dir: artifacts/data_ingestion

prepare_base_model:
  root_dir: artifacts/prepare_base_model
  base_model_path: artifacts/prepare_base_model/base_model.h5
  updated_base_model_path: artifacts/prepare_base_model/base_model_updated.h5

training:
  root_dir: artifacts/training
  trained_model_path: artifacts/training/model.h5

evaluation:
  root_dir: artifacts/evaluation
  scores_path: artifacts/evaluation/scores.json

prediction:
  root_dir: artifacts/prediction
"#;

const PARAMS_TEMPLATE: &str = r#"AUGMENTATION: true
IMAGE_SIZE: [224, 224, 3]
BATCH_SIZE: 16
INCLUDE_TOP: false
EPOCHS: 1
CLASSES: 2
WEIGHTS: imagenet
LEARNING_RATE: 0.01
"#;

const STAGE_SCRIPTS: [(&str, &str); 5] = [
    (
        "01_data_ingestion.sh",
        "mkdir -p artifacts/data_ingestion/dataset\n\
         printf 'placeholder dataset\\n' > artifacts/data_ingestion/dataset/README.txt\n",
    ),
    (
        "02_prepare_base_model.sh",
        "printf '%s\\n' \"$STAGEHAND_PARAMS\" > artifacts/prepare_base_model/base_model.h5\n\
         printf '%s\\n' \"$STAGEHAND_PARAMS\" > artifacts/prepare_base_model/base_model_updated.h5\n",
    ),
    (
        "03_training.sh",
        "printf '%s\\n' \"$STAGEHAND_PARAMS\" > artifacts/training/model.h5\n",
    ),
    (
        "04_evaluation.sh",
        "printf '{\"loss\": 0.0, \"accuracy\": 0.0}\\n' > artifacts/evaluation/scores.json\n",
    ),
    (
        "05_prediction.sh",
        "printf '{\"class\": \"unknown\"}\\n' > artifacts/prediction/predictions.json\n",
    ),
];

fn script_template(script: &str, body: &str) -> String {
    format!(
        "#!/bin/sh\n\
         # {script}: placeholder, replace with the real step.\n\
         # Parameters arrive as JSON in $STAGEHAND_PARAMS and the declared\n\
         # outputs, one per line, in $STAGEHAND_OUTPUTS.\n\
         set -e\n\
         {body}"
    )
}
