// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Pipeline definition structures
//!
//! Defines the schema for stagehand.yaml files: the explicit table of stages
//! with their declared inputs, outputs and parameter dependencies.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::errors::{StagehandError, StagehandResult};

/// Default pipeline file name
pub const DEFAULT_PIPELINE_FILE: &str = "stagehand.yaml";

/// Pipeline definition from stagehand.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Pipeline description
    #[serde(default)]
    pub description: Option<String>,

    /// Paths/config document
    #[serde(default = "default_config_path")]
    pub config: PathBuf,

    /// Hyperparameter document
    #[serde(default = "default_params_path")]
    pub params: PathBuf,

    /// Where the ledger is persisted
    #[serde(default = "default_ledger_path")]
    pub ledger: PathBuf,

    /// Stages in declaration order
    pub stages: Vec<StageSpec>,

    /// Environment variables for every shell stage
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_config_path() -> PathBuf {
    PathBuf::from("config/config.yaml")
}

fn default_params_path() -> PathBuf {
    PathBuf::from("params.yaml")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(".stagehand/ledger.json")
}

impl Pipeline {
    /// Load pipeline from a YAML file
    pub fn from_file(path: &Path) -> StagehandResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StagehandError::PipelineNotFound {
                path: path.to_path_buf(),
            },
            _ => StagehandError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            },
        })?;

        Self::from_yaml(&content)
    }

    /// Parse pipeline from YAML string
    pub fn from_yaml(yaml: &str) -> StagehandResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Serialize pipeline to YAML
    pub fn to_yaml(&self) -> StagehandResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a stage by name
    pub fn get_stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Get all stage names in declaration order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

/// A single pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name (must be unique within pipeline)
    pub name: String,

    /// Stage description
    #[serde(default)]
    pub description: Option<String>,

    /// Implementation to invoke
    pub tool: Tool,

    /// Declared input paths, in order
    #[serde(default)]
    pub deps: Vec<PathBuf>,

    /// Declared output paths, in order
    #[serde(default)]
    pub outs: Vec<PathBuf>,

    /// Dotted configuration keys the stage reads
    #[serde(default)]
    pub params: Vec<String>,

    /// Upstream stages (other stage names)
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Downstream stages are skipped rather than aborted when this stage fails
    #[serde(default)]
    pub allow_failure: bool,

    /// Environment variables for this stage
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// The parts of a stage declaration that determine its outputs
#[derive(Debug, Serialize)]
pub struct Recipe<'a> {
    pub tool: &'a Tool,
    pub deps: &'a [PathBuf],
    pub outs: &'a [PathBuf],
    pub params: BTreeSet<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<&'a str, &'a str>,
}

impl StageSpec {
    /// Get the tool name for this stage
    pub fn tool_name(&self) -> &str {
        match &self.tool {
            Tool::Shell { .. } => "shell",
            Tool::Task { .. } => "task",
        }
    }

    /// Recipe identity; description and failure policy are excluded
    ///
    /// `env` must already hold the pipeline-wide variables, see
    /// [`StageSpec::with_pipeline_env`].
    pub fn recipe(&self) -> Recipe<'_> {
        Recipe {
            tool: &self.tool,
            deps: &self.deps,
            outs: &self.outs,
            params: self.params.iter().map(String::as_str).collect(),
            env: self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect(),
        }
    }

    /// The stage with the effective environment: `pipeline` overlaid by its own `env`
    pub fn with_pipeline_env(&self, pipeline: &HashMap<String, String>) -> StageSpec {
        let mut env = pipeline.clone();
        env.extend(self.env.clone());
        StageSpec {
            env,
            ..self.clone()
        }
    }

    /// Whether this stage produces `path` (or something beneath or above it)
    pub fn produces(&self, path: &Path) -> bool {
        self.outs.iter().any(|out| paths_overlap(out, path))
    }
}

/// Whether one path equals, contains, or lies under the other
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    a.starts_with(&b) || b.starts_with(&a)
}

fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

/// Tool specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Tool {
    /// Shell command, run from the project root
    Shell {
        /// Shell command to run
        command: String,

        /// Shell to use (bash, sh, etc.)
        #[serde(default = "default_shell")]
        shell: String,
    },

    /// In-process task registered with the driver
    Task {
        /// Registered task name
        name: String,
    },
}

fn default_shell() -> String {
    "bash".to_string()
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shell { command, .. } => write!(f, "{}", command),
            Self::Task { name } => write!(f, "task:{}", name),
        }
    }
}
