// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Pipeline validation
//!
//! Validates the stage table against itself and against the configuration
//! snapshot before anything executes.

use std::collections::HashSet;
use std::path::Path;

use crate::config::ConfigSnapshot;
use crate::errors::{DanglingKind, StagehandError};
use crate::pipeline::{paths_overlap, Pipeline, StageGraph, StageSpec, Tool};

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline configuration
    ///
    /// Parameter keys are checked only when a snapshot is given.
    pub fn validate(pipeline: &Pipeline, snapshot: Option<&ConfigSnapshot>) -> ValidationResult {
        let mut result = ValidationResult::new();

        if pipeline.stages.is_empty() {
            result.add_error(StagehandError::InvalidPipeline {
                reason: "Pipeline has no stages defined".into(),
                help: Some("Add at least one entry under 'stages:'".into()),
            });
        }

        let mut seen_names = HashSet::new();
        for stage in &pipeline.stages {
            if !seen_names.insert(&stage.name) {
                result.add_error(StagehandError::DuplicateStage {
                    stage: stage.name.clone(),
                });
            }
        }

        Self::validate_outputs(pipeline, &mut result);

        // Cycles and unknown upstream stages
        if let Err(e) = StageGraph::from_pipeline(pipeline) {
            if !matches!(e, StagehandError::DuplicateStage { .. }) {
                result.add_error(e);
            }
        }

        for stage in &pipeline.stages {
            Self::validate_stage(stage, pipeline, snapshot, &mut result);
        }

        result
    }

    /// Output paths must be owned by exactly one stage
    fn validate_outputs(pipeline: &Pipeline, result: &mut ValidationResult) {
        for (i, first) in pipeline.stages.iter().enumerate() {
            for second in &pipeline.stages[i + 1..] {
                for out in &first.outs {
                    if let Some(other) = second.outs.iter().find(|o| paths_overlap(out, o)) {
                        result.add_error(StagehandError::InvalidStage {
                            stage: second.name.clone(),
                            reason: format!(
                                "output '{}' overlaps output '{}' of stage '{}'",
                                other.display(),
                                out.display(),
                                first.name
                            ),
                        });
                    }
                }
            }
        }
    }

    /// Validate a single stage
    fn validate_stage(
        stage: &StageSpec,
        pipeline: &Pipeline,
        snapshot: Option<&ConfigSnapshot>,
        result: &mut ValidationResult,
    ) {
        match &stage.tool {
            Tool::Shell { command, .. } if command.trim().is_empty() => {
                result.add_error(StagehandError::InvalidStage {
                    stage: stage.name.clone(),
                    reason: "Shell command is empty".into(),
                });
            }
            Tool::Task { name } if name.trim().is_empty() => {
                result.add_error(StagehandError::InvalidStage {
                    stage: stage.name.clone(),
                    reason: "Task name is empty".into(),
                });
            }
            _ => {}
        }

        for dep in &stage.deps {
            if stage.produces(dep) {
                result.add_error(StagehandError::InvalidStage {
                    stage: stage.name.clone(),
                    reason: format!("input '{}' overlaps one of its own outputs", dep.display()),
                });
            }
        }

        if let Some(snapshot) = snapshot {
            for key in &stage.params {
                if !snapshot.contains(key) {
                    result.add_error(StagehandError::DanglingDependency {
                        stage: stage.name.clone(),
                        dependency: key.clone(),
                        kind: DanglingKind::Param,
                    });
                }
            }
        }

        // Warn about producers that are only reached through paths
        for producer in pipeline.stages.iter().filter(|p| p.name != stage.name) {
            let consumed = stage.deps.iter().any(|dep| producer.produces(dep));
            if consumed && !stage.depends_on.contains(&producer.name) {
                result.add_warning(format!(
                    "Stage '{}': consumes output of '{}' without listing it in depends_on. \
                     The dependency is added implicitly.",
                    stage.name, producer.name
                ));
            }
        }

        if stage.outs.is_empty() {
            result.add_warning(format!(
                "Stage '{}': declares no outputs, so only its inputs and parameters are tracked",
                stage.name
            ));
        }
    }

    /// List declared inputs that no stage produces and that do not exist yet
    pub fn missing_sources(pipeline: &Pipeline, base_path: &Path) -> Vec<String> {
        let mut missing = Vec::new();

        for stage in &pipeline.stages {
            for dep in &stage.deps {
                let produced = pipeline.stages.iter().any(|s| s.produces(dep));
                if !produced && !base_path.join(dep).exists() {
                    missing.push(format!(
                        "Stage '{}': input not found: {}",
                        stage.name,
                        dep.display()
                    ));
                }
            }
        }

        missing
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<StagehandError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: StagehandError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, message: String) {
        self.warnings.push(message);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Turn the first error into a hard failure
    pub fn into_result(self) -> Result<Vec<String>, StagehandError> {
        match self.errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(self.warnings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline(yaml: &str) -> Pipeline {
        Pipeline::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_validate_empty_pipeline() {
        let result = PipelineValidator::validate(&pipeline("name: empty\nstages: []\n"), None);
        assert!(!result.is_valid());
        assert!(result.errors[0].to_string().contains("no stages"));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let result = PipelineValidator::validate(
            &pipeline(
                r#"
name: test
stages:
  - { name: dup, tool: { type: shell, command: "true" } }
  - { name: dup, tool: { type: shell, command: "false" } }
"#,
            ),
            None,
        );
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(result.errors[0], StagehandError::DuplicateStage { .. }));
    }

    #[test]
    fn test_overlapping_outputs() {
        let result = PipelineValidator::validate(
            &pipeline(
                r#"
name: test
stages:
  - { name: a, tool: { type: shell, command: "x" }, outs: [artifacts] }
  - { name: b, tool: { type: shell, command: "y" }, outs: [artifacts/model.h5] }
"#,
            ),
            None,
        );
        assert!(result
            .errors
            .iter()
            .any(|e| e.to_string().contains("overlaps output")));
    }

    #[test]
    fn test_input_overlapping_own_output() {
        let result = PipelineValidator::validate(
            &pipeline(
                r#"
name: test
stages:
  - { name: a, tool: { type: shell, command: "x" }, deps: [data/raw], outs: [data] }
"#,
            ),
            None,
        );
        assert!(!result.is_valid());
    }

    #[test]
    fn test_unknown_param_key() {
        let snapshot = ConfigSnapshot::from_values(json!({ "root": "." }), json!({ "EPOCHS": 1 })).unwrap();
        let result = PipelineValidator::validate(
            &pipeline(
                r#"
name: test
stages:
  - { name: training, tool: { type: shell, command: "x" }, params: [EPOCHS, MOMENTUM], outs: [m] }
"#,
            ),
            Some(&snapshot),
        );

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].to_string().contains("MOMENTUM"));
    }

    #[test]
    fn test_implicit_dependency_warning() {
        let result = PipelineValidator::validate(
            &pipeline(
                r#"
name: test
stages:
  - { name: first, tool: { type: shell, command: "x" }, outs: [out.json] }
  - { name: second, tool: { type: shell, command: "y" }, deps: [out.json], outs: [final.json] }
"#,
            ),
            None,
        );

        assert!(result.is_valid());
        assert!(result.has_warnings());
        assert!(result.warnings.iter().any(|w| w.contains("implicitly")));
    }

    #[test]
    fn test_into_result_keeps_warnings() {
        let result = PipelineValidator::validate(
            &pipeline("name: t\nstages:\n  - { name: a, tool: { type: shell, command: x } }\n"),
            None,
        );
        let warnings = result.into_result().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("no outputs"));
    }
}
