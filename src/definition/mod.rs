// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Server definition: the declarative pipeline loaded from `definition.yml`.
//!
//! A definition maps stage names to ordered step lists. Nested `stage`
//! steps are flattened (recursively inlined) before execution; flattening
//! detects circular references with a visited-stage set and keeps a depth
//! ceiling as a safety net. Loading validates the schema version, every
//! step type, and all inter-step dependencies up front, so a server never
//! accepts a stage execution for a broken definition.

mod step;
pub mod template;
mod validation;

pub use step::{ExportSpec, FlatStep, Step, StepArgs, StepType};
pub use template::{RendererOptions, TemplateRenderer, TemplateVar, VarKind};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::errors::{CorkError, CorkResult};

/// Ceiling on stage expansion depth; a fallback behind exact cycle detection
pub const MAX_STAGE_DEPTH: usize = 50;

/// Definition file name under the cork directory
pub const DEFINITION_FILE: &str = "definition.yml";

const SUPPORTED_VERSION: i64 = 1;

/// A user parameter declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDecl {
    #[serde(rename = "type", default)]
    pub param_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default)]
    pub is_sensitive: bool,
}

impl ParamDecl {
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// The complete server definition, read-only after loading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDefinition {
    #[serde(default)]
    pub version: i64,

    #[serde(default)]
    pub stages: HashMap<String, Vec<Step>>,

    #[serde(default)]
    pub params: HashMap<String, ParamDecl>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(skip)]
    required_user_params_by_stage: HashMap<String, Vec<String>>,
}

impl ServerDefinition {
    /// Load and validate a definition from a YAML string
    pub fn from_yaml(contents: &str) -> CorkResult<Self> {
        let mut definition: ServerDefinition = serde_yaml::from_str(contents)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Load and validate a definition from a file
    pub fn from_path(path: &Path) -> CorkResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CorkError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_yaml(&contents)
    }

    /// Load the definition from its default location under the cork
    /// directory (`<CORK_DIR>/definition.yml`)
    pub fn from_dir(cork_dir: &Path) -> CorkResult<Self> {
        Self::from_path(&cork_dir.join(DEFINITION_FILE))
    }

    /// Validate the schema version and every stage's dependencies, caching
    /// each stage's required user parameters
    fn validate(&mut self) -> CorkResult<()> {
        if self.version == 0 {
            return Err(CorkError::MissingVersion);
        }
        if self.version != SUPPORTED_VERSION {
            return Err(CorkError::UnsupportedVersion {
                version: self.version,
            });
        }
        self.required_user_params_by_stage = validation::compute_required_user_params(self)?;
        Ok(())
    }

    /// All declared stage names
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.keys().map(String::as_str).collect()
    }

    /// Recursively expand `stage` steps into one linear step sequence
    pub fn flatten_stage(&self, stage_name: &str) -> CorkResult<Vec<FlatStep>> {
        let mut path = Vec::new();
        self.resolve_steps(stage_name, &mut path)
    }

    fn resolve_steps(
        &self,
        stage_name: &str,
        path: &mut Vec<String>,
    ) -> CorkResult<Vec<FlatStep>> {
        if let Some(pos) = path.iter().position(|name| name == stage_name) {
            let mut cycle: Vec<String> = path[pos..].to_vec();
            cycle.push(stage_name.to_string());
            return Err(CorkError::CircularStageReference { cycle });
        }
        if path.len() >= MAX_STAGE_DEPTH {
            return Err(CorkError::RecursionLimit);
        }

        let stage = self
            .stages
            .get(stage_name)
            .ok_or_else(|| CorkError::UnknownStage {
                stage: stage_name.to_string(),
            })?;

        path.push(stage_name.to_string());
        let mut steps = Vec::new();
        for step in stage {
            let step_type = StepType::parse(&step.step_type)?;
            if step_type != StepType::Stage {
                steps.push(FlatStep {
                    step_type,
                    name: step.name.clone(),
                    args: step.args.clone(),
                    outputs: step.outputs.clone(),
                });
                continue;
            }

            let target = step
                .args
                .stage
                .as_deref()
                .filter(|target| !target.is_empty())
                .ok_or(CorkError::MissingStageArg)?;
            steps.extend(self.resolve_steps(target, path)?);
        }
        path.pop();
        Ok(steps)
    }

    /// The statically-computed required user parameters for a stage, in
    /// sorted order. Available for any stage the definition declares,
    /// independent of execution.
    pub fn required_user_params(&self, stage_name: &str) -> CorkResult<&[String]> {
        self.required_user_params_by_stage
            .get(stage_name)
            .map(Vec::as_slice)
            .ok_or_else(|| CorkError::UnknownStage {
                stage: stage_name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_DEFINITION: &str = r#"
version: 1

params:
  build_param:
    type: string
    description: "Some build param"

stages:
  validate:
    - name: lint
      type: container
      args:
        image: registry.example.com/node-lint:v1
        command: "/usr/sbin/lint-everything"
      match_tags:
        - ci

    - name: security
      type: container
      args:
        image: registry.example.com/node-security:v1
      match_tags:
        - ci

  build:
    - type: stage
      args:
        stage: validate

    - name: build_container
      type: command
      args:
        command: build
        params:
          build_param: '{{ param "build_param" }}'
      outputs:
        - app_image

    # Export a key/value from this cork stage
    - type: export
      args:
        export:
          name: app_image
          value: '{{ output "build_container.app_image" }}'

  test:
    - type: stage
      args:
        stage: build

    - name: test
      type: command
      args:
        command: test
        params:
          app_image: '{{ output "build_container.app_image" }}'

  default:
    - type: stage
      args:
        stage: test
"#;

    const CIRCULAR_DEFINITION: &str = r#"
version: 1

stages:
  foo:
    - type: stage
      args:
        stage: bar

  bar:
    - type: stage
      args:
        stage: foo

  default:
    - type: stage
      args:
        stage: foo
"#;

    const INVALID_STEP_TYPE: &str = r#"
version: 1

stages:
  foo:
    - type: blah
"#;

    const UNAVAILABLE_OUTPUT_DEFINITION: &str = r#"
version: 1

params:
  foo:
    type: string
    description: This is foo

stages:
  build:
    - name: build_container
      type: command
      args:
        command: build_container
        params:
          foo: '{{ param "foo" }}'
          not_available: '{{ output "unknown_step.not_available" }}'
      outputs:
        - app_image
"#;

    const UNDECLARED_PARAM_DEFINITION: &str = r#"
version: 1

stages:
  foo:
    - name: foo
      type: command
      args:
        command: foo
        params:
          foo: '{{ param "foo" }}'
          bar: '{{ param "bar" }}'
"#;

    const DUPLICATE_STEP_NAME_DEFINITION: &str = r#"
version: 1

stages:
  first:
    - name: foo
      type: command
      args:
        command: one

  second:
    - name: foo
      type: command
      args:
        command: two

  default:
    - type: stage
      args:
        stage: first
    - type: stage
      args:
        stage: second
"#;

    const MISSING_STAGE_ARG_DEFINITION: &str = r#"
version: 1

stages:
  default:
    - type: stage
"#;

    #[test]
    fn test_good_definition_flattens_default_to_five_steps() {
        let definition = ServerDefinition::from_yaml(GOOD_DEFINITION).unwrap();
        let steps = definition.flatten_stage("default").unwrap();

        let labels: Vec<String> = steps
            .iter()
            .map(|step| format!("{}:{}", step.step_type, step.name))
            .collect();
        assert_eq!(
            labels,
            vec![
                "container:lint",
                "container:security",
                "command:build_container",
                "export:",
                "command:test",
            ]
        );
    }

    #[test]
    fn test_flattened_list_never_contains_stage_steps() {
        let definition = ServerDefinition::from_yaml(GOOD_DEFINITION).unwrap();
        for stage_name in definition.stage_names() {
            let steps = definition.flatten_stage(stage_name).unwrap();
            assert!(steps.iter().all(|s| s.step_type != StepType::Stage));
        }
    }

    #[test]
    fn test_required_user_params_round_trip() {
        let definition = ServerDefinition::from_yaml(GOOD_DEFINITION).unwrap();
        assert_eq!(
            definition.required_user_params("default").unwrap(),
            ["build_param".to_string()]
        );
        assert_eq!(
            definition.required_user_params("build").unwrap(),
            ["build_param".to_string()]
        );
        // validate has no templated params at all
        assert!(definition.required_user_params("validate").unwrap().is_empty());
    }

    #[test]
    fn test_required_user_params_unknown_stage() {
        let definition = ServerDefinition::from_yaml(GOOD_DEFINITION).unwrap();
        assert!(matches!(
            definition.required_user_params("nope"),
            Err(CorkError::UnknownStage { .. })
        ));
    }

    #[test]
    fn test_missing_version_fails() {
        let err = ServerDefinition::from_yaml("stages: {}").unwrap_err();
        assert!(matches!(err, CorkError::MissingVersion));
    }

    #[test]
    fn test_unsupported_version_fails() {
        let err = ServerDefinition::from_yaml("version: 2\nstages: {}").unwrap_err();
        assert!(matches!(err, CorkError::UnsupportedVersion { version: 2 }));
    }

    #[test]
    fn test_unknown_step_type_fails() {
        let err = ServerDefinition::from_yaml(INVALID_STEP_TYPE).unwrap_err();
        assert!(matches!(err, CorkError::UnknownStepType { .. }));
    }

    #[test]
    fn test_circular_stages_fail_with_exact_cycle() {
        let err = ServerDefinition::from_yaml(CIRCULAR_DEFINITION).unwrap_err();
        match err {
            CorkError::CircularStageReference { cycle } => {
                // The cycle closes on the stage it started from
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.len() >= 3);
            }
            other => panic!("expected circular reference error, got {other:?}"),
        }
    }

    #[test]
    fn test_output_used_before_available_fails() {
        let err = ServerDefinition::from_yaml(UNAVAILABLE_OUTPUT_DEFINITION).unwrap_err();
        assert!(matches!(err, CorkError::OutputNotAvailable { .. }));
    }

    #[test]
    fn test_undeclared_param_fails() {
        let err = ServerDefinition::from_yaml(UNDECLARED_PARAM_DEFINITION).unwrap_err();
        assert!(matches!(err, CorkError::UndeclaredParameter { .. }));
    }

    #[test]
    fn test_duplicate_step_names_across_stages_fail() {
        let err = ServerDefinition::from_yaml(DUPLICATE_STEP_NAME_DEFINITION).unwrap_err();
        assert!(matches!(err, CorkError::DuplicateStepName { .. }));
    }

    #[test]
    fn test_duplicate_step_names_fail_even_when_stages_never_meet() {
        // No stage flattens both of these together
        let yaml = r#"
version: 1

stages:
  first:
    - name: foo
      type: command
      args:
        command: one

  second:
    - name: foo
      type: command
      args:
        command: two
"#;
        let err = ServerDefinition::from_yaml(yaml).unwrap_err();
        match err {
            CorkError::DuplicateStepName { step, .. } => assert_eq!(step, "foo"),
            other => panic!("expected duplicate step name error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_stage_arg_fails() {
        let err = ServerDefinition::from_yaml(MISSING_STAGE_ARG_DEFINITION).unwrap_err();
        assert!(matches!(err, CorkError::MissingStageArg));
    }

    #[test]
    fn test_unknown_stage_reference_fails() {
        let yaml = r#"
version: 1
stages:
  default:
    - type: stage
      args:
        stage: ghost
"#;
        let err = ServerDefinition::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, CorkError::UnknownStage { .. }));
    }

    #[test]
    fn test_deep_nesting_hits_recursion_limit() {
        // A non-cyclic chain deeper than the ceiling
        let mut yaml = String::from("version: 1\nstages:\n");
        for i in 0..=MAX_STAGE_DEPTH {
            yaml.push_str(&format!(
                "  s{i}:\n    - type: stage\n      args:\n        stage: s{}\n",
                i + 1
            ));
        }
        yaml.push_str(&format!(
            "  s{}:\n    - name: leaf\n      type: command\n      args:\n        command: leaf\n",
            MAX_STAGE_DEPTH + 1
        ));

        let err = ServerDefinition::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, CorkError::RecursionLimit));
    }

    #[test]
    fn test_stage_names_lists_all_stages() {
        let definition = ServerDefinition::from_yaml(GOOD_DEFINITION).unwrap();
        let mut names = definition.stage_names();
        names.sort_unstable();
        assert_eq!(names, vec!["build", "default", "test", "validate"]);
    }
}
