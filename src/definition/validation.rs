// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Dependency validation.
//!
//! Walks every stage's flattened step list with a simulated render pass to
//! discover the complete set of required user parameters, and to reject
//! definitions that reference a step output before the producing step has
//! run, use an undeclared parameter, or reuse a step name. Runs once at
//! load time; a definition that fails here never executes anything.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::template::{RendererOptions, TemplateRenderer, VarKind};
use super::ServerDefinition;
use crate::errors::{CorkError, CorkResult};

/// Compute the required user parameters for every stage, failing on the
/// first dependency violation
pub(super) fn compute_required_user_params(
    definition: &ServerDefinition,
) -> CorkResult<HashMap<String, Vec<String>>> {
    check_unique_step_names(definition)?;

    let mut by_stage = HashMap::new();
    for stage_name in definition.stages.keys() {
        by_stage.insert(stage_name.clone(), walk_stage(definition, stage_name)?);
    }
    Ok(by_stage)
}

/// Named steps must be unique across the whole definition, even between
/// stages that never meet in one flattening
fn check_unique_step_names(definition: &ServerDefinition) -> CorkResult<()> {
    let mut stage_names: Vec<&String> = definition.stages.keys().collect();
    stage_names.sort_unstable();

    let mut seen: HashSet<&str> = HashSet::new();
    for stage_name in stage_names {
        for step in &definition.stages[stage_name] {
            if step.name.is_empty() {
                continue;
            }
            if !seen.insert(&step.name) {
                return Err(CorkError::DuplicateStepName {
                    step: step.name.clone(),
                    stage: stage_name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn walk_stage(definition: &ServerDefinition, stage_name: &str) -> CorkResult<Vec<String>> {
    let steps = definition.flatten_stage(stage_name)?;

    let mut renderer = TemplateRenderer::with_options(RendererOptions::default());
    let mut required_user_params: BTreeSet<String> = BTreeSet::new();
    let mut available_outputs: HashSet<String> = HashSet::new();
    let mut used_step_names: HashSet<String> = HashSet::new();

    for step in &steps {
        if !step.name.is_empty() && !used_step_names.insert(step.name.clone()) {
            return Err(CorkError::DuplicateStepName {
                step: step.name.clone(),
                stage: stage_name.to_string(),
            });
        }

        renderer.reset_var_tracker();
        step.args.resolve(&mut renderer)?;

        for var in renderer.required_vars() {
            match var.kind {
                VarKind::User => {
                    required_user_params.insert(var.lookup);
                }
                VarKind::Output => {
                    if !available_outputs.contains(&var.lookup) {
                        return Err(CorkError::OutputNotAvailable {
                            lookup: var.lookup,
                            step: step.reference_name(),
                        });
                    }
                }
            }
        }

        for output_name in &step.outputs {
            available_outputs.insert(format!("{}.{}", step.name, output_name));
        }
    }

    for param in &required_user_params {
        if !definition.params.contains_key(param) {
            return Err(CorkError::UndeclaredParameter {
                param: param.clone(),
            });
        }
    }

    Ok(required_user_params.into_iter().collect())
}
