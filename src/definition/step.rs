// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Step schema: the unit of work inside a stage.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::template::TemplateRenderer;
use crate::errors::{CorkError, CorkResult};

/// The fixed set of step types.
///
/// A `Stage` step only exists in the declarative definition; flattening
/// replaces it with the referenced stage's steps, so a flattened step list
/// never contains one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Stage,
    Container,
    Command,
    Export,
}

impl StepType {
    /// Parse a step type string from the definition file
    pub fn parse(s: &str) -> CorkResult<Self> {
        match s {
            "stage" => Ok(Self::Stage),
            "container" => Ok(Self::Container),
            "command" => Ok(Self::Command),
            "export" => Ok(Self::Export),
            other => Err(CorkError::UnknownStepType {
                step_type: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stage => "stage",
            Self::Container => "container",
            Self::Command => "command",
            Self::Export => "export",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Export variable declaration inside an `export` step's args
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub value: String,
}

/// A step's arguments.
///
/// Which fields are meaningful depends on the step type: `image`/`command`
/// for container steps, `command`/`params` for command steps, `stage` for
/// stage references, `export` for export steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportSpec>,
}

impl StepArgs {
    /// Render every templated field against the current context.
    ///
    /// Each render records the template variables it referenced, which is
    /// what the dependency validator inspects between steps.
    pub fn resolve(&self, renderer: &mut TemplateRenderer) -> CorkResult<StepArgs> {
        let render_opt = |renderer: &mut TemplateRenderer,
                          value: &Option<String>|
         -> CorkResult<Option<String>> {
            match value {
                Some(v) => Ok(Some(renderer.render(v)?)),
                None => Ok(None),
            }
        };

        let image = render_opt(renderer, &self.image)?;
        let command = render_opt(renderer, &self.command)?;
        let stage = render_opt(renderer, &self.stage)?;

        let export = match &self.export {
            Some(export) => Some(ExportSpec {
                name: renderer.render(&export.name)?,
                value: renderer.render(&export.value)?,
            }),
            None => None,
        };

        let mut params = HashMap::new();
        for (key, value) in &self.params {
            params.insert(key.clone(), renderer.render(value)?);
        }

        Ok(StepArgs {
            image,
            command,
            stage,
            params,
            export,
        })
    }
}

/// A step as declared in the definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step type string; validated against [`StepType`] during flattening
    #[serde(rename = "type")]
    pub step_type: String,

    /// Optional step name; required for steps that declare outputs, and
    /// unique across the whole flattened definition
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub args: StepArgs,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_tags: Vec<String>,

    /// Output keys this step promises to produce
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
}

/// A step after stage flattening: the type has been resolved to the tagged
/// enum and `stage` steps have been expanded away.
#[derive(Debug, Clone)]
pub struct FlatStep {
    pub step_type: StepType,
    pub name: String,
    pub args: StepArgs,
    pub outputs: Vec<String>,
}

impl FlatStep {
    /// Human-readable name for error messages
    pub fn reference_name(&self) -> String {
        if self.name.is_empty() {
            format!("<unnamed {} step>", self.step_type)
        } else {
            self.name.clone()
        }
    }
}
