// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Container runner
//!
//! `container` steps mark a boundary with an external collaborator: the
//! surrounding tooling owns the container lifecycle. The runner validates
//! the resolved args and completes, so a definition that declares container
//! steps still flattens, validates, and executes end to end.

use async_trait::async_trait;
use tracing::info;

use super::{RunContext, StepRunner};
use crate::errors::{CorkError, CorkResult};

/// Runner for `container` steps
pub struct ContainerRunner;

impl ContainerRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ContainerRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepRunner for ContainerRunner {
    async fn run(&self, ctx: RunContext) -> CorkResult<()> {
        let image = ctx
            .step
            .args
            .image
            .as_deref()
            .filter(|image| !image.is_empty())
            .ok_or_else(|| {
                CorkError::command_invalid(&ctx.step.reference_name(), "No image specified")
            })?;

        info!(
            step = %ctx.step.reference_name(),
            image,
            command = ctx.step.args.command.as_deref().unwrap_or_default(),
            "container step delegated to external lifecycle"
        );
        Ok(())
    }
}
