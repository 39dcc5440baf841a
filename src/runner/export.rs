// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Export runner
//!
//! An `export` step spawns no process; it publishes one already-rendered
//! key/value pair to the client as an `export` frame.

use async_trait::async_trait;
use tracing::warn;

use super::{RunContext, StepRunner};
use crate::errors::{CorkError, CorkResult};
use crate::protocol::ServerEvent;

/// Runner for `export` steps
pub struct ExportRunner;

impl ExportRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExportRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepRunner for ExportRunner {
    async fn run(&self, ctx: RunContext) -> CorkResult<()> {
        let Some(export) = &ctx.step.args.export else {
            warn!(step = %ctx.step.reference_name(), "export step has no export args");
            return Ok(());
        };

        ctx.events
            .send(ServerEvent::Export {
                name: export.name.clone(),
                value: export.value.clone(),
            })
            .await
            .map_err(|_| CorkError::protocol("session closed while sending export"))?;
        Ok(())
    }
}
