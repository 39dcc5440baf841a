// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Step runners
//!
//! This module provides the runner trait, the built-in runners for the
//! command / container / export step types, and the immutable registry the
//! executor resolves runners from. `stage` steps never reach a runner;
//! flattening expands them away first.

mod command;
mod container;
mod export;

pub use command::{check_command_path, CommandRunner};
pub use container::ContainerRunner;
pub use export::ExportRunner;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::definition::{FlatStep, StepType};
use crate::errors::{CorkError, CorkResult};
use crate::protocol::ServerEvent;

/// Interactive input forwarded to a running step
#[derive(Debug, Clone)]
pub enum StepInput {
    /// Raw bytes destined for the step's stdin
    Stdin(Vec<u8>),

    /// A signal code for the step's process
    Signal(i32),
}

/// Everything a runner needs to execute one step.
///
/// `step.args` arrive already rendered; runners never touch the template
/// engine. Output frames flow through `events` and interactive input
/// arrives on `input_rx` for as long as the step is active.
pub struct RunContext {
    /// The step to execute, with resolved args
    pub step: FlatStep,

    /// Root of the cork project inside the container
    pub cork_dir: PathBuf,

    /// Working directory steps execute in
    pub work_dir: PathBuf,

    /// The work directory path as seen from the host
    pub host_work_dir: String,

    /// Shared cache directory
    pub cache_dir: String,

    /// Directory the step writes declared output values into
    pub outputs_dir: PathBuf,

    /// Outbound frames (output chunks, exports)
    pub events: mpsc::Sender<ServerEvent>,

    /// Inbound interactive input for the active step
    pub input_rx: mpsc::Receiver<StepInput>,
}

/// Trait for step runners
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute one step to completion.
    ///
    /// A runner streams output through `ctx.events` as it happens and
    /// returns only once the step has finished or failed. Declared output
    /// values are read from `ctx.outputs_dir` by the executor afterwards.
    async fn run(&self, ctx: RunContext) -> CorkResult<()>;
}

/// Immutable runner registry, built once at startup
pub struct RunnerRegistry {
    runners: HashMap<StepType, Arc<dyn StepRunner>>,
}

impl RunnerRegistry {
    /// Build the registry with all built-in runners
    pub fn with_builtins() -> Self {
        let mut runners: HashMap<StepType, Arc<dyn StepRunner>> = HashMap::new();
        runners.insert(StepType::Command, Arc::new(CommandRunner::new()));
        runners.insert(StepType::Container, Arc::new(ContainerRunner::new()));
        runners.insert(StepType::Export, Arc::new(ExportRunner::new()));
        Self { runners }
    }

    /// Resolve the runner for a step type
    pub fn get(&self, step_type: StepType) -> CorkResult<Arc<dyn StepRunner>> {
        self.runners
            .get(&step_type)
            .cloned()
            .ok_or_else(|| CorkError::UnknownRunner {
                step_type: step_type.to_string(),
            })
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
