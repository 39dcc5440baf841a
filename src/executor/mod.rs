// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Stage executor
//!
//! Runs a flattened stage one step at a time. Each step's runner executes
//! in its own task while the executor multiplexes over the runner's
//! completion and the session's interactive input, forwarding input frames
//! to the active step without ever blocking its output stream.
//!
//! After a step completes, every output key it declared must exist as a
//! file in the step's outputs directory; the captured values feed the
//! template context of later steps.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::definition::{FlatStep, RendererOptions, ServerDefinition, TemplateRenderer};
use crate::errors::{CorkError, CorkResult};
use crate::protocol::ServerEvent;
use crate::runner::{RunContext, RunnerRegistry, StepInput};

/// Directory layout a stage executes against
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Root of the cork project (definition, commands, hooks)
    pub cork_dir: PathBuf,

    /// Working directory for command steps
    pub work_dir: PathBuf,

    /// The work directory as seen from the host
    pub host_work_dir: String,

    /// Shared cache directory
    pub cache_dir: String,
}

/// Executes stages of one loaded definition
pub struct StageExecutor {
    definition: Arc<ServerDefinition>,
    registry: RunnerRegistry,
    options: ExecutorOptions,
}

impl StageExecutor {
    pub fn new(definition: Arc<ServerDefinition>, options: ExecutorOptions) -> Self {
        Self {
            definition,
            registry: RunnerRegistry::with_builtins(),
            options,
        }
    }

    /// Execute one stage to completion.
    ///
    /// `events` carries output and export frames to the session.
    /// `input_rx` delivers interactive input; an `Err` item means the
    /// session transport failed, which aborts the active step and the
    /// stage.
    pub async fn execute_stage(
        &self,
        stage_name: &str,
        user_params: HashMap<String, String>,
        events: mpsc::Sender<ServerEvent>,
        mut input_rx: mpsc::Receiver<CorkResult<StepInput>>,
    ) -> CorkResult<()> {
        let steps = self.definition.flatten_stage(stage_name)?;

        let mut renderer = TemplateRenderer::with_options(RendererOptions {
            work_dir: self.options.work_dir.to_string_lossy().to_string(),
            host_work_dir: self.options.host_work_dir.clone(),
            cache_dir: self.options.cache_dir.clone(),
            user_params,
        });

        // Dropped (and cleaned up) when the stage finishes
        let outputs_root = tempfile::tempdir()?;

        for (index, step) in steps.into_iter().enumerate() {
            debug!(stage = stage_name, step = %step.reference_name(), "executing step");

            renderer.reset_var_tracker();
            let resolved_args = step.args.resolve(&mut renderer)?;

            let outputs_dir = outputs_root.path().join(index.to_string());
            std::fs::create_dir_all(&outputs_dir).map_err(|e| CorkError::FileWriteError {
                path: outputs_dir.clone(),
                error: e.to_string(),
            })?;

            let runner = self.registry.get(step.step_type)?;
            let (step_input_tx, step_input_rx) = mpsc::channel(8);
            let ctx = RunContext {
                step: FlatStep {
                    step_type: step.step_type,
                    name: step.name.clone(),
                    args: resolved_args,
                    outputs: step.outputs.clone(),
                },
                cork_dir: self.options.cork_dir.clone(),
                work_dir: self.options.work_dir.clone(),
                host_work_dir: self.options.host_work_dir.clone(),
                cache_dir: self.options.cache_dir.clone(),
                outputs_dir: outputs_dir.clone(),
                events: events.clone(),
                input_rx: step_input_rx,
            };

            let mut handle = tokio::spawn(async move { runner.run(ctx).await });
            let mut input_open = true;
            let result = loop {
                tokio::select! {
                    joined = &mut handle => {
                        break match joined {
                            Ok(result) => result,
                            Err(e) => Err(CorkError::Io {
                                message: format!("runner task failed: {e}"),
                            }),
                        };
                    }
                    maybe_input = input_rx.recv(), if input_open => {
                        match maybe_input {
                            Some(Ok(input)) => {
                                // Runner may have stopped listening; not fatal
                                let _ = step_input_tx.send(input).await;
                            }
                            Some(Err(e)) => {
                                handle.abort();
                                break Err(e);
                            }
                            None => input_open = false,
                        }
                    }
                }
            };
            drop(step_input_tx);
            result?;

            for key in &step.outputs {
                let value_path = outputs_dir.join(key);
                let value = std::fs::read_to_string(&value_path).map_err(|_| {
                    CorkError::CommandInvalid {
                        name: step.reference_name(),
                        message: format!("Expected output value '{key}' could not be found"),
                    }
                })?;
                renderer.add_output(&step.name, key, value.trim());
            }
        }

        Ok(())
    }
}
