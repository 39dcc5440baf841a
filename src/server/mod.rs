// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! The cork server
//!
//! A short-lived, single-tenant TCP server meant to run inside a project's
//! build container. Initialization loads and validates the definition and
//! runs the optional startup hook; a failure there is recorded and reported
//! to every subsequent call instead of crashing the process, so a client
//! can surface the root cause.
//!
//! Each connection is driven by its first frame: `statusRequest` and
//! `killRequest` are answered immediately, `stageExecuteRequest` enters the
//! param negotiation / execution / streaming session.

pub mod environment;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::definition::ServerDefinition;
use crate::errors::{CorkError, CorkResult};
use crate::executor::{ExecutorOptions, StageExecutor};
use crate::protocol::{ClientEvent, EventReader, EventWriter, ParamDefinition, ServerEvent};
use crate::runner::StepInput;

/// Delay between answering a kill request and exiting
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Startup hook path relative to the cork directory
const STARTUP_HOOK: &str = "hooks/startup";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub cork_dir: std::path::PathBuf,
    pub work_dir: std::path::PathBuf,
    pub host_work_dir: String,
    pub cache_dir: String,
    pub port: u16,
}

/// The cork server
pub struct Server {
    definition: Option<Arc<ServerDefinition>>,
    executor: Option<Arc<StageExecutor>>,
    init_error: Option<String>,
    options: ServerOptions,
    execution: Mutex<()>,
    shutdown: Notify,
    kill_requested: AtomicBool,
}

impl Server {
    /// Load the definition and run the startup hook.
    ///
    /// Failures are recorded rather than returned: the server still comes
    /// up and answers every call with the initialization error.
    pub async fn initialize(options: ServerOptions) -> Arc<Self> {
        let mut init_error = None;

        let definition = match ServerDefinition::from_dir(&options.cork_dir) {
            Ok(definition) => Some(Arc::new(definition)),
            Err(e) => {
                warn!(error = %e, "definition failed to load");
                init_error = Some(format!("InitializationError: {e}"));
                None
            }
        };

        if init_error.is_none() {
            if let Err(e) = run_startup_hook(&options).await {
                warn!(error = %e, "startup hook failed");
                init_error = Some(format!("InitializationError: {e}"));
            }
        }

        let executor = definition.as_ref().map(|definition| {
            Arc::new(StageExecutor::new(
                definition.clone(),
                ExecutorOptions {
                    cork_dir: options.cork_dir.clone(),
                    work_dir: options.work_dir.clone(),
                    host_work_dir: options.host_work_dir.clone(),
                    cache_dir: options.cache_dir.clone(),
                },
            ))
        });

        Arc::new(Self {
            definition,
            executor,
            init_error,
            options,
            execution: Mutex::new(()),
            shutdown: Notify::new(),
            kill_requested: AtomicBool::new(false),
        })
    }

    /// The recorded initialization failure, if any
    pub fn init_error(&self) -> Option<&str> {
        self.init_error.as_deref()
    }

    /// Whether a kill request has been accepted
    pub fn kill_requested(&self) -> bool {
        self.kill_requested.load(Ordering::SeqCst)
    }

    /// Accept connections until a kill request arrives, then exit after a
    /// short grace delay so the response frame reaches the client
    pub async fn serve(self: Arc<Self>) -> CorkResult<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.options.port))
            .await
            .map_err(|e| {
                CorkError::transport(format!("failed to bind port {}: {e}", self.options.port))
            })?;
        info!(port = self.options.port, "cork server listening");
        if let Some(message) = &self.init_error {
            warn!(message, "serving with an initialization error");
        }

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    tokio::time::sleep(KILL_GRACE).await;
                    info!("cork server shutting down");
                    std::process::exit(0);
                }
                accepted = listener.accept() => {
                    let (stream, addr) = accepted
                        .map_err(|e| CorkError::transport(format!("accept failed: {e}")))?;
                    debug!(%addr, "accepted connection");
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            warn!(error = %e, "connection failed");
                        }
                    });
                }
            }
        }
    }

    /// Drive one connection from its first frame
    pub async fn handle_connection<S>(self: Arc<Self>, stream: S) -> CorkResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = EventReader::new(read_half);
        let mut writer = EventWriter::new(write_half);

        let Some(first) = reader.recv::<ClientEvent>().await? else {
            return Ok(());
        };

        match first {
            ClientEvent::StatusRequest => match &self.init_error {
                Some(message) => {
                    writer
                        .send(&ServerEvent::Error {
                            message: message.clone(),
                        })
                        .await
                }
                None => writer.send(&ServerEvent::Response { status: 200 }).await,
            },
            ClientEvent::KillRequest => {
                writer.send(&ServerEvent::Response { status: 200 }).await?;
                info!("kill requested");
                self.kill_requested.store(true, Ordering::SeqCst);
                self.shutdown.notify_one();
                Ok(())
            }
            ClientEvent::StageExecuteRequest { stage } => {
                self.execute_session(reader, writer, stage).await
            }
            _ => {
                writer
                    .send(&ServerEvent::Error {
                        message: "Protocol error: connection must open with \
                                  stageExecuteRequest, statusRequest, or killRequest"
                            .to_string(),
                    })
                    .await
            }
        }
    }

    async fn execute_session<R, W>(
        self: Arc<Self>,
        mut reader: EventReader<R>,
        mut writer: EventWriter<W>,
        stage: String,
    ) -> CorkResult<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        if let Some(message) = &self.init_error {
            return writer
                .send(&ServerEvent::Error {
                    message: message.clone(),
                })
                .await;
        }
        let (definition, executor) = match (&self.definition, &self.executor) {
            (Some(definition), Some(executor)) => (definition.clone(), executor.clone()),
            _ => {
                return writer
                    .send(&ServerEvent::Error {
                        message: "InitializationError: server has no definition".to_string(),
                    })
                    .await
            }
        };

        let Ok(_guard) = self.execution.try_lock() else {
            return writer
                .send(&ServerEvent::Error {
                    message: "Another stage execution is already in progress".to_string(),
                })
                .await;
        };

        let required = match definition.required_user_params(&stage) {
            Ok(required) => required,
            Err(e) => {
                return writer
                    .send(&ServerEvent::Error {
                        message: e.to_string(),
                    })
                    .await
            }
        };

        let mut param_definitions = HashMap::new();
        for name in required {
            if let Some(decl) = definition.params.get(name) {
                param_definitions.insert(
                    name.clone(),
                    ParamDefinition {
                        param_type: decl.param_type.clone(),
                        description: decl.description.clone(),
                        default: decl.default.clone().unwrap_or_default(),
                        has_default: decl.has_default(),
                        is_sensitive: decl.is_sensitive,
                    },
                );
            }
        }
        writer
            .send(&ServerEvent::ParamsRequest { param_definitions })
            .await?;

        let params = match reader.recv::<ClientEvent>().await? {
            Some(ClientEvent::ParamsResponse { params }) => params,
            Some(_) => {
                return writer
                    .send(&ServerEvent::Error {
                        message: "Protocol error: expected paramsResponse".to_string(),
                    })
                    .await
            }
            None => {
                return Err(CorkError::protocol(
                    "client closed before sending paramsResponse",
                ))
            }
        };

        info!(stage, "executing stage");
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let (input_tx, input_rx) = mpsc::channel(8);

        let stage_name = stage.clone();
        let exec_handle = tokio::spawn(async move {
            executor
                .execute_stage(&stage_name, params, events_tx, input_rx)
                .await
        });

        // Pump inbound input/signal frames toward the active step. A read
        // failure is forwarded as an input error so the executor aborts.
        let pump = tokio::spawn(async move {
            loop {
                match reader.recv::<ClientEvent>().await {
                    Ok(Some(ClientEvent::Input { bytes })) => {
                        if input_tx.send(Ok(StepInput::Stdin(bytes))).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(ClientEvent::Signal { code })) => {
                        if input_tx.send(Ok(StepInput::Signal(code))).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(_)) => {
                        let _ = input_tx
                            .send(Err(CorkError::protocol(
                                "unexpected frame during stage execution",
                            )))
                            .await;
                        break;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = input_tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        while let Some(event) = events_rx.recv().await {
            writer.send(&event).await?;
        }

        let result = exec_handle.await;
        pump.abort();

        match result {
            Ok(Ok(())) => {
                info!(stage, "stage completed");
                writer.send(&ServerEvent::End).await
            }
            Ok(Err(e)) => {
                warn!(stage, error = %e, "stage failed");
                let failure = CorkError::StageFailed {
                    stage,
                    message: e.to_string(),
                };
                writer
                    .send(&ServerEvent::Error {
                        message: failure.to_string(),
                    })
                    .await
            }
            Err(e) => {
                warn!(stage, error = %e, "executor task failed");
                writer
                    .send(&ServerEvent::Error {
                        message: format!("Stage '{stage}' failed: executor task failed"),
                    })
                    .await
            }
        }
    }
}

/// Run `<CORK_DIR>/hooks/startup` if present. A missing hook is fine; a
/// failing one is an initialization error.
async fn run_startup_hook(options: &ServerOptions) -> CorkResult<()> {
    let hook = options.cork_dir.join(STARTUP_HOOK);
    if !hook.exists() {
        debug!("no startup hook");
        return Ok(());
    }

    info!(hook = %hook.display(), "running startup hook");
    let output = tokio::process::Command::new(&hook)
        .current_dir(&options.work_dir)
        .output()
        .await
        .map_err(|e| CorkError::Initialization {
            message: format!("Startup hook could not run: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CorkError::Initialization {
            message: format!(
                "Startup hook exited with status {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ),
        });
    }
    Ok(())
}
