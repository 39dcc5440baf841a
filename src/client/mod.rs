// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! The cork client
//!
//! Connects to a cork server, drives the stage execution session (param
//! negotiation, raw output passthrough, stdin forwarding, export
//! collection), and exposes the `status`/`kill` control calls. Exports are
//! persisted as one flat JSON object.

use colored::Colorize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write as _;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::errors::{CorkError, CorkResult};
use crate::protocol::{
    ClientEvent, EventReader, EventWriter, ParamDefinition, ServerEvent, StreamName,
};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Resolves a value for a required parameter the caller did not supply
/// and the definition gives no default for
pub trait ParamProvider {
    fn resolve(&mut self, name: &str, definition: &ParamDefinition) -> CorkResult<String>;
}

/// Prompts on the terminal for a parameter value. An empty answer accepts
/// the declared default when one exists. Sensitive values are read with
/// terminal echo disabled.
pub struct InteractivePrompt;

impl ParamProvider for InteractivePrompt {
    fn resolve(&mut self, name: &str, definition: &ParamDefinition) -> CorkResult<String> {
        if !definition.description.is_empty() {
            println!("{}", definition.description.dimmed());
        }
        let marker = if definition.is_sensitive {
            " (sensitive)"
        } else {
            ""
        };
        print!("{} {}{}: ", "?".green(), name.bold(), marker);
        std::io::stdout().flush()?;

        let value = if definition.is_sensitive {
            read_masked_line()?
        } else {
            read_plain_line()?
        };
        if value.is_empty() && definition.has_default {
            Ok(definition.default.clone())
        } else {
            Ok(value)
        }
    }
}

fn read_plain_line() -> CorkResult<String> {
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Clear the echo flag but keep the user's newline visible
fn masked_lflag(flags: libc::tcflag_t) -> libc::tcflag_t {
    (flags & !libc::ECHO) | libc::ECHONL
}

/// Read one line with terminal echo disabled, restoring the terminal
/// state afterwards. Falls back to a plain read when stdin is not a
/// terminal.
fn read_masked_line() -> CorkResult<String> {
    let fd = libc::STDIN_FILENO;
    let mut term = std::mem::MaybeUninit::<libc::termios>::uninit();
    if unsafe { libc::tcgetattr(fd, term.as_mut_ptr()) } != 0 {
        return read_plain_line();
    }
    let saved = unsafe { term.assume_init() };

    let mut masked = saved;
    masked.c_lflag = masked_lflag(masked.c_lflag);
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &masked) } != 0 {
        return read_plain_line();
    }

    let result = read_plain_line();
    unsafe {
        libc::tcsetattr(fd, libc::TCSANOW, &saved);
    }
    result
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
}

/// A client for one cork server
pub struct Client {
    options: ClientOptions,
}

impl Client {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }

    /// Connect with a bounded fixed-interval retry, giving a fresh server
    /// time to come up
    async fn connect(&self) -> CorkResult<TcpStream> {
        let addr = format!("{}:{}", self.options.host, self.options.port);
        let mut last_error = String::new();
        for attempt in 1..=CONNECT_ATTEMPTS {
            match TcpStream::connect(&addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(attempt, error = %e, "connect attempt failed");
                    last_error = e.to_string();
                }
            }
            if attempt < CONNECT_ATTEMPTS {
                tokio::time::sleep(CONNECT_INTERVAL).await;
            }
        }
        Err(CorkError::transport(format!(
            "could not connect to {addr}: {last_error}"
        )))
    }

    /// Ask the server whether it is healthy
    pub async fn status(&self) -> CorkResult<u16> {
        let stream = self.connect().await?;
        control_call(stream, &ClientEvent::StatusRequest).await
    }

    /// Ask the server to shut down
    pub async fn kill(&self) -> CorkResult<u16> {
        let stream = self.connect().await?;
        control_call(stream, &ClientEvent::KillRequest).await
    }

    /// Execute a stage and return the exports it produced
    pub async fn execute_stage(
        &self,
        stage: &str,
        overrides: HashMap<String, String>,
        provider: &mut dyn ParamProvider,
        forward_stdin: bool,
    ) -> CorkResult<BTreeMap<String, String>> {
        let stream = self.connect().await?;
        run_stage_session(stream, stage, overrides, provider, forward_stdin).await
    }
}

/// Send one control frame and interpret the single response
pub async fn control_call<S>(stream: S, request: &ClientEvent) -> CorkResult<u16>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = EventReader::new(read_half);
    let mut writer = EventWriter::new(write_half);

    writer.send(request).await?;
    match reader.recv::<ServerEvent>().await? {
        Some(ServerEvent::Response { status }) => Ok(status),
        Some(ServerEvent::Error { message }) => Err(server_error(message)),
        Some(other) => Err(CorkError::protocol(format!(
            "unexpected response frame: {other:?}"
        ))),
        None => Err(CorkError::transport("server closed the connection")),
    }
}

/// Drive a full stage execution session over an established stream
pub async fn run_stage_session<S>(
    stream: S,
    stage: &str,
    overrides: HashMap<String, String>,
    provider: &mut dyn ParamProvider,
    forward_stdin: bool,
) -> CorkResult<BTreeMap<String, String>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = EventReader::new(read_half);
    let mut writer = EventWriter::new(write_half);

    writer
        .send(&ClientEvent::StageExecuteRequest {
            stage: stage.to_string(),
        })
        .await?;

    // Params come first; anything else here ends the session
    let param_definitions = match reader.recv::<ServerEvent>().await? {
        Some(ServerEvent::ParamsRequest { param_definitions }) => param_definitions,
        Some(ServerEvent::Error { message }) => return Err(server_error(message)),
        Some(other) => {
            return Err(CorkError::protocol(format!(
                "expected paramsRequest, got {other:?}"
            )))
        }
        None => return Err(CorkError::transport("server closed the connection")),
    };

    let params = resolve_params(&param_definitions, &overrides, provider)?;
    writer.send(&ClientEvent::ParamsResponse { params }).await?;

    // From here the write side only carries interactive input
    let stdin_task = forward_stdin.then(|| {
        tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let frame = ClientEvent::Input {
                            bytes: buf[..n].to_vec(),
                        };
                        if writer.send(&frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    });

    let mut exports = BTreeMap::new();
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let result = loop {
        match reader.recv::<ServerEvent>().await? {
            Some(ServerEvent::Output { bytes, stream }) => {
                let write = match stream {
                    StreamName::Stdout => stdout.write_all(&bytes).await,
                    StreamName::Stderr => stderr.write_all(&bytes).await,
                };
                if let Err(e) = write {
                    warn!(error = %e, "failed to relay output");
                }
                let _ = stdout.flush().await;
                let _ = stderr.flush().await;
            }
            Some(ServerEvent::Export { name, value }) => {
                exports.insert(name, value);
            }
            Some(ServerEvent::End) => break Ok(exports),
            Some(ServerEvent::Error { message }) => break Err(stage_error(stage, message)),
            Some(other) => {
                break Err(CorkError::protocol(format!(
                    "unexpected frame during execution: {other:?}"
                )))
            }
            None => {
                break Err(CorkError::transport(
                    "server closed the connection before the stage finished",
                ))
            }
        }
    };

    if let Some(task) = stdin_task {
        task.abort();
    }
    result
}

/// Resolve values for every requested parameter: caller override first,
/// then the declared default, then the provider
fn resolve_params(
    definitions: &HashMap<String, ParamDefinition>,
    overrides: &HashMap<String, String>,
    provider: &mut dyn ParamProvider,
) -> CorkResult<HashMap<String, String>> {
    let mut names: Vec<&String> = definitions.keys().collect();
    names.sort_unstable();

    let mut params = HashMap::new();
    for name in names {
        let definition = &definitions[name];
        let value = if let Some(value) = overrides.get(name) {
            value.clone()
        } else if definition.has_default {
            definition.default.clone()
        } else {
            provider.resolve(name, definition)?
        };
        params.insert(name.clone(), value);
    }
    Ok(params)
}

/// Persist exports as a flat JSON object
pub fn write_exports(path: &Path, exports: &BTreeMap<String, String>) -> CorkResult<()> {
    let json = serde_json::to_string_pretty(exports)?;
    std::fs::write(path, json).map_err(|e| CorkError::FileWriteError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

fn server_error(message: String) -> CorkError {
    if message.starts_with("InitializationError") {
        CorkError::Initialization { message }
    } else {
        CorkError::protocol(message)
    }
}

fn stage_error(stage: &str, message: String) -> CorkError {
    if message.starts_with("InitializationError") {
        return CorkError::Initialization { message };
    }
    let prefix = format!("Stage '{stage}' failed: ");
    let message = message
        .strip_prefix(&prefix)
        .map(str::to_string)
        .unwrap_or(message);
    CorkError::StageFailed {
        stage: stage.to_string(),
        message,
    }
}
