// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Command runner
//!
//! Executes project-defined commands: executables at
//! `<CORK_DIR>/commands/<name>`. Output is streamed as it is produced and
//! interactive input is forwarded into the child's stdin, so a command may
//! prompt the user mid-run. Step params and the ambient directory contract
//! are passed to the child through its environment.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use super::{RunContext, StepInput, StepRunner};
use crate::errors::{CorkError, CorkResult};
use crate::protocol::{ServerEvent, StreamName};

/// Ceiling on symlink hops while resolving a command path
const MAX_SYMLINK_DEPTH: usize = 10;

/// Resolve and vet a command executable.
///
/// The command must resolve (through at most [`MAX_SYMLINK_DEPTH`] symlink
/// hops) to a regular file the server process may execute: either the
/// world-execute bit is set, or the file shares the server's effective
/// uid or gid and has a matching execute bit.
pub fn check_command_path(cork_dir: &Path, name: &str) -> CorkResult<PathBuf> {
    let mut path = cork_dir.join("commands").join(name);
    let mut depth = 0;

    let metadata = loop {
        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CorkError::CommandDoesNotExist {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(CorkError::command_invalid(name, e)),
        };

        if !metadata.file_type().is_symlink() {
            break metadata;
        }

        depth += 1;
        if depth > MAX_SYMLINK_DEPTH {
            return Err(CorkError::command_invalid(
                name,
                "Too many levels of symbolic links",
            ));
        }
        let target =
            std::fs::read_link(&path).map_err(|e| CorkError::command_invalid(name, e))?;
        path = if target.is_absolute() {
            target
        } else {
            match path.parent() {
                Some(parent) => parent.join(target),
                None => target,
            }
        };
    };

    if !metadata.is_file() {
        return Err(CorkError::command_invalid(name, "Not a regular file"));
    }

    let mode = metadata.mode();
    if mode & 0o001 != 0 {
        return Ok(path);
    }

    let euid = unsafe { libc::geteuid() };
    let egid = unsafe { libc::getegid() };
    if metadata.uid() != euid && metadata.gid() != egid {
        return Err(CorkError::command_invalid(
            name,
            "No permission to execute command",
        ));
    }
    if mode & 0o110 == 0 {
        return Err(CorkError::command_invalid(name, "Not executable"));
    }

    Ok(path)
}

/// Environment overlay handed to a command's child process.
///
/// Each step param becomes `CORK_PARAM_<NAME>` plus the bare upper-cased
/// name kept for commands written against the older contract. The child
/// sees `CACHE_DIR` rather than `CORK_CACHE_DIR`.
fn step_env(ctx: &RunContext) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for (key, value) in &ctx.step.args.params {
        let upper = key.to_uppercase();
        env.insert(format!("CORK_PARAM_{upper}"), value.clone());
        env.insert(upper, value.clone());
    }
    env.insert(
        "CORK_DIR".to_string(),
        ctx.cork_dir.to_string_lossy().to_string(),
    );
    env.insert(
        "CORK_WORK_DIR".to_string(),
        ctx.work_dir.to_string_lossy().to_string(),
    );
    env.insert("CORK_HOST_WORK_DIR".to_string(), ctx.host_work_dir.clone());
    env.insert("CACHE_DIR".to_string(), ctx.cache_dir.clone());
    env.insert(
        "CORK_OUTPUTS_DIR".to_string(),
        ctx.outputs_dir.to_string_lossy().to_string(),
    );
    env
}

async fn stream_output<R: AsyncRead + Unpin>(
    mut reader: R,
    stream: StreamName,
    events: mpsc::Sender<ServerEvent>,
) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let event = ServerEvent::Output {
                    bytes: buf[..n].to_vec(),
                    stream,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Runner for `command` steps
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepRunner for CommandRunner {
    async fn run(&self, ctx: RunContext) -> CorkResult<()> {
        let name = ctx
            .step
            .args
            .command
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                CorkError::command_invalid(&ctx.step.reference_name(), "No command specified")
            })?;

        let path = check_command_path(&ctx.cork_dir, &name)?;
        debug!(command = %name, path = %path.display(), "running command step");

        let mut child = Command::new(&path)
            .current_dir(&ctx.work_dir)
            .envs(step_env(&ctx))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CorkError::command_invalid(&name, e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        let stdout_task = stdout.map(|out| {
            tokio::spawn(stream_output(out, StreamName::Stdout, ctx.events.clone()))
        });
        let stderr_task = stderr.map(|err| {
            tokio::spawn(stream_output(err, StreamName::Stderr, ctx.events.clone()))
        });

        // Forward interactive input until the session closes the channel.
        // Signal codes are logged and dropped; the child dies with the
        // session either way through kill_on_drop.
        let mut input_rx = ctx.input_rx;
        let stdin_task = tokio::spawn(async move {
            let Some(mut stdin) = stdin else { return };
            while let Some(input) = input_rx.recv().await {
                match input {
                    StepInput::Stdin(bytes) => {
                        if stdin.write_all(&bytes).await.is_err() {
                            break;
                        }
                        let _ = stdin.flush().await;
                    }
                    StepInput::Signal(code) => {
                        debug!(code, "dropping signal for command step");
                    }
                }
            }
        });

        let status = child
            .wait()
            .await
            .map_err(|e| CorkError::command_invalid(&name, e))?;

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }
        stdin_task.abort();

        if !status.success() {
            return Err(CorkError::CommandFailed {
                name,
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FlatStep, StepArgs, StepType};
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::TempDir;

    fn write_command(cork_dir: &Path, name: &str, script: &str, mode: u32) -> PathBuf {
        let commands = cork_dir.join("commands");
        std::fs::create_dir_all(&commands).unwrap();
        let path = commands.join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    fn make_context(
        cork_dir: &Path,
        command: &str,
        params: HashMap<String, String>,
    ) -> (RunContext, mpsc::Receiver<ServerEvent>, mpsc::Sender<StepInput>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (input_tx, input_rx) = mpsc::channel(8);
        let ctx = RunContext {
            step: FlatStep {
                step_type: StepType::Command,
                name: "test_step".to_string(),
                args: StepArgs {
                    command: Some(command.to_string()),
                    params,
                    ..Default::default()
                },
                outputs: vec![],
            },
            cork_dir: cork_dir.to_path_buf(),
            work_dir: cork_dir.to_path_buf(),
            host_work_dir: "/host/work".to_string(),
            cache_dir: "/cache".to_string(),
            outputs_dir: cork_dir.join("outputs"),
            events: events_tx,
            input_rx,
        };
        (ctx, events_rx, input_tx)
    }

    async fn collect_stdout(mut events_rx: mpsc::Receiver<ServerEvent>) -> String {
        let mut bytes = Vec::new();
        while let Some(event) = events_rx.recv().await {
            if let ServerEvent::Output {
                bytes: chunk,
                stream: StreamName::Stdout,
            } = event
            {
                bytes.extend(chunk);
            }
        }
        String::from_utf8_lossy(&bytes).to_string()
    }

    #[test]
    fn test_check_missing_command() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            check_command_path(dir.path(), "nope"),
            Err(CorkError::CommandDoesNotExist { .. })
        ));
    }

    #[test]
    fn test_check_directory_is_not_a_command() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("commands/subdir")).unwrap();
        assert!(matches!(
            check_command_path(dir.path(), "subdir"),
            Err(CorkError::CommandInvalid { .. })
        ));
    }

    #[test]
    fn test_check_non_executable_command() {
        let dir = TempDir::new().unwrap();
        write_command(dir.path(), "plain", "#!/bin/sh\n", 0o644);
        assert!(matches!(
            check_command_path(dir.path(), "plain"),
            Err(CorkError::CommandInvalid { .. })
        ));
    }

    #[test]
    fn test_check_executable_command() {
        let dir = TempDir::new().unwrap();
        let path = write_command(dir.path(), "ok", "#!/bin/sh\n", 0o755);
        assert_eq!(check_command_path(dir.path(), "ok").unwrap(), path);
    }

    #[test]
    fn test_check_symlinked_command() {
        let dir = TempDir::new().unwrap();
        let target = write_command(dir.path(), "real", "#!/bin/sh\n", 0o755);
        symlink(&target, dir.path().join("commands/alias")).unwrap();
        assert_eq!(check_command_path(dir.path(), "alias").unwrap(), target);
    }

    #[test]
    fn test_check_symlink_chain_too_deep() {
        let dir = TempDir::new().unwrap();
        let commands = dir.path().join("commands");
        std::fs::create_dir_all(&commands).unwrap();
        for i in 0..(MAX_SYMLINK_DEPTH + 1) {
            symlink(commands.join(format!("link{}", i + 1)), commands.join(format!("link{i}")))
                .unwrap();
        }
        assert!(matches!(
            check_command_path(dir.path(), "link0"),
            Err(CorkError::CommandInvalid { .. })
        ));
    }

    #[test]
    fn test_step_env_contract() {
        let dir = TempDir::new().unwrap();
        let params = [("build_param".to_string(), "abc".to_string())].into();
        let (ctx, _events, _input) = make_context(dir.path(), "build", params);

        let env = step_env(&ctx);
        assert_eq!(env["CORK_PARAM_BUILD_PARAM"], "abc");
        assert_eq!(env["BUILD_PARAM"], "abc");
        assert_eq!(env["CORK_HOST_WORK_DIR"], "/host/work");
        assert_eq!(env["CACHE_DIR"], "/cache");
        assert!(env.contains_key("CORK_DIR"));
        assert!(env.contains_key("CORK_WORK_DIR"));
        assert!(env.contains_key("CORK_OUTPUTS_DIR"));
    }

    #[tokio::test]
    async fn test_run_streams_stdout() {
        let dir = TempDir::new().unwrap();
        write_command(dir.path(), "hello", "#!/bin/sh\necho hello from $CORK_PARAM_WHO\n", 0o755);
        let params = [("who".to_string(), "tests".to_string())].into();
        let (ctx, events_rx, _input) = make_context(dir.path(), "hello", params);

        CommandRunner::new().run(ctx).await.unwrap();
        let stdout = collect_stdout(events_rx).await;
        assert_eq!(stdout, "hello from tests\n");
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let dir = TempDir::new().unwrap();
        write_command(dir.path(), "boom", "#!/bin/sh\nexit 3\n", 0o755);
        let (ctx, _events, _input) = make_context(dir.path(), "boom", HashMap::new());

        let err = CommandRunner::new().run(ctx).await.unwrap_err();
        assert!(matches!(err, CorkError::CommandFailed { code: 3, .. }));
    }

    #[tokio::test]
    async fn test_run_forwards_stdin() {
        let dir = TempDir::new().unwrap();
        write_command(
            dir.path(),
            "echoer",
            "#!/bin/sh\nread line\necho \"got $line\"\n",
            0o755,
        );
        let (ctx, events_rx, input_tx) = make_context(dir.path(), "echoer", HashMap::new());

        input_tx
            .send(StepInput::Stdin(b"ping\n".to_vec()))
            .await
            .unwrap();
        CommandRunner::new().run(ctx).await.unwrap();
        let stdout = collect_stdout(events_rx).await;
        assert_eq!(stdout, "got ping\n");
    }

    #[tokio::test]
    async fn test_run_without_command_name() {
        let dir = TempDir::new().unwrap();
        let (mut ctx, _events, _input) = make_context(dir.path(), "whatever", HashMap::new());
        ctx.step.args.command = None;

        let err = CommandRunner::new().run(ctx).await.unwrap_err();
        assert!(matches!(err, CorkError::CommandInvalid { .. }));
    }
}
