// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Wire protocol between the cork client and server.
//!
//! Frames are newline-delimited JSON over a TCP stream, tagged by a `type`
//! field. A connection is driven by its first frame: `stageExecuteRequest`
//! opens a duplex streaming session, while `statusRequest` and
//! `killRequest` are single-response control calls.
//!
//! During a streaming session the client sends [`ClientEvent`] frames and
//! the server sends [`ServerEvent`] frames; both directions stay open until
//! the server emits a terminal `end` or `error` frame.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

use crate::errors::{CorkError, CorkResult};

/// Default port the server listens on
pub const DEFAULT_PORT: u16 = 11900;

/// A parameter definition sent to the client when the server needs values
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParamDefinition {
    #[serde(rename = "type", default)]
    pub param_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub default: String,

    #[serde(default)]
    pub has_default: bool,

    #[serde(default)]
    pub is_sensitive: bool,
}

/// Which output stream a chunk of bytes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// Frames the client sends to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Open a streaming session executing one stage
    StageExecuteRequest { stage: String },

    /// Answer to the server's `paramsRequest`
    ParamsResponse { params: HashMap<String, String> },

    /// Raw bytes to forward to the currently running step's stdin
    Input { bytes: Vec<u8> },

    /// Signal to deliver to the currently running step
    Signal { code: i32 },

    /// Control call: report server health
    StatusRequest,

    /// Control call: shut the server down
    KillRequest,
}

/// Frames the server sends to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Request values for the stage's required user parameters
    ParamsRequest {
        param_definitions: HashMap<String, ParamDefinition>,
    },

    /// A chunk of step output
    Output { bytes: Vec<u8>, stream: StreamName },

    /// An exported key/value produced by an `export` step
    Export { name: String, value: String },

    /// Execution failed; terminal for the session
    Error { message: String },

    /// Response to a control call
    Response { status: u16 },

    /// Execution finished successfully; terminal for the session
    End,
}

impl ServerEvent {
    /// Whether this frame terminates a streaming session
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Error { .. })
    }
}

/// Reads newline-delimited JSON frames from an async stream
pub struct EventReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> EventReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Read the next frame, skipping blank lines. Returns `None` when the
    /// peer has closed its write side.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> CorkResult<Option<T>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| CorkError::transport(format!("read failed: {e}")))?;
            match line {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    let event = serde_json::from_str(&line).map_err(|e| {
                        CorkError::protocol(format!("malformed frame: {e}"))
                    })?;
                    return Ok(Some(event));
                }
            }
        }
    }
}

/// Writes newline-delimited JSON frames to an async stream
pub struct EventWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> EventWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize one frame, terminate it with a newline, and flush
    pub async fn send<T: Serialize>(&mut self, event: &T) -> CorkResult<()> {
        let mut frame = serde_json::to_vec(event)?;
        frame.push(b'\n');
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| CorkError::transport(format!("write failed: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| CorkError::transport(format!("flush failed: {e}")))?;
        Ok(())
    }
}
