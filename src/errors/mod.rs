// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Error types for cork.
//!
//! Every failure surfaced by the definition loader, the validator, the
//! runners, the executor, and the protocol layer is a variant here.
//! Validation errors are fatal at load time and prevent the server from
//! ever accepting a stage execution for a broken definition.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for cork operations
pub type CorkResult<T> = Result<T, CorkError>;

/// Main error type for cork
#[derive(Error, Debug, Diagnostic)]
pub enum CorkError {
    // ─────────────────────────────────────────────────────────────────────────
    // Schema Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid definition: version must be specified")]
    #[diagnostic(
        code(cork::schema::missing_version),
        help("Add 'version: 1' to the top of your definition.yml")
    )]
    MissingVersion,

    #[error("Invalid definition: only version 1 is supported, got {version}")]
    #[diagnostic(code(cork::schema::unsupported_version))]
    UnsupportedVersion { version: i64 },

    #[error("Unknown step type: {step_type}")]
    #[diagnostic(
        code(cork::schema::unknown_step_type),
        help("Valid step types: stage, container, command, export")
    )]
    UnknownStepType { step_type: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Stage Resolution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid definition: cannot find stage '{stage}'")]
    #[diagnostic(code(cork::stage::unknown))]
    UnknownStage { stage: String },

    #[error("'stage' step requires a 'stage' argument")]
    #[diagnostic(code(cork::stage::missing_arg))]
    MissingStageArg,

    #[error("Circular stage reference: {}", cycle.join(" -> "))]
    #[diagnostic(
        code(cork::stage::circular_reference),
        help("Remove the cycle from your stage references")
    )]
    CircularStageReference { cycle: Vec<String> },

    #[error("Maximum stage recursion reached. You may have circular stage dependencies")]
    #[diagnostic(code(cork::stage::recursion_limit))]
    RecursionLimit,

    // ─────────────────────────────────────────────────────────────────────────
    // Dependency Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid definition: step names must be unique. Step '{step}' is not unique in stage '{stage}'")]
    #[diagnostic(code(cork::dependency::duplicate_step_name))]
    DuplicateStepName { step: String, stage: String },

    #[error("Invalid definition: output variable '{lookup}' used before available to step '{step}'")]
    #[diagnostic(
        code(cork::dependency::output_not_available),
        help("A step may only consume outputs of steps that run strictly before it")
    )]
    OutputNotAvailable { lookup: String, step: String },

    #[error("Invalid definition: variable '{param}' is not defined. All expected variables need a definition in 'params'")]
    #[diagnostic(code(cork::dependency::undeclared_parameter))]
    UndeclaredParameter { param: String },

    #[error("Unknown template function: {function}")]
    #[diagnostic(
        code(cork::dependency::unknown_template_function),
        help("Available functions: param, output, WORK_DIR, HOST_WORK_DIR, CACHE_DIR")
    )]
    UnknownTemplateFunction { function: String },

    #[error("Template function '{function}' requires a quoted argument")]
    #[diagnostic(code(cork::dependency::missing_template_argument))]
    MissingTemplateArgument { function: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Command Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Command '{name}' does not exist")]
    #[diagnostic(
        code(cork::command::does_not_exist),
        help("Commands are looked up at <CORK_DIR>/commands/<name>")
    )]
    CommandDoesNotExist { name: String },

    #[error("{message}")]
    #[diagnostic(code(cork::command::invalid))]
    CommandInvalid { name: String, message: String },

    #[error("Command '{name}' exited with status {code}")]
    #[diagnostic(code(cork::command::failed))]
    CommandFailed { name: String, code: i32 },

    // ─────────────────────────────────────────────────────────────────────────
    // Runner Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("No runner '{step_type}' exists")]
    #[diagnostic(code(cork::runner::unknown))]
    UnknownRunner { step_type: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Protocol error: {message}")]
    #[diagnostic(code(cork::protocol::violation))]
    Protocol { message: String },

    #[error("{message}")]
    #[diagnostic(code(cork::server::initialization))]
    Initialization { message: String },

    #[error("Transport error: {message}")]
    #[diagnostic(code(cork::transport::failed))]
    Transport {
        message: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' failed: {message}")]
    #[diagnostic(code(cork::execution::stage_failed))]
    StageFailed { stage: String, message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(cork::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(cork::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(cork::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(cork::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(cork::json_error))]
    Json { message: String },
}

impl From<std::io::Error> for CorkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for CorkError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for CorkError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl CorkError {
    /// Create a command-invalid error with a formatted message
    pub fn command_invalid(name: &str, detail: impl std::fmt::Display) -> Self {
        Self::CommandInvalid {
            name: name.to_string(),
            message: format!("Invalid command '{}'. {}", name, detail),
        }
    }

    /// Create a protocol violation error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create a transport error, attaching a remediation hint for
    /// connection-level failures
    pub fn transport(message: impl Into<String>) -> Self {
        let message = message.into();
        let help = if message.contains("refused") || message.contains("reset") {
            Some("Check that the cork server is running and reachable".to_string())
        } else {
            None
        };
        Self::Transport { message, help }
    }

    /// Whether this error carries the server's initialization failure tag
    pub fn is_initialization(&self) -> bool {
        match self {
            Self::Initialization { .. } => true,
            Self::Protocol { message } | Self::Transport { message, .. } => {
                message.contains("InitializationError")
            }
            _ => false,
        }
    }
}
