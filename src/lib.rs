// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! # cork - Container Workflow Tool
//!
//! `cork` runs declarative build and workflow stages inside disposable
//! containers: a short-lived server loads the project definition and
//! executes stages on behalf of a client over a duplex streaming protocol.
//!
//! ## Features
//!
//! - **Declarative pipelines** - Stages composed of command, container,
//!   and export steps, with stage nesting
//! - **Static validation** - Parameter and output dependencies checked
//!   before anything runs
//! - **Live streaming** - Step output streams to the client as it
//!   happens, and interactive input flows back
//! - **Exports** - Stages publish key/value results the client persists
//!   as JSON
//!
//! ## Quick Start
//!
//! ```bash
//! # Inside the project container
//! cork serve
//!
//! # From the host
//! cork run build -p version=1.2
//! cork status
//! cork kill
//! ```

pub mod cli;
pub mod client;
pub mod definition;
pub mod errors;
pub mod executor;
pub mod protocol;
pub mod runner;
pub mod server;

// Re-export commonly used types
pub use definition::{ServerDefinition, Step, StepType};
pub use errors::{CorkError, CorkResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
