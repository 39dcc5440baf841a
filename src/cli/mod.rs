// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for cork.

pub mod kill;
pub mod run;
pub mod serve;
pub mod stages;
pub mod status;
pub mod validate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::protocol::DEFAULT_PORT;

/// Container workflow tool
///
/// Run declarative build and workflow stages against a cork server.
#[derive(Parser, Debug)]
#[clap(
    name = "cork",
    version,
    about = "Container workflow tool",
    long_about = None,
    after_help = "Examples:\n\
        cork serve                      Serve the project inside its container\n\
        cork run build                  Execute the 'build' stage\n\
        cork run build -p version=1.2   Execute with a parameter override\n\
        cork status                     Check server health\n\
        cork stages                     List stages of the local definition\n\n\
        See 'cork <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Cork project directory (definition, commands, hooks)
    #[clap(long, global = true, env = "CORK_DIR", default_value = "/cork", value_name = "DIR")]
    pub cork_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the cork server inside the project container
    Serve {
        /// Working directory for command steps
        #[clap(long, env = "CORK_WORK_DIR", default_value = "/work", value_name = "DIR")]
        work_dir: PathBuf,

        /// The working directory path as seen from the host
        #[clap(long, env = "CORK_HOST_WORK_DIR", default_value = "", value_name = "DIR")]
        host_work_dir: String,

        /// Shared cache directory
        #[clap(long, env = "CORK_CACHE_DIR", default_value = "/cork_cache", value_name = "DIR")]
        cache_dir: String,

        /// Port to listen on
        #[clap(long, env = "CORK_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Apply a flat JSON env file to the process before serving
        #[clap(long, value_name = "FILE")]
        load_env_from_file: Option<PathBuf>,
    },

    /// Execute a stage against a running server
    Run {
        /// Stage to execute
        #[clap(default_value = "default")]
        stage: String,

        /// Server host
        #[clap(long, env = "CORK_HOST", default_value = "localhost")]
        host: String,

        /// Server port
        #[clap(long, env = "CORK_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Parameter override as key=value (repeatable)
        #[clap(short, long = "param", value_name = "KEY=VALUE")]
        param: Vec<String>,

        /// File to write collected exports to
        #[clap(
            short,
            long,
            env = "CORK_OUTPUT_DESTINATION",
            default_value = "outputs.json",
            value_name = "FILE"
        )]
        output: PathBuf,
    },

    /// Check server health
    Status {
        /// Server host
        #[clap(long, env = "CORK_HOST", default_value = "localhost")]
        host: String,

        /// Server port
        #[clap(long, env = "CORK_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Ask the server to shut down
    Kill {
        /// Server host
        #[clap(long, env = "CORK_HOST", default_value = "localhost")]
        host: String,

        /// Server port
        #[clap(long, env = "CORK_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// List the stages of the local definition
    Stages,

    /// Load and validate the local definition
    Validate,
}
