// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! cork - Container Workflow Tool
//!
//! Serve and execute declarative build stages inside disposable containers.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cork::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; CORK_DEBUG=1 raises the default level
    let default_filter = if std::env::var("CORK_DEBUG").map(|v| v == "1").unwrap_or(false) {
        "cork=debug"
    } else {
        "cork=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            work_dir,
            host_work_dir,
            cache_dir,
            port,
            load_env_from_file,
        } => {
            cork::cli::serve::run(
                cli.cork_dir,
                work_dir,
                host_work_dir,
                cache_dir,
                port,
                load_env_from_file,
                cli.verbose,
            )
            .await
        }
        Commands::Run {
            stage,
            host,
            port,
            param,
            output,
        } => cork::cli::run::run(stage, host, port, param, output, cli.verbose).await,
        Commands::Status { host, port } => cork::cli::status::run(host, port).await,
        Commands::Kill { host, port } => cork::cli::kill::run(host, port).await,
        Commands::Stages => cork::cli::stages::run(cli.cork_dir, cli.verbose).await,
        Commands::Validate => cork::cli::validate::run(cli.cork_dir, cli.verbose).await,
    }
}
