// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Serve command - run the cork server

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::server::{environment, Server, ServerOptions};

/// Run the serve command
pub async fn run(
    cork_dir: PathBuf,
    work_dir: PathBuf,
    host_work_dir: String,
    cache_dir: String,
    port: u16,
    load_env_from_file: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    if let Some(path) = load_env_from_file {
        let count = environment::load_env_file(&path)?;
        if verbose {
            println!(
                "  {} Loaded {} environment variable(s) from {}",
                "✓".green(),
                count,
                path.display()
            );
        }
    }

    let server = Server::initialize(ServerOptions {
        cork_dir,
        work_dir,
        host_work_dir,
        cache_dir,
        port,
    })
    .await;

    if let Some(message) = server.init_error() {
        eprintln!("  {} {}", "⚠".yellow(), message);
    } else {
        println!("{}", format!("cork server listening on port {}", port).bold());
    }

    server.serve().await?;
    Ok(())
}
