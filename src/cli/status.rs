// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Status command - check server health

use colored::Colorize;
use miette::Result;

use crate::client::{Client, ClientOptions};

/// Run the status command
pub async fn run(host: String, port: u16) -> Result<()> {
    let client = Client::new(ClientOptions { host, port });
    let status = client.status().await?;
    println!("  {} Server is healthy ({})", "✓".green(), status);
    Ok(())
}
