// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Kill command - ask the server to shut down

use colored::Colorize;
use miette::Result;

use crate::client::{Client, ClientOptions};

/// Run the kill command
pub async fn run(host: String, port: u16) -> Result<()> {
    let client = Client::new(ClientOptions { host, port });
    client.kill().await?;
    println!("  {} Server is shutting down", "✓".green());
    Ok(())
}
