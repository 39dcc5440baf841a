// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Stages command - list stages of the local definition

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::definition::ServerDefinition;

/// Run the stages command
pub async fn run(cork_dir: PathBuf, verbose: bool) -> Result<()> {
    let definition = ServerDefinition::from_dir(&cork_dir)?;

    let mut names: Vec<&str> = definition.stage_names();
    names.sort_unstable();

    println!("{}:", "Stages".bold());
    for name in names {
        if verbose {
            let steps = definition.flatten_stage(name)?;
            let required = definition.required_user_params(name)?;
            let params = if required.is_empty() {
                String::new()
            } else {
                format!(" [params: {}]", required.join(", "))
            };
            println!(
                "  - {} ({} step(s)){}",
                name.cyan(),
                steps.len(),
                params.dimmed()
            );
        } else {
            println!("  - {}", name.cyan());
        }
    }
    Ok(())
}
