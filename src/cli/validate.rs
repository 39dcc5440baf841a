// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Validate command - check the local definition

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::definition::{ServerDefinition, DEFINITION_FILE};

/// Run the validate command
pub async fn run(cork_dir: PathBuf, verbose: bool) -> Result<()> {
    let path = cork_dir.join(DEFINITION_FILE);
    println!("{}", "Validating definition...".bold());
    println!();

    if !path.exists() {
        return Err(miette::miette!(
            "Definition file not found: {}",
            path.display()
        ));
    }

    let definition = match ServerDefinition::from_path(&path) {
        Ok(definition) => definition,
        Err(e) => {
            eprintln!("  {} Definition is invalid", "✗".red());
            eprintln!();
            return Err(e.into());
        }
    };

    println!("  {} Definition is valid", "✓".green());

    if verbose {
        println!();
        println!("{}:", "Summary".bold());
        println!("  Stages: {}", definition.stages.len());
        let mut names: Vec<&str> = definition.stage_names();
        names.sort_unstable();
        for name in names {
            let steps = definition.flatten_stage(name)?;
            println!("    - {} ({} step(s))", name, steps.len());
        }
        println!("  Params: {}", definition.params.len());
    }
    Ok(())
}
