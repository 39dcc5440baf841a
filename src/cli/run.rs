// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Run command - execute a stage against a running server

use colored::Colorize;
use miette::Result;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::client::{write_exports, Client, ClientOptions, InteractivePrompt};

/// Run a stage
pub async fn run(
    stage: String,
    host: String,
    port: u16,
    params: Vec<String>,
    output: PathBuf,
    verbose: bool,
) -> Result<()> {
    let overrides = parse_param_overrides(&params)?;

    let client = Client::new(ClientOptions { host, port });
    println!("{} stage '{}'", "Executing".bold(), stage.cyan());

    let exports = client
        .execute_stage(&stage, overrides, &mut InteractivePrompt, true)
        .await?;

    write_exports(&output, &exports)?;
    if verbose || !exports.is_empty() {
        println!(
            "  {} {} export(s) written to {}",
            "✓".green(),
            exports.len(),
            output.display()
        );
    }

    println!("{}", format!("Stage '{}' completed", stage).green().bold());
    Ok(())
}

/// Parse repeated `key=value` overrides
fn parse_param_overrides(params: &[String]) -> Result<HashMap<String, String>> {
    let mut overrides = HashMap::new();
    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            return Err(miette::miette!(
                "Invalid parameter '{}': expected key=value",
                param
            ));
        };
        if key.is_empty() {
            return Err(miette::miette!(
                "Invalid parameter '{}': empty key",
                param
            ));
        }
        overrides.insert(key.to_string(), value.to_string());
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param_overrides() {
        let params = vec!["foo=bar".to_string(), "version=1.2=rc1".to_string()];
        let overrides = parse_param_overrides(&params).unwrap();
        assert_eq!(overrides["foo"], "bar");
        // Only the first '=' splits
        assert_eq!(overrides["version"], "1.2=rc1");
    }

    #[test]
    fn test_parse_param_overrides_rejects_bad_input() {
        assert!(parse_param_overrides(&["noequals".to_string()]).is_err());
        assert!(parse_param_overrides(&["=value".to_string()]).is_err());
    }
}
