// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Environment file loading.
//!
//! A project may ship a flat JSON object of environment variables that the
//! server applies to its own process before serving, so commands and hooks
//! inherit them.

use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::errors::{CorkError, CorkResult};

/// Default env file name under the cork directory
pub const ENV_FILE: &str = "cork.env.json";

/// Load a flat JSON object of environment variables and apply it to the
/// current process. Returns the number of variables set.
pub fn load_env_file(path: &Path) -> CorkResult<usize> {
    let contents = std::fs::read_to_string(path).map_err(|e| CorkError::FileReadError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    let vars: HashMap<String, String> = serde_json::from_str(&contents)?;

    for (key, value) in &vars {
        debug!(key, "setting environment variable from env file");
        std::env::set_var(key, value);
    }
    Ok(vars.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_env_file_sets_variables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(ENV_FILE);
        std::fs::write(
            &path,
            r#"{"CORK_TEST_ENV_FILE_VAR": "loaded", "CORK_TEST_ENV_FILE_OTHER": "2"}"#,
        )
        .unwrap();

        assert_eq!(load_env_file(&path).unwrap(), 2);
        assert_eq!(std::env::var("CORK_TEST_ENV_FILE_VAR").unwrap(), "loaded");
        assert_eq!(std::env::var("CORK_TEST_ENV_FILE_OTHER").unwrap(), "2");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = load_env_file(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, CorkError::FileReadError { .. }));
    }

    #[test]
    fn test_non_flat_json_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(ENV_FILE);
        std::fs::write(&path, r#"{"nested": {"a": 1}}"#).unwrap();
        assert!(matches!(
            load_env_file(&path),
            Err(CorkError::Json { .. })
        ));
    }
}
