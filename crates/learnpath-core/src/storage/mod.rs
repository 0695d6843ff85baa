mod config;
pub mod database;
pub mod migrations;

pub use config::{Config, ProgressConfig};
pub use database::Database;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the learnpath data directory, creating it if needed.
///
/// `LEARNPATH_HOME` points it anywhere; otherwise it is
/// `~/.config/learnpath[-dev]/` depending on `LEARNPATH_ENV`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("LEARNPATH_HOME") {
        Some(home) => PathBuf::from(home),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("LEARNPATH_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("learnpath-dev")
            } else {
                base_dir.join("learnpath")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
