//! Configuration file discovery
//!
//! Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user platform config directory (`<config_dir>/cutline/<file_name>`)
//! 4. System-wide `/etc/cutline/<file_name>` (Linux only)
//!
//! Returning `None` means no file exists and built-in defaults apply.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolve the config file to load, if any.
///
/// An explicitly requested path (CLI or environment) must exist; a missing
/// explicit file is an error rather than a silent fallback to defaults.
pub fn resolve_config_file(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return require_exists(path.to_path_buf()).map(Some);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return require_exists(PathBuf::from(path)).map(Some);
        }
    }

    // Priority 3/4: platform locations
    let found = default_config_locations(file_name)
        .into_iter()
        .find(|candidate| candidate.exists());
    match &found {
        Some(path) => debug!("Using config file {}", path.display()),
        None => debug!("No {} found, using built-in defaults", file_name),
    }
    Ok(found)
}

fn require_exists(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )))
    }
}

/// Candidate config file locations for the platform, most specific first
pub fn default_config_locations(file_name: &str) -> Vec<PathBuf> {
    let mut locations = Vec::new();

    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("cutline").join(file_name));
    }

    if cfg!(target_os = "linux") {
        locations.push(PathBuf::from("/etc/cutline").join(file_name));
    }

    locations
}
