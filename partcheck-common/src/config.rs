//! Configuration file loading and root folder resolution
//!
//! Resolution order for both the config file and the root folder:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config directory
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Application directory name under the platform config/data dirs
pub const APP_DIR: &str = "partcheck";

/// Resolve the TOML config file path for a module
///
/// Returns `None` when no candidate exists on disk; callers fall back to
/// built-in defaults in that case.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    module_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument (returned even if missing so the
    // caller can report a useful error)
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: ~/.config/partcheck/<module>.toml
    let user_config = dirs::config_dir()
        .map(|d| d.join(APP_DIR).join(format!("{}.toml", module_name)))?;
    if user_config.exists() {
        return Some(user_config);
    }

    debug!(module = module_name, "No config file found, using defaults");
    None
}

/// Root folder resolution
///
/// `cli_arg` → `env_var_name` → `config_value` → OS default
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = config_value {
        return path.to_path_buf();
    }

    default_root_folder()
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./partcheck_data"))
}

/// Load a TOML config file, or defaults when `path` is `None`
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        return Ok(T::default());
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}
