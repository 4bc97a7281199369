//! Bootstrap configuration for partcheck-engine
//!
//! Loaded from TOML (`--config` → `PARTCHECK_CONFIG` →
//! `~/.config/partcheck/partcheck-engine.toml`); a missing file yields the
//! built-in defaults.

use partcheck_common::logging::LoggingConfig;
use partcheck_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::CacheConfig;
use crate::matcher::MatchingConfig;

pub const MODULE_NAME: &str = "partcheck-engine";
pub const CONFIG_ENV: &str = "PARTCHECK_CONFIG";
pub const ROOT_FOLDER_ENV: &str = "PARTCHECK_ROOT";
pub const DEFAULT_PORT: u16 = 5780;
const DATABASE_FILE: &str = "partcheck.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub port: u16,
    pub bind_address: String,
    /// Defaults to `<root_folder>/partcheck.db`
    pub database_path: Option<PathBuf>,
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub matching: MatchingConfig,
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: "127.0.0.1".to_string(),
            database_path: None,
            root_folder: None,
            logging: LoggingConfig::default(),
            matching: MatchingConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate; `None` means built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = partcheck_common::config::load_toml_config(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.matching.validate().map_err(Error::Config)?;
        self.cache.validate().map_err(Error::Config)?;
        if self.port == 0 {
            return Err(Error::Config("port must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self, root_folder: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| root_folder.join(DATABASE_FILE))
    }
}
