//! Runtime configuration.
//!
//! Read from `config.json` under `$IDE_TREE_HOME`, or `~/.ide-tree/` when
//! the variable is unset. A missing file means defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::TreeError;

const CONFIG_FILE: &str = "config.json";
const MAX_FETCH_RETRIES: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Upper bound on a single file-list request
    pub fetch_timeout_secs: u64,
    /// Extra file-list attempts after a failure or timeout
    pub fetch_retries: u32,
    /// Prefix for in-app routes pushed after creating a temporary tree
    pub route_prefix: String,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 30,
            fetch_retries: 0,
            route_prefix: "/project".to_owned(),
        }
    }
}

impl TreeConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), TreeError> {
        if self.fetch_timeout_secs == 0 {
            return Err(TreeError::config("fetch_timeout_secs must be at least 1"));
        }
        if self.fetch_retries > MAX_FETCH_RETRIES {
            return Err(TreeError::config(format!(
                "fetch_retries must be at most {MAX_FETCH_RETRIES}"
            )));
        }
        Ok(())
    }
}

/// Return the configuration root.
///
/// Uses `$IDE_TREE_HOME` if set, otherwise `~/.ide-tree/`.
pub fn config_root() -> Result<PathBuf, TreeError> {
    if let Ok(home) = std::env::var("IDE_TREE_HOME") {
        return Ok(PathBuf::from(home));
    }
    let home =
        dirs::home_dir().ok_or_else(|| TreeError::config("Could not determine home directory"))?;
    Ok(home.join(".ide-tree"))
}

pub fn config_file_path() -> Result<PathBuf, TreeError> {
    Ok(config_root()?.join(CONFIG_FILE))
}

/// Load and validate the configuration from its default location.
pub fn load() -> Result<TreeConfig, TreeError> {
    load_from(&config_file_path()?)
}

pub fn load_from(path: &Path) -> Result<TreeConfig, TreeError> {
    if !path.exists() {
        log::debug!("[config] {} not found, using defaults", path.display());
        return Ok(TreeConfig::default());
    }
    let content = fs::read_to_string(path)?;
    let config: TreeConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
