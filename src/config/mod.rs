pub mod model;
pub mod nickname;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub use model::{AppConfig, DccConfig, LoggingConfig, RateLimitScope};

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crabbooks")
        .join("config.toml")
}

/// Load the configuration from `path`, or from the per-user config directory
/// when no path is given. A missing default file yields the defaults; a
/// missing explicit file is an error.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = default_config_path();
            if !p.exists() {
                return Ok(AppConfig::default());
            }
            p
        }
    };
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: AppConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
