//! Configuration file loading.

use anyhow::{Context, Result};
use cortex_core::Config;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "CORTEX_CONFIG";

/// File looked up in the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "cortex.toml";

/// Pick the configuration file: `--config`, then `CORTEX_CONFIG`, then
/// `./cortex.toml` if it exists.
pub fn resolve_path(explicit: Option<PathBuf>, env: Option<String>) -> Option<PathBuf> {
    explicit
        .or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
        .or_else(|| {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            fallback.exists().then_some(fallback)
        })
}

/// Read and validate a TOML configuration file.
pub fn load(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))?;
    config.validate()?;
    debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Configuration from `path`, or defaults when there is none.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load(path),
        None => Ok(Config::default()),
    }
}
