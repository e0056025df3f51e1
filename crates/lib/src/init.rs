//! Initialize the configuration directory: create ~/.chatgate, a default config and the session directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the directory that will hold stored credentials.
pub fn init_config_dir(config_path: &Path, config: &config::Config) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = b"{}";
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let credentials_path = config::resolve_credentials_path(config, config_path);
    if let Some(session_dir) = credentials_path.parent() {
        if !session_dir.exists() {
            std::fs::create_dir_all(session_dir).with_context(|| {
                format!("creating session directory {}", session_dir.display())
            })?;
            log::info!("created session directory at {}", session_dir.display());
        } else {
            log::debug!(
                "session directory already exists at {}, skipping",
                session_dir.display()
            );
        }
    }

    Ok(config_dir.to_path_buf())
}
