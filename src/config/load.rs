use std::fs;
use std::path::{Path, PathBuf};

use super::merge::{apply_env_overrides, merge_layers};
use super::{Config, ConfigError, ConfigLayer};

/// Overrides the user config file location.
pub const CONFIG_ENV: &str = "DOCPUMP_CONFIG";

pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .map(|dir| dir.join("docpump").join("config.toml"))
}

pub fn load_layer(path: &Path) -> Result<ConfigLayer, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Defaults, then the user file if present, then `explicit`, then env.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let user = match user_config_path() {
        Some(path) if path.exists() => Some(load_layer(&path)?),
        _ => None,
    };
    let explicit = explicit.map(load_layer).transpose()?;
    let mut config = merge_layers(user, explicit);
    apply_env_overrides(&mut config);
    config.sink.validate()?;
    tracing::debug!(?config, "config loaded");
    Ok(config)
}
