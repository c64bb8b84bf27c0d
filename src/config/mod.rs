//! Sink configuration: schema, file layers and environment overrides.

mod load;
mod merge;
mod schema;

use std::path::PathBuf;

use thiserror::Error;

pub use load::{CONFIG_ENV, load, load_layer, user_config_path};
pub use merge::{apply_env_overrides, apply_env_overrides_from, merge_layers};
pub use schema::{
    Config, ConfigLayer, LogFormat, LoggingConfig, LoggingConfigOverride, SinkConfig,
    SinkConfigOverride,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid destination spec {spec}: {reason}")]
    InvalidSpec { spec: String, reason: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}
