use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::sink::translate::DestinationOp;
use crate::sink::worker::BackoffPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sink: SinkConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Start with `*_WITH_META` commands; downgraded if the peer rejects them.
    pub try_metadata_commands: bool,
    pub conflict_resolution_enabled: bool,
    pub uncompress_values: bool,
    pub backoff_base_ms: u64,
    pub backoff_cap_seconds: f64,
    pub retry_on_topology_change: bool,
    pub use_tls: bool,
    pub verify_tls: bool,
    pub ca_cert: Option<PathBuf>,
    pub use_collections: bool,
    pub destination_operation: Option<DestinationOp>,
    pub destination_vbucket_state: String,
    pub key_filter: Option<String>,
    pub vbucket_filter: Option<u16>,
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: Option<u64>,
    pub recv_chunk_bytes: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            try_metadata_commands: true,
            conflict_resolution_enabled: true,
            uncompress_values: false,
            backoff_base_ms: 100,
            backoff_cap_seconds: 10.0,
            retry_on_topology_change: true,
            use_tls: false,
            verify_tls: true,
            ca_cert: None,
            use_collections: false,
            destination_operation: None,
            destination_vbucket_state: "active".to_string(),
            key_filter: None,
            vbucket_filter: None,
            connect_timeout_ms: 10_000,
            socket_timeout_ms: None,
            recv_chunk_bytes: 4096,
        }
    }
}

impl SinkConfig {
    pub fn operation(&self) -> DestinationOp {
        self.destination_operation.unwrap_or_default()
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        let max = Duration::try_from_secs_f64(self.backoff_cap_seconds)
            .unwrap_or(Duration::from_secs(10));
        BackoffPolicy {
            base: Duration::from_millis(self.backoff_base_ms).min(max),
            max,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        self.socket_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destination_vbucket_state != "active" {
            return Err(ConfigError::Invalid(format!(
                "only destination_vbucket_state=active is supported, got {}",
                self.destination_vbucket_state
            )));
        }
        if let Some(op) = self.destination_operation
            && !matches!(
                op,
                DestinationOp::Set | DestinationOp::Add | DestinationOp::Get
            )
        {
            return Err(ConfigError::Invalid(format!(
                "destination_operation unsupported value: {op}; use set, add, get"
            )));
        }
        if !self.backoff_cap_seconds.is_finite() || self.backoff_cap_seconds <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff_cap_seconds must be a positive number, got {}",
                self.backoff_cap_seconds
            )));
        }
        if let Some(pattern) = &self.key_filter {
            regex::bytes::Regex::new(pattern).map_err(|err| {
                ConfigError::Invalid(format!("key_filter {pattern:?} is not a valid regex: {err}"))
            })?;
        }
        if self.use_tls && self.verify_tls && self.ca_cert.is_none() {
            return Err(ConfigError::Invalid(
                "verify_tls requires ca_cert when use_tls is set".to_string(),
            ));
        }
        if self.recv_chunk_bytes == 0 {
            return Err(ConfigError::Invalid(
                "recv_chunk_bytes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            filter: None,
        }
    }
}

/// Partial config as read from a file; `None` leaves the lower layer intact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub sink: SinkConfigOverride,
    pub logging: LoggingConfigOverride,
}

impl ConfigLayer {
    pub fn apply_to(&self, base: &mut Config) {
        self.sink.apply_to(&mut base.sink);
        self.logging.apply_to(&mut base.logging);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfigOverride {
    pub try_metadata_commands: Option<bool>,
    pub conflict_resolution_enabled: Option<bool>,
    pub uncompress_values: Option<bool>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_cap_seconds: Option<f64>,
    pub retry_on_topology_change: Option<bool>,
    pub use_tls: Option<bool>,
    pub verify_tls: Option<bool>,
    pub ca_cert: Option<PathBuf>,
    pub use_collections: Option<bool>,
    pub destination_operation: Option<DestinationOp>,
    pub destination_vbucket_state: Option<String>,
    pub key_filter: Option<String>,
    pub vbucket_filter: Option<u16>,
    pub connect_timeout_ms: Option<u64>,
    pub socket_timeout_ms: Option<u64>,
    pub recv_chunk_bytes: Option<usize>,
}

macro_rules! apply_some {
    ($layer:expr, $base:expr, [$($field:ident),* $(,)?]) => {
        $(
            if let Some(value) = &$layer.$field {
                $base.$field = value.clone();
            }
        )*
    };
}

impl SinkConfigOverride {
    pub fn apply_to(&self, base: &mut SinkConfig) {
        apply_some!(
            self,
            base,
            [
                try_metadata_commands,
                conflict_resolution_enabled,
                uncompress_values,
                backoff_base_ms,
                backoff_cap_seconds,
                retry_on_topology_change,
                use_tls,
                verify_tls,
                use_collections,
                destination_vbucket_state,
                connect_timeout_ms,
                recv_chunk_bytes,
            ]
        );
        if self.ca_cert.is_some() {
            base.ca_cert = self.ca_cert.clone();
        }
        if self.destination_operation.is_some() {
            base.destination_operation = self.destination_operation;
        }
        if self.key_filter.is_some() {
            base.key_filter = self.key_filter.clone();
        }
        if self.vbucket_filter.is_some() {
            base.vbucket_filter = self.vbucket_filter;
        }
        if self.socket_timeout_ms.is_some() {
            base.socket_timeout_ms = self.socket_timeout_ms;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfigOverride {
    pub stdout: Option<bool>,
    pub stdout_format: Option<LogFormat>,
    pub filter: Option<String>,
}

impl LoggingConfigOverride {
    pub fn apply_to(&self, base: &mut LoggingConfig) {
        if let Some(stdout) = self.stdout {
            base.stdout = stdout;
        }
        if let Some(format) = self.stdout_format {
            base.stdout_format = format;
        }
        if self.filter.is_some() {
            base.filter = self.filter.clone();
        }
    }
}
