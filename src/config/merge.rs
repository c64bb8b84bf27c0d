use std::path::PathBuf;

use super::{Config, ConfigLayer};

pub fn merge_layers(user: Option<ConfigLayer>, explicit: Option<ConfigLayer>) -> Config {
    let mut config = Config::default();
    if let Some(layer) = user {
        layer.apply_to(&mut config);
    }
    if let Some(layer) = explicit {
        layer.apply_to(&mut config);
    }
    config
}

pub fn apply_env_overrides(config: &mut Config) {
    apply_env_overrides_from(config, |key| std::env::var(key).ok());
}

pub fn apply_env_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| {
        lookup(key)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    };

    let flags: [(&str, &mut bool); 5] = [
        (
            "DOCPUMP_TRY_METADATA_COMMANDS",
            &mut config.sink.try_metadata_commands,
        ),
        (
            "DOCPUMP_RETRY_ON_TOPOLOGY_CHANGE",
            &mut config.sink.retry_on_topology_change,
        ),
        (
            "DOCPUMP_UNCOMPRESS_VALUES",
            &mut config.sink.uncompress_values,
        ),
        ("DOCPUMP_USE_TLS", &mut config.sink.use_tls),
        ("DOCPUMP_VERIFY_TLS", &mut config.sink.verify_tls),
    ];
    for (key, slot) in flags {
        if let Some(raw) = read(key) {
            match parse_bool(&raw) {
                Some(value) => *slot = value,
                None => tracing::warn!("invalid {key}={raw:?}, ignoring"),
            }
        }
    }

    if let Some(raw) = read("DOCPUMP_BACKOFF_CAP_SECONDS") {
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() && value > 0.0 => {
                config.sink.backoff_cap_seconds = value;
            }
            Ok(value) => {
                tracing::warn!("invalid DOCPUMP_BACKOFF_CAP_SECONDS={value}, ignoring");
            }
            Err(err) => tracing::warn!("invalid DOCPUMP_BACKOFF_CAP_SECONDS, ignoring: {err}"),
        }
    }

    if let Some(raw) = read("DOCPUMP_CA_CERT") {
        config.sink.ca_cert = Some(PathBuf::from(raw));
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
