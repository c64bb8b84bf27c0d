//! Destination spec strings: `memcached://[user[:password]@]host[:port][/bucket]`.

use std::fmt;

use crate::config::ConfigError;
use crate::sink::proto::{DEFAULT_PORT, TLS_PORT};

const SCHEMES: [&str; 2] = ["memcached://", "memcached-binary://"];

#[derive(Clone, PartialEq, Eq)]
pub struct SinkSpec {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub bucket: Option<String>,
}

impl SinkSpec {
    pub fn can_handle(spec: &str) -> bool {
        SCHEMES.iter().any(|scheme| spec.starts_with(scheme))
    }

    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let rest = SCHEMES
            .iter()
            .find_map(|scheme| spec.strip_prefix(scheme))
            .ok_or_else(|| ConfigError::InvalidSpec {
                spec: spec.to_string(),
                reason: "expected memcached:// or memcached-binary://".to_string(),
            })?;

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };
        let bucket = Some(path.trim_matches('/'))
            .filter(|bucket| !bucket.is_empty())
            .map(str::to_string);

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, authority),
        };
        let (username, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, pass)) => (Some(user.to_string()), Some(pass.to_string())),
                None => (Some(info.to_string()), None),
            },
            None => (None, None),
        };

        let (host, port) = split_host_port(hostport).map_err(|reason| ConfigError::InvalidSpec {
            spec: spec.to_string(),
            reason,
        })?;

        Ok(Self {
            host,
            port: port.unwrap_or(DEFAULT_PORT),
            username: username.filter(|user| !user.is_empty()),
            password,
            bucket,
        })
    }

    /// Port to dial; TLS always goes to the dedicated TLS data port.
    pub fn data_port(&self, use_tls: bool) -> u16 {
        if use_tls { TLS_PORT } else { self.port }
    }

    pub fn addr(&self, use_tls: bool) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.data_port(use_tls))
        } else {
            format!("{}:{}", self.host, self.data_port(use_tls))
        }
    }
}

impl fmt::Debug for SinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkSpec")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("bucket", &self.bucket)
            .finish()
    }
}

fn split_host_port(raw: &str) -> Result<(String, Option<u16>), String> {
    if raw.is_empty() {
        return Err("missing host".to_string());
    }
    if let Some(bracketed) = raw.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| "unterminated IPv6 literal".to_string())?;
        let port = match tail.strip_prefix(':') {
            Some(port) => Some(parse_port(port)?),
            None if tail.is_empty() => None,
            None => return Err(format!("unexpected trailing characters: {tail}")),
        };
        return Ok((host.to_string(), port));
    }
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Ok((host.to_string(), Some(parse_port(port)?))),
        Some(_) => Err("missing host".to_string()),
        None => Ok((raw.to_string(), None)),
    }
}

fn parse_port(raw: &str) -> Result<u16, String> {
    raw.parse::<u16>()
        .map_err(|err| format!("invalid port {raw:?}: {err}"))
}
