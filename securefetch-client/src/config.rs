//! Client configuration

use securefetch_core::{Error, Result, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the client configuration file
pub const CONFIG_ENV: &str = "SECUREFETCH_CLIENT_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// CA certificate used to verify the server; unverified when absent
    pub ca_cert: Option<PathBuf>,
    /// TLS server name, if it differs from `host`
    pub server_name: Option<String>,
    /// Bound on TCP connect and TLS handshake
    pub connect_timeout_secs: u64,
    /// Directory downloads are written into
    pub download_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            ca_cert: None,
            server_name: None,
            connect_timeout_secs: 30,
            download_dir: PathBuf::from("."),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Load the file named by [`CONFIG_ENV`] if set, defaults otherwise
    pub fn from_environment() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Point the configuration at a `host[:port]` address
    pub fn with_address(mut self, address: &str) -> Result<Self> {
        let (host, port) = parse_address(address)?;
        self.host = host;
        self.port = port.unwrap_or(self.port);
        Ok(self)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Split `host[:port]`; bracketed IPv6 literals are accepted
pub fn parse_address(address: &str) -> Result<(String, Option<u16>)> {
    let invalid = || Error::Config(format!("invalid address {:?}, expected host[:port]", address));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        match tail {
            "" => (host, None),
            tail => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match address.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(text) => Some(text.parse::<u16>().map_err(|_| invalid())?),
        None => None,
    };
    Ok((host.to_string(), port))
}
