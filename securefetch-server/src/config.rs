//! Server configuration

use securefetch_core::auth::DEFAULT_PBKDF2_ITERATIONS;
use securefetch_core::{Error, Result, StaticCredential};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SECUREFETCH_SERVER_CONFIG";

/// Configuration file read from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "securefetch-server.toml";

pub const USER_ENV: &str = "SECUREFETCH_USER";
pub const PASSWORD_ENV: &str = "SECUREFETCH_PASSWORD";

/// Server configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub listen_address: String,
    /// TCP port
    pub port: u16,
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
    /// Directory exposed through `ls` and `getfile`
    pub root_dir: PathBuf,
    /// Reference username
    pub username: Option<String>,
    /// Reference password
    pub password: Option<String>,
    pub handshake_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_auth_attempts: u32,
    pub chunk_size: usize,
    pub pbkdf2_iterations: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: securefetch_core::DEFAULT_PORT,
            cert_path: PathBuf::from("cert.pem"),
            key_path: PathBuf::from("key.pem"),
            root_dir: PathBuf::from("./data"),
            username: None,
            password: None,
            handshake_timeout_secs: securefetch_core::HANDSHAKE_TIMEOUT_SECS,
            idle_timeout_secs: securefetch_core::IDLE_TIMEOUT_SECS,
            max_auth_attempts: securefetch_core::MAX_AUTH_ATTEMPTS,
            chunk_size: securefetch_core::DEFAULT_CHUNK_SIZE,
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_address", &self.listen_address)
            .field("port", &self.port)
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("root_dir", &self.root_dir)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("handshake_timeout_secs", &self.handshake_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("max_auth_attempts", &self.max_auth_attempts)
            .field("chunk_size", &self.chunk_size)
            .field("pbkdf2_iterations", &self.pbkdf2_iterations)
            .finish()
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Load the file named by [`CONFIG_ENV`], or [`DEFAULT_CONFIG_FILE`] if it
    /// exists, then apply environment overrides
    pub fn from_environment() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply credential overrides from a key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(user) = lookup(USER_ENV) {
            self.username = Some(user);
        }
        if let Some(password) = lookup(PASSWORD_ENV) {
            self.password = Some(password);
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }

    /// Build the reference credential; both username and password are required
    pub fn credential(&self) -> Result<StaticCredential> {
        match (&self.username, &self.password) {
            (Some(user), Some(password)) if !user.is_empty() => {
                Ok(StaticCredential::new(user.clone(), password.clone())
                    .with_iterations(self.pbkdf2_iterations))
            }
            _ => Err(Error::Config(format!(
                "no credential configured; set username/password in the config file or {} and {}",
                USER_ENV, PASSWORD_ENV
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4433);
        assert_eq!(config.root_dir, PathBuf::from("./data"));
        assert_eq!(config.cert_path, PathBuf::from("cert.pem"));
        assert!(config.credential().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            port = 5000
            root_dir = "/srv/music"
            username = "GroupProject"
            password = "hello"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.root_dir, PathBuf::from("/srv/music"));
        assert_eq!(config.max_auth_attempts, securefetch_core::MAX_AUTH_ATTEMPTS);
        assert_eq!(config.credential().unwrap().username(), "GroupProject");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config.apply_overrides(|key| match key {
            USER_ENV => Some("alice".to_string()),
            PASSWORD_ENV => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(config.username.as_deref(), Some("alice"));
        assert!(config.credential().is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut config = ServerConfig::default();
        config.password = Some("hunter2".to_string());
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            ServerConfig::from_toml_str("port = \"many\""),
            Err(Error::Config(_))
        ));
    }
}
