//! Chat configuration.
//!
//! Server and client settings with defaults, optional TOML files and
//! environment overrides for the server bind address.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol version carried by handshake messages.
pub const CHAT_PROTOCOL_VERSION: u8 = 1;

/// Default bind host (all interfaces).
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 12345;

/// Default TCP connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Identity name the server's keypair is stored under.
pub const SERVER_IDENTITY: &str = "server";

/// Environment variable overriding the server bind host.
pub const ENV_SERVER_HOST: &str = "CHAT_SERVER_HOST";

/// Environment variable overriding the server port.
pub const ENV_SERVER_PORT: &str = "CHAT_SERVER_PORT";

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found. Unable to determine home directory.")]
    NoConfigDir,

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Get the safechat config directory (`~/.safechat`).
pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".safechat"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Default location of identity key files (`~/.safechat/keys`).
///
/// Falls back to `./key_storage` when no home directory is available.
pub fn default_key_dir() -> PathBuf {
    get_config_dir()
        .map(|dir| dir.join("keys"))
        .unwrap_or_else(|_| PathBuf::from("key_storage"))
}

/// Rendezvous server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,

    /// Port to bind (0 picks a free port).
    pub port: u16,

    /// Directory holding identity key files.
    pub key_dir: PathBuf,

    /// Identity name for the server keypair.
    pub identity: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            key_dir: default_key_dir(),
            identity: SERVER_IDENTITY.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply `CHAT_SERVER_HOST` / `CHAT_SERVER_PORT` from the environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(
            std::env::var(ENV_SERVER_HOST).ok(),
            std::env::var(ENV_SERVER_PORT).ok(),
        )
    }

    fn with_overrides(
        mut self,
        host: Option<String>,
        port: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(host) = host.filter(|h| !h.is_empty()) {
            self.host = host;
        }
        if let Some(port) = port.filter(|p| !p.is_empty()) {
            self.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                name: ENV_SERVER_PORT.to_string(),
                value: port.clone(),
            })?;
        }
        Ok(self)
    }

    /// `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Client connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Directory holding identity key files.
    pub key_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            key_dir: default_key_dir(),
        }
    }
}

impl ClientConfig {
    /// Load from a TOML file; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Config with a specific key directory.
    pub fn with_key_dir(mut self, key_dir: impl Into<PathBuf>) -> Self {
        self.key_dir = key_dir.into();
        self
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.identity, SERVER_IDENTITY);
        assert_eq!(config.bind_addr(), "0.0.0.0:12345");
    }

    #[test]
    fn test_default_client_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::default()
            .with_overrides(Some("127.0.0.1".into()), Some("4000".into()))
            .unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:4000");

        // Empty values are ignored
        let config = ServerConfig::default()
            .with_overrides(Some(String::new()), None)
            .unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn test_bad_port_override() {
        let result = ServerConfig::default().with_overrides(None, Some("not-a-port".into()));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_partial_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "port = 9000\nkey_dir = \"/tmp/keys\"\n").unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.key_dir, PathBuf::from("/tmp/keys"));
    }

    #[test]
    fn test_client_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(&path, "connect_timeout_secs = 3\n").unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
    }
}
