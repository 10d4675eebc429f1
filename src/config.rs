//! Configuration module for the relaychat server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::cli::ServerArgs;
use crate::transport::DEFAULT_MAX_MESSAGE_SIZE;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Default listen / connect address
pub const DEFAULT_ADDR: &str = "127.0.0.1:10740";

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum size of a single message in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Credential table location
    #[serde(default = "default_credentials")]
    pub credentials: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials: default_credentials(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 10740))
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_credentials() -> PathBuf {
    PathBuf::from("users.txt")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub credentials: PathBuf,
    pub max_connections: usize,
    pub max_message_size: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load(cli: &ServerArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents)
                .map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: &ServerArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            credentials: cli
                .credentials
                .clone()
                .unwrap_or(toml_config.storage.credentials),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            max_message_size: cli
                .max_message_size
                .unwrap_or(toml_config.server.max_message_size),
            log_level: cli
                .log_level
                .clone()
                .unwrap_or(toml_config.logging.level),
        };

        if config.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1"));
        }
        if config.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be at least 1"));
        }
        Ok(config)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, DEFAULT_ADDR.parse().unwrap());
        assert_eq!(config.server.max_message_size, 1024);
        assert_eq!(config.storage.credentials, PathBuf::from("users.txt"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:10740"
            max_connections = 8

            [storage]
            credentials = "/var/lib/relaychat/users.txt"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:10740".parse().unwrap());
        assert_eq!(config.server.max_connections, 8);
        assert_eq!(config.server.max_message_size, 1024);
        assert_eq!(
            config.storage.credentials,
            PathBuf::from("/var/lib/relaychat/users.txt")
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            max_message_size = 4096
            [logging]
            level = "debug"
        "#,
        )
        .unwrap();
        let cli = ServerArgs {
            max_message_size: Some(512),
            ..Default::default()
        };

        let config = Config::merge(&cli, toml_config).unwrap();
        assert_eq!(config.max_message_size, 512);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.listen, DEFAULT_ADDR.parse().unwrap());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let cli = ServerArgs {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            Config::merge(&cli, TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let cli = ServerArgs {
            config: Some(PathBuf::from("/nonexistent/relaychat.toml")),
            ..Default::default()
        };
        assert!(matches!(
            Config::load(&cli),
            Err(ConfigError::FileRead { .. })
        ));
    }
}
