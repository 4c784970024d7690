//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (LINKDROP_*)
//! - TOML configuration file
//! - Command line arguments (`--config <path>`)

use anyhow::{bail, Context, Result};
use linkdrop_core::{SupersedePolicy, UserId, DEFAULT_QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Session configuration.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// What to do when a device connects twice.
    #[serde(default)]
    pub supersede: SupersedePolicy,

    /// Frames a session may hold before new links to it are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file.
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token to user id.
    #[serde(default)]
    pub tokens: HashMap<String, UserId>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("LINKDROP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("LINKDROP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_database() -> PathBuf {
    std::env::var("LINKDROP_DATABASE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("linkdrop.db"))
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            sessions: SessionsConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            supersede: SupersedePolicy::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the command line, a default path, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `--config` is given without a path, or if a
    /// config file exists but cannot be parsed.
    pub fn load_from_args(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if arg == "--config" {
                let Some(path) = args.next() else {
                    bail!("--config requires a path");
                };
                return Self::from_file(shellexpand::tilde(&path).as_ref());
            }
        }
        Self::load()
    }

    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "linkdrop.toml",
            "/etc/linkdrop/linkdrop.toml",
            "~/.config/linkdrop/linkdrop.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.sessions.supersede, SupersedePolicy::CloseExisting);
        assert_eq!(config.sessions.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(config.auth.tokens.is_empty());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "127.0.0.1".into(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let config = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [sessions]
            supersede = "reject_new"
            queue_capacity = 16

            [storage]
            database = "/var/lib/linkdrop/links.db"

            [auth.tokens]
            "secret-a" = 1
            "secret-b" = 2
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.sessions.supersede, SupersedePolicy::RejectNew);
        assert_eq!(config.sessions.queue_capacity, 16);
        assert_eq!(
            config.storage.database,
            PathBuf::from("/var/lib/linkdrop/links.db")
        );
        assert_eq!(config.auth.tokens.get("secret-b"), Some(&2));
        assert_eq!(config.transport.max_message_size, 64 * 1024);
    }

    #[test]
    fn test_sessions_section_defaults_capacity() {
        let config: Config = toml::from_str("[sessions]\nsupersede = \"replace\"\n").unwrap();
        assert_eq!(config.sessions.supersede, SupersedePolicy::Replace);
        assert_eq!(config.sessions.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_load_from_args_requires_path() {
        let args = vec!["linkdrop".to_string(), "--config".to_string()];
        assert!(Config::load_from_args(args).is_err());
    }
}
