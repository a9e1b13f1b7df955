//! Server configuration.
//!
//! Configuration is read from a YAML file (path in `SPINDLE_CONFIG`) and then
//! overridden by the `LISTEN` environment variable. Every field has a default,
//! so an empty file or no file at all yields a usable configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: Limits,
}

/// Listener and loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Upper bound on simultaneously open client connections.
    pub max_connections: usize,
    /// Heartbeat period in milliseconds; `None` disables the heartbeat.
    pub heartbeat_interval_ms: Option<u64>,
}

/// Per-connection ceilings.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Largest accepted request head, terminator included.
    pub max_header_bytes: usize,
    /// Largest accepted request target.
    pub max_target_bytes: usize,
    /// Bytes pulled from a socket per read call.
    pub read_chunk_bytes: usize,
    /// Unsent bytes a connection may hold before it is torn down.
    pub max_write_buffer_bytes: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            // one descriptor out of 1024 stays with the listener
            max_connections: 1023,
            heartbeat_interval_ms: None,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: 8192,
            max_target_bytes: 2048,
            read_chunk_bytes: 8192,
            max_write_buffer_bytes: None,
        }
    }
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Loads the configuration from `SPINDLE_CONFIG` (if set) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var("SPINDLE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = listen_addr;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // an empty document deserializes to unit, not to a map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid("server.max_connections must be positive".into()));
        }
        if self.server.heartbeat_interval_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "server.heartbeat_interval_ms must be positive when set".into(),
            ));
        }
        if self.limits.read_chunk_bytes == 0 {
            return Err(ConfigError::Invalid("limits.read_chunk_bytes must be positive".into()));
        }
        if self.limits.max_header_bytes == 0 || self.limits.max_target_bytes == 0 {
            return Err(ConfigError::Invalid("limits ceilings must be positive".into()));
        }
        if self.limits.max_write_buffer_bytes == Some(0) {
            return Err(ConfigError::Invalid(
                "limits.max_write_buffer_bytes must be positive when set".into(),
            ));
        }
        Ok(())
    }
}
