//! Configuration management for the fanout daemon.
//!
//! Configuration lives in a TOML file (default `fanoutd.toml`). When the file
//! does not exist it is generated with defaults. An empty `storage.data_dir`
//! resolves to the platform data directory.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Platform-specific data directory for the daemon
pub fn get_data_dir() -> PathBuf {
    if cfg!(windows) {
        // Windows: %APPDATA%\fanoutd
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fanoutd")
    } else {
        // Linux/Mac: ~/.fanoutd
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fanoutd")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub websocket: WebSocketConfig,
    pub rpc: RpcConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub listen_address: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Payloads buffered per session before deliveries count as transient failures
    #[serde(default = "default_queue_depth")]
    pub outbound_queue_depth: usize,
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_queue_depth() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub enabled: bool,
    pub listen_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sled" (persistent) or "memory" (testing)
    pub backend: String,
    pub data_dir: String,
    pub cache_size_mb: usize,
    #[serde(default)]
    pub flush_on_write: bool,
}

impl StorageConfig {
    pub fn registry_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("db").join("connections")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Milliseconds a broadcast waits for deliveries; 0 waits for all of them
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
        }
    }
}

impl BroadcastConfig {
    pub fn deadline(&self) -> Option<Duration> {
        match self.deadline_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn default_deadline_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
    /// "stdout" or "file"
    pub output: String,
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                name: "fanout node".to_string(),
            },
            websocket: WebSocketConfig {
                listen_address: "0.0.0.0:8080".to_string(),
                heartbeat_interval_secs: default_heartbeat_interval(),
                outbound_queue_depth: default_queue_depth(),
            },
            rpc: RpcConfig {
                enabled: true,
                listen_address: "127.0.0.1:8081".to_string(),
            },
            storage: StorageConfig {
                backend: "sled".to_string(),
                data_dir: String::new(),
                cache_size_mb: 64,
                flush_on_write: false,
            },
            broadcast: BroadcastConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                output: "stdout".to_string(),
                file_path: "logs/fanoutd.log".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self, AppError> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| AppError::Config(format!("{}: {}", path, e)))
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), AppError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Load `path`, writing a default config there first if it does not exist.
    pub fn load_or_create(path: &str) -> Result<Self, AppError> {
        let mut config = if fs::metadata(path).is_ok() {
            Self::load_from_file(path)?
        } else {
            let config = Self::default();
            config.save_to_file(path)?;
            tracing::info!("Generated default config at {}", path);
            config
        };

        if config.storage.data_dir.is_empty() {
            config.storage.data_dir = get_data_dir().to_string_lossy().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        match self.storage.backend.as_str() {
            "sled" | "memory" => {}
            other => {
                return Err(AppError::Config(format!(
                    "Unknown storage backend '{}' (expected sled or memory)",
                    other
                )))
            }
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(AppError::Config(format!(
                    "Unknown log format '{}' (expected pretty or json)",
                    other
                )))
            }
        }

        match self.logging.output.as_str() {
            "stdout" | "file" => {}
            other => {
                return Err(AppError::Config(format!(
                    "Unknown log output '{}' (expected stdout or file)",
                    other
                )))
            }
        }

        if self.websocket.outbound_queue_depth == 0 {
            return Err(AppError::Config(
                "websocket.outbound_queue_depth must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fanoutd.toml");
        let path = path.to_str().unwrap();

        let config = Config::load_or_create(path).unwrap();

        assert!(fs::metadata(path).is_ok());
        assert!(!config.storage.data_dir.is_empty());
        assert_eq!(config.storage.backend, "sled");
    }

    #[test]
    fn test_missing_broadcast_section_uses_default_deadline() {
        let mut config = Config::default();
        config.storage.data_dir = "/tmp/x".to_string();
        let mut text = toml::to_string_pretty(&config).unwrap();
        let start = text.find("[broadcast]").unwrap();
        let end = text[start..].find("[logging]").unwrap() + start;
        text.replace_range(start..end, "");

        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.broadcast.deadline(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_zero_deadline_disables_it() {
        let broadcast = BroadcastConfig { deadline_ms: 0 };
        assert_eq!(broadcast.deadline(), None);
    }

    #[test]
    fn test_validate_rejects_unknown_backend() {
        let mut config = Config::default();
        config.storage.backend = "dynamo".to_string();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = Config::default();
        config.websocket.outbound_queue_depth = 0;
        assert!(config.validate().is_err());
    }
}
