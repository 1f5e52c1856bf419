//! Application Configuration
//!
//! YAML configuration with sensible defaults, plus a handful of environment
//! overrides for container deployments.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "CHUNK_VAULT_CONFIG";

/// Metadata backend types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackendKind {
    #[default]
    Sqlite,
    Memory,
    Disabled,
}

impl FromStr for MetadataBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" | "mock" => Ok(Self::Memory),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            _ => Err(format!("Unknown metadata backend: {}", s)),
        }
    }
}

impl fmt::Display for MetadataBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub metadata: MetadataConfig,
    /// Header names persisted and echoed without the `x-head-` prefix
    pub passthrough_headers: Vec<String>,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Maximum request body in bytes
    pub max_payload_size: usize,
}

/// Where object files live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory that object paths are resolved under
    pub root: String,
}

/// Metadata backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub backend: MetadataBackendKind,
    /// SQLite database file
    pub db_path: String,
    /// Seconds between expired-key purges
    pub purge_interval: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to the log4rs configuration file
    pub config_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9710,
            workers: 4,
            max_payload_size: 1073741824, // 1GB
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "./data/objects".to_string(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: MetadataBackendKind::Sqlite,
            db_path: "./data/metadata.db".to_string(),
            purge_interval: 300, // 5 minutes
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "server_log.yaml".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the file named by `CHUNK_VAULT_CONFIG`
    /// (default `config.yaml`), then apply environment overrides
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var(CONFIG_ENV).unwrap_or_else(|_| "config.yaml".to_string());
        let mut config = Self::from_file(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from file, use defaults if not found
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: AppConfig = serde_yaml::from_str(&content)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        } else {
            warn!("Config file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Apply `STORAGE_DIRECTORY`, `METADATA_BACKEND` and `DB_FILE`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = env::var("STORAGE_DIRECTORY") {
            info!("Using storage directory from environment: {}", root);
            self.storage.root = root;
        }

        if let Ok(backend_str) = env::var("METADATA_BACKEND") {
            match backend_str.parse::<MetadataBackendKind>() {
                Ok(backend) => {
                    info!("Using metadata backend from environment: {}", backend);
                    self.metadata.backend = backend;
                }
                Err(e) => warn!("Invalid metadata backend in environment: {}. Keeping {}.", e, self.metadata.backend),
            }
        }

        if let Ok(db_path) = env::var("DB_FILE") {
            info!("Using database path from environment: {}", db_path);
            self.metadata.db_path = db_path;
        }
    }
}
