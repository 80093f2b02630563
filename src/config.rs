//! Application Configuration
//!
//! This module provides configuration management for the relay, supporting a
//! YAML configuration file with sensible defaults, overridden by environment
//! variables (`MAX_FILE_SIZE`, `MAX_STORAGE`, `MAX_MONTHLY_TRANSFER`,
//! `KV_BACKEND`, `DB_FILE`, `BLOB_TTL_SECS`).

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::quota::QuotaLimits;

/// Key-value backend types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KvBackend {
    #[default]
    Sqlite,
    Mock,
}

impl FromStr for KvBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(KvBackend::Sqlite),
            "mock" | "memory" => Ok(KvBackend::Mock),
            _ => Err(format!("Unknown key-value backend: {}", s)),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Upload and quota limits
    pub limits: LimitsConfig,
    /// Key-value storage configuration
    pub storage: StorageConfig,
    /// Expiry configuration
    pub expiry: ExpiryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Base URL printed in share links by the upload helper
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9710,
            workers: 4,
            public_url: "http://localhost:9710".to_string(),
        }
    }
}

/// Upload and quota limits, all in bytes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_file_size: u64,
    pub max_storage: u64,
    pub max_monthly_transfer: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,         // 10MB
            max_storage: 100 * 1024 * 1024,          // 100MB
            max_monthly_transfer: 1024 * 1024 * 1024, // 1GB
        }
    }
}

impl LimitsConfig {
    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            max_storage: self.max_storage,
            max_monthly_transfer: self.max_monthly_transfer,
        }
    }
}

/// Key-value storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: KvBackend,
    /// Database file path
    pub db_path: String,
    /// Enable WAL mode
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: KvBackend::Sqlite,
            db_path: "./data/relay.sqlite".to_string(),
            wal_mode: true,
        }
    }
}

/// Expiry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Run the background sweep
    pub enabled: bool,
    /// Lifetime of every blob
    pub ttl_secs: u64,
    /// Seconds between sweeps
    pub sweep_interval_secs: u64,
    /// Blobs expired per sweep batch
    pub batch_size: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 60,
            batch_size: 100,
        }
    }
}

impl ExpiryConfig {
    /// Blob lifetime, saturating at the largest representable duration
    pub fn ttl(&self) -> chrono::Duration {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log4rs configuration file
    pub config_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "server_log.yaml".to_string(),
        }
    }
}

/// Parse an environment variable, ignoring (and logging) invalid values
fn env_override<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => {
            info!("Using {} from environment: {}", name, raw);
            Some(value)
        }
        Err(_) => {
            warn!("Invalid value for {} in environment: {:?}, ignoring", name, raw);
            None
        }
    }
}

impl AppConfig {
    /// Load configuration from `CONFIG_FILE` (default `config.yaml`), use
    /// defaults if not found, then apply environment overrides.
    ///
    /// `init_logging` runs on the file configuration before anything is
    /// logged, so override warnings reach the configured logger.
    pub fn load<F>(init_logging: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: FnOnce(&AppConfig),
    {
        let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from(&config_path, init_logging)
    }

    pub fn load_from<F>(path: impl AsRef<Path>, init_logging: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: FnOnce(&AppConfig),
    {
        let path = path.as_ref();
        let mut config = Self::from_file(path)?;
        init_logging(&config);

        if path.exists() {
            info!("Loaded configuration from {}", path.display());
        } else {
            warn!("Config file {} not found, using defaults", path.display());
        }
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read a YAML file; a missing file yields the defaults. Logs nothing.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_override("MAX_FILE_SIZE") {
            self.limits.max_file_size = v;
        }
        if let Some(v) = env_override("MAX_STORAGE") {
            self.limits.max_storage = v;
        }
        if let Some(v) = env_override("MAX_MONTHLY_TRANSFER") {
            self.limits.max_monthly_transfer = v;
        }
        if let Some(v) = env_override("KV_BACKEND") {
            self.storage.backend = v;
        }
        if let Some(v) = env_override("DB_FILE") {
            self.storage.db_path = v;
        }
        if let Some(v) = env_override("BLOB_TTL_SECS") {
            self.expiry.ttl_secs = v;
        }
    }

    /// Defaults with an in-memory backend, for tests
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.storage.backend = KvBackend::Mock;
        config.expiry.enabled = false;
        config
    }
}
