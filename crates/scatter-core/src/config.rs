//! Configuration for Scatter.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SCATTER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/scatter/config.toml
//!   3. ~/.config/scatter/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::packet::MAX_BLOCK_SIZE;

/// Default chunk size for outbound transfers.
pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;

/// Payloads at or below this many bytes are stored inline.
pub const DEFAULT_INLINE_THRESHOLD: u64 = 512 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScatterConfig {
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Files received from peers land here.
    pub cache_dir: PathBuf,
    /// Files the local user chose to keep.
    pub user_dir: PathBuf,
    /// JSON file holding base64 secret keys by fingerprint.
    pub keystore_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size in bytes. Must be non-zero.
    pub block_size: u32,
    /// Largest payload stored inline rather than on disk.
    pub inline_threshold: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: data_dir().join("cache"),
            user_dir: data_dir().join("files"),
            keystore_path: config_dir().join("keys.json"),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("scatter")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local").join("share"))
        .join("scatter")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ScatterConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a config file, falling back to defaults when it does not exist.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(ScatterConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: ScatterConfig =
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SCATTER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config to `path` if nothing is there yet.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text =
            toml::to_string_pretty(&ScatterConfig::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply SCATTER_* overrides from `lookup`, normally the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SCATTER_TRANSFER__BLOCK_SIZE") {
            self.transfer.block_size = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SCATTER_TRANSFER__BLOCK_SIZE",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("SCATTER_TRANSFER__INLINE_THRESHOLD") {
            self.transfer.inline_threshold =
                v.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "SCATTER_TRANSFER__INLINE_THRESHOLD",
                    value: v.clone(),
                })?;
        }
        if let Some(v) = lookup("SCATTER_STORAGE__CACHE_DIR") {
            self.storage.cache_dir = PathBuf::from(v);
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let block_size = self.transfer.block_size;
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::InvalidValue {
                key: "transfer.block_size",
                value: block_size.to_string(),
            });
        }
        Ok(())
    }
}
