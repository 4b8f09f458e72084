use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ErrorCode;

/// Ideal size of one write batch to the persistent store, in bytes.
pub const IDEAL_BATCH_SIZE: usize = 100 * 1024;

/// Tuning for the vector index and its overlay store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Estimated bytes of flushed vectors kept resident before spilling.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Bytes per write batch when spilling to the persistent store.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pending-write estimate above which `Index::maybe_flush` flushes.
    #[serde(default = "default_pending_limit")]
    pub pending_limit: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            batch_size: default_batch_size(),
            pending_limit: default_pending_limit(),
        }
    }
}

const fn default_cache_size() -> usize {
    160 * 1024 * 1024
}

const fn default_batch_size() -> usize {
    IDEAL_BATCH_SIZE
}

const fn default_pending_limit() -> usize {
    16 * 1024 * 1024
}

/// Rejected config document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid vector clock config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ConfigParseError
    }
}

impl IndexConfig {
    /// Small footprint for tests and tools.
    #[must_use]
    pub const fn lite() -> Self {
        Self {
            cache_size: 100 * 1024,
            batch_size: 16 * 1024,
            pending_limit: 64 * 1024,
        }
    }

    /// Parse a TOML document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is not valid TOML for
    /// this struct.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str::<Self>(content)?)
    }

    /// Load from `path`, or the defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed. A
    /// parse failure downcasts to [`ConfigError`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = IndexConfig::from_toml_str("cache_size = 4096\n").expect("parse");
        assert_eq!(config.cache_size, 4096);
        assert_eq!(config.batch_size, IDEAL_BATCH_SIZE);
        assert_eq!(config.pending_limit, IndexConfig::default().pending_limit);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let err = IndexConfig::from_toml_str("cache_size = \"big\"").expect_err("bad type");
        assert_eq!(err.code(), ErrorCode::ConfigParseError);
        assert_eq!(err.code().code(), "E3001");
    }

    #[test]
    fn load_parse_failure_carries_code() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("vclock.toml");
        std::fs::write(&path, "batch_size = [1, 2]\n").expect("write");
        let err = IndexConfig::load(&path).expect_err("bad type");
        let config_err = err.downcast_ref::<ConfigError>().expect("config error");
        assert_eq!(config_err.code(), ErrorCode::ConfigParseError);
        assert!(err.to_string().contains("vclock.toml"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = IndexConfig::load(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(config, IndexConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("vclock.toml");
        std::fs::write(&path, "batch_size = 10\npending_limit = 20\n").expect("write");
        let config = IndexConfig::load(&path).expect("load");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.pending_limit, 20);
        assert_eq!(config.cache_size, IndexConfig::default().cache_size);
    }

    #[test]
    fn lite_is_smaller_than_default() {
        let lite = IndexConfig::lite();
        let full = IndexConfig::default();
        assert!(lite.cache_size < full.cache_size);
        assert!(lite.pending_limit < full.pending_limit);
    }
}
