// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::config::validate::validate_config;
use crate::errors::{DevorchError, Result};

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (graph correctness, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Resolves relative paths against the file's directory.
/// - Builds the resource graph, rejecting cycles, duplicates, unknown
///   references and malformed live updates.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = std::path::absolute(path.as_ref())?;
    let raw_config = load_from_path(&path)?;
    validate_config(raw_config, &path)
}

/// Helper to resolve a default config path.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Devorch.toml")
}

/// Something that can (re-)evaluate the configuration on demand.
///
/// The runtime calls this on every reload; tests substitute canned configs.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<ConfigFile>;
}

/// Reads and validates a TOML file on every call.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
    max_parallel_override: Option<usize>,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_parallel_override: None,
        }
    }

    /// Replace `max_parallel_updates` in every loaded config (CLI override).
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel_override = max_parallel;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<ConfigFile> {
        let mut cfg = load_and_validate(&self.path)?;
        if let Some(n) = self.max_parallel_override {
            if n == 0 {
                return Err(DevorchError::ConfigError(
                    "--max-parallel must be at least 1".to_string(),
                ));
            }
            cfg.config.max_parallel_updates = n;
        }
        Ok(cfg)
    }
}
