// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DevorchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("Duplicate build unit: {0}")]
    DuplicateBuildUnit(String),

    #[error("resource '{resource}' has unknown dependency '{dependency}'")]
    UnknownDependency { resource: String, dependency: String },

    #[error("Cycle detected in resource graph: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Invalid live_update for '{unit}': {reason}")]
    InvalidLiveUpdate { unit: String, reason: String },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DevorchError>;
