// src/config/mod.rs

//! Configuration loading and validation for devorch.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it and resolve it into a resource graph (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, ConfigSource, FileConfigSource};
pub use model::{
    ConfigFile, ConfigSection, DockerPruneSection, ImageConfig, LiveUpdateStepConfig, RawConfigFile,
    ResourceConfig,
};
pub use validate::validate_config;
