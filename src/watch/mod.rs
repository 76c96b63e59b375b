// src/watch/mod.rs

//! File watching and change classification.
//!
//! This module is responsible for:
//! - Compiling dockerignore-style `ignore` / `only` patterns.
//! - Mapping changed paths to the resources whose inputs they touch.
//! - Debouncing raw events into batches.
//! - Wiring up a cross-platform filesystem watcher (`notify`).
//!
//! It does **not** know about scheduling; it only turns filesystem changes
//! into per-resource change sets (or a reload request).

pub mod classifier;
pub mod debounce;
pub mod event_handler;
pub mod path_utils;
pub mod patterns;
pub mod watcher;

pub use classifier::{ChangeClassifier, ChangeEvent, Classification};
pub use debounce::next_batch;
pub use patterns::{IgnoreRules, OnlyRules};
pub use watcher::{spawn_watcher, WatcherHandle};
