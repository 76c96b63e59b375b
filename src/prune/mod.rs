// src/prune/mod.rs

//! Reclaiming stale build artifacts.
//!
//! - [`policy`] decides which images are old enough to go.
//! - [`pruner`] owns the cadence and runs passes in the background.
//! - [`docker`] is the `docker` CLI-backed artifact store.

pub mod docker;
pub mod policy;
pub mod pruner;

pub use docker::{is_in_use_error, ArtifactStore, DockerCliStore};
pub use policy::{repository, select_images_to_delete, ImageInfo, PruneSettings};
pub use pruner::{spawn_pruner, PruneReport, Pruner, PRUNE_CHECK_INTERVAL};
