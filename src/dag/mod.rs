// src/dag/mod.rs

//! Resource graph and update scheduling.
//!
//! - [`resource`] describes resources and build units as loaded from config.
//! - [`graph`] holds the validated dependency graph and its stable
//!   topological order.
//! - [`task`] defines change sets and the update tasks handed to executors.
//! - [`scheduler`] contains the state machine deciding which resources
//!   update, when, and by which strategy.
//! - [`state_manager`] manages per-resource state transitions.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`snapshot`] is the read-only status view.

pub mod graph;
pub mod resource;
pub mod scheduler;
pub mod scheduler_step;
pub mod snapshot;
pub mod state_manager;
pub mod task;

pub use graph::ResourceGraph;
pub use resource::{BuildUnit, Resource, ResourceName, WatchSpec};
pub use scheduler::{
    choose_action, GraphReplacement, Scheduler, DEFAULT_MAX_PARALLEL_UPDATES, READINESS_FAILED,
};
pub use scheduler_step::SchedulerStep;
pub use snapshot::{ResourceView, StatusSnapshot};
pub use state_manager::ResourceState;
pub use task::{ChangeSet, TaskAction, TaskId, UpdateTask};
