// src/engine/mod.rs

//! Orchestration engine for devorch.
//!
//! This module ties together:
//! - the update scheduler
//! - the main runtime event loop that reacts to:
//!   - classified file changes and reload requests
//!   - manual triggers
//!   - task completion and workload readiness
//!   - pruner reports
//!   - teardown / shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::sync::Arc;

use crate::config::ConfigFile;
use crate::dag::{ResourceName, TaskId};
use crate::prune::PruneReport;
use crate::watch::Classification;

/// Outcome of an update task for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    /// The executor reported an error; the message is kept on the resource.
    Failed(String),
    /// The task was interrupted (teardown with cancellation).
    Cancelled,
}

/// Identifies one teardown handed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TeardownId(pub u64);

/// Why a resource was triggered by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// Requested by the user (CLI `--trigger`, UI button).
    Manual,
    /// Issued by another component (e.g. a test harness or an API client).
    External,
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once the scheduler is idle (used for
    /// `--once`).
    pub exit_when_idle: bool,
    /// If true, teardown interrupts in-flight tasks instead of letting them
    /// finish first.
    pub cancel_on_teardown: bool,
}

/// Events flowing into the runtime from watchers, executors, etc.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A debounced batch of filesystem changes, already classified.
    ChangesClassified(Classification),
    /// A resource should be updated regardless of trigger mode.
    ResourceTriggered {
        resource: ResourceName,
        reason: TriggerReason,
    },
    /// An update task finished.
    TaskCompleted {
        resource: ResourceName,
        task_id: TaskId,
        outcome: TaskOutcome,
    },
    /// The deployed workload of a resource changed readiness.
    ReadinessChanged {
        resource: ResourceName,
        ready: bool,
    },
    /// The configuration was re-evaluated successfully.
    ConfigReloaded(Arc<ConfigFile>),
    /// Re-evaluating the configuration failed; the old graph stays active.
    ConfigReloadFailed(String),
    /// The pruner finished a pass.
    PruneFinished(PruneReport),
    /// Tear every resource down, then exit (Ctrl-C).
    TeardownRequested,
    /// The executor deleted the resources of teardown `id`; `failed` lists
    /// the ones whose delete returned an error.
    TeardownFinished {
        id: TeardownId,
        failed: Vec<ResourceName>,
    },
    /// Exit immediately without tearing anything down.
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep, PendingTeardowns};
pub use runtime::Runtime;
