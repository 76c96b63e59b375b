// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `UpdateTask`s to the executor
//! - re-evaluating configuration
//! - handling Ctrl+C / shutdown
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, filesystem, or processes.

use tracing::debug;

use crate::dag::{Scheduler, StatusSnapshot};
use crate::engine::event_handlers::{
    handle_changes, handle_config_reload_failed, handle_config_reloaded, handle_prune_finished,
    handle_readiness, handle_start, handle_task_completion, handle_teardown,
    handle_teardown_finished, handle_trigger, CoreCommand, CoreStep, PendingTeardowns,
};
use crate::engine::{RuntimeEvent, RuntimeOptions};

/// Pure core runtime state.
///
/// This owns:
/// - the update scheduler
/// - runtime options (e.g. `exit_when_idle`)
/// - the teardowns the executor has not reported back yet
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    options: RuntimeOptions,
    teardowns: PendingTeardowns,
    tearing_down: bool,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler, options: RuntimeOptions) -> Self {
        Self {
            scheduler,
            options,
            teardowns: PendingTeardowns::default(),
            tearing_down: false,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Expose whether the scheduler is idle (for tests).
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    /// A teardown was handed to the executor and has not finished yet.
    pub fn teardown_pending(&self) -> bool {
        !self.teardowns.is_empty()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.scheduler.snapshot()
    }

    /// Queue the initial resources. Called once before the first event.
    pub fn start(&mut self, triggers: &[String]) -> CoreStep {
        let step = handle_start(&mut self.scheduler, triggers);
        self.maybe_exit(step)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        if self.tearing_down {
            return self.step_tearing_down(event);
        }

        let step = match event {
            RuntimeEvent::ChangesClassified(classification) => {
                handle_changes(&mut self.scheduler, classification)
            }
            RuntimeEvent::ResourceTriggered { resource, reason } => {
                handle_trigger(&mut self.scheduler, &resource, reason)
            }
            RuntimeEvent::TaskCompleted {
                resource,
                task_id,
                outcome,
            } => handle_task_completion(&mut self.scheduler, &resource, task_id, outcome),
            RuntimeEvent::ReadinessChanged { resource, ready } => {
                handle_readiness(&mut self.scheduler, &resource, ready)
            }
            RuntimeEvent::ConfigReloaded(cfg) => {
                handle_config_reloaded(&mut self.scheduler, &mut self.teardowns, cfg)
            }
            RuntimeEvent::ConfigReloadFailed(error) => {
                handle_config_reload_failed(&mut self.scheduler, error)
            }
            RuntimeEvent::PruneFinished(report) => handle_prune_finished(&report),
            RuntimeEvent::TeardownRequested => {
                self.tearing_down = true;
                return handle_teardown(&self.scheduler, &mut self.teardowns, &self.options);
            }
            RuntimeEvent::TeardownFinished { id, failed } => {
                handle_teardown_finished(&mut self.teardowns, id, &failed)
            }
            RuntimeEvent::ShutdownRequested => return exit(CoreStep::keep_running(Vec::new())),
        };

        self.maybe_exit(step)
    }

    /// After `TeardownRequested` only teardown reports matter; the runtime
    /// exits once every outstanding teardown finished.
    fn step_tearing_down(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::TeardownFinished { id, failed } => {
                let step = handle_teardown_finished(&mut self.teardowns, id, &failed);
                if self.teardowns.is_empty() {
                    return exit(step);
                }
                step
            }
            RuntimeEvent::ShutdownRequested => exit(CoreStep::keep_running(Vec::new())),
            other => {
                debug!(?other, "tearing down; ignoring event");
                CoreStep::keep_running(Vec::new())
            }
        }
    }

    /// In `--once` mode, exit as soon as nothing is left to do.
    fn maybe_exit(&self, step: CoreStep) -> CoreStep {
        if self.options.exit_when_idle && self.scheduler.is_idle() && self.teardowns.is_empty() {
            return exit(step);
        }
        step
    }
}

fn exit(mut step: CoreStep) -> CoreStep {
    step.commands.push(CoreCommand::RequestExit);
    step.keep_running = false;
    step
}
