// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ConfigFile;
use crate::dag::{Resource, Scheduler, SchedulerStep, TaskId, UpdateTask};
use crate::engine::{RuntimeOptions, TaskOutcome, TeardownId, TriggerReason};
use crate::prune::PruneReport;
use crate::watch::Classification;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    DispatchTasks(Vec<UpdateTask>),
    /// Re-evaluate the configuration and report back with
    /// `ConfigReloaded` / `ConfigReloadFailed`.
    ReloadConfig,
    /// Make a newly accepted configuration visible to the watcher.
    PublishConfig(Arc<ConfigFile>),
    /// Adjust the executor's concurrency bound.
    SetParallelism(usize),
    /// Delete these resources, in order. The executor answers with
    /// `TeardownFinished { id, .. }`.
    Teardown {
        id: TeardownId,
        resources: Vec<Arc<Resource>>,
        cancel_in_flight: bool,
    },
    /// Request that the process exits (used for `--once` when idle).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn keep_running(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    /// Tasks dispatched by this step, across all `DispatchTasks` commands.
    pub fn dispatched(&self) -> Vec<&UpdateTask> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::DispatchTasks(tasks) => Some(tasks.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// Teardowns handed to the executor that have not reported back yet.
#[derive(Debug, Default)]
pub struct PendingTeardowns {
    next: u64,
    pending: BTreeSet<TeardownId>,
}

impl PendingTeardowns {
    /// Allocate an id for a new teardown and track it.
    pub fn start(&mut self) -> TeardownId {
        self.next += 1;
        let id = TeardownId(self.next);
        self.pending.insert(id);
        id
    }

    /// Returns false for ids that were never started or already finished.
    pub fn finish(&mut self, id: TeardownId) -> bool {
        self.pending.remove(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Turn a scheduler step into commands.
fn dispatch(step: SchedulerStep) -> Vec<CoreCommand> {
    if step.dispatched.is_empty() {
        Vec::new()
    } else {
        vec![CoreCommand::DispatchTasks(step.dispatched)]
    }
}

/// Seed the scheduler with `auto_init` resources and startup triggers.
pub fn handle_start(scheduler: &mut Scheduler, triggers: &[String]) -> CoreStep {
    CoreStep::keep_running(dispatch(scheduler.start(triggers)))
}

/// Handle a classified change batch.
///
/// A reload request takes precedence: the scheduler holds all dispatching
/// and the shell re-evaluates the configuration.
pub fn handle_changes(scheduler: &mut Scheduler, classification: Classification) -> CoreStep {
    if classification.reload_required {
        scheduler.begin_reload();
        return CoreStep::keep_running(vec![CoreCommand::ReloadConfig]);
    }

    CoreStep::keep_running(dispatch(scheduler.handle_changes(classification.changes)))
}

/// Handle an explicit trigger by name.
pub fn handle_trigger(scheduler: &mut Scheduler, resource: &str, reason: TriggerReason) -> CoreStep {
    debug!(resource = %resource, ?reason, "resource triggered");
    CoreStep::keep_running(dispatch(scheduler.handle_trigger(resource)))
}

/// Handle an update task completion.
pub fn handle_task_completion(
    scheduler: &mut Scheduler,
    resource: &str,
    task_id: TaskId,
    outcome: TaskOutcome,
) -> CoreStep {
    let step = scheduler.handle_completion(resource, task_id, outcome);
    if step.became_idle {
        info!(
            completed_builds = scheduler.completed_builds(),
            "all updates finished; waiting for changes"
        );
    }
    CoreStep::keep_running(dispatch(step))
}

/// Handle a workload readiness report.
pub fn handle_readiness(scheduler: &mut Scheduler, resource: &str, ready: bool) -> CoreStep {
    CoreStep::keep_running(dispatch(scheduler.handle_readiness(resource, ready)))
}

/// Swap in a reloaded configuration.
///
/// Removed resources are torn down (letting their in-flight work finish),
/// the executor is resized, the watcher gets the new configuration, and
/// whatever the new graph makes eligible is dispatched.
pub fn handle_config_reloaded(
    scheduler: &mut Scheduler,
    teardowns: &mut PendingTeardowns,
    cfg: Arc<ConfigFile>,
) -> CoreStep {
    let max_parallel = cfg.config.max_parallel_updates;
    let replacement = scheduler.replace_graph(cfg.graph().clone(), max_parallel);

    let mut commands = Vec::new();
    if !replacement.removed.is_empty() {
        commands.push(CoreCommand::Teardown {
            id: teardowns.start(),
            resources: replacement.removed,
            cancel_in_flight: false,
        });
    }
    commands.push(CoreCommand::SetParallelism(max_parallel));
    commands.push(CoreCommand::PublishConfig(cfg));
    commands.extend(dispatch(replacement.step));

    CoreStep::keep_running(commands)
}

/// Keep the previous graph after a failed reload and resume scheduling.
pub fn handle_config_reload_failed(scheduler: &mut Scheduler, error: String) -> CoreStep {
    CoreStep::keep_running(dispatch(scheduler.reload_failed(error)))
}

pub fn handle_prune_finished(report: &PruneReport) -> CoreStep {
    info!(
        containers = report.containers_deleted.len(),
        images = report.images_deleted.len(),
        build_cache = report.build_cache_pruned,
        reclaimed_bytes = report.space_reclaimed,
        "docker prune finished"
    );
    CoreStep::keep_running(Vec::new())
}

/// Tear down every resource (dependents first).
///
/// The runtime keeps draining events until the executor reports the
/// teardown finished; see [`handle_teardown_finished`].
pub fn handle_teardown(
    scheduler: &Scheduler,
    teardowns: &mut PendingTeardowns,
    options: &RuntimeOptions,
) -> CoreStep {
    info!(
        resources = scheduler.graph().len(),
        cancel_in_flight = options.cancel_on_teardown,
        "tearing down resources"
    );
    CoreStep::keep_running(vec![CoreCommand::Teardown {
        id: teardowns.start(),
        resources: scheduler.teardown_order(),
        cancel_in_flight: options.cancel_on_teardown,
    }])
}

/// Record a finished teardown.
pub fn handle_teardown_finished(
    teardowns: &mut PendingTeardowns,
    id: TeardownId,
    failed: &[String],
) -> CoreStep {
    if !teardowns.finish(id) {
        debug!(teardown = id.0, "report for unknown teardown; ignoring");
    } else if failed.is_empty() {
        info!(teardown = id.0, "teardown finished");
    } else {
        warn!(teardown = id.0, ?failed, "teardown finished with failed deletes");
    }
    CoreStep::keep_running(Vec::new())
}
