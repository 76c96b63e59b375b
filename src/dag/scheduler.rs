// src/dag/scheduler.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::dag::graph::ResourceGraph;
use crate::dag::resource::{BuildUnit, Resource, ResourceName};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::snapshot::{ResourceView, StatusSnapshot};
use crate::dag::state_manager::{ReadOnlyStateManager, ResourceState, StateManager};
use crate::dag::task::{ChangeSet, TaskAction, TaskId, UpdateTask};
use crate::engine::TaskOutcome;
use crate::liveupdate::{decide, LiveUpdateDecision};
use crate::types::{BuildStrategy, ReadinessPolicy, ResourceStatus};

/// Default bound on concurrently building resources.
pub const DEFAULT_MAX_PARALLEL_UPDATES: usize = 3;

/// Last error recorded when a workload's readiness probe gives up.
pub const READINESS_FAILED: &str = "workload did not become ready";

/// Scheduler holds the current resource graph plus per-resource state.
///
/// It is responsible for:
/// - deciding which resources are candidates (changes, startup, triggers)
/// - gating candidates on their dependencies
/// - bounding concurrency and ordering the queue
/// - choosing a strategy and creating [`UpdateTask`]s
/// - recording completions and re-queueing coalesced changes
///
/// Every method is synchronous and returns what changed as a
/// [`SchedulerStep`]; nothing here performs IO.
#[derive(Debug)]
pub struct Scheduler {
    graph: ResourceGraph,
    states: IndexMap<ResourceName, ResourceState>,
    max_parallel: usize,
    next_task_id: u64,
    eligibility_pass: u64,
    completed_builds: u64,
    reload_pending: bool,
    config_error: Option<String>,
    /// Whether the previous step left work in flight.
    busy: bool,
}

/// Result of swapping in a new graph.
#[derive(Debug, Default)]
pub struct GraphReplacement {
    /// Resources absent from the new graph; the caller tears them down.
    pub removed: Vec<Arc<Resource>>,
    pub step: SchedulerStep,
}

impl Scheduler {
    pub fn new(graph: ResourceGraph, max_parallel: usize) -> Self {
        let states = graph
            .topo_order()
            .iter()
            .map(|name| (name.clone(), ResourceState::default()))
            .collect();

        Self {
            graph,
            states,
            max_parallel: max_parallel.max(1),
            next_task_id: 0,
            eligibility_pass: 0,
            completed_builds: 0,
            reload_pending: false,
            config_error: None,
            busy: false,
        }
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn state_of(&self, name: &str) -> Option<&ResourceState> {
        self.states.get(name)
    }

    pub fn status_of(&self, name: &str) -> Option<ResourceStatus> {
        self.states.get(name).map(|s| s.status)
    }

    pub fn queued(&self) -> Vec<ResourceName> {
        self.view().with_status(ResourceStatus::Queued)
    }

    pub fn building(&self) -> Vec<ResourceName> {
        self.view().with_status(ResourceStatus::Building)
    }

    /// Queued resources that nothing but new input can unblock.
    pub fn blocked(&self) -> Vec<ResourceName> {
        let view = self.view();
        self.states
            .iter()
            .filter(|(name, s)| {
                s.status == ResourceStatus::Queued
                    && !view.deps_satisfied(name)
                    && !view.waiting_on_readiness(name)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn completed_builds(&self) -> u64 {
        self.completed_builds
    }

    pub fn reload_pending(&self) -> bool {
        self.reload_pending
    }

    /// Nothing is building, no reload is pending, and no queued resource is
    /// merely waiting for a dependency's workload to become ready.
    ///
    /// Queued resources blocked by a failed or never-started dependency do not
    /// keep the scheduler busy: nothing but new input can unblock them.
    pub fn is_idle(&self) -> bool {
        let view = self.view();
        !self.reload_pending
            && view.count(ResourceStatus::Building) == 0
            && !self
                .states
                .iter()
                .any(|(name, s)| s.status == ResourceStatus::Queued && view.waiting_on_readiness(name))
    }

    /// Queue every `auto_init` resource plus the explicitly triggered ones.
    pub fn start(&mut self, triggers: &[String]) -> SchedulerStep {
        let initial: Vec<ResourceName> = self
            .graph
            .resources()
            .filter(|r| r.auto_init)
            .map(|r| r.name.clone())
            .collect();

        for name in &initial {
            self.request_trigger(name);
        }
        for name in triggers {
            if self.graph.contains(name) {
                self.request_trigger(name);
            } else {
                warn!(resource = %name, "startup trigger for unknown resource; ignoring");
            }
        }

        info!(
            resources = self.graph.len(),
            initial = initial.len(),
            "scheduler: starting"
        );
        self.finish_step(SchedulerStep::default())
    }

    /// Record classified changes, keyed by resource.
    ///
    /// Auto resources are queued; manual resources keep the changes until
    /// they are triggered; building resources pick them up on completion.
    pub fn handle_changes(&mut self, changes: BTreeMap<ResourceName, ChangeSet>) -> SchedulerStep {
        for (name, change) in changes {
            let Some(resource) = self.graph.get(&name).cloned() else {
                debug!(resource = %name, "change for unknown resource; dropping");
                continue;
            };
            if change.is_empty() {
                continue;
            }

            let Some(state) = self.states.get_mut(&name) else {
                continue;
            };
            state.merge_pending(change);
            let status = state.status;

            if !resource.trigger_mode.is_auto() {
                debug!(resource = %name, "manual resource changed; waiting for trigger");
                continue;
            }

            if status == ResourceStatus::Building {
                debug!(resource = %name, "resource building; change coalesced for re-run");
                continue;
            }

            StateManager::new(&self.graph, &mut self.states).enqueue(&name);
        }

        self.finish_step(SchedulerStep::default())
    }

    /// Explicit trigger by name (CLI or UI).
    pub fn handle_trigger(&mut self, name: &str) -> SchedulerStep {
        if !self.graph.contains(name) {
            warn!(resource = %name, "trigger for unknown resource; ignoring");
            return SchedulerStep::default();
        }
        self.request_trigger(name);
        self.finish_step(SchedulerStep::default())
    }

    /// The executor finished task `task_id` for `name`.
    ///
    /// Completions for superseded tasks or resources no longer in the graph
    /// are ignored.
    pub fn handle_completion(
        &mut self,
        name: &str,
        task_id: TaskId,
        outcome: TaskOutcome,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(resource) = self.graph.get(name).cloned() else {
            debug!(resource = %name, task_id = %task_id, "completion for removed resource; ignoring");
            return step;
        };
        let Some(state) = self.states.get_mut(name) else {
            return step;
        };
        if state.in_flight != Some(task_id) {
            debug!(
                resource = %name,
                task_id = %task_id,
                "completion for superseded task; ignoring"
            );
            return step;
        }

        state.in_flight = None;
        state.build_count += 1;
        self.completed_builds += 1;

        let next = match outcome {
            TaskOutcome::Success => {
                state.last_error = None;
                state.last_success = Some(Utc::now());
                state.workload_ready = resource.pod_readiness == ReadinessPolicy::Ignore;
                state.readiness_failed = false;
                info!(resource = %name, task_id = %task_id, "update succeeded");
                step.newly_ready.push(name.to_string());
                ResourceStatus::Ready
            }
            TaskOutcome::Failed(msg) => {
                warn!(resource = %name, task_id = %task_id, error = %msg, "update failed");
                state.last_error = Some(msg);
                step.newly_failed.push(name.to_string());
                ResourceStatus::Error
            }
            TaskOutcome::Cancelled => {
                warn!(resource = %name, task_id = %task_id, "update cancelled");
                state.last_error = Some("update cancelled".to_string());
                step.newly_failed.push(name.to_string());
                ResourceStatus::Error
            }
        };

        let requeue =
            state.trigger_requested || (resource.trigger_mode.is_auto() && state.has_pending());

        let mut manager = StateManager::new(&self.graph, &mut self.states);
        manager.transition(name, next);
        if requeue {
            debug!(resource = %name, "changes arrived during update; re-queueing");
            manager.enqueue(name);
        }

        self.finish_step(step)
    }

    /// Workload readiness reported for `name`.
    ///
    /// The executor reports `false` only when the probe gave up, so that is
    /// recorded as a failure: dependents stay queued but no longer count as
    /// waiting, and the message shows up as the resource's last error.
    pub fn handle_readiness(&mut self, name: &str, ready: bool) -> SchedulerStep {
        match self.states.get_mut(name) {
            Some(state) => {
                if state.workload_ready != ready {
                    debug!(resource = %name, ready, "workload readiness changed");
                }
                state.workload_ready = ready;
                state.readiness_failed = !ready;
                if ready {
                    if state.last_error.as_deref() == Some(READINESS_FAILED) {
                        state.last_error = None;
                    }
                } else {
                    warn!(resource = %name, "workload did not become ready; dependents stay blocked");
                    state.last_error = Some(READINESS_FAILED.to_string());
                }
            }
            None => {
                debug!(resource = %name, "readiness for unknown resource; ignoring");
                return SchedulerStep::default();
            }
        }
        self.finish_step(SchedulerStep::default())
    }

    /// A configuration reload started; hold all dispatching until it resolves.
    pub fn begin_reload(&mut self) {
        if !self.reload_pending {
            info!("configuration change detected; holding updates until reload completes");
        }
        self.reload_pending = true;
        self.busy = true;
    }

    /// The reload failed: keep the current graph and resume.
    pub fn reload_failed(&mut self, error: String) -> SchedulerStep {
        warn!(error = %error, "configuration reload failed; keeping previous resource graph");
        self.config_error = Some(error);
        self.reload_pending = false;
        self.finish_step(SchedulerStep::default())
    }

    /// Swap in a freshly loaded graph.
    ///
    /// Resources missing from `graph` are returned for teardown. Surviving
    /// resources keep their state and are treated as changed; new resources
    /// start `pending` and are queued if `auto_init`.
    pub fn replace_graph(&mut self, graph: ResourceGraph, max_parallel: usize) -> GraphReplacement {
        let removed: Vec<Arc<Resource>> = self
            .graph
            .resources()
            .filter(|r| !graph.contains(&r.name))
            .cloned()
            .collect();

        let mut old_states = std::mem::take(&mut self.states);
        let mut fresh = Vec::new();

        for name in graph.topo_order() {
            match old_states.swap_remove(name) {
                Some(state) => {
                    self.states.insert(name.clone(), state);
                }
                None => {
                    self.states.insert(name.clone(), ResourceState::default());
                    fresh.push(name.clone());
                }
            }
        }

        for res in &removed {
            info!(resource = %res.name, "resource removed from configuration");
        }

        self.graph = graph;
        self.max_parallel = max_parallel.max(1);
        self.config_error = None;
        self.reload_pending = false;

        let mut changed = BTreeMap::new();
        for name in self.graph.topo_order() {
            if !fresh.contains(name) {
                changed.insert(name.clone(), ChangeSet::config_reload());
            }
        }

        let fresh_auto: Vec<ResourceName> = fresh
            .into_iter()
            .filter(|n| self.graph.get(n).is_some_and(|r| r.auto_init))
            .collect();
        for name in &fresh_auto {
            self.request_trigger(name);
        }

        info!(
            resources = self.graph.len(),
            removed = removed.len(),
            added = fresh_auto.len(),
            "resource graph replaced"
        );

        let step = self.handle_changes(changed);
        GraphReplacement { removed, step }
    }

    /// Resources in teardown order: dependents before their dependencies.
    pub fn teardown_order(&self) -> Vec<Arc<Resource>> {
        self.graph
            .topo_order()
            .iter()
            .rev()
            .filter_map(|name| self.graph.get(name).cloned())
            .collect()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let resources = self
            .graph
            .topo_order()
            .iter()
            .filter_map(|name| {
                let res = self.graph.get(name)?;
                let state = self.states.get(name)?;
                Some(ResourceView {
                    name: name.clone(),
                    status: state.status,
                    trigger_mode: res.trigger_mode,
                    last_error: state.last_error.clone(),
                    last_success: state.last_success,
                    last_strategy: state.last_strategy,
                    pending_changes: state
                        .pending
                        .as_ref()
                        .map(|p| p.all_paths().len())
                        .unwrap_or(0),
                    workload_ready: state.workload_ready,
                    build_count: state.build_count,
                })
            })
            .collect();

        StatusSnapshot {
            resources,
            queued: self.queued(),
            blocked: self.blocked(),
            building: self.building(),
            completed_builds: self.completed_builds,
            reload_pending: self.reload_pending,
            config_error: self.config_error.clone(),
            has_docker_build: self
                .graph
                .build_units()
                .any(|u| u.strategy == BuildStrategy::Docker),
        }
    }

    fn view(&self) -> ReadOnlyStateManager<'_> {
        ReadOnlyStateManager::new(&self.graph, &self.states)
    }

    fn request_trigger(&mut self, name: &str) {
        if let Some(state) = self.states.get_mut(name) {
            state.trigger_requested = true;
        }
        StateManager::new(&self.graph, &mut self.states).enqueue(name);
    }

    /// Run a scheduling pass and finalise `step`.
    fn finish_step(&mut self, mut step: SchedulerStep) -> SchedulerStep {
        step.dispatched.extend(self.schedule());
        let idle = self.is_idle();
        step.became_idle = self.busy && idle;
        self.busy = !idle;
        step
    }

    /// Dispatch eligible queued resources up to the concurrency bound.
    ///
    /// Order: first by the pass in which each became eligible, then by
    /// topological position.
    fn schedule(&mut self) -> Vec<UpdateTask> {
        if self.reload_pending {
            debug!("reload pending; not dispatching");
            return Vec::new();
        }

        self.eligibility_pass += 1;
        let pass = self.eligibility_pass;

        let mut candidates: Vec<(u64, usize, ResourceName)> =
            StateManager::new(&self.graph, &mut self.states)
                .refresh_eligibility(pass)
                .into_iter()
                .map(|(seq, name)| {
                    let topo = self.graph.topo_index(&name).unwrap_or(usize::MAX);
                    (seq, topo, name)
                })
                .collect();
        candidates.sort();

        let mut building = self.view().count(ResourceStatus::Building);
        let mut dispatched = Vec::new();

        for (_, _, name) in candidates {
            if building >= self.max_parallel {
                debug!(
                    resource = %name,
                    max_parallel = self.max_parallel,
                    "concurrency limit reached; staying queued"
                );
                continue;
            }
            if let Some(task) = self.dispatch(&name) {
                building += 1;
                dispatched.push(task);
            }
        }

        dispatched
    }

    fn dispatch(&mut self, name: &str) -> Option<UpdateTask> {
        let resource = self.graph.get(name)?.clone();
        let units = self.graph.units_of(name);

        let state = self.states.get_mut(name)?;
        let changes = state.pending.take().unwrap_or_default();
        let deployed = state.last_success.is_some();
        state.trigger_requested = false;

        let action = choose_action(&units, &changes, deployed);

        self.next_task_id += 1;
        let id = TaskId(self.next_task_id);
        state.in_flight = Some(id);
        state.last_strategy = Some(action.strategy());

        StateManager::new(&self.graph, &mut self.states).transition(name, ResourceStatus::Building);

        info!(
            resource = %name,
            task_id = %id,
            strategy = %action.strategy(),
            "dispatching update"
        );

        Some(UpdateTask {
            id,
            resource,
            units,
            action,
            changes,
            created_at: Utc::now(),
        })
    }
}

/// Pick the update strategy for a resource's accumulated changes.
///
/// A full build is used when the resource was never deployed, the
/// configuration changed, a plain watch path changed, there are no build
/// unit changes (a bare trigger), or a changed unit has no live update.
/// Otherwise each changed unit's live update decides; any fallback makes the
/// whole task a fallback.
pub fn choose_action(units: &[Arc<BuildUnit>], changes: &ChangeSet, deployed: bool) -> TaskAction {
    let unit_changes: Vec<_> = changes
        .unit_paths
        .iter()
        .filter(|(_, paths)| !paths.is_empty())
        .collect();

    if !deployed || changes.config_changed || !changes.watch_paths.is_empty() || unit_changes.is_empty() {
        return TaskAction::FullBuild;
    }

    let mut plans = Vec::new();
    for unit in units {
        let Some(paths) = changes.unit_paths.get(&unit.name).filter(|p| !p.is_empty()) else {
            continue;
        };
        let Some(spec) = &unit.live_update else {
            return TaskAction::FullBuild;
        };
        match decide(&unit.name, spec, paths) {
            LiveUpdateDecision::Apply(plan) => plans.push(plan),
            LiveUpdateDecision::FallBack(reason) => return TaskAction::LiveUpdateFallback(reason),
        }
    }

    if plans.is_empty() {
        TaskAction::FullBuild
    } else {
        TaskAction::LiveUpdate(plans)
    }
}
