// src/dag/state_manager.rs

//! Per-resource state and the transitions the scheduler is allowed to make.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::dag::graph::ResourceGraph;
use crate::dag::resource::ResourceName;
use crate::dag::task::{ChangeSet, TaskId};
use crate::types::{ReadinessPolicy, ResourceStatus, UpdateStrategy};

/// Mutable status of one resource. Owned by the scheduler.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub status: ResourceStatus,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_strategy: Option<UpdateStrategy>,
    /// Changes not yet handed to a task. Survives while the resource is
    /// building, and for manual resources until they are triggered.
    pub pending: Option<ChangeSet>,
    /// An explicit trigger (CLI, startup, reload) is outstanding.
    pub trigger_requested: bool,
    /// Scheduling pass in which the resource most recently became eligible.
    pub eligible_seq: Option<u64>,
    /// Workload readiness as reported by the executor.
    pub workload_ready: bool,
    /// The readiness probe gave up on the current deploy. Dependents stay
    /// blocked until the next successful update.
    pub readiness_failed: bool,
    pub in_flight: Option<TaskId>,
    pub build_count: u64,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self {
            status: ResourceStatus::Pending,
            last_error: None,
            last_success: None,
            last_strategy: None,
            pending: None,
            trigger_requested: false,
            eligible_seq: None,
            workload_ready: false,
            readiness_failed: false,
            in_flight: None,
            build_count: 0,
        }
    }
}

impl ResourceState {
    pub fn merge_pending(&mut self, changes: ChangeSet) {
        match &mut self.pending {
            Some(existing) => existing.merge(changes),
            None => self.pending = Some(changes),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| !p.is_empty())
    }
}

/// Applies status transitions to the scheduler's state table.
pub struct StateManager<'a> {
    graph: &'a ResourceGraph,
    states: &'a mut IndexMap<ResourceName, ResourceState>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a ResourceGraph,
        states: &'a mut IndexMap<ResourceName, ResourceState>,
    ) -> Self {
        Self { graph, states }
    }

    /// Move `name` to `next` if the state machine allows it.
    ///
    /// Invalid transitions are logged and leave the state untouched.
    pub fn transition(&mut self, name: &str, next: ResourceStatus) -> bool {
        let Some(state) = self.states.get_mut(name) else {
            warn!(resource = %name, "transition for unknown resource; ignoring");
            return false;
        };

        if state.status == next {
            return true;
        }

        if !state.status.can_transition_to(next) {
            warn!(
                resource = %name,
                from = %state.status,
                to = %next,
                "invalid status transition; ignoring"
            );
            return false;
        }

        debug!(resource = %name, from = %state.status, to = %next, "status transition");
        state.status = next;
        if next != ResourceStatus::Queued {
            state.eligible_seq = None;
        }
        true
    }

    /// Queue `name` unless it is already queued or building.
    ///
    /// Returns `true` if the resource is queued after the call.
    pub fn enqueue(&mut self, name: &str) -> bool {
        match self.states.get(name).map(|s| s.status) {
            Some(ResourceStatus::Queued) => true,
            Some(ResourceStatus::Building) | None => false,
            Some(_) => self.transition(name, ResourceStatus::Queued),
        }
    }

    /// Queued resources whose dependencies are satisfied, in topological order.
    pub fn eligible_queued(&self) -> Vec<ResourceName> {
        let view = ReadOnlyStateManager::new(self.graph, self.states);
        self.graph
            .topo_order()
            .iter()
            .filter(|name| {
                self.states
                    .get(name.as_str())
                    .is_some_and(|s| s.status == ResourceStatus::Queued)
                    && view.deps_satisfied(name)
            })
            .cloned()
            .collect()
    }

    /// Assign an eligibility sequence to every eligible queued resource that
    /// does not have one yet, and clear it on resources that lost eligibility.
    pub fn refresh_eligibility(&mut self, pass: u64) -> Vec<(u64, ResourceName)> {
        let eligible = self.eligible_queued();

        for (name, state) in self.states.iter_mut() {
            if state.status == ResourceStatus::Queued && !eligible.contains(name) {
                state.eligible_seq = None;
            }
        }

        eligible
            .into_iter()
            .filter_map(|name| {
                let state = self.states.get_mut(&name)?;
                let seq = *state.eligible_seq.get_or_insert(pass);
                Some((seq, name))
            })
            .collect()
    }
}

/// Shared-borrow view over the state table.
pub struct ReadOnlyStateManager<'a> {
    graph: &'a ResourceGraph,
    states: &'a IndexMap<ResourceName, ResourceState>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(
        graph: &'a ResourceGraph,
        states: &'a IndexMap<ResourceName, ResourceState>,
    ) -> Self {
        Self { graph, states }
    }

    /// Every dependency is `ready`, and dependencies with
    /// `pod_readiness = wait` also report a ready workload.
    pub fn deps_satisfied(&self, name: &str) -> bool {
        self.graph.dependencies_of(name).iter().all(|dep| {
            let Some(state) = self.states.get(dep) else {
                warn!(resource = %name, dep = %dep, "dependency missing from state table");
                return false;
            };
            let waits = self
                .graph
                .get(dep)
                .is_some_and(|r| r.pod_readiness == ReadinessPolicy::Wait);

            state.status == ResourceStatus::Ready && (!waits || state.workload_ready)
        })
    }

    /// Every dependency is `ready` and at least one is still waiting for its
    /// workload to report readiness.
    ///
    /// A dependency whose readiness probe already gave up is not waiting:
    /// no further report will arrive for it.
    pub fn waiting_on_readiness(&self, name: &str) -> bool {
        let mut waiting = false;
        for dep in self.graph.dependencies_of(name) {
            let Some(state) = self.states.get(dep) else {
                return false;
            };
            if state.status != ResourceStatus::Ready {
                return false;
            }
            let waits = self
                .graph
                .get(dep)
                .is_some_and(|r| r.pod_readiness == ReadinessPolicy::Wait);
            if waits && !state.workload_ready {
                if state.readiness_failed {
                    return false;
                }
                waiting = true;
            }
        }
        waiting
    }

    pub fn with_status(&self, status: ResourceStatus) -> Vec<ResourceName> {
        self.states
            .iter()
            .filter(|(_, s)| s.status == status)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn count(&self, status: ResourceStatus) -> usize {
        self.states.values().filter(|s| s.status == status).count()
    }
}
