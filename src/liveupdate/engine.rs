// src/liveupdate/engine.rs

//! Decide between an in-place update and a full rebuild for one build unit.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::liveupdate::spec::LiveUpdateSpec;
use crate::types::UpdateStrategy;

/// Copy one changed local file to its container destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOp {
    pub local: PathBuf,
    pub remote: PathBuf,
}

/// A concrete step the executor performs during a live update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedStep {
    Sync(SyncOp),
    Run(String),
    RestartContainer,
}

/// Ordered steps for a single live-update invocation of one build unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveUpdatePlan {
    unit: String,
    steps: Vec<PlannedStep>,
}

impl LiveUpdatePlan {
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn sync_ops(&self) -> impl Iterator<Item = &SyncOp> {
        self.steps.iter().filter_map(|s| match s {
            PlannedStep::Sync(op) => Some(op),
            _ => None,
        })
    }

    pub fn run_cmds(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|s| match s {
            PlannedStep::Run(cmd) => Some(cmd.as_str()),
            _ => None,
        })
    }

    pub fn restarts_container(&self) -> bool {
        matches!(self.steps.last(), Some(PlannedStep::RestartContainer))
    }
}

/// Builds a [`LiveUpdatePlan`].
///
/// `restart_container` consumes the builder, so nothing can be queued after
/// a restart within the same invocation.
#[derive(Debug)]
pub struct PlanBuilder {
    unit: String,
    steps: Vec<PlannedStep>,
}

impl PlanBuilder {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            steps: Vec::new(),
        }
    }

    pub fn sync(&mut self, op: SyncOp) -> &mut Self {
        self.steps.push(PlannedStep::Sync(op));
        self
    }

    pub fn run(&mut self, cmd: impl Into<String>) -> &mut Self {
        self.steps.push(PlannedStep::Run(cmd.into()));
        self
    }

    pub fn restart_container(mut self) -> LiveUpdatePlan {
        self.steps.push(PlannedStep::RestartContainer);
        self.finish()
    }

    pub fn finish(self) -> LiveUpdatePlan {
        LiveUpdatePlan {
            unit: self.unit,
            steps: self.steps,
        }
    }
}

/// Why a live update could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// These changed paths matched a `fall_back_on` entry.
    FallBackOnMatched(Vec<PathBuf>),
    /// These changed paths are not covered by any `sync` step.
    NotSynced(Vec<PathBuf>),
    /// There were no changed paths to sync.
    NoChanges,
}

/// Result of evaluating a live-update spec against a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveUpdateDecision {
    Apply(LiveUpdatePlan),
    FallBack(FallbackReason),
}

impl LiveUpdateDecision {
    pub fn strategy(&self) -> UpdateStrategy {
        match self {
            LiveUpdateDecision::Apply(_) => UpdateStrategy::LiveUpdate,
            LiveUpdateDecision::FallBack(_) => UpdateStrategy::LiveUpdateFallback,
        }
    }
}

/// Evaluate `spec` for the changed paths of build unit `unit`.
///
/// 1. a `fall_back_on` match forces a rebuild;
/// 2. if every path maps to a sync, the plan is the syncs, then the triggered
///    runs, then an optional container restart;
/// 3. anything not covered by a sync forces a rebuild.
pub fn decide(unit: &str, spec: &LiveUpdateSpec, changed: &BTreeSet<PathBuf>) -> LiveUpdateDecision {
    if changed.is_empty() {
        return LiveUpdateDecision::FallBack(FallbackReason::NoChanges);
    }

    let fallback_hits: Vec<PathBuf> = changed
        .iter()
        .filter(|p| spec.fall_back_on().any(|set| set.matches(p)))
        .cloned()
        .collect();
    if !fallback_hits.is_empty() {
        debug!(unit, paths = ?fallback_hits, "fall_back_on matched; full rebuild");
        return LiveUpdateDecision::FallBack(FallbackReason::FallBackOnMatched(fallback_hits));
    }

    let mut builder = PlanBuilder::new(unit);
    let mut not_synced = Vec::new();

    for path in changed {
        match sync_target(spec, path) {
            Some(op) => {
                builder.sync(op);
            }
            None => not_synced.push(path.clone()),
        }
    }

    if !not_synced.is_empty() {
        debug!(unit, paths = ?not_synced, "changes not covered by any sync; full rebuild");
        return LiveUpdateDecision::FallBack(FallbackReason::NotSynced(not_synced));
    }

    for (cmd, triggers) in spec.runs() {
        if triggers.is_empty() || changed.iter().any(|p| triggers.matches(p)) {
            builder.run(cmd);
        }
    }

    let plan = if spec.restarts_container() {
        builder.restart_container()
    } else {
        builder.finish()
    };

    LiveUpdateDecision::Apply(plan)
}

/// Map a changed local path to its container destination using the first
/// sync step that covers it.
fn sync_target(spec: &LiveUpdateSpec, path: &Path) -> Option<SyncOp> {
    spec.syncs().find_map(|(local, remote)| {
        if path == local {
            return Some(SyncOp {
                local: path.to_path_buf(),
                remote: remote.to_path_buf(),
            });
        }
        path.strip_prefix(local).ok().map(|rel| SyncOp {
            local: path.to_path_buf(),
            remote: remote.join(rel),
        })
    })
}
