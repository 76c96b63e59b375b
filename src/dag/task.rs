// src/dag/task.rs

//! Change sets and the update tasks the scheduler hands to the executor.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::dag::resource::{BuildUnit, Resource};
use crate::liveupdate::{FallbackReason, LiveUpdatePlan};
use crate::types::UpdateStrategy;

/// Changed paths attributed to a single resource.
///
/// Paths are grouped by the build unit whose inputs they touched; changes to
/// plain resource watch paths are kept separately because they can never be
/// applied in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub unit_paths: BTreeMap<String, BTreeSet<PathBuf>>,
    pub watch_paths: BTreeSet<PathBuf>,
    /// The configuration was re-evaluated; forces a full build.
    pub config_changed: bool,
    /// Sequence numbers of the oldest and newest event in this set.
    pub first_seq: Option<u64>,
    pub last_seq: Option<u64>,
}

impl ChangeSet {
    pub fn config_reload() -> Self {
        Self {
            config_changed: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.config_changed
            && self.watch_paths.is_empty()
            && self.unit_paths.values().all(|p| p.is_empty())
    }

    pub fn add_unit_path(&mut self, unit: &str, path: PathBuf, seq: u64) {
        self.unit_paths
            .entry(unit.to_string())
            .or_default()
            .insert(path);
        self.note_seq(seq);
    }

    pub fn add_watch_path(&mut self, path: PathBuf, seq: u64) {
        self.watch_paths.insert(path);
        self.note_seq(seq);
    }

    fn note_seq(&mut self, seq: u64) {
        self.first_seq = Some(self.first_seq.map_or(seq, |s| s.min(seq)));
        self.last_seq = Some(self.last_seq.map_or(seq, |s| s.max(seq)));
    }

    /// Fold `other` (which arrived later) into `self`.
    pub fn merge(&mut self, other: ChangeSet) {
        for (unit, paths) in other.unit_paths {
            self.unit_paths.entry(unit).or_default().extend(paths);
        }
        self.watch_paths.extend(other.watch_paths);
        self.config_changed |= other.config_changed;
        if let Some(seq) = other.first_seq {
            self.note_seq(seq);
        }
        if let Some(seq) = other.last_seq {
            self.note_seq(seq);
        }
    }

    /// Every changed path, across units and watch lists.
    pub fn all_paths(&self) -> BTreeSet<PathBuf> {
        self.unit_paths
            .values()
            .flatten()
            .chain(self.watch_paths.iter())
            .cloned()
            .collect()
    }
}

/// Identifier of a dispatched [`UpdateTask`]; monotonically increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the executor should do for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    FullBuild,
    /// One plan per affected build unit, in the resource's unit order.
    LiveUpdate(Vec<LiveUpdatePlan>),
    /// A live update was configured but cannot express this change.
    LiveUpdateFallback(FallbackReason),
}

impl TaskAction {
    pub fn strategy(&self) -> UpdateStrategy {
        match self {
            TaskAction::FullBuild => UpdateStrategy::FullBuild,
            TaskAction::LiveUpdate(_) => UpdateStrategy::LiveUpdate,
            TaskAction::LiveUpdateFallback(_) => UpdateStrategy::LiveUpdateFallback,
        }
    }

    /// Whether the executor must run a full image build and deploy.
    pub fn is_full_build(&self) -> bool {
        !matches!(self, TaskAction::LiveUpdate(_))
    }
}

/// A unit of scheduled work, owned by the scheduler until it completes.
#[derive(Debug, Clone)]
pub struct UpdateTask {
    pub id: TaskId,
    pub resource: Arc<Resource>,
    pub units: Vec<Arc<BuildUnit>>,
    pub action: TaskAction,
    /// The change set that caused this task.
    pub changes: ChangeSet,
    pub created_at: DateTime<Utc>,
}

impl UpdateTask {
    pub fn resource_name(&self) -> &str {
        &self.resource.name
    }

    pub fn strategy(&self) -> UpdateStrategy {
        self.action.strategy()
    }
}
