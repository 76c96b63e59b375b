// src/dag/snapshot.rs

//! Read-only status view published after every control-loop step.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{ResourceStatus, TriggerMode, UpdateStrategy};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceView {
    pub name: String,
    pub status: ResourceStatus,
    pub trigger_mode: TriggerMode,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_strategy: Option<UpdateStrategy>,
    /// Number of changed paths waiting for the next update.
    pub pending_changes: usize,
    pub workload_ready: bool,
    pub build_count: u64,
}

/// Every resource's status plus the scheduler's queues.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Resources in topological order.
    pub resources: Vec<ResourceView>,
    pub queued: Vec<String>,
    /// Queued resources that cannot start until new input arrives: a
    /// dependency failed, never ran, or its workload never became ready.
    pub blocked: Vec<String>,
    pub building: Vec<String>,
    pub completed_builds: u64,
    pub reload_pending: bool,
    pub config_error: Option<String>,
    /// At least one build unit produces a docker image.
    pub has_docker_build: bool,
}

impl StatusSnapshot {
    pub fn resource(&self, name: &str) -> Option<&ResourceView> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn status_of(&self, name: &str) -> Option<ResourceStatus> {
        self.resource(name).map(|r| r.status)
    }

    /// Something is building, a reload is pending, or a queued resource can
    /// still start without new input.
    pub fn is_busy(&self) -> bool {
        self.reload_pending
            || !self.building.is_empty()
            || self.queued.iter().any(|name| !self.blocked.contains(name))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
