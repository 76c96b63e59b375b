use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whether a resource updates on file changes or only on explicit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    #[default]
    Auto,
    Manual,
}

impl TriggerMode {
    pub fn is_auto(self) -> bool {
        matches!(self, TriggerMode::Auto)
    }
}

impl FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(TriggerMode::Auto),
            "manual" => Ok(TriggerMode::Manual),
            other => Err(format!(
                "invalid trigger_mode: {other} (expected \"auto\" or \"manual\")"
            )),
        }
    }
}

/// What "ready" means for dependents of a resource.
///
/// - `Wait`: dependents additionally wait until the deployed workload reports
///   ready (signalled by the executor / readiness probe).
/// - `Ignore`: a successful update is enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessPolicy {
    Wait,
    #[default]
    Ignore,
}

/// Scheduler-owned status of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Queued,
    Building,
    Ready,
    Error,
}

impl ResourceStatus {
    /// Valid transitions of the per-resource state machine.
    pub fn can_transition_to(self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Building)
                | (Building, Ready)
                | (Building, Error)
                | (Ready, Queued)
                | (Error, Queued)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ResourceStatus::Ready | ResourceStatus::Error)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Queued => "queued",
            ResourceStatus::Building => "building",
            ResourceStatus::Ready => "ready",
            ResourceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Strategy decided for a single update task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    FullBuild,
    LiveUpdate,
    LiveUpdateFallback,
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateStrategy::FullBuild => "full_build",
            UpdateStrategy::LiveUpdate => "live_update",
            UpdateStrategy::LiveUpdateFallback => "live_update_fallback",
        };
        f.write_str(s)
    }
}

/// How a build unit produces its artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStrategy {
    /// `docker build` of the unit's context.
    #[default]
    Docker,
    /// User-supplied build command.
    Custom,
    /// Nothing to build (local / compose-managed resources).
    None,
}
