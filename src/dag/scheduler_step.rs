// src/dag/scheduler_step.rs

//! Step-by-step result type for the scheduler.

use crate::dag::resource::ResourceName;
use crate::dag::task::UpdateTask;

/// Structured result of a single scheduler "step".
///
/// Tests drive the scheduler one input at a time and assert on this.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Tasks created in this step; the caller must hand them to the executor.
    pub dispatched: Vec<UpdateTask>,
    /// Resources that finished an update successfully in this step.
    pub newly_ready: Vec<ResourceName>,
    /// Resources that moved to `error` in this step.
    pub newly_failed: Vec<ResourceName>,
    /// This step left the scheduler with nothing building.
    pub became_idle: bool,
}

impl SchedulerStep {
    pub fn dispatched_names(&self) -> Vec<&str> {
        self.dispatched.iter().map(|t| t.resource_name()).collect()
    }
}
