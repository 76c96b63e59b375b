// src/exec/backend.rs

//! Pluggable executor abstractions.
//!
//! Two seams live here:
//!
//! - [`ExecutorBackend`] is what the runtime talks to. Tests swap in a fake
//!   that records tasks and emits completions directly.
//! - [`BuildExecutor`] is what actually performs a build, live update or
//!   delete for one resource. The production implementation shells out
//!   ([`crate::exec::shell::ShellExecutor`]); the executor loop wraps any
//!   `BuildExecutor` with per-resource serialization, a concurrency bound,
//!   cancellation and completion reporting.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::dag::{Resource, UpdateTask};
use crate::engine::{RuntimeEvent, TeardownId};
use crate::errors::{Error, Result};
use crate::liveupdate::LiveUpdatePlan;

use super::executor_loop::{spawn_executor, ExecutorRequest};

/// Boxed future returned by the executor traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait abstracting how update tasks are executed.
///
/// Production code uses [`RealExecutorBackend`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait ExecutorBackend: Send {
    /// Dispatch the given tasks for execution.
    ///
    /// Completion must be reported as `RuntimeEvent::TaskCompleted`.
    fn spawn_tasks(&mut self, tasks: Vec<UpdateTask>) -> BoxFuture<'_, Result<()>>;

    /// Start deleting `resources` in order.
    ///
    /// Returns once the job is accepted, not when it is done: completion must
    /// be reported as `RuntimeEvent::TeardownFinished { id, .. }`. In-flight
    /// tasks for those resources are cancelled if `cancel_in_flight`,
    /// otherwise awaited first.
    fn teardown(
        &mut self,
        id: TeardownId,
        resources: Vec<Arc<Resource>>,
        cancel_in_flight: bool,
    ) -> BoxFuture<'_, Result<()>>;

    /// Change the concurrency bound. Backends without one ignore this.
    fn set_parallelism(&mut self, _max_parallel: usize) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// The operations a resource update is made of.
///
/// Every method gets exclusive use of its resource: the executor loop never
/// runs two of them for the same resource concurrently.
pub trait BuildExecutor: Send + Sync + 'static {
    /// Build the resource's images and deploy it.
    fn execute_full_build<'a>(&'a self, task: &'a UpdateTask) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Apply the planned steps to the running container.
    fn execute_live_update<'a>(
        &'a self,
        task: &'a UpdateTask,
        plans: &'a [LiveUpdatePlan],
    ) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Remove a deployed resource.
    fn execute_delete<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Resolve once the deployed workload reports ready.
    ///
    /// Only called for resources with `pod_readiness = wait`.
    fn await_readiness<'a>(&'a self, _resource: &'a Resource) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Real executor backend used in production.
///
/// Internally, this just wraps the executor loop in [`spawn_executor`]. The
/// runtime calls `spawn_tasks`, which forwards the tasks to the background
/// executor via an mpsc channel.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorRequest>,
}

impl RealExecutorBackend {
    /// Create a new real executor backend running tasks with `builder`.
    ///
    /// This spawns the background executor loop immediately.
    pub fn new<B: BuildExecutor>(
        builder: Arc<B>,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        max_parallel: usize,
    ) -> Self {
        let tx = spawn_executor(builder, runtime_tx, max_parallel);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_tasks(&mut self, tasks: Vec<UpdateTask>) -> BoxFuture<'_, Result<()>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for task in tasks {
                tx.send(ExecutorRequest::Run(task))
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn teardown(
        &mut self,
        id: TeardownId,
        resources: Vec<Arc<Resource>>,
        cancel_in_flight: bool,
    ) -> BoxFuture<'_, Result<()>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ExecutorRequest::Teardown {
                id,
                resources,
                cancel_in_flight,
            })
            .await
            .map_err(Error::from)?;
            Ok(())
        })
    }

    fn set_parallelism(&mut self, max_parallel: usize) -> BoxFuture<'_, Result<()>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ExecutorRequest::SetParallelism(max_parallel))
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }
}
