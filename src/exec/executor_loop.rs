// src/exec/executor_loop.rs

//! Main executor loop that manages running update tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, info, warn};

use crate::dag::{Resource, ResourceName, UpdateTask};
use crate::engine::{RuntimeEvent, TeardownId};
use crate::exec::backend::BuildExecutor;
use crate::exec::task_runner::{run_task, TaskContext};

/// Requests accepted by the executor loop.
#[derive(Debug)]
pub enum ExecutorRequest {
    Run(UpdateTask),
    Teardown {
        id: TeardownId,
        resources: Vec<Arc<Resource>>,
        cancel_in_flight: bool,
    },
    SetParallelism(usize),
}

/// Internal handle for a currently-running update task.
///
/// - `cancel` is used by the executor to request that the task be stopped
///   (teardown with cancellation).
/// - `handle` is the Tokio task that is actually running it.
struct ActiveTask {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// The returned sender is what [`crate::exec::RealExecutorBackend`] uses.
/// Each update task runs in its own Tokio task:
///
/// - **per resource there is never more than one task running at the same
///   time**: a new task for a resource waits for the previous one;
/// - at most `max_parallel` tasks execute at once across all resources;
/// - teardowns run detached, so the loop keeps accepting work while a
///   torn-down resource drains.
pub fn spawn_executor<B: BuildExecutor>(
    builder: Arc<B>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    max_parallel: usize,
) -> mpsc::Sender<ExecutorRequest> {
    let (tx, mut rx) = mpsc::channel::<ExecutorRequest>(32);

    tokio::spawn(async move {
        info!(max_parallel, "executor loop started");

        let mut permits = max_parallel.max(1);
        let slots = Arc::new(Semaphore::new(permits));

        // At most one ActiveTask per resource name.
        let mut active: HashMap<ResourceName, ActiveTask> = HashMap::new();

        while let Some(request) = rx.recv().await {
            match request {
                ExecutorRequest::Run(task) => {
                    let ctx = TaskContext {
                        builder: Arc::clone(&builder) as Arc<dyn BuildExecutor>,
                        runtime_tx: runtime_tx.clone(),
                        slots: Arc::clone(&slots),
                    };
                    handle_update_task(task, ctx, &mut active);
                }
                ExecutorRequest::Teardown {
                    id,
                    resources,
                    cancel_in_flight,
                } => {
                    start_teardown(
                        id,
                        Arc::clone(&builder),
                        resources,
                        cancel_in_flight,
                        &mut active,
                        runtime_tx.clone(),
                    );
                }
                ExecutorRequest::SetParallelism(n) => {
                    permits = resize(&slots, permits, n.max(1));
                }
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

/// Start `task`, chained behind any task still running for its resource.
fn handle_update_task(
    task: UpdateTask,
    ctx: TaskContext,
    active: &mut HashMap<ResourceName, ActiveTask>,
) {
    let name = task.resource_name().to_string();

    // Keep the previous entry alive (including its cancel sender) until the
    // previous task has finished.
    let previous = active.remove(&name).filter(|p| !p.handle.is_finished());
    if previous.is_some() {
        debug!(
            resource = %name,
            task_id = %task.id,
            "previous task for resource still running; queueing behind it"
        );
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let spawn_name = name.clone();

    let handle = tokio::spawn(async move {
        if let Some(prev) = previous {
            if let Err(e) = prev.handle.await {
                warn!(resource = %spawn_name, error = %e, "previous task panicked");
            }
            drop(prev.cancel);
        }
        run_task(task, ctx, cancel_rx).await;
        debug!(resource = %spawn_name, "task runner future finished");
    });

    active.insert(
        name,
        ActiveTask {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

/// Take over `resources` for deletion without blocking the loop.
///
/// Each resource gets a placeholder entry in `active` that resolves once it
/// is deleted, so later tasks for it queue behind the delete. The deletes
/// run in order on one detached task, which reports `TeardownFinished`.
fn start_teardown<B: BuildExecutor>(
    id: TeardownId,
    builder: Arc<B>,
    resources: Vec<Arc<Resource>>,
    cancel_in_flight: bool,
    active: &mut HashMap<ResourceName, ActiveTask>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) {
    let mut jobs = Vec::with_capacity(resources.len());

    for resource in resources {
        let mut previous = active
            .remove(&resource.name)
            .filter(|p| !p.handle.is_finished());
        if let Some(existing) = previous.as_mut() {
            if cancel_in_flight {
                cancel_existing_task(&resource.name, existing);
            } else {
                info!(resource = %resource.name, "waiting for in-flight update before teardown");
            }
        }

        let (deleted_tx, deleted_rx) = oneshot::channel::<()>();
        let placeholder = tokio::spawn(async move {
            // Resolves on delete, or if the teardown task dies.
            let _ = deleted_rx.await;
        });
        active.insert(
            resource.name.clone(),
            ActiveTask {
                cancel: None,
                handle: placeholder,
            },
        );
        jobs.push((resource, previous, deleted_tx));
    }

    tokio::spawn(async move {
        let mut failed = Vec::new();

        for (resource, previous, deleted_tx) in jobs {
            if let Some(prev) = previous {
                if let Err(e) = prev.handle.await {
                    warn!(resource = %resource.name, error = %e, "update task panicked");
                }
                drop(prev.cancel);
            }

            match builder.execute_delete(&resource).await {
                Ok(()) => info!(resource = %resource.name, "resource deleted"),
                Err(err) => {
                    warn!(resource = %resource.name, error = %format!("{err:#}"), "delete failed");
                    failed.push(resource.name.clone());
                }
            }
            if deleted_tx.send(()).is_err() {
                debug!(resource = %resource.name, "nothing waiting on this delete");
            }
        }

        if runtime_tx
            .send(RuntimeEvent::TeardownFinished { id, failed })
            .await
            .is_err()
        {
            debug!(teardown = id.0, "runtime gone; dropping teardown report");
        }
    });
}

/// Cancel an existing running task.
fn cancel_existing_task(name: &str, existing: &mut ActiveTask) {
    info!(resource = %name, "cancelling in-flight update");

    if let Some(cancel) = existing.cancel.take() {
        if cancel.send(()).is_err() {
            debug!(resource = %name, "task already finished while cancelling");
        }
    } else {
        debug!(
            resource = %name,
            "no cancel sender present; task may already have been cancelled"
        );
    }
}

/// Grow or shrink the semaphore from `current` to `target` permits.
///
/// Shrinking only forgets permits that are currently free.
fn resize(slots: &Semaphore, current: usize, target: usize) -> usize {
    if target > current {
        slots.add_permits(target - current);
        debug!(from = current, to = target, "executor parallelism increased");
        target
    } else if target < current {
        let forgotten = slots.forget_permits(current - target);
        debug!(from = current, to = current - forgotten, "executor parallelism decreased");
        current - forgotten
    } else {
        current
    }
}
