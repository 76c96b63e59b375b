// src/exec/task_runner.rs

//! Individual update task runner.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, error, info, warn};

use crate::dag::{Resource, TaskAction, UpdateTask};
use crate::engine::{RuntimeEvent, TaskOutcome};
use crate::exec::backend::BuildExecutor;
use crate::types::ReadinessPolicy;

/// What a task runner needs besides the task itself.
pub struct TaskContext {
    pub builder: Arc<dyn BuildExecutor>,
    pub runtime_tx: mpsc::Sender<RuntimeEvent>,
    /// Shared concurrency bound.
    pub slots: Arc<Semaphore>,
}

/// Run a single update task and report its outcome.
///
/// - The task waits for a free slot before doing any work.
/// - If the cancel channel fires, the in-progress work is dropped (killing
///   any child processes) and the task completes as `Cancelled`.
/// - After a successful update of a `pod_readiness = wait` resource, the
///   workload's readiness is awaited and reported separately.
pub async fn run_task(task: UpdateTask, ctx: TaskContext, cancel_rx: oneshot::Receiver<()>) {
    let resource = task.resource_name().to_string();
    let task_id = task.id;

    let outcome = match execute_with_cancel(&task, &ctx, cancel_rx).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(
                resource = %resource,
                task_id = %task_id,
                error = %format!("{err:#}"),
                "update failed"
            );
            TaskOutcome::Failed(format!("{err:#}"))
        }
    };

    let succeeded = outcome == TaskOutcome::Success;

    if let Err(err) = ctx
        .runtime_tx
        .send(RuntimeEvent::TaskCompleted {
            resource: resource.clone(),
            task_id,
            outcome,
        })
        .await
    {
        warn!(resource = %resource, "runtime gone; dropping completion: {err}");
        return;
    }

    if succeeded && task.resource.pod_readiness == ReadinessPolicy::Wait {
        // Detached so a later update of this resource is not held up.
        tokio::spawn(report_readiness(
            Arc::clone(&task.resource),
            Arc::clone(&ctx.builder),
            ctx.runtime_tx.clone(),
        ));
    }
}

async fn execute_with_cancel(
    task: &UpdateTask,
    ctx: &TaskContext,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<TaskOutcome> {
    let work = async {
        let _permit = Arc::clone(&ctx.slots)
            .acquire_owned()
            .await
            .context("executor slots closed")?;
        execute(task, ctx.builder.as_ref()).await
    };
    tokio::pin!(work);

    // Either the work finishes on its own (normal case), or we receive a
    // cancellation request (teardown).
    tokio::select! {
        res = &mut work => res.map(|()| TaskOutcome::Success),

        cancel = &mut cancel_rx => match cancel {
            Ok(()) => {
                info!(
                    resource = %task.resource_name(),
                    task_id = %task.id,
                    "cancellation requested; abandoning update"
                );
                Ok(TaskOutcome::Cancelled)
            }
            Err(_) => {
                // Sender dropped without cancelling; nobody can cancel us now.
                work.as_mut().await.map(|()| TaskOutcome::Success)
            }
        },
    }
}

async fn execute(task: &UpdateTask, builder: &dyn BuildExecutor) -> Result<()> {
    info!(
        resource = %task.resource_name(),
        task_id = %task.id,
        strategy = %task.strategy(),
        "starting update"
    );

    match &task.action {
        TaskAction::LiveUpdate(plans) => builder
            .execute_live_update(task, plans)
            .await
            .with_context(|| format!("live update of '{}'", task.resource_name())),
        TaskAction::FullBuild | TaskAction::LiveUpdateFallback(_) => {
            if let TaskAction::LiveUpdateFallback(reason) = &task.action {
                debug!(resource = %task.resource_name(), ?reason, "live update fell back to full build");
            }
            builder
                .execute_full_build(task)
                .await
                .with_context(|| format!("full build of '{}'", task.resource_name()))
        }
    }
}

async fn report_readiness(
    resource: Arc<Resource>,
    builder: Arc<dyn BuildExecutor>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) {
    let ready = match builder.await_readiness(&resource).await {
        Ok(()) => true,
        Err(err) => {
            warn!(resource = %resource.name, error = %format!("{err:#}"), "workload never became ready");
            false
        }
    };

    if runtime_tx
        .send(RuntimeEvent::ReadinessChanged {
            resource: resource.name.clone(),
            ready,
        })
        .await
        .is_err()
    {
        debug!("runtime gone; dropping readiness report");
    }
}
