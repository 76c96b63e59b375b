use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use devorch::dag::{Resource, UpdateTask};
use devorch::engine::{RuntimeEvent, TaskOutcome, TeardownId};
use devorch::errors::Result;
use devorch::exec::{BoxFuture, BuildExecutor, ExecutorBackend};
use devorch::liveupdate::LiveUpdatePlan;
use devorch::types::{ReadinessPolicy, UpdateStrategy};

/// A fake executor backend that:
/// - records every dispatched task (resource name + strategy)
/// - records teardowns and reports them finished
/// - reports `TaskCompleted` for each task, failing the ones named in
///   `failing`
/// - reports the workload ready for successful `pod_readiness = wait`
///   resources, or not ready for the ones named in `never_ready`.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<(String, UpdateStrategy)>>>,
    torn_down: Arc<Mutex<Vec<String>>>,
    failing: HashSet<String>,
    never_ready: HashSet<String>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<(String, UpdateStrategy)>>>,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            torn_down: Arc::new(Mutex::new(Vec::new())),
            failing: HashSet::new(),
            never_ready: HashSet::new(),
        }
    }

    pub fn failing(mut self, resource: &str) -> Self {
        self.failing.insert(resource.to_string());
        self
    }

    pub fn never_ready(mut self, resource: &str) -> Self {
        self.never_ready.insert(resource.to_string());
        self
    }

    pub fn torn_down(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.torn_down)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_tasks(&mut self, tasks: Vec<UpdateTask>) -> BoxFuture<'_, Result<()>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let failing = self.failing.clone();
        let never_ready = self.never_ready.clone();

        Box::pin(async move {
            {
                let mut guard = executed.lock().unwrap();
                for t in &tasks {
                    guard.push((t.resource_name().to_string(), t.strategy()));
                }
            }

            // Report from a separate task so a small channel can't block the
            // runtime that is currently executing this command.
            tokio::spawn(async move {
                for t in tasks {
                    let name = t.resource_name().to_string();
                    let outcome = if failing.contains(&name) {
                        TaskOutcome::Failed(format!("{name} failed"))
                    } else {
                        TaskOutcome::Success
                    };
                    let succeeded = outcome == TaskOutcome::Success;

                    let _ = tx
                        .send(RuntimeEvent::TaskCompleted {
                            resource: name.clone(),
                            task_id: t.id,
                            outcome,
                        })
                        .await;

                    if succeeded && t.resource.pod_readiness == ReadinessPolicy::Wait {
                        let ready = !never_ready.contains(&name);
                        let _ = tx
                            .send(RuntimeEvent::ReadinessChanged {
                                resource: name,
                                ready,
                            })
                            .await;
                    }
                }
            });
            Ok(())
        })
    }

    fn teardown(
        &mut self,
        id: TeardownId,
        resources: Vec<Arc<Resource>>,
        _cancel_in_flight: bool,
    ) -> BoxFuture<'_, Result<()>> {
        let torn_down = Arc::clone(&self.torn_down);
        let tx = self.runtime_tx.clone();
        Box::pin(async move {
            torn_down
                .lock()
                .unwrap()
                .extend(resources.iter().map(|r| r.name.clone()));
            tokio::spawn(async move {
                let _ = tx
                    .send(RuntimeEvent::TeardownFinished {
                        id,
                        failed: Vec::new(),
                    })
                    .await;
            });
            Ok(())
        })
    }
}

/// One call made to a [`RecordingBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildCall {
    FullBuild(String),
    LiveUpdate(String, Vec<LiveUpdatePlan>),
    Delete(String),
    Readiness(String),
}

/// A `BuildExecutor` that records calls, optionally sleeps to simulate work
/// and tracks the highest number of concurrent calls it saw.
#[derive(Default)]
pub struct RecordingBuilder {
    calls: Mutex<Vec<BuildCall>>,
    delay: Duration,
    failing: HashSet<String>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, resource: &str) -> Self {
        self.failing.insert(resource.to_string());
        self
    }

    pub fn calls(&self) -> Vec<BuildCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    async fn work(&self, call: BuildCall, resource: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(call);

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(resource) {
            anyhow::bail!("{resource} failed");
        }
        Ok(())
    }
}

impl BuildExecutor for RecordingBuilder {
    fn execute_full_build<'a>(&'a self, task: &'a UpdateTask) -> BoxFuture<'a, anyhow::Result<()>> {
        let name = task.resource_name();
        Box::pin(self.work(BuildCall::FullBuild(name.to_string()), name))
    }

    fn execute_live_update<'a>(
        &'a self,
        task: &'a UpdateTask,
        plans: &'a [LiveUpdatePlan],
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        let name = task.resource_name();
        Box::pin(self.work(BuildCall::LiveUpdate(name.to_string(), plans.to_vec()), name))
    }

    fn execute_delete<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push(BuildCall::Delete(resource.name.clone()));
            Ok(())
        })
    }

    fn await_readiness<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push(BuildCall::Readiness(resource.name.clone()));
            Ok(())
        })
    }
}
