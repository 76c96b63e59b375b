// tests/runtime_fake_executor.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, ResourceBuilder};
use crate::common::fake_executor::FakeExecutor;
use crate::common::init_tracing;

use std::error::Error;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};

use devorch::config::{ConfigFile, ConfigSource};
use devorch::dag::{Scheduler, UpdateTask};
use devorch::engine::{
    CoreCommand, CoreRuntime, CoreStep, Runtime, RuntimeEvent, RuntimeOptions, TaskOutcome,
    TeardownId,
};
use devorch::errors::{DevorchError, Result as DevorchResult};
use devorch::types::UpdateStrategy;
use devorch::watch::Classification;

type TestResult = Result<(), Box<dyn Error>>;

/// Hands out a fixed config on reload, or an error if there is none.
struct StaticSource(Mutex<Option<ConfigFile>>);

impl StaticSource {
    fn new(cfg: Option<ConfigFile>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(cfg)))
    }
}

impl ConfigSource for StaticSource {
    fn load(&self) -> DevorchResult<ConfigFile> {
        self.0
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DevorchError::ConfigError("no config".into()))
    }
}

/// web -> api -> db; db waits for its workload.
fn chain_config() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_resource("web", ResourceBuilder::new().dep("api").build())
        .with_resource("api", ResourceBuilder::new().dep("db").build())
        .with_resource("db", ResourceBuilder::new().wait_for_readiness().build())
        .build()
}

struct Harness {
    rt_tx: mpsc::Sender<RuntimeEvent>,
    runtime: Runtime<FakeExecutor>,
    executed: Arc<Mutex<Vec<(String, UpdateStrategy)>>>,
    torn_down: Arc<Mutex<Vec<String>>>,
    config_rx: watch::Receiver<Arc<ConfigFile>>,
}

fn harness(
    cfg: ConfigFile,
    source: Arc<dyn ConfigSource>,
    options: RuntimeOptions,
    failing: &[&str],
) -> Harness {
    harness_with(cfg, source, options, |executor| {
        failing.iter().fold(executor, |e, name| e.failing(name))
    })
}

fn harness_with(
    cfg: ConfigFile,
    source: Arc<dyn ConfigSource>,
    options: RuntimeOptions,
    configure: impl FnOnce(FakeExecutor) -> FakeExecutor,
) -> Harness {
    let scheduler = Scheduler::new(cfg.graph().clone(), cfg.config.max_parallel_updates);
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let (config_tx, config_rx) = watch::channel(Arc::new(cfg));

    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = configure(FakeExecutor::new(rt_tx.clone(), executed.clone()));
    let torn_down = executor.torn_down();

    let core = CoreRuntime::new(scheduler, options);
    let runtime = Runtime::new(core, rt_rx, executor, source, config_tx);

    Harness {
        rt_tx,
        runtime,
        executed,
        torn_down,
        config_rx,
    }
}

fn once() -> RuntimeOptions {
    RuntimeOptions {
        exit_when_idle: true,
        ..RuntimeOptions::default()
    }
}

async fn run_to_completion(runtime: Runtime<FakeExecutor>, triggers: Vec<String>) -> TestResult {
    match timeout(Duration::from_secs(3), runtime.run(triggers)).await {
        Ok(result) => Ok(result?),
        Err(_) => panic!("runtime did not finish within 3 seconds"),
    }
}

fn names(executed: &Mutex<Vec<(String, UpdateStrategy)>>) -> Vec<String> {
    executed.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
}

#[tokio::test]
async fn runs_a_dependency_chain_in_order() -> TestResult {
    init_tracing();

    let h = harness(chain_config(), StaticSource::new(None), once(), &[]);
    run_to_completion(h.runtime, vec![]).await?;

    assert_eq!(names(&h.executed), ["db", "api", "web"]);
    assert!(h
        .executed
        .lock()
        .unwrap()
        .iter()
        .all(|(_, s)| *s == UpdateStrategy::FullBuild));
    assert!(h.torn_down.lock().unwrap().is_empty());

    Ok(())
}

#[tokio::test]
async fn failure_stops_the_chain_and_the_runtime_settles() -> TestResult {
    init_tracing();

    let h = harness(chain_config(), StaticSource::new(None), once(), &["db"]);
    run_to_completion(h.runtime, vec![]).await?;

    assert_eq!(names(&h.executed), ["db"]);
    Ok(())
}

#[tokio::test]
async fn teardown_deletes_dependents_first_and_exits() -> TestResult {
    init_tracing();

    let h = harness(
        chain_config(),
        StaticSource::new(None),
        RuntimeOptions::default(),
        &[],
    );
    h.rt_tx.send(RuntimeEvent::TeardownRequested).await?;
    run_to_completion(h.runtime, vec![]).await?;

    assert_eq!(*h.torn_down.lock().unwrap(), ["web", "api", "db"]);
    Ok(())
}

#[tokio::test]
async fn startup_triggers_include_manual_resources() -> TestResult {
    init_tracing();

    let cfg = ConfigFileBuilder::new()
        .with_resource("app", ResourceBuilder::new().build())
        .with_resource("seed", ResourceBuilder::new().manual().auto_init(false).build())
        .build();

    let h = harness(cfg.clone(), StaticSource::new(None), once(), &[]);
    run_to_completion(h.runtime, vec![]).await?;
    assert_eq!(names(&h.executed), ["app"]);

    let h = harness(cfg, StaticSource::new(None), once(), &[]);
    run_to_completion(h.runtime, vec!["seed".to_string()]).await?;
    assert_eq!(names(&h.executed), ["app", "seed"]);
    Ok(())
}

#[tokio::test]
async fn reload_swaps_the_graph_and_tears_down_removed_resources() -> TestResult {
    init_tracing();

    let before = ConfigFileBuilder::new()
        .with_resource("api", ResourceBuilder::new().build())
        .with_resource("worker", ResourceBuilder::new().build())
        .build();
    let after = ConfigFileBuilder::new()
        .with_resource("api", ResourceBuilder::new().build())
        .with_resource("cache", ResourceBuilder::new().build())
        .build();

    let h = harness(before, StaticSource::new(Some(after)), once(), &[]);
    h.rt_tx
        .send(RuntimeEvent::ChangesClassified(Classification {
            reload_required: true,
            ..Classification::default()
        }))
        .await?;

    let config_rx = h.config_rx.clone();
    run_to_completion(h.runtime, vec![]).await?;

    // api was building when the reload landed, so it runs once more.
    assert_eq!(names(&h.executed), ["api", "worker", "cache", "api"]);
    assert_eq!(*h.torn_down.lock().unwrap(), ["worker"]);

    let published = config_rx.borrow().clone();
    assert!(published.graph().contains("cache"));
    assert!(!published.graph().contains("worker"));
    Ok(())
}

#[tokio::test]
async fn failed_reload_keeps_running_the_old_graph() -> TestResult {
    init_tracing();

    let h = harness(chain_config(), StaticSource::new(None), once(), &[]);
    h.rt_tx
        .send(RuntimeEvent::ChangesClassified(Classification {
            reload_required: true,
            ..Classification::default()
        }))
        .await?;

    let config_rx = h.config_rx.clone();
    run_to_completion(h.runtime, vec![]).await?;

    assert_eq!(names(&h.executed), ["db", "api", "web"]);
    assert!(config_rx.borrow().graph().contains("db"));
    Ok(())
}

#[tokio::test]
async fn readiness_timeout_lets_a_once_run_finish() -> TestResult {
    init_tracing();

    let h = harness_with(chain_config(), StaticSource::new(None), once(), |e| {
        e.never_ready("db")
    });
    run_to_completion(h.runtime, vec![]).await?;

    assert_eq!(names(&h.executed), ["db"]);
    Ok(())
}

fn dispatched(step: &CoreStep) -> Vec<UpdateTask> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::DispatchTasks(tasks) => Some(tasks.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn teardown_id(step: &CoreStep) -> Option<TeardownId> {
    step.commands.iter().find_map(|c| match c {
        CoreCommand::Teardown { id, .. } => Some(*id),
        _ => None,
    })
}

fn requests_exit(step: &CoreStep) -> bool {
    !step.keep_running && matches!(step.commands.last(), Some(CoreCommand::RequestExit))
}

fn completed(task: &UpdateTask) -> RuntimeEvent {
    RuntimeEvent::TaskCompleted {
        resource: task.resource_name().to_string(),
        task_id: task.id,
        outcome: TaskOutcome::Success,
    }
}

#[test]
fn teardown_keeps_the_core_running_until_the_executor_reports_back() {
    let cfg = chain_config();
    let mut core = CoreRuntime::new(
        Scheduler::new(cfg.graph().clone(), 4),
        RuntimeOptions::default(),
    );
    let db = dispatched(&core.start(&[])).remove(0);

    let step = core.step(RuntimeEvent::TeardownRequested);
    assert!(step.keep_running);
    let id = teardown_id(&step).unwrap();
    assert!(core.teardown_pending());

    // Late completions are drained, not acted on.
    let step = core.step(completed(&db));
    assert!(step.keep_running);
    assert!(step.commands.is_empty());

    let step = core.step(RuntimeEvent::TeardownFinished {
        id,
        failed: vec!["api".into()],
    });
    assert!(requests_exit(&step));
    assert!(!core.teardown_pending());
}

#[test]
fn once_mode_waits_for_a_reload_teardown_before_exiting() {
    let before = ConfigFileBuilder::new()
        .with_resource("api", ResourceBuilder::new().build())
        .with_resource("worker", ResourceBuilder::new().build())
        .build();
    let after = ConfigFileBuilder::new()
        .with_resource("api", ResourceBuilder::new().build())
        .build();

    let mut core = CoreRuntime::new(Scheduler::new(before.graph().clone(), 4), once());
    let first = dispatched(&core.start(&[]));
    assert_eq!(first.len(), 2);

    core.step(RuntimeEvent::ChangesClassified(Classification {
        reload_required: true,
        ..Classification::default()
    }));
    for task in &first {
        assert!(core.step(completed(task)).keep_running);
    }

    let step = core.step(RuntimeEvent::ConfigReloaded(Arc::new(after)));
    let id = teardown_id(&step).unwrap();
    let api = dispatched(&step).remove(0);

    let step = core.step(completed(&api));
    assert!(core.is_idle());
    assert!(step.keep_running, "teardown still pending");

    let step = core.step(RuntimeEvent::TeardownFinished {
        id,
        failed: Vec::new(),
    });
    assert!(requests_exit(&step));
}
