// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod liveupdate;
pub mod logging;
pub mod prune;
pub mod types;
pub mod watch;

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::{mpsc, watch as watch_channel};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, ConfigSource, FileConfigSource};
use crate::dag::Scheduler;
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions};
use crate::errors::DevorchError;
use crate::exec::{BuildExecutor, RealExecutorBackend, ShellExecutor};
use crate::liveupdate::LiveUpdateStep;
use crate::prune::{spawn_pruner, DockerCliStore, PruneSettings, Pruner};
use crate::types::BuildStrategy;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - scheduler / core / runtime
/// - executor
/// - (optional) file watcher and docker pruner
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let source = Arc::new(FileConfigSource::new(&args.config).with_max_parallel(args.max_parallel));
    let cfg = source.load()?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    if let Some(unknown) = args.triggers.iter().find(|name| !cfg.graph().contains(name)) {
        return Err(DevorchError::ResourceNotFound(unknown.clone()).into());
    }

    let builder = Arc::new(ShellExecutor::new(cfg.config.upsert_timeout()));

    if args.down {
        return tear_down(&cfg, builder.as_ref()).await;
    }

    let max_parallel = cfg.config.max_parallel_updates;
    let scheduler = Scheduler::new(cfg.graph().clone(), max_parallel);
    let cfg = Arc::new(cfg);

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    // Latest accepted configuration, for the watcher's classifier.
    let (config_tx, config_rx) = watch_channel::channel(Arc::clone(&cfg));

    let executor = RealExecutorBackend::new(builder, rt_tx.clone(), max_parallel);

    // Optional file watcher (disabled in --once mode).
    let _watcher_handle = if !args.once {
        Some(crate::watch::spawn_watcher(config_rx, rt_tx.clone())?)
    } else {
        None
    };

    let options = RuntimeOptions {
        exit_when_idle: args.once,
        cancel_on_teardown: args.cancel_on_teardown,
    };
    let core = CoreRuntime::new(scheduler, options);
    let runtime = Runtime::new(
        core,
        rt_rx,
        executor,
        source as Arc<dyn ConfigSource>,
        config_tx,
    );

    if cfg.docker_prune.enabled && !args.once {
        let pruner = Pruner::new(
            Arc::new(DockerCliStore::new()),
            PruneSettings::from(&cfg.docker_prune),
            docker_image_names(&cfg),
        );
        spawn_pruner(pruner, runtime.subscribe_snapshots(), rt_tx.clone());
    }

    // Ctrl-C → tear down and exit.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::TeardownRequested).await;
        });
    }
    drop(rt_tx);

    info!(
        resources = cfg.graph().len(),
        max_parallel,
        once = args.once,
        "starting devorch"
    );
    runtime.run(args.triggers).await?;
    Ok(())
}

/// Image names the pruner may delete images of.
fn docker_image_names(cfg: &ConfigFile) -> Vec<String> {
    cfg.graph()
        .build_units()
        .filter(|u| u.strategy == BuildStrategy::Docker)
        .map(|u| u.name.to_lowercase())
        .collect()
}

/// `--down`: delete every resource, dependents first.
async fn tear_down(cfg: &ConfigFile, builder: &dyn BuildExecutor) -> Result<()> {
    let graph = cfg.graph();
    let mut failed = Vec::new();

    for name in graph.topo_order().iter().rev() {
        let Some(resource) = graph.get(name) else {
            continue;
        };
        info!(resource = %name, "deleting");
        if let Err(err) = builder.execute_delete(resource).await {
            warn!(resource = %name, error = %format!("{err:#}"), "delete failed");
            failed.push(name.as_str());
        }
    }

    if !failed.is_empty() {
        bail!("failed to delete: {}", failed.join(", "));
    }
    Ok(())
}

/// Simple dry-run output: print the resolved resource graph.
fn print_dry_run(cfg: &ConfigFile) {
    let graph = cfg.graph();

    println!("devorch dry-run");
    println!("  config: {}", cfg.path().display());
    println!(
        "  config.max_parallel_updates = {}",
        cfg.config.max_parallel_updates
    );
    println!(
        "  config.k8s_upsert_timeout_secs = {}",
        cfg.config.k8s_upsert_timeout_secs
    );
    println!("  docker_prune.enabled = {}", cfg.docker_prune.enabled);
    println!();

    println!("update order: {}", graph.topo_order().join(" -> "));
    println!();

    println!("resources ({}):", graph.len());
    for resource in graph.resources() {
        println!("  - {}", resource.name);
        println!("      trigger_mode: {:?}", resource.trigger_mode);
        if !resource.auto_init {
            println!("      auto_init: false");
        }
        if !resource.deps.is_empty() {
            println!("      deps: {:?}", resource.deps);
        }
        for unit in graph.units_of(&resource.name) {
            let live = match &unit.live_update {
                Some(spec) => {
                    let kinds: Vec<&str> = spec
                        .steps()
                        .iter()
                        .map(|s| match s {
                            LiveUpdateStep::FallBackOn(_) => "fall_back_on",
                            LiveUpdateStep::Sync { .. } => "sync",
                            LiveUpdateStep::Run { .. } => "run",
                            LiveUpdateStep::RestartContainer => "restart_container",
                        })
                        .collect();
                    format!(" live_update=[{}]", kinds.join(", "))
                }
                None => String::new(),
            };
            println!(
                "      image {}: {:?} ({}){live}",
                unit.name,
                unit.strategy,
                unit.context.display()
            );
        }
        if !resource.watch.is_empty() {
            println!("      watch: {:?}", resource.watch.roots);
        }
        if let Some(ref cmd) = resource.deploy_cmd {
            println!("      deploy_cmd: {cmd}");
        }
        if let Some(ref cmd) = resource.delete_cmd {
            println!("      delete_cmd: {cmd}");
        }
    }

    debug!("dry-run complete (no execution)");
}
