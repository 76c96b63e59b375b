// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, ConfigSource};
use crate::dag::{StatusSnapshot, UpdateTask};
use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Drives the update scheduler in response to `RuntimeEvent`s,
/// and delegates actual build/deploy work to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels, dispatching tasks to the executor, re-evaluating the
/// configuration and publishing status snapshots.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    config_source: Arc<dyn ConfigSource>,
    config_tx: watch::Sender<Arc<ConfigFile>>,
    snapshot_tx: watch::Sender<StatusSnapshot>,
    /// Events produced by our own commands, handled before new input.
    followups: VecDeque<RuntimeEvent>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        config_source: Arc<dyn ConfigSource>,
        config_tx: watch::Sender<Arc<ConfigFile>>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(core.snapshot());
        Self {
            core,
            event_rx,
            executor,
            config_source,
            config_tx,
            snapshot_tx,
            followups: VecDeque::new(),
        }
    }

    /// Subscribe to the status snapshot published after every step.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<StatusSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Main event loop.
    ///
    /// - Queues the `auto_init` resources and `triggers`.
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core (dispatch, reload, teardown,
    ///   exit).
    pub async fn run(mut self, triggers: Vec<String>) -> Result<()> {
        info!("devorch runtime started");

        let step = self.core.start(&triggers);
        let mut keep_running = step.keep_running;
        for command in step.commands {
            self.execute_command(command).await?;
        }
        self.publish_snapshot();

        while keep_running {
            let event = match self.followups.pop_front() {
                Some(e) => e,
                None => match self.event_rx.recv().await {
                    Some(e) => e,
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                },
            };

            debug!(?event, "runtime received event");

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }
            self.publish_snapshot();

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                keep_running = false;
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchTasks(tasks) => {
                self.spawn_tasks(tasks).await?;
            }
            CoreCommand::ReloadConfig => {
                let event = self.reload_config().await;
                self.followups.push_back(event);
            }
            CoreCommand::PublishConfig(cfg) => {
                self.config_tx.send_replace(cfg);
            }
            CoreCommand::SetParallelism(n) => {
                self.executor.set_parallelism(n).await?;
            }
            CoreCommand::Teardown {
                id,
                resources,
                cancel_in_flight,
            } => {
                // Only hands the job over; completion arrives as an event so
                // this loop keeps draining completions meanwhile.
                let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
                debug!(teardown = id.0, ?names, cancel_in_flight, "sending teardown to executor");
                self.executor.teardown(id, resources, cancel_in_flight).await?;
            }
            CoreCommand::RequestExit => {
                // The core already returns keep_running=false alongside this
                // command; nothing else to do here.
                debug!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn spawn_tasks(&mut self, tasks: Vec<UpdateTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let names: Vec<_> = tasks.iter().map(|t| t.resource_name()).collect();
        let ids: Vec<_> = tasks.iter().map(|t| t.id.0).collect();
        debug!(?names, ?ids, "spawning update tasks");

        self.executor.spawn_tasks(tasks).await
    }

    /// Re-evaluate the configuration off the async threads.
    async fn reload_config(&self) -> RuntimeEvent {
        let source = Arc::clone(&self.config_source);
        match tokio::task::spawn_blocking(move || source.load()).await {
            Ok(Ok(cfg)) => {
                info!("configuration reloaded");
                RuntimeEvent::ConfigReloaded(Arc::new(cfg))
            }
            Ok(Err(err)) => {
                warn!(error = %err, "configuration reload failed");
                RuntimeEvent::ConfigReloadFailed(err.to_string())
            }
            Err(err) => RuntimeEvent::ConfigReloadFailed(format!("config loader panicked: {err}")),
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.core.snapshot());
    }
}
