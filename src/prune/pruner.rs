// src/prune/pruner.rs

//! Background loop that decides when to prune and runs the passes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::dag::StatusSnapshot;
use crate::engine::RuntimeEvent;
use crate::prune::docker::{is_in_use_error, ArtifactStore};
use crate::prune::policy::{select_images_to_delete, PruneSettings};

/// How often the loop re-checks the interval cadence while idle.
pub const PRUNE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// What one prune pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub containers_deleted: Vec<String>,
    pub images_deleted: Vec<String>,
    /// Build cache entries removed.
    pub build_cache_pruned: usize,
    /// Bytes reclaimed by image and cache removal.
    pub space_reclaimed: u64,
}

/// Prune cadence state plus the store it prunes.
#[derive(Debug)]
pub struct Pruner<S: ArtifactStore> {
    store: Arc<S>,
    settings: PruneSettings,
    /// Configured docker image names; only their images are touched.
    selectors: Vec<String>,
    last_prune: Option<DateTime<Utc>>,
    last_prune_builds: u64,
}

impl<S: ArtifactStore> Pruner<S> {
    pub fn new(store: Arc<S>, settings: PruneSettings, selectors: Vec<String>) -> Self {
        Self {
            store,
            settings,
            selectors,
            last_prune: None,
            last_prune_builds: 0,
        }
    }

    pub fn settings(&self) -> &PruneSettings {
        &self.settings
    }

    pub fn last_prune(&self) -> Option<DateTime<Utc>> {
        self.last_prune
    }

    /// Whether a pass should run now.
    ///
    /// Never while anything is building or queued and able to start, or
    /// before a docker image has been built. The first pass runs as soon as one build completed;
    /// after that every `num_builds` builds, or every `interval` if
    /// `num_builds` is 0.
    pub fn should_prune(&self, snapshot: &StatusSnapshot, now: DateTime<Utc>) -> bool {
        if !self.settings.enabled
            || !snapshot.has_docker_build
            || snapshot.is_busy()
        {
            return false;
        }

        let builds = snapshot.completed_builds;
        let Some(last) = self.last_prune else {
            return builds > 0;
        };

        if self.settings.num_builds != 0 {
            return builds.saturating_sub(self.last_prune_builds) >= self.settings.num_builds;
        }

        now.signed_duration_since(last)
            .to_std()
            .is_ok_and(|since| since >= self.settings.interval)
    }

    /// Run one pass and record it. Store errors are logged, never fatal.
    pub async fn prune(&mut self, completed_builds: u64, now: DateTime<Utc>) -> PruneReport {
        let max_age = self.settings.max_age;
        let mut report = PruneReport::default();

        match self.store.prune_containers(max_age).await {
            Ok(ids) => report.containers_deleted = ids,
            Err(err) => warn!(error = %format!("{err:#}"), "container prune failed"),
        }

        match self.store.list_images().await {
            Ok(images) => {
                let doomed = select_images_to_delete(
                    &images,
                    &self.selectors,
                    max_age,
                    self.settings.keep_recent,
                    now,
                );
                for image in doomed {
                    match self.store.remove_image(&image.id).await {
                        Ok(()) => {
                            debug!(image = %image.id, tags = ?image.repo_tags, "image removed");
                            report.space_reclaimed += image.size;
                            report.images_deleted.push(image.id);
                        }
                        Err(err) if is_in_use_error(&err) => {}
                        Err(err) => {
                            debug!(image = %image.id, error = %format!("{err:#}"), "error removing image");
                        }
                    }
                }
            }
            Err(err) => warn!(error = %format!("{err:#}"), "listing images failed"),
        }

        match self.store.prune_build_cache(max_age).await {
            Ok((entries, bytes)) => {
                report.build_cache_pruned = entries;
                report.space_reclaimed += bytes;
            }
            Err(err) => warn!(error = %format!("{err:#}"), "build cache prune failed"),
        }

        self.last_prune = Some(now);
        self.last_prune_builds = completed_builds;
        report
    }
}

/// Spawn the pruner as an independent producer feeding `runtime_tx`.
///
/// The loop wakes on every published snapshot and on a fixed tick, and
/// stops when either channel closes.
pub fn spawn_pruner<S: ArtifactStore>(
    mut pruner: Pruner<S>,
    mut snapshot_rx: watch::Receiver<StatusSnapshot>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(settings = ?pruner.settings(), "docker pruner started");

        let mut ticker = tokio::time::interval(PRUNE_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = snapshot_rx.changed() => {
                    if changed.is_err() {
                        debug!("snapshot channel closed; pruner exiting");
                        break;
                    }
                }
                _ = ticker.tick() => {}
            }

            let snapshot = snapshot_rx.borrow_and_update().clone();
            let now = Utc::now();
            if !pruner.should_prune(&snapshot, now) {
                continue;
            }

            let report = pruner.prune(snapshot.completed_builds, now).await;
            if runtime_tx.send(RuntimeEvent::PruneFinished(report)).await.is_err() {
                debug!("runtime gone; pruner exiting");
                break;
            }
        }
    })
}
