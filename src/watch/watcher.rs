// src/watch/watcher.rs

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::config::ConfigFile;
use crate::engine::RuntimeEvent;
use crate::watch::classifier::{ChangeClassifier, ChangeEvent};
use crate::watch::event_handler::classify_batches;
use crate::watch::path_utils::collapse_roots;

/// Handle for the filesystem watcher.
///
/// This exists mainly so the underlying `RecommendedWatcher` is kept alive for
/// as long as needed. Dropping this handle will stop file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl WatcherHandle {
    /// Directories watched recursively.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

/// Spawn a filesystem watcher for every build context, resource watch path
/// and configuration input of the configuration currently in `config_rx`,
/// sending `RuntimeEvent::ChangesClassified` for each debounced batch.
///
/// The set of watched directories is fixed at startup; reloaded
/// configurations change how events are classified, not which directories
/// are observed.
pub fn spawn_watcher(
    config_rx: watch::Receiver<Arc<ConfigFile>>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> Result<WatcherHandle> {
    let (roots, input_dirs) = {
        let cfg = config_rx.borrow();
        let classifier = ChangeClassifier::new(&cfg);
        let roots = collapse_roots(
            classifier
                .watch_roots()
                .into_iter()
                .filter(|r| exists_or_warn(r))
                .collect(),
        );
        let input_dirs: Vec<PathBuf> = cfg
            .reload_inputs()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .filter(|dir| !roots.iter().any(|r| dir.starts_with(r)))
            .collect();
        (roots, collapse_roots(input_dirs))
    };

    // Channel from the blocking notify callback into the async world.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ChangeEvent>();
    let seq = Arc::new(AtomicU64::new(0));

    // Closure called synchronously by notify whenever an event arrives.
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event.kind.is_access() {
                    return;
                }
                for path in event.paths {
                    let seq = seq.fetch_add(1, Ordering::SeqCst);
                    if event_tx.send(ChangeEvent { path, seq }).is_err() {
                        // Receiver gone: the runtime is shutting down.
                        return;
                    }
                }
            }
            Err(err) => {
                // We can't log via tracing reliably from notify's thread, so fallback to stderr.
                eprintln!("devorch: file watch error: {err}");
            }
        },
        Config::default(),
    )?;

    for root in &roots {
        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("watching {}", root.display()))?;
    }
    for dir in &input_dirs {
        if dir.exists() {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("watching {}", dir.display()))?;
        }
    }

    info!(roots = ?roots, "file watcher started");

    tokio::spawn(classify_batches(event_rx, config_rx, runtime_tx));

    Ok(WatcherHandle {
        _inner: watcher,
        roots,
    })
}

fn exists_or_warn(path: &Path) -> bool {
    let exists = path.exists();
    if !exists {
        warn!(path = %path.display(), "watched path does not exist; not watching it");
    }
    exists
}
