// src/watch/classifier.rs

//! Map debounced filesystem changes to the resources they affect.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::config::ConfigFile;
use crate::dag::{ChangeSet, ResourceName, WatchSpec};
use crate::watch::path_utils::{canonicalize_lossy, relative_path};
use crate::watch::patterns::{IgnoreRules, OnlyRules};

/// One filesystem notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    /// Monotonic across the process lifetime.
    pub seq: u64,
}

/// Output of classifying one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// A configuration input changed; the rest of the batch is irrelevant
    /// because every resource will be treated as changed after the reload.
    pub reload_required: bool,
    pub changes: BTreeMap<ResourceName, ChangeSet>,
    /// Paths that matched nothing.
    pub dropped: usize,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        !self.reload_required && self.changes.is_empty()
    }
}

#[derive(Debug)]
struct WatchedRoot {
    path: PathBuf,
    canonical: Option<PathBuf>,
}

/// Compiled roots plus ignore/only rules for one build unit or resource.
#[derive(Debug)]
struct PathFilter {
    roots: Vec<WatchedRoot>,
    ignore: IgnoreRules,
    only: OnlyRules,
}

impl PathFilter {
    fn new(owner: &str, spec: &WatchSpec) -> Self {
        let roots = spec
            .roots
            .iter()
            .map(|root| WatchedRoot {
                path: root.clone(),
                canonical: root.canonicalize().ok(),
            })
            .collect();

        Self {
            roots,
            ignore: IgnoreRules::compile_lenient(owner, &spec.ignore),
            only: OnlyRules::compile_lenient(owner, &spec.only),
        }
    }

    /// The path re-rooted onto the configured root, if it is watched and
    /// passes the filters.
    fn matches(&self, path: &Path) -> Option<PathBuf> {
        self.roots.iter().find_map(|root| {
            let rel = relative_path(&root.path, root.canonical.as_deref(), path)?;
            if rel.as_os_str().is_empty() {
                return Some(root.path.clone());
            }
            if self.ignore.is_ignored(&rel) || !self.only.admits(&rel) {
                trace!(path = %path.display(), "excluded by ignore/only rules");
                return None;
            }
            Some(root.path.join(rel))
        })
    }
}

#[derive(Debug)]
struct UnitFilter {
    unit: String,
    users: Vec<ResourceName>,
    filter: PathFilter,
}

#[derive(Debug)]
struct ResourceFilter {
    resource: ResourceName,
    filter: PathFilter,
}

/// Classifies change batches against one configuration.
///
/// Rebuilt whenever a new configuration is published.
#[derive(Debug)]
pub struct ChangeClassifier {
    reload_inputs: HashSet<PathBuf>,
    units: Vec<UnitFilter>,
    resources: Vec<ResourceFilter>,
}

impl ChangeClassifier {
    pub fn new(cfg: &ConfigFile) -> Self {
        let graph = cfg.graph();

        let reload_inputs = cfg
            .reload_inputs()
            .flat_map(|p| [Some(p.to_path_buf()), canonicalize_lossy(p)])
            .flatten()
            .collect();

        let units = graph
            .build_units()
            .map(|unit| UnitFilter {
                unit: unit.name.clone(),
                users: graph
                    .resources_using_unit(&unit.name)
                    .map(str::to_string)
                    .collect(),
                filter: PathFilter::new(&unit.name, &unit.watch_spec()),
            })
            .filter(|u| !u.users.is_empty())
            .collect();

        let resources = graph
            .resources()
            .filter(|r| !r.watch.is_empty())
            .map(|r| ResourceFilter {
                resource: r.name.clone(),
                filter: PathFilter::new(&r.name, &r.watch),
            })
            .collect();

        Self {
            reload_inputs,
            units,
            resources,
        }
    }

    /// Every directory that needs watching for this configuration.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        self.units
            .iter()
            .map(|u| &u.filter)
            .chain(self.resources.iter().map(|r| &r.filter))
            .flat_map(|f| f.roots.iter().map(|r| r.path.clone()))
            .collect()
    }

    pub fn reload_inputs(&self) -> impl Iterator<Item = &Path> {
        self.reload_inputs.iter().map(PathBuf::as_path)
    }

    pub fn is_reload_input(&self, path: &Path) -> bool {
        self.reload_inputs.contains(path)
            || canonicalize_lossy(path).is_some_and(|c| self.reload_inputs.contains(&c))
    }

    /// Classify a debounced batch.
    pub fn classify(&self, events: &[ChangeEvent]) -> Classification {
        if let Some(ev) = events.iter().find(|e| self.is_reload_input(&e.path)) {
            debug!(path = %ev.path.display(), "configuration input changed; reload required");
            return Classification {
                reload_required: true,
                ..Classification::default()
            };
        }

        let mut out = Classification::default();

        for ev in events {
            let mut matched = false;

            for unit in &self.units {
                if let Some(path) = unit.filter.matches(&ev.path) {
                    matched = true;
                    for user in &unit.users {
                        out.changes
                            .entry(user.clone())
                            .or_default()
                            .add_unit_path(&unit.unit, path.clone(), ev.seq);
                    }
                }
            }

            for res in &self.resources {
                if let Some(path) = res.filter.matches(&ev.path) {
                    matched = true;
                    out.changes
                        .entry(res.resource.clone())
                        .or_default()
                        .add_watch_path(path, ev.seq);
                }
            }

            if !matched {
                trace!(path = %ev.path.display(), "change matches no resource; dropping");
                out.dropped += 1;
            }
        }

        if !out.changes.is_empty() {
            debug!(
                resources = ?out.changes.keys().collect::<Vec<_>>(),
                dropped = out.dropped,
                "classified change batch"
            );
        }

        out
    }
}
