// src/dag/resource.rs

//! Static resource and build-unit descriptions, resolved from config.

use std::path::PathBuf;

use crate::liveupdate::LiveUpdateSpec;
use crate::types::{BuildStrategy, ReadinessPolicy, TriggerMode};

/// Canonical resource name type used throughout the engine.
pub type ResourceName = String;

/// Watched roots plus dockerignore-style filters.
///
/// `ignore` and `only` patterns are evaluated relative to the root that
/// contains the changed path.
#[derive(Debug, Clone, Default)]
pub struct WatchSpec {
    pub roots: Vec<PathBuf>,
    pub ignore: Vec<String>,
    pub only: Vec<String>,
}

impl WatchSpec {
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// A named, independently schedulable unit of deployable work.
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: ResourceName,
    /// Direct dependencies, in declaration order.
    pub deps: Vec<ResourceName>,
    pub trigger_mode: TriggerMode,
    pub auto_init: bool,
    pub pod_readiness: ReadinessPolicy,
    /// Names of the build units this resource deploys.
    pub build_units: Vec<String>,
    /// Plain watched paths (for resources without a build unit).
    pub watch: WatchSpec,
    pub deploy_cmd: Option<String>,
    pub delete_cmd: Option<String>,
    /// Container targeted by live updates.
    pub container: Option<String>,
    /// Polled after a deploy, for `pod_readiness = wait`.
    pub readiness_cmd: Option<String>,
    /// Directory commands run in.
    pub workdir: PathBuf,
}

impl Resource {
    /// Minimal auto-triggered resource with no build units.
    pub fn new(name: impl Into<ResourceName>) -> Self {
        Self {
            name: name.into(),
            deps: Vec::new(),
            trigger_mode: TriggerMode::Auto,
            auto_init: true,
            pod_readiness: ReadinessPolicy::Ignore,
            build_units: Vec::new(),
            watch: WatchSpec::default(),
            deploy_cmd: None,
            delete_cmd: None,
            container: None,
            readiness_cmd: None,
            workdir: PathBuf::from("."),
        }
    }
}

/// Build/update specification, shareable between resources.
#[derive(Debug, Clone)]
pub struct BuildUnit {
    pub name: String,
    pub strategy: BuildStrategy,
    /// Build context; also the watched root for this unit.
    pub context: PathBuf,
    /// Build command for `BuildStrategy::Custom`.
    pub command: Option<String>,
    pub ignore: Vec<String>,
    pub only: Vec<String>,
    pub live_update: Option<LiveUpdateSpec>,
}

impl BuildUnit {
    pub fn new(name: impl Into<String>, context: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            strategy: BuildStrategy::Docker,
            context: context.into(),
            command: None,
            ignore: Vec::new(),
            only: Vec::new(),
            live_update: None,
        }
    }

    pub fn watch_spec(&self) -> WatchSpec {
        WatchSpec {
            roots: vec![self.context.clone()],
            ignore: self.ignore.clone(),
            only: self.only.clone(),
        }
    }
}
