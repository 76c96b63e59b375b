// src/config/model.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::dag::ResourceGraph;
use crate::types::{BuildStrategy, ReadinessPolicy, TriggerMode};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// max_parallel_updates = 2
///
/// [image.api]
/// context = "api"
/// live_update = [
///   { sync = { local = "src", remote = "/app/src" } },
///   "restart_container",
/// ]
///
/// [resource.api]
/// images = ["api"]
/// deps = ["db"]
/// deploy_cmd = "kubectl apply -f k8s/api.yaml"
/// ```
///
/// All sections are optional and have reasonable defaults. Tables keep their
/// declaration order, which later breaks scheduling ties.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// `[docker_prune]`.
    #[serde(default)]
    pub docker_prune: DockerPruneSection,

    /// Build units from `[image.<name>]`, keyed by image name.
    #[serde(default)]
    pub image: IndexMap<String, ImageConfig>,

    /// Resources from `[resource.<name>]`.
    #[serde(default)]
    pub resource: IndexMap<String, ResourceConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Upper bound on resources building at once.
    #[serde(default = "default_max_parallel_updates")]
    pub max_parallel_updates: usize,

    /// Deadline for a single deploy step; exceeding it fails the update.
    #[serde(default = "default_k8s_upsert_timeout_secs")]
    pub k8s_upsert_timeout_secs: u64,

    /// Window for batching filesystem events into one change set.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Extra files whose change forces a configuration reload.
    #[serde(default)]
    pub config_inputs: Vec<String>,
}

fn default_max_parallel_updates() -> usize {
    3
}

fn default_k8s_upsert_timeout_secs() -> u64 {
    30
}

fn default_debounce_ms() -> u64 {
    200
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_parallel_updates: default_max_parallel_updates(),
            k8s_upsert_timeout_secs: default_k8s_upsert_timeout_secs(),
            debounce_ms: default_debounce_ms(),
            config_inputs: Vec::new(),
        }
    }
}

impl ConfigSection {
    pub fn upsert_timeout(&self) -> Duration {
        Duration::from_secs(self.k8s_upsert_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// `[docker_prune]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DockerPruneSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Only artifacts older than this are candidates.
    #[serde(default = "default_max_age_mins")]
    pub max_age_mins: u64,

    /// Prune every N completed builds; 0 means use `interval_hrs`.
    #[serde(default)]
    pub num_builds: u64,

    #[serde(default = "default_interval_hrs")]
    pub interval_hrs: u64,

    /// Most recent images to keep per image name.
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

fn default_max_age_mins() -> u64 {
    6 * 60
}

fn default_interval_hrs() -> u64 {
    1
}

fn default_keep_recent() -> usize {
    2
}

impl Default for DockerPruneSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_mins: default_max_age_mins(),
            num_builds: 0,
            interval_hrs: default_interval_hrs(),
            keep_recent: default_keep_recent(),
        }
    }
}

/// `[image.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub strategy: BuildStrategy,

    /// Build context, relative to the config file.
    #[serde(default = "default_context")]
    pub context: String,

    /// Build command; required when `strategy = "custom"`.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub ignore: Vec<String>,

    #[serde(default)]
    pub only: Vec<String>,

    /// Ordered live-update steps. Paths are relative to `context`.
    #[serde(default)]
    pub live_update: Vec<LiveUpdateStepConfig>,
}

fn default_context() -> String {
    ".".to_string()
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            strategy: BuildStrategy::default(),
            context: default_context(),
            command: None,
            ignore: Vec::new(),
            only: Vec::new(),
            live_update: Vec::new(),
        }
    }
}

/// One entry of `live_update = [...]`.
///
/// ```toml
/// live_update = [
///   { fall_back_on = ["go.mod"] },
///   { sync = { local = "src", remote = "/app/src" } },
///   { run = { cmd = "npm install", triggers = ["package.json"] } },
///   "restart_container",
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveUpdateStepConfig {
    FallBackOn(Vec<String>),
    Sync {
        local: String,
        remote: String,
    },
    Run {
        cmd: String,
        #[serde(default)]
        triggers: Vec<String>,
    },
    RestartContainer,
}

/// `[resource.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    /// Resources that must be ready before this one updates.
    #[serde(default)]
    pub deps: Vec<String>,

    #[serde(default)]
    pub trigger_mode: TriggerMode,

    /// Update once at startup even in manual mode.
    #[serde(default = "default_true")]
    pub auto_init: bool,

    #[serde(default)]
    pub pod_readiness: ReadinessPolicy,

    /// Names of `[image.<name>]` sections this resource deploys.
    #[serde(default)]
    pub images: Vec<String>,

    /// Plain watched paths, for resources not driven by an image.
    #[serde(default)]
    pub watch: Vec<String>,

    #[serde(default)]
    pub ignore: Vec<String>,

    #[serde(default)]
    pub only: Vec<String>,

    #[serde(default)]
    pub deploy_cmd: Option<String>,

    #[serde(default)]
    pub delete_cmd: Option<String>,

    /// Container targeted by live updates.
    #[serde(default)]
    pub container: Option<String>,

    /// Polled after a deploy until it succeeds when `pod_readiness = "wait"`.
    #[serde(default)]
    pub readiness_cmd: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            deps: Vec::new(),
            trigger_mode: TriggerMode::default(),
            auto_init: true,
            pod_readiness: ReadinessPolicy::default(),
            images: Vec::new(),
            watch: Vec::new(),
            ignore: Vec::new(),
            only: Vec::new(),
            deploy_cmd: None,
            delete_cmd: None,
            container: None,
            readiness_cmd: None,
        }
    }
}

/// Validated configuration.
///
/// Produced only by [`crate::config::validate::validate_config`], so holding
/// one means the resource graph is acyclic and every reference resolves.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    root: PathBuf,
    pub config: ConfigSection,
    pub docker_prune: DockerPruneSection,
    config_inputs: Vec<PathBuf>,
    graph: ResourceGraph,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        path: PathBuf,
        root: PathBuf,
        config: ConfigSection,
        docker_prune: DockerPruneSection,
        config_inputs: Vec<PathBuf>,
        graph: ResourceGraph,
    ) -> Self {
        Self {
            path,
            root,
            config,
            docker_prune,
            config_inputs,
            graph,
        }
    }

    /// The configuration file itself.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory relative paths were resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Every file whose change requires re-evaluating the configuration.
    pub fn reload_inputs(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.path.as_path()).chain(self.config_inputs.iter().map(|p| p.as_path()))
    }
}
