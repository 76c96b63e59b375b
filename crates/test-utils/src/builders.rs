#![allow(dead_code)]

use std::path::PathBuf;

use devorch::config::{
    validate_config, ConfigFile, ImageConfig, LiveUpdateStepConfig, RawConfigFile, ResourceConfig,
};
use devorch::errors::Result;
use devorch::types::{BuildStrategy, ReadinessPolicy, TriggerMode};

/// Where builder configs pretend to live. Nothing is read from disk.
pub const DEFAULT_CONFIG_PATH: &str = "/project/Devorch.toml";

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
    path: PathBuf,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
            path: PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// Pretend the config was read from `path`; relative paths resolve
    /// against its directory.
    pub fn at(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_resource(mut self, name: &str, resource: ResourceConfig) -> Self {
        self.config.resource.insert(name.to_string(), resource);
        self
    }

    pub fn with_image(mut self, name: &str, image: ImageConfig) -> Self {
        self.config.image.insert(name.to_string(), image);
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.config.config.max_parallel_updates = n;
        self
    }

    pub fn with_config_input(mut self, path: &str) -> Self {
        self.config.config.config_inputs.push(path.to_string());
        self
    }

    pub fn prune_disabled(mut self) -> Self {
        self.config.docker_prune.enabled = false;
        self
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        validate_config(self.config, &self.path)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ResourceConfig`.
pub struct ResourceBuilder {
    resource: ResourceConfig,
}

impl ResourceBuilder {
    pub fn new() -> Self {
        Self {
            resource: ResourceConfig::default(),
        }
    }

    pub fn dep(mut self, dep: &str) -> Self {
        self.resource.deps.push(dep.to_string());
        self
    }

    pub fn manual(mut self) -> Self {
        self.resource.trigger_mode = TriggerMode::Manual;
        self
    }

    pub fn auto_init(mut self, val: bool) -> Self {
        self.resource.auto_init = val;
        self
    }

    pub fn wait_for_readiness(mut self) -> Self {
        self.resource.pod_readiness = ReadinessPolicy::Wait;
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.resource.images.push(image.to_string());
        self
    }

    pub fn watch(mut self, path: &str) -> Self {
        self.resource.watch.push(path.to_string());
        self
    }

    pub fn ignore(mut self, pattern: &str) -> Self {
        self.resource.ignore.push(pattern.to_string());
        self
    }

    pub fn deploy(mut self, cmd: &str) -> Self {
        self.resource.deploy_cmd = Some(cmd.to_string());
        self
    }

    pub fn delete(mut self, cmd: &str) -> Self {
        self.resource.delete_cmd = Some(cmd.to_string());
        self
    }

    pub fn container(mut self, name: &str) -> Self {
        self.resource.container = Some(name.to_string());
        self
    }

    pub fn build(self) -> ResourceConfig {
        self.resource
    }
}

impl Default for ResourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ImageConfig`.
pub struct ImageBuilder {
    image: ImageConfig,
}

impl ImageBuilder {
    pub fn new(context: &str) -> Self {
        Self {
            image: ImageConfig {
                context: context.to_string(),
                ..ImageConfig::default()
            },
        }
    }

    pub fn custom(mut self, command: &str) -> Self {
        self.image.strategy = BuildStrategy::Custom;
        self.image.command = Some(command.to_string());
        self
    }

    pub fn strategy(mut self, strategy: BuildStrategy) -> Self {
        self.image.strategy = strategy;
        self
    }

    pub fn ignore(mut self, pattern: &str) -> Self {
        self.image.ignore.push(pattern.to_string());
        self
    }

    pub fn only(mut self, pattern: &str) -> Self {
        self.image.only.push(pattern.to_string());
        self
    }

    pub fn fall_back_on(mut self, paths: &[&str]) -> Self {
        self.image.live_update.push(LiveUpdateStepConfig::FallBackOn(
            paths.iter().map(|p| p.to_string()).collect(),
        ));
        self
    }

    pub fn sync(mut self, local: &str, remote: &str) -> Self {
        self.image.live_update.push(LiveUpdateStepConfig::Sync {
            local: local.to_string(),
            remote: remote.to_string(),
        });
        self
    }

    pub fn run(mut self, cmd: &str, triggers: &[&str]) -> Self {
        self.image.live_update.push(LiveUpdateStepConfig::Run {
            cmd: cmd.to_string(),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
        });
        self
    }

    pub fn restart_container(mut self) -> Self {
        self.image
            .live_update
            .push(LiveUpdateStepConfig::RestartContainer);
        self
    }

    pub fn build(self) -> ImageConfig {
        self.image
    }
}
