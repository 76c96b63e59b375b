// src/config/validate.rs

use std::path::{Path, PathBuf};

use crate::config::model::{
    ConfigFile, ConfigSection, DockerPruneSection, ImageConfig, LiveUpdateStepConfig,
    RawConfigFile, ResourceConfig,
};
use crate::dag::{BuildUnit, Resource, ResourceGraph, WatchSpec};
use crate::errors::{DevorchError, Result};
use crate::liveupdate::{LiveUpdateSpec, LiveUpdateStep, PathSet};
use crate::types::BuildStrategy;

/// Validate a raw config read from `path` and resolve it into a
/// [`ConfigFile`]. Relative paths resolve against `path`'s directory.
pub fn validate_config(raw: RawConfigFile, path: &Path) -> Result<ConfigFile> {
    let root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    ensure_has_resources(&raw)?;
    validate_global_config(&raw.config)?;
    validate_prune_config(&raw.docker_prune)?;
    validate_resource_references(&raw)?;

    let units = raw
        .image
        .iter()
        .map(|(name, image)| build_unit(name, image, &root))
        .collect::<Result<Vec<_>>>()?;

    let resources = raw
        .resource
        .iter()
        .map(|(name, res)| resource(name, res, &root))
        .collect::<Vec<_>>();

    let graph = ResourceGraph::load(resources, units)?;

    let config_inputs = raw
        .config
        .config_inputs
        .iter()
        .map(|p| root.join(p))
        .collect();

    Ok(ConfigFile::new_unchecked(
        path.to_path_buf(),
        root,
        raw.config,
        raw.docker_prune,
        config_inputs,
        graph,
    ))
}

fn ensure_has_resources(cfg: &RawConfigFile) -> Result<()> {
    if cfg.resource.is_empty() {
        return Err(DevorchError::ConfigError(
            "config must contain at least one [resource.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &ConfigSection) -> Result<()> {
    if cfg.max_parallel_updates == 0 {
        return Err(DevorchError::ConfigError(
            "[config].max_parallel_updates must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.k8s_upsert_timeout_secs == 0 {
        return Err(DevorchError::ConfigError(
            "[config].k8s_upsert_timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

fn validate_prune_config(cfg: &DockerPruneSection) -> Result<()> {
    if cfg.enabled && cfg.num_builds == 0 && cfg.interval_hrs == 0 {
        return Err(DevorchError::ConfigError(
            "[docker_prune] needs num_builds >= 1 or interval_hrs >= 1 when enabled".to_string(),
        ));
    }
    Ok(())
}

fn validate_resource_references(cfg: &RawConfigFile) -> Result<()> {
    for (name, res) in cfg.resource.iter() {
        for image in res.images.iter() {
            if !cfg.image.contains_key(image) {
                return Err(DevorchError::ConfigError(format!(
                    "resource '{}' references unknown image '{}'",
                    name, image
                )));
            }
        }
    }
    Ok(())
}

fn build_unit(name: &str, image: &ImageConfig, root: &Path) -> Result<BuildUnit> {
    if image.strategy == BuildStrategy::Custom && image.command.is_none() {
        return Err(DevorchError::ConfigError(format!(
            "image '{}' uses strategy \"custom\" but has no `command`",
            name
        )));
    }

    let context = root.join(&image.context);
    let live_update = if image.live_update.is_empty() {
        None
    } else {
        Some(live_update_spec(name, &image.live_update, &context)?)
    };

    Ok(BuildUnit {
        name: name.to_string(),
        strategy: image.strategy,
        context,
        command: image.command.clone(),
        ignore: image.ignore.clone(),
        only: image.only.clone(),
        live_update,
    })
}

fn live_update_spec(unit: &str, steps: &[LiveUpdateStepConfig], context: &Path) -> Result<LiveUpdateSpec> {
    let path_set = |entries: &[String]| {
        PathSet::new(context, entries.to_vec()).map_err(|e| DevorchError::InvalidLiveUpdate {
            unit: unit.to_string(),
            reason: format!("invalid pattern: {e}"),
        })
    };

    let steps = steps
        .iter()
        .map(|step| {
            Ok(match step {
                LiveUpdateStepConfig::FallBackOn(paths) => LiveUpdateStep::FallBackOn(path_set(paths)?),
                LiveUpdateStepConfig::Sync { local, remote } => LiveUpdateStep::Sync {
                    local: context.join(local.trim_start_matches("./")),
                    remote: PathBuf::from(remote),
                },
                LiveUpdateStepConfig::Run { cmd, triggers } => LiveUpdateStep::Run {
                    cmd: cmd.clone(),
                    triggers: path_set(triggers)?,
                },
                LiveUpdateStepConfig::RestartContainer => LiveUpdateStep::RestartContainer,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    LiveUpdateSpec::new(unit, steps)
}

fn resource(name: &str, cfg: &ResourceConfig, root: &Path) -> Resource {
    Resource {
        name: name.to_string(),
        deps: cfg.deps.clone(),
        trigger_mode: cfg.trigger_mode,
        auto_init: cfg.auto_init,
        pod_readiness: cfg.pod_readiness,
        build_units: cfg.images.clone(),
        watch: WatchSpec {
            roots: cfg.watch.iter().map(|w| root.join(w)).collect(),
            ignore: cfg.ignore.clone(),
            only: cfg.only.clone(),
        },
        deploy_cmd: cfg.deploy_cmd.clone(),
        delete_cmd: cfg.delete_cmd.clone(),
        container: cfg.container.clone(),
        readiness_cmd: cfg.readiness_cmd.clone(),
        workdir: root.to_path_buf(),
    }
}
