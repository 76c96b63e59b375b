// src/prune/docker.rs

//! Artifact store backed by the `docker` CLI.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::exec::{BoxFuture, BUILT_BY_LABEL};
use crate::prune::policy::ImageInfo;

/// Where built artifacts live.
///
/// The pruner only talks to this trait, so tests can hand it an in-memory
/// store.
pub trait ArtifactStore: Send + Sync + 'static {
    /// Remove stopped containers we created that are older than `max_age`.
    /// Returns the removed container ids.
    fn prune_containers(&self, max_age: Duration) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Every image labeled as built by this tool.
    fn list_images(&self) -> BoxFuture<'_, Result<Vec<ImageInfo>>>;

    fn remove_image<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Remove build cache entries older than `max_age`. Returns
    /// `(entries removed, bytes reclaimed)`.
    fn prune_build_cache(&self, max_age: Duration) -> BoxFuture<'_, Result<(usize, u64)>>;
}

/// True if a removal failed only because a container still uses the image.
pub fn is_in_use_error(err: &anyhow::Error) -> bool {
    let msg = format!("{err:#}");
    msg.contains("is being used by") || msg.contains("image is in use")
}

#[derive(Debug, Clone, Default)]
pub struct DockerCliStore;

impl DockerCliStore {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactStore for DockerCliStore {
    fn prune_containers(&self, max_age: Duration) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let out = docker(&[
                "container",
                "prune",
                "--force",
                "--filter",
                &format!("label={BUILT_BY_LABEL}"),
                "--filter",
                &until_filter(max_age),
            ])
            .await?;
            Ok(parse_deleted_ids(&out, "Deleted Containers:"))
        })
    }

    fn list_images(&self) -> BoxFuture<'_, Result<Vec<ImageInfo>>> {
        Box::pin(async move {
            let listing = docker(&[
                "image",
                "ls",
                "--quiet",
                "--no-trunc",
                "--filter",
                &format!("label={BUILT_BY_LABEL}"),
            ])
            .await?;

            let mut ids: Vec<&str> = listing.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
            ids.sort_unstable();
            ids.dedup();
            if ids.is_empty() {
                return Ok(Vec::new());
            }

            let mut args = vec!["image", "inspect"];
            args.extend(ids);
            let json = docker(&args).await?;
            parse_inspect(&json)
        })
    }

    fn remove_image<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            docker(&["image", "rm", id]).await?;
            Ok(())
        })
    }

    fn prune_build_cache(&self, max_age: Duration) -> BoxFuture<'_, Result<(usize, u64)>> {
        Box::pin(async move {
            let out = docker(&["builder", "prune", "--force", "--filter", &until_filter(max_age)]).await?;
            let deleted = parse_deleted_ids(&out, "Deleted build cache objects:").len();
            Ok((deleted, parse_reclaimed(&out)))
        })
    }
}

fn until_filter(max_age: Duration) -> String {
    format!("until={}s", max_age.as_secs())
}

async fn docker(args: &[&str]) -> Result<String> {
    debug!(?args, "docker");
    let output = Command::new("docker")
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .context("running docker")?;

    if !output.status.success() {
        bail!(
            "docker {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Ids listed under `header` in docker's prune output.
pub fn parse_deleted_ids(output: &str, header: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| l.trim() != header)
        .skip(1)
        .map(str::trim)
        .take_while(|l| !l.is_empty() && !l.starts_with("Total reclaimed space"))
        .map(str::to_string)
        .collect()
}

/// Bytes from a `Total reclaimed space: 1.5GB` line; 0 if absent.
pub fn parse_reclaimed(output: &str) -> u64 {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Total reclaimed space:"))
        .and_then(|s| parse_size(s.trim()))
        .unwrap_or(0)
}

/// `1.5GB`, `12kB`, `0B` as bytes (docker uses decimal units).
pub fn parse_size(s: &str) -> Option<u64> {
    let split = s.find(|c: char| c.is_ascii_alphabetic())?;
    let (num, unit) = s.split_at(split);
    let value: f64 = num.trim().parse().ok()?;
    let mult = match unit.trim().to_ascii_uppercase().as_str() {
        "B" => 1.0,
        "KB" | "KIB" => 1e3,
        "MB" | "MIB" => 1e6,
        "GB" | "GIB" => 1e9,
        "TB" | "TIB" => 1e12,
        _ => return None,
    };
    Some((value * mult) as u64)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    #[serde(default)]
    size: u64,
    created: DateTime<Utc>,
    #[serde(default)]
    metadata: InspectMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectMetadata {
    last_tag_time: Option<DateTime<Utc>>,
}

/// Parse `docker image inspect` output.
///
/// Build time is the last tag time; images that were never re-tagged report
/// a zero time there, so creation time is used instead.
pub fn parse_inspect(json: &str) -> Result<Vec<ImageInfo>> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(json).context("parsing docker image inspect output")?;

    Ok(entries
        .into_iter()
        .map(|e| {
            let built_at = match e.metadata.last_tag_time {
                Some(t) if t.timestamp() > 0 => t,
                _ => e.created,
            };
            ImageInfo {
                id: e.id,
                repo_tags: e.repo_tags.unwrap_or_default(),
                built_at,
                size: e.size,
            }
        })
        .collect())
}
