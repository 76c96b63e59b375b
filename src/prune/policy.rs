// src/prune/policy.rs

//! Retention policy: which built images are old enough to delete.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::DockerPruneSection;

/// Resolved `[docker_prune]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneSettings {
    pub enabled: bool,
    pub max_age: Duration,
    /// Prune every N completed builds; 0 means use `interval`.
    pub num_builds: u64,
    pub interval: Duration,
    pub keep_recent: usize,
}

impl From<&DockerPruneSection> for PruneSettings {
    fn from(section: &DockerPruneSection) -> Self {
        let interval_hrs = if section.interval_hrs == 0 { 1 } else { section.interval_hrs };
        Self {
            enabled: section.enabled,
            max_age: Duration::from_secs(section.max_age_mins * 60),
            num_builds: section.num_builds,
            interval: Duration::from_secs(interval_hrs * 3600),
            keep_recent: section.keep_recent,
        }
    }
}

impl Default for PruneSettings {
    fn default() -> Self {
        Self::from(&DockerPruneSection::default())
    }
}

/// A locally stored image built by this tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
    /// `repo:tag` references pointing at this image.
    pub repo_tags: Vec<String>,
    /// When the image was last tagged, i.e. built.
    pub built_at: DateTime<Utc>,
    pub size: u64,
}

impl ImageInfo {
    /// First configured image name one of our tags belongs to.
    fn selector<'a>(&self, selectors: &'a [String]) -> Option<&'a str> {
        selectors
            .iter()
            .find(|sel| self.repo_tags.iter().any(|tag| repository(tag) == sel.as_str()))
            .map(String::as_str)
    }
}

/// Repository part of a `repo:tag` reference.
///
/// A colon followed by a path segment belongs to a registry port
/// (`localhost:5000/app`), not a tag.
pub fn repository(reference: &str) -> &str {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => repo,
        _ => reference,
    }
}

/// Pick the images to delete.
///
/// Candidates are images at least `max_age` old whose repository is one of
/// `selectors`. Images with more than one tag are skipped: docker refuses to
/// remove them without force. Of the remaining candidates, the `keep_recent`
/// most recently built per selector survive.
///
/// The result keeps the input order.
pub fn select_images_to_delete(
    images: &[ImageInfo],
    selectors: &[String],
    max_age: Duration,
    keep_recent: usize,
    now: DateTime<Utc>,
) -> Vec<ImageInfo> {
    let candidates: Vec<&ImageInfo> = images
        .iter()
        .filter(|img| is_older_than(img.built_at, max_age, now) && img.selector(selectors).is_some())
        .filter(|img| {
            if img.repo_tags.len() > 1 {
                debug!(
                    image = %img.id,
                    tags = %img.repo_tags.join(", "),
                    "image has multiple tags; not pruning"
                );
                return false;
            }
            true
        })
        .collect();

    let mut recent_first = candidates.clone();
    recent_first.sort_by(|a, b| b.built_at.cmp(&a.built_at));

    let mut kept_per_selector: HashMap<&str, usize> = HashMap::new();
    let mut keep: HashSet<&str> = HashSet::new();
    for img in recent_first {
        let Some(selector) = img.selector(selectors) else {
            continue;
        };
        let kept = kept_per_selector.entry(selector).or_default();
        if *kept < keep_recent {
            *kept += 1;
            keep.insert(img.id.as_str());
        }
    }

    candidates
        .into_iter()
        .filter(|img| !keep.contains(img.id.as_str()))
        .cloned()
        .collect()
}

fn is_older_than(built_at: DateTime<Utc>, max_age: Duration, now: DateTime<Utc>) -> bool {
    // Negative ages (clock skew) never qualify.
    now.signed_duration_since(built_at)
        .to_std()
        .is_ok_and(|age| age >= max_age)
}
