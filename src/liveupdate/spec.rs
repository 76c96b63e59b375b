// src/liveupdate/spec.rs

//! Validated live-update step lists.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::errors::{DevorchError, Result};

/// A set of paths resolved against a base directory.
///
/// Entries without glob metacharacters match the path itself and, if the
/// entry names a directory, everything below it. Entries with glob
/// metacharacters are matched against the path relative to `base`.
#[derive(Debug, Clone)]
pub struct PathSet {
    base: PathBuf,
    entries: Vec<String>,
    literals: Vec<PathBuf>,
    globs: Option<GlobSet>,
}

impl PathSet {
    pub fn new(base: impl Into<PathBuf>, entries: Vec<String>) -> std::result::Result<Self, globset::Error> {
        let base = base.into();
        let mut literals = Vec::new();
        let mut builder = GlobSetBuilder::new();
        let mut has_globs = false;

        for entry in &entries {
            if is_glob(entry) {
                builder.add(Glob::new(entry.trim_start_matches("./"))?);
                has_globs = true;
            } else {
                literals.push(base.join(entry.trim_start_matches("./")));
            }
        }

        let globs = if has_globs { Some(builder.build()?) } else { None };

        Ok(Self {
            base,
            entries,
            literals,
            globs,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self
            .literals
            .iter()
            .any(|lit| path == lit.as_path() || path.starts_with(lit))
        {
            return true;
        }

        match (&self.globs, path.strip_prefix(&self.base)) {
            (Some(globs), Ok(rel)) => globs.is_match(rel),
            _ => false,
        }
    }
}

fn is_glob(entry: &str) -> bool {
    entry.contains(['*', '?', '[', '{'])
}

/// One step of a live update, in declaration order.
#[derive(Debug, Clone)]
pub enum LiveUpdateStep {
    /// Any matching change forces a full rebuild.
    FallBackOn(PathSet),
    /// Copy changes under `local` to `remote` inside the container.
    Sync { local: PathBuf, remote: PathBuf },
    /// Run `cmd` in the container; with triggers, only when one of them changed.
    Run { cmd: String, triggers: PathSet },
    /// Restart the container after all other steps.
    RestartContainer,
}

impl LiveUpdateStep {
    fn kind(&self) -> &'static str {
        match self {
            LiveUpdateStep::FallBackOn(_) => "fall_back_on",
            LiveUpdateStep::Sync { .. } => "sync",
            LiveUpdateStep::Run { .. } => "run",
            LiveUpdateStep::RestartContainer => "restart_container",
        }
    }
}

/// An ordered, validated list of live-update steps.
///
/// Invariants (checked by [`LiveUpdateSpec::new`]):
/// - `fall_back_on` steps only appear as a prefix;
/// - every `sync` step precedes every `run` step;
/// - `restart_container` appears at most once, as the last step;
/// - sync destinations are absolute container paths.
#[derive(Debug, Clone)]
pub struct LiveUpdateSpec {
    steps: Vec<LiveUpdateStep>,
}

impl LiveUpdateSpec {
    pub fn new(unit: &str, steps: Vec<LiveUpdateStep>) -> Result<Self> {
        let invalid = |reason: String| DevorchError::InvalidLiveUpdate {
            unit: unit.to_string(),
            reason,
        };

        let mut seen_other = false;
        let mut seen_run = false;

        for (idx, step) in steps.iter().enumerate() {
            let is_last = idx + 1 == steps.len();

            match step {
                LiveUpdateStep::FallBackOn(_) => {
                    if seen_other {
                        return Err(invalid(format!(
                            "step {idx}: fall_back_on must come before all other steps"
                        )));
                    }
                }
                LiveUpdateStep::Sync { remote, .. } => {
                    seen_other = true;
                    if seen_run {
                        return Err(invalid(format!(
                            "step {idx}: sync must come before all run steps"
                        )));
                    }
                    if !remote.to_string_lossy().starts_with('/') {
                        return Err(invalid(format!(
                            "step {idx}: sync destination '{}' is not absolute",
                            remote.display()
                        )));
                    }
                }
                LiveUpdateStep::Run { .. } => {
                    seen_other = true;
                    seen_run = true;
                }
                LiveUpdateStep::RestartContainer => {
                    seen_other = true;
                    if !is_last {
                        return Err(invalid(format!(
                            "step {idx}: restart_container must be the last step (followed by {})",
                            steps[idx + 1].kind()
                        )));
                    }
                }
            }
        }

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[LiveUpdateStep] {
        &self.steps
    }

    pub fn fall_back_on(&self) -> impl Iterator<Item = &PathSet> {
        self.steps.iter().filter_map(|s| match s {
            LiveUpdateStep::FallBackOn(set) => Some(set),
            _ => None,
        })
    }

    pub fn syncs(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.steps.iter().filter_map(|s| match s {
            LiveUpdateStep::Sync { local, remote } => Some((local.as_path(), remote.as_path())),
            _ => None,
        })
    }

    pub fn runs(&self) -> impl Iterator<Item = (&str, &PathSet)> {
        self.steps.iter().filter_map(|s| match s {
            LiveUpdateStep::Run { cmd, triggers } => Some((cmd.as_str(), triggers)),
            _ => None,
        })
    }

    pub fn restarts_container(&self) -> bool {
        matches!(self.steps.last(), Some(LiveUpdateStep::RestartContainer))
    }
}
