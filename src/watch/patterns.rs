// src/watch/patterns.rs

//! Dockerignore-style path filters.
//!
//! Patterns are evaluated against a path relative to its watched root:
//! - `*` and `?` never cross a `/`; `**` matches any number of directories.
//! - a pattern that matches a directory also matches everything below it.
//! - a leading `!` re-includes paths excluded by earlier patterns; the last
//!   matching pattern wins.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

use crate::watch::path_utils::normalize_pattern;

#[derive(Clone)]
struct Rule {
    pattern: String,
    matcher: GlobMatcher,
    negated: bool,
}

/// An ordered list of ignore patterns.
#[derive(Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
}

impl fmt::Debug for IgnoreRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| {
                if r.negated {
                    format!("!{}", r.pattern)
                } else {
                    r.pattern.clone()
                }
            }))
            .finish()
    }
}

impl IgnoreRules {
    /// Compile all patterns, failing on the first invalid one.
    pub fn compile(patterns: &[String]) -> Result<Self> {
        let rules = patterns
            .iter()
            .filter_map(|p| compile_rule(p).transpose())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Compile the valid patterns and warn about the rest.
    ///
    /// Skipping an invalid ignore pattern can only make more paths count as
    /// changed, never fewer.
    pub fn compile_lenient(owner: &str, patterns: &[String]) -> Self {
        let rules = patterns
            .iter()
            .filter_map(|p| match compile_rule(p) {
                Ok(rule) => rule,
                Err(err) => {
                    warn!(owner, pattern = %p, error = %err, "skipping invalid ignore pattern");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `rel` (relative to the watched root) is excluded.
    pub fn is_ignored(&self, rel: &Path) -> bool {
        let candidates = self_and_ancestors(rel);
        let mut ignored = false;

        for rule in &self.rules {
            if candidates.iter().any(|c| rule.matcher.is_match(c)) {
                ignored = !rule.negated;
            }
        }

        ignored
    }

    /// Whether `rel` matches any pattern (negations are not meaningful in an
    /// allow-list and are treated as plain patterns).
    pub fn matches_any(&self, rel: &Path) -> bool {
        let candidates = self_and_ancestors(rel);
        self.rules
            .iter()
            .any(|rule| candidates.iter().any(|c| rule.matcher.is_match(c)))
    }
}

/// An `only` allow-list. An empty or invalid list admits everything.
#[derive(Debug, Clone, Default)]
pub struct OnlyRules {
    rules: Option<IgnoreRules>,
}

impl OnlyRules {
    pub fn compile_lenient(owner: &str, patterns: &[String]) -> Self {
        if patterns.is_empty() {
            return Self { rules: None };
        }
        match IgnoreRules::compile(patterns) {
            Ok(rules) => Self { rules: Some(rules) },
            Err(err) => {
                warn!(owner, error = %err, "invalid `only` pattern; treating every path as included");
                Self { rules: None }
            }
        }
    }

    pub fn admits(&self, rel: &Path) -> bool {
        match &self.rules {
            Some(rules) => rules.matches_any(rel),
            None => true,
        }
    }
}

fn compile_rule(raw: &str) -> Result<Option<Rule>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let (negated, body) = match trimmed.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let pattern = normalize_pattern(body);
    if pattern.is_empty() {
        return Ok(None);
    }

    let matcher = GlobBuilder::new(&pattern)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid glob pattern: {raw}"))?
        .compile_matcher();

    Ok(Some(Rule {
        pattern,
        matcher,
        negated,
    }))
}

/// `a/b/c` -> [`a`, `a/b`, `a/b/c`].
fn self_and_ancestors(rel: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut acc = PathBuf::new();
    for component in rel.components() {
        acc.push(component);
        out.push(acc.clone());
    }
    out
}
