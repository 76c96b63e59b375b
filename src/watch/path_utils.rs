// src/watch/path_utils.rs

//! Utility functions for path handling in the watcher.

use std::path::{Path, PathBuf};

/// Express `path` relative to `root`.
///
/// - First we try a direct `strip_prefix(root)`.
/// - If that fails (e.g. due to symlinks or different absolute prefixes),
///   we retry against `canonical_root`, canonicalizing `path` (or, for a
///   deleted file, its parent).
///
/// Returns `None` if the path is not below `root`.
pub fn relative_path(root: &Path, canonical_root: Option<&Path>, path: &Path) -> Option<PathBuf> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(rel.to_path_buf());
    }

    let canonical_root = canonical_root?;
    if let Ok(rel) = path.strip_prefix(canonical_root) {
        return Some(rel.to_path_buf());
    }

    let canonical_path = canonicalize_lossy(path)?;
    canonical_path
        .strip_prefix(canonical_root)
        .ok()
        .map(Path::to_path_buf)
}

/// Canonicalize `path`, falling back to its canonical parent for paths that
/// no longer exist.
pub fn canonicalize_lossy(path: &Path) -> Option<PathBuf> {
    if let Ok(canon) = path.canonicalize() {
        return Some(canon);
    }
    let parent = path.parent()?.canonicalize().ok()?;
    Some(parent.join(path.file_name()?))
}

/// Strip the decorations dockerignore tolerates: surrounding whitespace, a
/// leading `/` or `./`, and a trailing `/`.
pub fn normalize_pattern(pattern: &str) -> String {
    let mut p = pattern.trim();
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    p.trim_start_matches('/').trim_end_matches('/').to_string()
}

/// Drop roots nested inside another root; watching the outer one recursively
/// already covers them.
pub fn collapse_roots(mut roots: Vec<PathBuf>) -> Vec<PathBuf> {
    roots.sort();
    roots.dedup();

    let mut out: Vec<PathBuf> = Vec::new();
    for root in roots {
        if !out.iter().any(|kept| root.starts_with(kept)) {
            out.push(root);
        }
    }
    out
}
