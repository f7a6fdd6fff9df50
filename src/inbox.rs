//! Input discovery for `rtrace process`.
//!
//! A file argument is processed as-is. A directory is walked recursively and
//! filtered with the `[inbox]` include and exclude globs, matched
//! case-insensitively against the path relative to the directory.

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::InboxConfig;

pub fn collect_inputs(path: &Path, inbox: &InboxConfig) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        bail!("Input path does not exist: {}", path.display());
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let include_set = build_globset(&inbox.include_globs)?;

    let mut excludes = vec!["**/.*/**".to_string(), "**/.*".to_string()];
    excludes.extend(inbox.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut inputs = Vec::new();
    for entry in WalkDir::new(path) {
        let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let file = entry.path();
        let relative = file.strip_prefix(path).unwrap_or(file);
        let rel_str = relative.to_string_lossy();

        if exclude_set.is_match(rel_str.as_ref()) {
            continue;
        }
        if !include_set.is_match(rel_str.as_ref()) {
            continue;
        }

        inputs.push(file.to_path_buf());
    }

    // Sort for deterministic ordering
    inputs.sort();
    Ok(inputs)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid glob pattern: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
