//! Presence checks for the external binaries the pipeline shells out to.
//!
//! Missing tools are fatal preconditions, reported once at construction time
//! rather than per call.

use std::path::PathBuf;

use anyhow::{bail, Result};

/// Alternate binary names per tool (Debian ships `fd` as `fdfind`).
const ALTERNATES: &[(&str, &[&str])] = &[("fd", &["fd", "fdfind"])];

/// Resolve `name` (or one of its alternates) on PATH.
pub fn resolve(name: &str) -> Option<PathBuf> {
    let candidates: &[&str] = ALTERNATES
        .iter()
        .find(|(tool, _)| *tool == name)
        .map(|(_, alts)| *alts)
        .unwrap_or(std::slice::from_ref(&name));
    candidates.iter().find_map(|c| which::which(c).ok())
}

/// Resolve `name` or fail with an installation hint.
pub fn require(name: &str) -> Result<PathBuf> {
    match resolve(name) {
        Some(path) => Ok(path),
        None => bail!("`{name}` is required but was not found on PATH; install it and retry"),
    }
}
