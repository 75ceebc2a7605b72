//! Glob-based path exclusion.
//!
//! Patterns containing a path separator are matched against the full relative
//! path; bare patterns are matched against the basename only. A trailing-slash
//! pattern (`target/`) excludes the directory entry and everything beneath it.
//! A built-in set of binary, lock and VCS-artifact patterns is always merged
//! with whatever the user passes.

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Always-on exclusions: binaries, archives, lockfiles, VCS internals.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git/",
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.ico",
    "*.pdf",
    "*.svg",
    "*.woff",
    "*.woff2",
    "*.ttf",
    "*.eot",
    "*.zip",
    "*.gz",
    "*.tar",
    "*.mp3",
    "*.mp4",
    "*.wav",
    "*.so",
    "*.dylib",
    "*.o",
    "*.lock",
    "package-lock.json",
    "yarn.lock",
];

/// Decides whether a path is excluded, for both tree filtering and fetch guards.
pub struct ExclusionMatcher {
    /// Globs anchored to the full relative path.
    path_set: GlobSet,
    /// Globs matched against the basename only.
    name_set: GlobSet,
    patterns: Vec<String>,
}

impl ExclusionMatcher {
    /// Build from user patterns merged with [`DEFAULT_EXCLUDES`].
    pub fn new(user_patterns: &[String]) -> anyhow::Result<Self> {
        let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        patterns.extend(user_patterns.iter().cloned());

        let mut path_builder = GlobSetBuilder::new();
        let mut name_builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let anchored = pattern.contains('/');
            if let Some(dir) = pattern.strip_suffix('/') {
                // A directory pattern prunes the entry itself and its subtree.
                if anchored && !dir.is_empty() {
                    path_builder.add(Glob::new(dir)?);
                    path_builder.add(Glob::new(&format!("{dir}/**"))?);
                } else if !dir.is_empty() {
                    name_builder.add(Glob::new(dir)?);
                }
            } else if anchored {
                path_builder.add(Glob::new(pattern)?);
            } else {
                name_builder.add(Glob::new(pattern)?);
            }
        }

        Ok(Self {
            path_set: path_builder.build()?,
            name_set: name_builder.build()?,
            patterns,
        })
    }

    /// The merged pattern list, for collaborators (fd) that take exclusion args.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        let normalized = path.strip_prefix("./").unwrap_or(path);
        let normalized = normalized.strip_suffix('/').unwrap_or(normalized);
        if normalized.is_empty() {
            return false;
        }
        if self.path_set.is_match(normalized) {
            return true;
        }
        let basename = normalized.rsplit('/').next().unwrap_or(normalized);
        // Basename patterns also prune: any path segment hitting one excludes
        // the whole entry, matching how the listing tools treat directory names.
        normalized
            .split('/')
            .any(|segment| self.name_set.is_match(segment))
            || self.name_set.is_match(basename)
    }
}
