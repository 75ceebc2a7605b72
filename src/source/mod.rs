//! The closed set of file sources and the dispatch over it.
//!
//! Every variant produces the same shape of data: an ordered, duplicate-free
//! tree whose first entry is the root marker, with directory entries carrying a
//! trailing slash. The shared tree assembly lives here so all variants apply
//! exclusion and ordering identically.

pub mod changeset;
pub mod github;
pub mod local;

use async_trait::async_trait;

use crate::contract::{FileSource, SourceError};
use crate::exclusion::ExclusionMatcher;

pub use changeset::ChangeSetSource;
pub use github::RemoteSource;
pub use local::LocalSource;

/// First entry of every tree; selecting it means "everything".
pub const ROOT_MARKER: &str = "./";

/// A file or directory path. Directories carry a trailing `/`.
pub(crate) fn is_dir_path(path: &str) -> bool {
    path == ROOT_MARKER || path.ends_with('/')
}

/// Build a tree from a flat file listing: filter exclusions, derive ancestor
/// directory entries, sort, dedup, prepend the root marker.
pub(crate) fn assemble_tree(files: Vec<String>, matcher: &ExclusionMatcher) -> Vec<String> {
    let mut entries: Vec<String> = Vec::new();
    for file in files {
        let file = file.strip_prefix("./").map(str::to_string).unwrap_or(file);
        if file.is_empty() || matcher.is_excluded(&file) {
            continue;
        }
        // Ancestor directories, each as `a/`, `a/b/`, ...
        let segments: Vec<&str> = file.split('/').collect();
        let mut prefix = String::new();
        for segment in &segments[..segments.len() - 1] {
            prefix.push_str(segment);
            prefix.push('/');
            if !matcher.is_excluded(&prefix) {
                entries.push(prefix.clone());
            }
        }
        entries.push(file);
    }
    entries.sort();
    entries.dedup();
    let mut tree = Vec::with_capacity(entries.len() + 1);
    tree.push(ROOT_MARKER.to_string());
    tree.extend(entries);
    tree
}

/// Tree minus the root marker and directory entries.
pub(crate) fn files_of(tree: &[String]) -> Vec<String> {
    tree.iter()
        .filter(|p| !is_dir_path(p))
        .cloned()
        .collect()
}

/// Non-directory descendants of `dir` within an already-filtered tree.
pub(crate) fn descendants_of(tree: &[String], dir: &str) -> Vec<String> {
    let prefix = if dir == ROOT_MARKER {
        String::new()
    } else {
        dir.to_string()
    };
    tree.iter()
        .filter(|p| p.starts_with(&prefix) && !is_dir_path(p))
        .cloned()
        .collect()
}

/// The source a run operates on. Constructed once per invocation; immutable
/// afterwards except for the memoized tree inside each variant.
pub enum Source {
    Local(LocalSource),
    Remote(RemoteSource),
    ChangeSet(ChangeSetSource),
}

#[async_trait]
impl FileSource for Source {
    async fn tree(&self) -> Result<Vec<String>, SourceError> {
        match self {
            Source::Local(s) => s.tree().await.cloned(),
            Source::Remote(s) => s.tree().await.cloned(),
            Source::ChangeSet(s) => s.tree().await,
        }
    }

    async fn all_files(&self) -> Result<Vec<String>, SourceError> {
        Ok(files_of(&self.tree().await?))
    }

    async fn expand_dir(&self, path: &str) -> Result<Vec<String>, SourceError> {
        Ok(descendants_of(&self.tree().await?, path))
    }

    fn is_dir(&self, path: &str) -> bool {
        is_dir_path(path)
    }

    fn is_excluded(&self, path: &str) -> bool {
        match self {
            Source::Local(s) => s.matcher().is_excluded(path),
            Source::Remote(s) => s.matcher().is_excluded(path),
            Source::ChangeSet(s) => s.matcher().is_excluded(path),
        }
    }

    async fn content(&self, path: &str) -> Result<Option<String>, SourceError> {
        match self {
            Source::Local(s) => s.content(path).await,
            Source::Remote(s) => s.content(path).await,
            Source::ChangeSet(s) => s.content(path).await,
        }
    }

    async fn picker_lines(&self) -> Result<Vec<String>, SourceError> {
        match self {
            Source::ChangeSet(s) => s.picker_lines().await,
            _ => self.tree().await,
        }
    }

    fn path_from_line(&self, line: &str) -> String {
        match self {
            Source::ChangeSet(s) => s.path_from_line(line),
            _ => line.to_string(),
        }
    }

    fn supplies_own_framing(&self) -> bool {
        match self {
            Source::ChangeSet(s) => s.supplies_own_framing(),
            _ => false,
        }
    }
}
