//! Local working-tree source.
//!
//! Tree enumeration is delegated to `fd` (hidden files on, symlinks followed,
//! exclusion patterns passed through); when a content filter is set the listing
//! comes from `rg --files-with-matches` instead and exclusion is applied
//! afterwards. Content is read straight from disk.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use tokio::sync::OnceCell;
use tracing::{debug, error};

use crate::contract::{FileLister, SourceError};
use crate::exclusion::ExclusionMatcher;
use crate::source::{assemble_tree, ROOT_MARKER};
use crate::toolcheck;

pub struct LocalSource {
    lister: Box<dyn FileLister>,
    root: PathBuf,
    grep: Option<String>,
    matcher: ExclusionMatcher,
    tree: OnceCell<Vec<String>>,
}

impl LocalSource {
    /// Construct against the current working directory. Missing `fd` (or `rg`
    /// when a content filter is set) is fatal here, not per call.
    pub fn new(grep: Option<String>, matcher: ExclusionMatcher) -> Result<Self> {
        let root = std::env::current_dir()?;
        let lister = FdLister::new(&root, grep.is_some())?;
        Ok(Self::with_lister(Box::new(lister), root, grep, matcher))
    }

    /// Inject a lister; used by tests and by `new`.
    pub fn with_lister(
        lister: Box<dyn FileLister>,
        root: PathBuf,
        grep: Option<String>,
        matcher: ExclusionMatcher,
    ) -> Self {
        Self {
            lister,
            root,
            grep,
            matcher,
            tree: OnceCell::new(),
        }
    }

    pub fn matcher(&self) -> &ExclusionMatcher {
        &self.matcher
    }

    /// Lazy, memoized tree. Listing failures degrade to an empty tree so the
    /// selector can report "no matching files" instead of aborting.
    pub async fn tree(&self) -> Result<&Vec<String>, SourceError> {
        self.tree
            .get_or_try_init(|| async {
                let listing = match &self.grep {
                    // Content filter first, exclusion second.
                    Some(pattern) => self.lister.search_files(pattern),
                    None => self.lister.list_files(self.matcher.patterns()),
                };
                let files = match listing {
                    Ok(files) => files,
                    Err(e) => {
                        error!(error = %e, "local listing failed; continuing with empty tree");
                        Vec::new()
                    }
                };
                debug!(files = files.len(), "local listing complete");
                Ok(assemble_tree(files, &self.matcher))
            })
            .await
    }

    pub async fn content(&self, path: &str) -> Result<Option<String>, SourceError> {
        if path == ROOT_MARKER || self.matcher.is_excluded(path) {
            return Ok(None);
        }
        match std::fs::read_to_string(self.root.join(path)) {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(path.to_string()))
            }
            Err(e) => Err(SourceError::Io(e)),
        }
    }
}

/// Production lister: `fd` for enumeration, `rg` for the content filter.
pub struct FdLister {
    fd: PathBuf,
    rg: Option<PathBuf>,
    root: PathBuf,
}

impl FdLister {
    pub fn new(root: &Path, needs_search: bool) -> Result<Self> {
        let fd = toolcheck::require("fd")?;
        let rg = if needs_search {
            Some(toolcheck::require("rg")?)
        } else {
            None
        };
        Ok(Self {
            fd,
            rg,
            root: root.to_path_buf(),
        })
    }

    fn run(&self, program: &Path, args: &[String]) -> Result<Vec<String>, SourceError> {
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| SourceError::Tool {
                tool: "fd/rg",
                message: e.to_string(),
            })?;
        // rg exits 1 on "no matches"; that is an empty listing, not a failure.
        if !output.status.success() && output.status.code() != Some(1) {
            return Err(SourceError::Tool {
                tool: "fd/rg",
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

impl FileLister for FdLister {
    fn list_files(&self, excludes: &[String]) -> Result<Vec<String>, SourceError> {
        let mut args: Vec<String> = vec![
            "--type".into(),
            "file".into(),
            "--hidden".into(),
            "--follow".into(),
            "--strip-cwd-prefix".into(),
        ];
        for pattern in excludes {
            args.push("--exclude".into());
            args.push(pattern.clone());
        }
        self.run(&self.fd, &args)
    }

    fn search_files(&self, pattern: &str) -> Result<Vec<String>, SourceError> {
        let rg = self.rg.as_ref().ok_or(SourceError::Tool {
            tool: "fd/rg",
            message: "content search requested without rg".into(),
        })?;
        let args: Vec<String> = vec![
            "--files-with-matches".into(),
            "--hidden".into(),
            "--follow".into(),
            "--glob".into(),
            "!.git/".into(),
            pattern.to_string(),
        ];
        self.run(rg, &args)
    }
}
