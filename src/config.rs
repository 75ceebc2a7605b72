//! The value surface the core consumes, decoupled from flag syntax.

use std::path::PathBuf;

use tracing::debug;

use crate::source::changeset::DEFAULT_CONTEXT_LINES;

/// Everything a run needs, already parsed and defaulted.
#[derive(Debug, Clone)]
pub struct Options {
    /// Remote repository identifier, raw; normalized before any API call.
    pub repo: Option<String>,
    /// Explicit access token; falls back to the `gh` credential helper.
    pub token: Option<String>,
    /// Content filter: only files matching this pattern enter the tree.
    pub grep: Option<String>,
    /// User exclusion patterns, merged with the built-in defaults.
    pub exclude: Vec<String>,
    pub include_headers: bool,
    pub include_tree: bool,
    /// Change-set mode against this reference branch.
    pub diff_base: Option<String>,
    pub context_lines: u32,
    pub raw: bool,
    /// Replay the path list saved by a previous file-sink run.
    pub repeat_file: Option<PathBuf>,
    /// Write to this file instead of the clipboard.
    pub output: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            repo: None,
            token: None,
            grep: None,
            exclude: Vec::new(),
            include_headers: true,
            include_tree: false,
            diff_base: None,
            context_lines: DEFAULT_CONTEXT_LINES,
            raw: false,
            repeat_file: None,
            output: None,
        }
    }
}

impl Options {
    pub fn changeset_mode(&self) -> bool {
        self.diff_base.is_some() || self.repeat_file.is_some()
    }

    /// The token never enters the log stream.
    pub fn trace_loaded(&self) {
        debug!(
            repo = ?self.repo,
            grep = ?self.grep,
            excludes = self.exclude.len(),
            tree = self.include_tree,
            headers = self.include_headers,
            diff_base = ?self.diff_base,
            raw = self.raw,
            repeat = ?self.repeat_file,
            output = ?self.output,
            "options loaded"
        );
    }
}
