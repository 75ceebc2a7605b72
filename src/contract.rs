//! Interfaces for every external collaborator the pipeline talks to.
//!
//! Each trait here has exactly one production implementation (reqwest client,
//! `git`/`fd`/`rg`/`fzf` subprocess wrappers, stdin prompt, clipboard/file sinks)
//! plus a generated `mockall` mock for tests. Data types shared between the
//! pipeline stages live here too, so dependents import them from one place.
//!
//! Error taxonomy (see also the per-variant docs):
//! - fatal preconditions (missing tool, unreachable host, no token) are raised as
//!   `anyhow` errors by constructors and abort the run;
//! - [`SourceError`] covers the recoverable per-item class: a failed fetch is
//!   logged and the item is dropped, it never aborts the run;
//! - user cancellations are ordinary values ([`PickOutcome::Cancelled`],
//!   [`Confirmation::Abort`]), not errors.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Per-item fetch/listing failure. Never fatal on its own.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("rate limited by the remote API")]
    RateLimited,
    #[error("remote API error: {0}")]
    Api(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("{tool} failed: {message}")]
    Tool { tool: &'static str, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Picker execution failure other than a user cancel.
#[derive(Debug, Error)]
pub enum PickError {
    #[error("failed to launch picker: {0}")]
    Spawn(String),
    #[error("picker exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },
}

/// Delivery failure at the output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("clipboard unavailable: {0}")]
    Clipboard(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of a confirmation prompt, modeled as a value so the oversize state
/// machine is a plain loop over an enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Proceed,
    Abort,
}

/// Outcome of an interactive pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Selected(Vec<String>),
    /// The user dismissed the picker (fzf exit 130). A clean, non-error outcome.
    Cancelled,
}

/// One entry of a recursive remote tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Tree,
}

/// The polymorphic file source: local tree, remote repository or VCS change set.
///
/// `tree()` is lazy and memoized per instance; callers that fan out work must
/// await it once before going parallel so no two tasks race the first
/// computation. Exclusion is applied inside `tree()`, so `expand_dir` and
/// `all_files` inherit it for free; `content` re-checks it and yields `None`
/// for excluded paths rather than erroring.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Ordered, duplicate-free path sequence, root marker first.
    async fn tree(&self) -> Result<Vec<String>, SourceError>;

    /// `tree()` minus directory entries (and the root marker).
    async fn all_files(&self) -> Result<Vec<String>, SourceError>;

    /// All non-directory descendants of `path`, exclusion-applied.
    async fn expand_dir(&self, path: &str) -> Result<Vec<String>, SourceError>;

    fn is_dir(&self, path: &str) -> bool;

    fn is_excluded(&self, path: &str) -> bool;

    /// Fetch one file. `Ok(None)` means "nothing to include" (excluded, binary,
    /// empty); `NotFound` is reserved for paths that genuinely do not resolve.
    async fn content(&self, path: &str) -> Result<Option<String>, SourceError>;

    /// Lines handed to the interactive picker. Identical to `tree()` except for
    /// change sets, which prefix each path with timestamps and a marker.
    async fn picker_lines(&self) -> Result<Vec<String>, SourceError>;

    /// Recover the bare path from one picker line.
    fn path_from_line(&self, line: &str) -> String;

    /// True when the source's own output framing replaces the tree section
    /// (change set in non-raw mode).
    fn supplies_own_framing(&self) -> bool;
}

/// Minimal slice of the GitHub REST API the remote source needs.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Eager reachability/authorization probe; also resolves the default branch.
    /// Implementations must surface connection failure, unauthorized and
    /// not-found as distinct [`SourceError`] variants.
    async fn default_branch(&self, repo: &str) -> Result<String, SourceError>;

    /// Recursive tree listing of `branch`.
    async fn tree_entries(&self, repo: &str, branch: &str) -> Result<Vec<TreeEntry>, SourceError>;

    /// Decoded file content. Must report rate limiting as
    /// [`SourceError::RateLimited`] so the caller can back off and retry.
    async fn file_content(&self, repo: &str, path: &str) -> Result<String, SourceError>;

    /// Paths of files matching `pattern` via the code-search endpoint.
    async fn search_paths(&self, repo: &str, pattern: &str) -> Result<Vec<String>, SourceError>;
}

/// VCS operations the change-set source is built from.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Vcs: Send + Sync {
    /// Merge base between HEAD and `reference`, as a full commit id.
    fn merge_base(&self, reference: &str) -> Result<String, SourceError>;

    /// Paths with status Added/Modified/Renamed relative to `base`.
    fn changed_paths(&self, base: &str) -> Result<Vec<String>, SourceError>;

    /// Untracked-but-not-ignored files.
    fn untracked_files(&self) -> Result<Vec<String>, SourceError>;

    /// Unix timestamp of the last commit touching `path`; `None` when the path
    /// was never committed.
    fn last_commit_timestamp(&self, path: &str) -> Result<Option<i64>, SourceError>;

    /// Whether `path` currently carries uncommitted changes.
    fn has_uncommitted_change(&self, path: &str) -> Result<bool, SourceError>;

    /// `git diff -U<context> <base> -- <path>`.
    fn diff_with_context(&self, base: &str, path: &str, context: u32)
        -> Result<String, SourceError>;
}

/// Full-tree enumeration and content search for the local source.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait FileLister: Send + Sync {
    /// Every file under the root, hidden files included, symlinks followed,
    /// with `excludes` already applied by the listing tool.
    fn list_files(&self, excludes: &[String]) -> Result<Vec<String>, SourceError>;

    /// Files whose content matches `pattern`.
    fn search_files(&self, pattern: &str) -> Result<Vec<String>, SourceError>;
}

/// The interactive picker (fzf in production).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Picker: Send + Sync {
    fn pick(&self, lines: &[String], multi: bool) -> Result<PickOutcome, PickError>;
}

/// A yes/no prompt. Declining is a value, not an error.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> Confirmation;
}

/// Where the final buffer goes. `paths` is the selected file list so file sinks
/// can persist it for later repeat runs.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Sink: Send + Sync {
    fn deliver(&self, buffer: &str, paths: &[String]) -> Result<(), SinkError>;
}
