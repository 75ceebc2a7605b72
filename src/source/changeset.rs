//! Change-set source: the files touched since the merge base with a reference
//! branch, plus untracked files, most-recent-and-most-relevant first.
//!
//! Content here is diff-aware: paths in the changed set are emitted in full,
//! anything else gets only a contextual diff, and a freshly-added file's diff is
//! truncated after its `new file mode` header so brand-new files are not dumped
//! twice. A previously-saved path list (`--repeat`) can stand in for live VCS
//! discovery.

use std::path::PathBuf;
use std::process::Command;
use std::time::UNIX_EPOCH;

use anyhow::Result;
use chrono::{Local, TimeZone};
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::contract::{SourceError, Vcs};
use crate::exclusion::ExclusionMatcher;
use crate::source::ROOT_MARKER;
use crate::toolcheck;

/// Context lines for the per-file diff.
pub const DEFAULT_CONTEXT_LINES: u32 = 15;

/// One file of the change set, with the keys its ordering is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub path: String,
    /// Last commit touching the path; `None` for never-committed files.
    pub commit_ts: Option<i64>,
    /// Filesystem mtime, seconds since the epoch.
    pub file_ts: i64,
    pub has_uncommitted_change: bool,
    pub is_new: bool,
}

struct ChangeSet {
    merge_base: String,
    entries: Vec<ChangeEntry>,
}

pub struct ChangeSetSource {
    vcs: Box<dyn Vcs>,
    base_ref: String,
    context_lines: u32,
    raw: bool,
    repeat_file: Option<PathBuf>,
    matcher: ExclusionMatcher,
    cache: OnceCell<ChangeSet>,
}

impl ChangeSetSource {
    /// Construct against the repository in the current directory. A missing
    /// `git` binary is fatal here.
    pub fn new(
        base_ref: String,
        context_lines: u32,
        raw: bool,
        repeat_file: Option<PathBuf>,
        matcher: ExclusionMatcher,
    ) -> Result<Self> {
        toolcheck::require("git")?;
        Ok(Self::with_vcs(
            Box::new(GitCli),
            base_ref,
            context_lines,
            raw,
            repeat_file,
            matcher,
        ))
    }

    /// Inject a VCS implementation; used by tests and by `new`.
    pub fn with_vcs(
        vcs: Box<dyn Vcs>,
        base_ref: String,
        context_lines: u32,
        raw: bool,
        repeat_file: Option<PathBuf>,
        matcher: ExclusionMatcher,
    ) -> Self {
        Self {
            vcs,
            base_ref,
            context_lines,
            raw,
            repeat_file,
            matcher,
            cache: OnceCell::new(),
        }
    }

    pub fn matcher(&self) -> &ExclusionMatcher {
        &self.matcher
    }

    /// Non-raw change sets carry their own diff framing, so the aggregator's
    /// tree section is suppressed.
    pub fn supplies_own_framing(&self) -> bool {
        !self.raw
    }

    async fn change_set(&self) -> Result<&ChangeSet, SourceError> {
        self.cache
            .get_or_try_init(|| async {
                let merge_base = self.vcs.merge_base(&self.base_ref)?;
                let paths = match &self.repeat_file {
                    Some(file) => load_repeat_list(file)?,
                    None => {
                        let mut paths = self.vcs.changed_paths(&merge_base)?;
                        paths.extend(self.vcs.untracked_files()?);
                        paths
                    }
                };
                let mut entries = Vec::new();
                for path in dedup_in_order(paths) {
                    if self.matcher.is_excluded(&path) {
                        continue;
                    }
                    entries.push(self.build_entry(path));
                }
                sort_entries(&mut entries);
                debug!(files = entries.len(), base = %merge_base, "change set built");
                Ok(ChangeSet {
                    merge_base,
                    entries,
                })
            })
            .await
    }

    /// Timestamp lookups degrade to "absent"/epoch; only merge-base discovery
    /// can fail the build.
    fn build_entry(&self, path: String) -> ChangeEntry {
        let commit_ts = self.vcs.last_commit_timestamp(&path).unwrap_or_else(|e| {
            warn!(path = %path, error = %e, "commit timestamp lookup failed");
            None
        });
        let file_ts = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let has_uncommitted_change = self.vcs.has_uncommitted_change(&path).unwrap_or(false);
        ChangeEntry {
            is_new: commit_ts.is_none(),
            path,
            commit_ts,
            file_ts,
            has_uncommitted_change,
        }
    }

    pub async fn tree(&self) -> Result<Vec<String>, SourceError> {
        let set = self.change_set().await?;
        let mut tree = Vec::with_capacity(set.entries.len() + 1);
        tree.push(ROOT_MARKER.to_string());
        tree.extend(set.entries.iter().map(|e| e.path.clone()));
        Ok(tree)
    }

    pub async fn picker_lines(&self) -> Result<Vec<String>, SourceError> {
        let set = self.change_set().await?;
        let mut lines = Vec::with_capacity(set.entries.len() + 1);
        lines.push(ROOT_MARKER.to_string());
        lines.extend(set.entries.iter().map(format_picker_line));
        Ok(lines)
    }

    pub fn path_from_line(&self, line: &str) -> String {
        extract_path(line)
    }

    pub async fn content(&self, path: &str) -> Result<Option<String>, SourceError> {
        if path == ROOT_MARKER || self.matcher.is_excluded(path) {
            return Ok(None);
        }
        if binary_extension(path) {
            debug!(path = path, "skipping binary-looking file");
            return Ok(None);
        }
        let set = self.change_set().await?;
        let in_set = set.entries.iter().any(|e| e.path == path);

        let mut parts: Vec<String> = Vec::new();
        if in_set {
            match std::fs::read_to_string(path) {
                Ok(body) if !body.trim().is_empty() => parts.push(body),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(SourceError::NotFound(path.to_string()))
                }
                Err(e) => return Err(SourceError::Io(e)),
            }
        } else {
            parts.push(format!(
                "[full content skipped; showing diff against {} with {} context lines]",
                self.base_ref, self.context_lines
            ));
        }

        if !self.raw {
            let diff = self
                .vcs
                .diff_with_context(&set.merge_base, path, self.context_lines)?;
            let diff = truncate_new_file_diff(&diff);
            if !diff.trim().is_empty() {
                parts.push(format!(
                    "==> diff vs {} (context: {}) <==\n{}",
                    self.base_ref, self.context_lines, diff
                ));
            }
        }

        if parts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(parts.join("\n")))
        }
    }
}

fn dedup_in_order(paths: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    paths
        .into_iter()
        .filter(|p| !p.is_empty() && seen.insert(p.clone()))
        .collect()
}

/// Changed-first, then most recent by commit (or file) timestamp, then most
/// recent by file timestamp.
fn sort_entries(entries: &mut [ChangeEntry]) {
    entries.sort_by_key(|e| {
        (
            !e.has_uncommitted_change,
            -(e.commit_ts.unwrap_or(e.file_ts)),
            -e.file_ts,
        )
    });
}

fn format_ts(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0).single() {
        Some(t) => t.format("%m-%d %H:%M").to_string(),
        None => "—".to_string(),
    }
}

/// Fixed-format picker line: `(C:<commit> | U:<mtime>) <path>[ [new]|[mod]]`.
fn format_picker_line(entry: &ChangeEntry) -> String {
    let commit = match entry.commit_ts {
        Some(ts) => format_ts(ts),
        None => "never".to_string(),
    };
    let marker = if entry.is_new {
        " [new]"
    } else if entry.has_uncommitted_change {
        " [mod]"
    } else {
        ""
    };
    format!(
        "(C:{commit} | U:{updated}) {path}{marker}",
        updated = format_ts(entry.file_ts),
        path = entry.path
    )
}

/// Recover the bare path from a picker line; non-matching lines pass through.
fn extract_path(line: &str) -> String {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"^\(C:[^)]*\) (.*?)(?: \[(?:new|mod)\])?$").expect("valid picker-line pattern")
    });
    match re.captures(line) {
        Some(caps) => caps[1].to_string(),
        None => line.to_string(),
    }
}

fn binary_extension(path: &str) -> bool {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\.(png|jpe?g|gif|pdf|ico|woff2?|ttf|eot|svg|zip|gz|tar|mp[34]|wav|docx?)$")
            .expect("valid extension pattern")
    });
    re.is_match(path)
}

/// If the diff marks the file as newly added, keep only the header lines up to
/// and including the `new file mode` marker.
fn truncate_new_file_diff(diff: &str) -> String {
    if !diff.lines().any(|l| l.starts_with("new file mode")) {
        return diff.to_string();
    }
    let mut kept: Vec<&str> = Vec::new();
    for line in diff.lines() {
        kept.push(line);
        if line.starts_with("new file mode") {
            break;
        }
    }
    let mut out = kept.join("\n");
    out.push('\n');
    out
}

/// First line of a previous run's output file: a JSON array of paths.
fn load_repeat_list(file: &PathBuf) -> Result<Vec<String>, SourceError> {
    let body = std::fs::read_to_string(file)?;
    let first_line = body.lines().next().unwrap_or_default();
    serde_json::from_str(first_line).map_err(|e| SourceError::Tool {
        tool: "repeat-file",
        message: format!("first line of {} is not a JSON path list: {e}", file.display()),
    })
}

/// Production VCS collaborator: the `git` CLI in the current directory.
pub struct GitCli;

impl GitCli {
    fn run(args: &[&str]) -> Result<String, SourceError> {
        let output = Command::new("git")
            .args(args)
            .output()
            .map_err(|e| SourceError::Tool {
                tool: "git",
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(SourceError::Tool {
                tool: "git",
                message: format!(
                    "git {} failed: {}",
                    args.first().unwrap_or(&""),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Vcs for GitCli {
    fn merge_base(&self, reference: &str) -> Result<String, SourceError> {
        let out = Self::run(&["merge-base", "HEAD", reference])?;
        let base = out.trim().to_string();
        if base.len() != 40 || !base.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SourceError::Tool {
                tool: "git",
                message: format!("could not find a merge base with {reference}"),
            });
        }
        Ok(base)
    }

    fn changed_paths(&self, base: &str) -> Result<Vec<String>, SourceError> {
        let out = Self::run(&["diff", "--name-status", base])?;
        Ok(out
            .lines()
            .filter(|l| matches!(l.chars().next(), Some('A' | 'M' | 'R')))
            .filter_map(|l| l.split('\t').next_back())
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect())
    }

    fn untracked_files(&self) -> Result<Vec<String>, SourceError> {
        let out = Self::run(&["ls-files", "--others", "--exclude-standard"])?;
        Ok(out
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn last_commit_timestamp(&self, path: &str) -> Result<Option<i64>, SourceError> {
        let out = Self::run(&["log", "-1", "--format=%ct", "--", path])?;
        let trimmed = out.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse::<i64>()
            .map(Some)
            .map_err(|e| SourceError::Tool {
                tool: "git",
                message: format!("unparseable commit timestamp for {path}: {e}"),
            })
    }

    fn has_uncommitted_change(&self, path: &str) -> Result<bool, SourceError> {
        let out = Self::run(&["diff", "--name-only", "--", path])?;
        Ok(out.lines().any(|l| l.trim() == path))
    }

    fn diff_with_context(
        &self,
        base: &str,
        path: &str,
        context: u32,
    ) -> Result<String, SourceError> {
        Self::run(&[
            "diff",
            &format!("-U{context}"),
            base,
            "--",
            path,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, commit_ts: Option<i64>, file_ts: i64, changed: bool) -> ChangeEntry {
        ChangeEntry {
            path: path.to_string(),
            commit_ts,
            file_ts,
            has_uncommitted_change: changed,
            is_new: commit_ts.is_none(),
        }
    }

    #[test]
    fn ordering_is_changed_first_then_most_recent() {
        let mut entries = vec![
            entry("old_committed.rs", Some(100), 100, false),
            entry("new_untracked.rs", None, 300, false),
            entry("changed_recent.rs", Some(200), 400, true),
            entry("changed_older.rs", Some(150), 150, true),
        ];
        sort_entries(&mut entries);
        let order: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "changed_recent.rs",
                "changed_older.rs",
                "new_untracked.rs",
                "old_committed.rs"
            ]
        );
    }

    #[test]
    fn commit_timestamp_breaks_ties_before_file_timestamp() {
        let mut entries = vec![
            entry("a.rs", Some(100), 500, false),
            entry("b.rs", Some(100), 600, false),
        ];
        sort_entries(&mut entries);
        assert_eq!(entries[0].path, "b.rs");
    }

    #[test]
    fn picker_line_round_trips_the_path() {
        for e in [
            entry("src/lib.rs", Some(1_700_000_000), 1_700_000_100, true),
            entry("notes with spaces.md", None, 1_700_000_100, false),
            entry("plain.rs", Some(1_700_000_000), 1_700_000_100, false),
        ] {
            let line = format_picker_line(&e);
            assert_eq!(extract_path(&line), e.path, "line: {line}");
        }
    }

    #[test]
    fn plain_lines_pass_through_extraction() {
        assert_eq!(extract_path("./"), "./");
        assert_eq!(extract_path("src/main.rs"), "src/main.rs");
    }

    #[test]
    fn new_file_diff_is_truncated_after_the_mode_line() {
        let diff = "diff --git a/new.rs b/new.rs\n\
                    new file mode 100644\n\
                    index 0000000..e69de29\n\
                    --- /dev/null\n\
                    +++ b/new.rs\n\
                    @@ -0,0 +1,2 @@\n\
                    +fn main() {}\n\
                    +\n";
        let truncated = truncate_new_file_diff(diff);
        assert_eq!(truncated, "diff --git a/new.rs b/new.rs\nnew file mode 100644\n");
    }

    #[test]
    fn modified_file_diff_is_untouched() {
        let diff = "diff --git a/x b/x\nindex 1..2 100644\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n";
        assert_eq!(truncate_new_file_diff(diff), diff);
    }

    #[test]
    fn binary_extensions_are_detected_case_insensitively() {
        assert!(binary_extension("logo.PNG"));
        assert!(binary_extension("doc.pdf"));
        assert!(binary_extension("font.woff2"));
        assert!(!binary_extension("main.rs"));
        assert!(!binary_extension("png_notes.txt"));
    }

    #[test]
    fn dedup_preserves_first_occurrence_order() {
        let paths = vec![
            "b.rs".to_string(),
            "a.rs".to_string(),
            "b.rs".to_string(),
            String::new(),
        ];
        assert_eq!(dedup_in_order(paths), vec!["b.rs".to_string(), "a.rs".to_string()]);
    }
}
