//! Concurrent content aggregation: fetch every selected path with bounded
//! parallelism, keep the buffer in selection order, enforce the oversize
//! policy, and hand the result to a sink.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::contract::{Confirm, Confirmation, FileSource, Sink};
use crate::source::ROOT_MARKER;

/// Buffers above this many lines require confirmation before delivery.
pub const MAX_LINES: usize = 10_000;
/// Upper bound on fetch workers regardless of core count.
pub const MAX_WORKERS: usize = 8;
/// Wall-clock budget for one aggregation's fetch phase.
pub const POOL_TIMEOUT: Duration = Duration::from_secs(120);

/// How many failed paths the error summary names before collapsing the rest.
const ERROR_SUMMARY_CAP: usize = 5;

/// Terminal state of a run. `Aborted` is a clean, user-chosen outcome.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    Aborted,
}

/// Fetch-phase result: completed blocks in selection order plus one
/// `(path, message)` pair per failed fetch.
#[derive(Debug)]
pub struct FetchReport {
    pub blocks: Vec<String>,
    pub failures: Vec<(String, String)>,
}

pub struct Aggregator<'a, S: FileSource + ?Sized> {
    source: &'a S,
    include_headers: bool,
    include_tree: bool,
    max_lines: usize,
    pool_timeout: Duration,
}

impl<'a, S: FileSource + ?Sized> Aggregator<'a, S> {
    pub fn new(source: &'a S, include_headers: bool, include_tree: bool) -> Self {
        Self {
            source,
            include_headers,
            include_tree,
            max_lines: MAX_LINES,
            pool_timeout: POOL_TIMEOUT,
        }
    }

    /// Override the oversize ceiling (tests exercise the policy with tiny
    /// buffers).
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines;
        self
    }

    pub fn with_pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = timeout;
        self
    }

    /// Fetch, assemble, negotiate size, deliver.
    pub async fn run(
        &self,
        paths: &[String],
        confirm: &dyn Confirm,
        sink: &dyn Sink,
    ) -> Result<Outcome> {
        // Memoized tree state must exist before workers fan out.
        let tree = self.source.tree().await?;
        let mut tree_section = if self.include_tree && !self.source.supplies_own_framing() {
            Some(with_header(&tree_body(&tree), "Tree"))
        } else {
            None
        };

        let fetched = self.fetch_all(paths).await;

        loop {
            let buffer = compose(tree_section.as_deref(), &fetched.blocks);
            let line_count = buffer.lines().count();
            if line_count <= self.max_lines {
                return self.deliver(&buffer, paths, sink);
            }

            // A one-shot offer: dropping the tree alone may fit the budget.
            if tree_section.is_some() {
                let without_tree = compose(None, &fetched.blocks);
                if without_tree.lines().count() <= self.max_lines {
                    let prompt = format!(
                        "Content is {line_count} lines (limit {}). Drop the tree section to fit?",
                        self.max_lines
                    );
                    if confirm.confirm(&prompt) == Confirmation::Proceed {
                        tree_section = None;
                        continue;
                    }
                }
            }

            let prompt = format!(
                "Content is {line_count} lines, over the {} line limit. Copy anyway?",
                self.max_lines
            );
            return match confirm.confirm(&prompt) {
                Confirmation::Proceed => self.deliver(&buffer, paths, sink),
                Confirmation::Abort => {
                    info!("delivery declined; nothing copied");
                    Ok(Outcome::Aborted)
                }
            };
        }
    }

    fn deliver(&self, buffer: &str, paths: &[String], sink: &dyn Sink) -> Result<Outcome> {
        sink.deliver(buffer, paths)?;
        info!(
            lines = buffer.lines().count(),
            files = paths.len(),
            "content delivered"
        );
        Ok(Outcome::Delivered)
    }

    /// One fetch task per path under a bounded pool. Results land in an
    /// index-keyed store so the output order is the selection order no matter
    /// which task finishes first; failures go to a shared collector and never
    /// interrupt the other tasks.
    pub async fn fetch_all(&self, paths: &[String]) -> FetchReport {
        let results: Arc<Mutex<Vec<Option<String>>>> =
            Arc::new(Mutex::new(vec![None; paths.len()]));
        let errors: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_WORKERS);
        debug!(files = paths.len(), workers = workers, "fetching content");

        let fetches = futures::stream::iter(paths.iter().cloned().enumerate()).for_each_concurrent(
            workers,
            |(index, path)| {
                let results = Arc::clone(&results);
                let errors = Arc::clone(&errors);
                async move {
                    match self.source.content(&path).await {
                        Ok(Some(body)) if !body.trim().is_empty() => {
                            let block = if self.include_headers {
                                with_header(&body, &path)
                            } else {
                                body
                            };
                            results.lock().expect("results store poisoned")[index] = Some(block);
                        }
                        Ok(_) => debug!(path = %path, "nothing to include"),
                        Err(e) => errors
                            .lock()
                            .expect("error collector poisoned")
                            .push((path, e.to_string())),
                    }
                }
            },
        );
        if tokio::time::timeout(self.pool_timeout, fetches).await.is_err() {
            warn!(
                timeout_secs = self.pool_timeout.as_secs(),
                "fetch pool timed out; using completed results"
            );
        }

        let failures = std::mem::take(&mut *errors.lock().expect("error collector poisoned"));
        summarize_errors(&failures);
        let blocks = {
            let mut store = results.lock().expect("results store poisoned");
            store.iter_mut().filter_map(Option::take).collect()
        };
        FetchReport { blocks, failures }
    }
}

fn summarize_errors(errors: &[(String, String)]) {
    if errors.is_empty() {
        return;
    }
    for (path, message) in errors.iter().take(ERROR_SUMMARY_CAP) {
        warn!(path = %path, error = %message, "fetch failed");
    }
    if errors.len() > ERROR_SUMMARY_CAP {
        warn!("... and {} more fetch failures", errors.len() - ERROR_SUMMARY_CAP);
    }
}

fn with_header(content: &str, title: &str) -> String {
    format!("==> {title} <==\n{content}")
}

/// `[tree-section?, file blocks]`, blank-line joined.
fn compose(tree_section: Option<&str>, blocks: &[String]) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(blocks.len() + 1);
    if let Some(tree) = tree_section {
        parts.push(tree);
    }
    parts.extend(blocks.iter().map(String::as_str));
    parts.join("\n\n")
}

/// The tree section body: every entry except the root marker.
fn tree_body(tree: &[String]) -> String {
    tree.iter()
        .filter(|p| p.as_str() != ROOT_MARKER)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_joins_with_blank_lines() {
        let blocks = vec!["a".to_string(), "b".to_string()];
        assert_eq!(compose(None, &blocks), "a\n\nb");
        assert_eq!(compose(Some("tree"), &blocks), "tree\n\na\n\nb");
    }

    #[test]
    fn header_names_the_path() {
        assert_eq!(with_header("body", "src/x.rs"), "==> src/x.rs <==\nbody");
    }
}
