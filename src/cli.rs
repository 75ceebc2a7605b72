//! Command-line surface and run orchestration.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use crate::config::Options;
use crate::content::{Aggregator, Outcome};
use crate::contract::{Confirm, Confirmation, Sink};
use crate::exclusion::ExclusionMatcher;
use crate::selector::{FzfPicker, Selection, Selector};
use crate::sink::{ClipboardSink, FileSink};
use crate::source::changeset::DEFAULT_CONTEXT_LINES;
use crate::source::{ChangeSetSource, LocalSource, RemoteSource, Source};

/// Select files, aggregate their contents, copy the result.
#[derive(Parser, Debug)]
#[clap(
    name = "codeclip",
    version,
    about = "Pick files from a local tree, a GitHub repo or a git change set and copy them as one buffer"
)]
pub struct Cli {
    /// GitHub repository (owner/name or URL); omit for the local tree
    #[clap(short, long)]
    pub repo: Option<String>,

    /// GitHub token; defaults to GITHUB_TOKEN, then `gh auth token`
    #[clap(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Only include files whose content matches this pattern
    #[clap(short, long)]
    pub grep: Option<String>,

    /// Exclusion glob; repeatable; merged with built-in defaults
    #[clap(short = 'x', long = "exclude")]
    pub exclude: Vec<String>,

    /// Prepend the file tree to the copied content
    #[clap(short = 't', long)]
    pub with_tree: bool,

    /// Omit the `==> path <==` header above each file
    #[clap(long)]
    pub no_header: bool,

    /// Change-set mode: files changed since the merge base with --base
    #[clap(short, long)]
    pub diff: bool,

    /// Reference branch for change-set mode
    #[clap(long, default_value = "main")]
    pub base: String,

    /// Diff context lines in change-set mode
    #[clap(long, default_value_t = DEFAULT_CONTEXT_LINES)]
    pub context: u32,

    /// Change-set mode: raw file contents, no diff framing
    #[clap(long)]
    pub raw: bool,

    /// Replay the selection saved by a previous --output run
    #[clap(long)]
    pub repeat: Option<PathBuf>,

    /// Write to this file (with a replayable path-list header) instead of the clipboard
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn into_options(self) -> Options {
        Options {
            repo: self.repo,
            token: self.token,
            grep: self.grep,
            exclude: self.exclude,
            include_headers: !self.no_header,
            include_tree: self.with_tree,
            diff_base: (self.diff || self.repeat.is_some()).then_some(self.base),
            context_lines: self.context,
            raw: self.raw,
            repeat_file: self.repeat,
            output: self.output,
        }
    }
}

/// Extracted async entrypoint, shared by `main` and the integration tests.
/// Clean user terminations (cancel, decline, empty tree) return `Ok`.
pub async fn run(options: Options) -> Result<()> {
    options.trace_loaded();

    let source = build_source(&options).await?;
    let confirm = StdinConfirm;
    let selector = Selector::new(&source, Box::new(FzfPicker::new()?), &confirm);

    let paths = match selector.select().await? {
        Selection::Chosen(paths) => paths,
        Selection::Empty | Selection::Cancelled => return Ok(()),
    };

    let sink: Box<dyn Sink> = match &options.output {
        Some(path) => Box::new(FileSink::new(path.clone())),
        None => Box::new(ClipboardSink),
    };

    let aggregator = Aggregator::new(&source, options.include_headers, options.include_tree);
    match aggregator.run(&paths, &confirm, sink.as_ref()).await? {
        Outcome::Delivered => {}
        Outcome::Aborted => info!("run aborted by user"),
    }
    Ok(())
}

async fn build_source(options: &Options) -> Result<Source> {
    let matcher = ExclusionMatcher::new(&options.exclude)?;
    if options.changeset_mode() {
        info!("change-set mode");
        let base = options
            .diff_base
            .clone()
            .unwrap_or_else(|| "main".to_string());
        return Ok(Source::ChangeSet(ChangeSetSource::new(
            base,
            options.context_lines,
            options.raw,
            options.repeat_file.clone(),
            matcher,
        )?));
    }
    if let Some(repo) = &options.repo {
        info!(repo = %repo, "GitHub mode");
        return Ok(Source::Remote(
            RemoteSource::connect(
                repo,
                options.token.clone(),
                options.grep.clone(),
                matcher,
            )
            .await?,
        ));
    }
    info!("local mode");
    Ok(Source::Local(LocalSource::new(
        options.grep.clone(),
        matcher,
    )?))
}

/// y/N prompt on the controlling terminal.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> Confirmation {
        eprint!("{prompt} (y/N) ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return Confirmation::Abort;
        }
        if answer.trim().eq_ignore_ascii_case("y") {
            Confirmation::Proceed
        } else {
            Confirmation::Abort
        }
    }
}
