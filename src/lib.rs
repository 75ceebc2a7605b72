//! codeclip: select a handful of files and turn them into one formatted buffer.
//!
//! The pipeline is: a [`source::Source`] produces a file tree, the
//! [`selector::Selector`] turns an interactive pick into a concrete path list, and
//! the [`content::Aggregator`] fetches everything with bounded parallelism and
//! hands the assembled buffer to a sink (clipboard or file).
//!
//! All external collaborators (GitHub API, git, fd/rg, fzf, the confirmation
//! prompt, the sink) sit behind traits in [`contract`] so they can be mocked in
//! tests.

pub mod cli;
pub mod config;
pub mod content;
pub mod contract;
pub mod exclusion;
pub mod selector;
pub mod sink;
pub mod source;
pub mod toolcheck;
