//! Interactive selection: turn a picked subset of tree lines into a concrete,
//! deduplicated file list.

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::Result;
use tracing::{debug, info};

use crate::contract::{Confirm, Confirmation, FileSource, PickError, PickOutcome, Picker};
use crate::source::ROOT_MARKER;
use crate::toolcheck;

/// Above this many files, selection requires confirmation.
pub const MAX_FILES: usize = 20;

/// fzf's exit status for a user dismissal (ESC / ctrl-c).
const FZF_CANCELLED: i32 = 130;

/// Result of a selection round. `Empty` and `Cancelled` are clean, non-error
/// terminations: nothing gets fetched or delivered.
#[derive(Debug, PartialEq, Eq)]
pub enum Selection {
    Chosen(Vec<String>),
    Empty,
    Cancelled,
}

pub struct Selector<'a, S: FileSource + ?Sized> {
    source: &'a S,
    picker: Box<dyn Picker>,
    confirm: &'a dyn Confirm,
}

impl<'a, S: FileSource + ?Sized> Selector<'a, S> {
    pub fn new(source: &'a S, picker: Box<dyn Picker>, confirm: &'a dyn Confirm) -> Self {
        Self {
            source,
            picker,
            confirm,
        }
    }

    pub async fn select(&self) -> Result<Selection> {
        let lines = self.source.picker_lines().await?;
        if lines.len() <= 1 {
            info!("no matching files; skipping selection");
            return Ok(Selection::Empty);
        }

        debug!(lines = lines.len(), "running picker");
        let picked = match self.picker.pick(&lines, true)? {
            PickOutcome::Cancelled => {
                info!("selection cancelled");
                return Ok(Selection::Cancelled);
            }
            PickOutcome::Selected(picked) => picked,
        };

        let paths = self.expand(picked).await?;
        info!(files = paths.len(), "selection resolved");

        if paths.len() > MAX_FILES {
            let prompt = format!(
                "Selected {} files (more than {MAX_FILES}). Continue?",
                paths.len()
            );
            if self.confirm.confirm(&prompt) == Confirmation::Abort {
                info!("selection declined by user");
                return Ok(Selection::Cancelled);
            }
        }
        Ok(Selection::Chosen(paths))
    }

    /// Root marker short-circuits to every file; directories expand to their
    /// file descendants; duplicates collapse, first occurrence wins.
    async fn expand(&self, picked: Vec<String>) -> Result<Vec<String>> {
        let picked: Vec<String> = picked
            .iter()
            .map(|line| self.source.path_from_line(line))
            .collect();

        if picked.iter().any(|p| p == ROOT_MARKER) {
            return Ok(self.source.all_files().await?);
        }

        let mut seen = std::collections::HashSet::new();
        let mut paths = Vec::new();
        for item in picked {
            if self.source.is_dir(&item) {
                for descendant in self.source.expand_dir(&item).await? {
                    if seen.insert(descendant.clone()) {
                        paths.push(descendant);
                    }
                }
            } else if seen.insert(item.clone()) {
                paths.push(item);
            }
        }
        Ok(paths)
    }
}

/// Production picker: fzf with a piped newline-delimited list.
pub struct FzfPicker;

impl FzfPicker {
    /// A missing fzf binary is fatal at construction.
    pub fn new() -> Result<Self> {
        toolcheck::require("fzf")?;
        Ok(Self)
    }
}

impl Picker for FzfPicker {
    fn pick(&self, lines: &[String], multi: bool) -> Result<PickOutcome, PickError> {
        let mut command = Command::new("fzf");
        if multi {
            command.arg("--multi");
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| PickError::Spawn(e.to_string()))?;

        let input = lines.join("\n");
        if let Some(stdin) = child.stdin.as_mut() {
            // fzf closing its end early (user picked before we finished
            // writing) is not an error.
            let _ = stdin.write_all(input.as_bytes());
        }
        let output = child
            .wait_with_output()
            .map_err(|e| PickError::Spawn(e.to_string()))?;

        if output.status.success() {
            let selected = String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(|l| l.to_string())
                .filter(|l| !l.is_empty())
                .collect();
            return Ok(PickOutcome::Selected(selected));
        }
        match output.status.code() {
            Some(FZF_CANCELLED) => Ok(PickOutcome::Cancelled),
            code => Err(PickError::Failed {
                status: code.unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}
