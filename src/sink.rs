//! Output sinks: system clipboard or a file.
//!
//! The file sink prepends the selected-path list as one JSON line so a later
//! change-set run can replay the exact selection via `--repeat`.

use std::io::Write;
use std::path::PathBuf;

use tracing::info;

use crate::contract::{Sink, SinkError};

pub struct ClipboardSink;

impl Sink for ClipboardSink {
    fn deliver(&self, buffer: &str, _paths: &[String]) -> Result<(), SinkError> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| SinkError::Clipboard(e.to_string()))?;
        clipboard
            .set_text(buffer.to_string())
            .map_err(|e| SinkError::Clipboard(e.to_string()))?;
        info!("buffer copied to clipboard");
        Ok(())
    }
}

pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Sink for FileSink {
    fn deliver(&self, buffer: &str, paths: &[String]) -> Result<(), SinkError> {
        let path_line = serde_json::to_string(paths)
            .map_err(|e| SinkError::Io(std::io::Error::other(e)))?;
        let mut file = std::fs::File::create(&self.path)?;
        writeln!(file, "{path_line}")?;
        file.write_all(buffer.as_bytes())?;
        info!(path = %self.path.display(), "buffer written to file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_writes_path_line_then_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        let sink = FileSink::new(target.clone());
        sink.deliver("body line", &["a.txt".to_string(), "b.txt".to_string()])
            .unwrap();

        let written = std::fs::read_to_string(&target).unwrap();
        let mut lines = written.lines();
        let first: Vec<String> = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(first, vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert_eq!(lines.next(), Some("body line"));
    }
}
