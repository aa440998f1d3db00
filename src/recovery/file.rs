use crate::record::Record;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only JSONL file owned by one worker
#[derive(Debug)]
pub struct RecoveryFile {
    path: PathBuf,
    file: File,
    pages: usize,
}

impl RecoveryFile {
    pub(crate) fn create(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!("Recovery file created: {}", path.display());
        Ok(Self {
            path,
            file,
            pages: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pages written so far
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Appends one page as a single JSON line and flushes it to disk
    pub fn append_page(&mut self, records: &[Record]) -> io::Result<()> {
        let line = serde_json::to_string(records)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        self.pages += 1;
        Ok(())
    }

    /// Deletes the file after a clean finish
    pub fn discard(self) -> io::Result<()> {
        let RecoveryFile { path, file, .. } = self;
        drop(file);
        tracing::debug!("Cleaning up recovery file {}", path.display());
        std::fs::remove_file(&path)
    }

    /// Closes the file and leaves it on disk
    pub fn retain(self) -> PathBuf {
        tracing::warn!(
            "Keeping recovery file {} ({} pages)",
            self.path.display(),
            self.pages
        );
        self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::test_record;
    use serde_json::json;

    #[test]
    fn test_append_writes_one_line_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = RecoveryFile::create(dir.path().join("w.jsonl")).unwrap();

        file.append_page(&[test_record(json!({"id": "a"}))]).unwrap();
        file.append_page(&[
            test_record(json!({"id": "b"})),
            test_record(json!({"id": "c"})),
        ])
        .unwrap();
        assert_eq!(file.pages(), 2);

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: Vec<serde_json::Value> = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.len(), 2);

        let path = file.retain();
        assert!(path.exists());
    }

    #[test]
    fn test_discard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = RecoveryFile::create(dir.path().join("w.jsonl")).unwrap();
        let path = file.path().to_path_buf();
        file.discard().unwrap();
        assert!(!path.exists());
    }
}
