//! Crash-recovery artifacts
//!
//! Every harvest gets its own directory, named with a fetch-scoped prefix.
//! Each active worker appends the raw records of every page it receives to
//! its own JSONL file (one page per line) and flushes after each write, so a
//! killed process leaves an auditable trail behind.
//!
//! Files are deleted when their worker finishes cleanly. The directory is
//! removed only when the whole harvest completed; after an error or
//! cancellation it stays on disk for manual recovery.

mod file;

pub use file::RecoveryFile;

use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};

/// Prefix shared by all recovery directories
pub const RECOVERY_PREFIX: &str = "arctic-harvest";

/// Directory holding one harvest's recovery files
#[derive(Debug, Clone)]
pub struct RecoveryDir {
    path: PathBuf,
}

impl RecoveryDir {
    /// Creates `<parent>/arctic-harvest-<fingerprint>-<timestamp>/`
    pub fn create(parent: &Path, fingerprint: &str) -> io::Result<Self> {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
        let path = parent.join(format!("{}-{}-{}", RECOVERY_PREFIX, fingerprint, stamp));
        std::fs::create_dir_all(&path)?;
        tracing::debug!("Recovery directory created: {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the append-only file for one worker
    pub fn create_file(&self, worker: &str) -> io::Result<RecoveryFile> {
        RecoveryFile::create(self.path.join(format!("{}.jsonl", worker)))
    }

    /// Removes the directory and anything left in it
    pub fn cleanup(self) -> io::Result<()> {
        tracing::debug!("Removing recovery directory {}", self.path.display());
        match std::fs::remove_dir_all(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_cleanup() {
        let parent = tempfile::tempdir().unwrap();
        let dir = RecoveryDir::create(parent.path(), "abc123").unwrap();
        let path = dir.path().to_path_buf();

        assert!(path.is_dir());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("arctic-harvest-abc123-"));

        let file = dir.create_file("segment-0").unwrap();
        assert!(file.path().starts_with(&path));
        drop(file);

        dir.cleanup().unwrap();
        assert!(!path.exists());
    }
}
