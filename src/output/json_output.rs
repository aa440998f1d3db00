//! JSON file sink
//!
//! Writes one JSON object keyed by record id, in first-seen order.

use crate::crawler::HarvestOutcome;
use crate::output::traits::{OutputResult, SaveSink};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Saves harvests as a pretty-printed JSON object
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SaveSink for JsonFileSink {
    fn save(&mut self, outcome: &HarvestOutcome) -> OutputResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(&mut writer, &outcome.records.to_json())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        tracing::info!(
            "Saved {} records to {}",
            outcome.records.len(),
            self.path.display()
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("JSON file {}", self.path.display())
    }
}
