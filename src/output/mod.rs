//! Output module for persisting harvest results
//!
//! This module handles:
//! - Saving deduplicated records as a JSON file or into SQLite
//! - Collecting and printing harvest statistics

mod json_output;
mod sqlite_output;
pub mod stats;
mod traits;

pub use json_output::JsonFileSink;
pub use sqlite_output::SqliteSink;
pub use stats::{print_statistics, HarvestStats};
pub use traits::{OutputError, OutputResult, SaveSink};

use crate::config::{Endpoint, OutputConfig, OutputFormat};
use std::path::Path;

/// Opens the sink selected by the output configuration
///
/// # Arguments
///
/// * `config` - The output section of the configuration
/// * `config_hash` - Recorded by sinks that keep run metadata
/// * `endpoint` - Endpoint the harvest targets
pub fn open_sink(
    config: &OutputConfig,
    config_hash: &str,
    endpoint: Endpoint,
) -> OutputResult<Box<dyn SaveSink>> {
    let path = Path::new(&config.path);
    let sink: Box<dyn SaveSink> = match config.format {
        OutputFormat::Json => Box::new(JsonFileSink::new(path)),
        OutputFormat::Sqlite => Box::new(SqliteSink::open(path, config_hash, endpoint)?),
    };
    Ok(sink)
}
