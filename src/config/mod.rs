//! Configuration module for Arctic-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and turns a validated configuration into the immutable [`FetchSettings`]
//! consumed by the fetch engine.
//!
//! # Example
//!
//! ```no_run
//! use arctic_harvest::config::{build_settings, load_config};
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! let settings = build_settings(&config).unwrap();
//! println!("Fetching {} with {} workers", settings.endpoint, settings.workers);
//! ```

mod parser;
mod settings;
mod types;
mod validation;

// Re-export types
pub use settings::{
    DuplicatePolicy, Endpoint, FetchSettings, PageQuery, COMMENT_TREE_LIMIT,
};
pub use types::{
    Config, EngineConfig, OutputConfig, OutputFormat, ProviderConfig, RequestConfig, TimeBound,
};

// Re-export parser and validation functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::{build_settings, parse_time_bound, validate};
