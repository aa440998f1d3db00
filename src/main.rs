//! Arctic-Harvest main entry point
//!
//! This is the command-line interface for the Arctic-Harvest archive crawler.

use anyhow::{Context, Result};
use arctic_harvest::config::{build_settings, load_config_with_hash, Config};
use arctic_harvest::crawler::harvester_from_config;
use arctic_harvest::output::{open_sink, print_statistics};
use arctic_harvest::{FetchSettings, Shutdown};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Arctic-Harvest: a resilient Reddit archive crawler
///
/// Arctic-Harvest retrieves every post or comment matching a query from a
/// rate-limited archive API, splitting long time ranges across workers,
/// resolving duplicates and optionally fetching each post's comment tree.
#[derive(Parser, Debug)]
#[command(name = "arctic-harvest")]
#[command(version)]
#[command(about = "A resilient Reddit archive crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be fetched without fetching
    #[arg(long, conflicts_with = "check")]
    dry_run: bool,

    /// Validate config and exit
    #[arg(long, conflicts_with = "dry_run")]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let settings = build_settings(&config).context("Invalid request settings")?;

    if cli.check {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    if cli.dry_run {
        handle_dry_run(&config, &settings);
        return Ok(());
    }

    handle_harvest(config, settings, &config_hash).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("arctic_harvest=info,warn"),
            1 => EnvFilter::new("arctic_harvest=debug,info"),
            2 => EnvFilter::new("arctic_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the request that would be made
fn handle_dry_run(config: &Config, settings: &FetchSettings) {
    println!("=== Arctic-Harvest Dry Run ===\n");

    println!("Request:");
    println!("  Endpoint: {}", settings.endpoint);
    match settings.time_range() {
        Some((after, before)) => {
            println!("  Window: [{}, {}]", after, before);
            println!(
                "  Segments: {}",
                arctic_harvest::crawler::split_range(after, before, settings.workers).len()
            );
        }
        None => println!("  Window: none (single page)"),
    }
    for (key, value) in &settings.filters {
        println!("  {} = {}", key, value);
    }

    println!("\nEngine:");
    println!("  Workers: {}", settings.workers);
    println!("  Request interval: {:?}", settings.interval);
    println!("  Max retries: {}", settings.max_retries);
    println!("  Duplicate policy: {}", settings.duplicate_policy);
    if settings.fetch_comments {
        println!("  Comment workers: {}", settings.comment_workers);
    }

    println!("\nProvider:");
    println!("  Base URL: {}", config.provider.base_url);
    println!("  User agent: {}", config.provider.user_agent);

    println!("\nOutput:");
    println!("  Path: {} ({:?})", config.output.path, config.output.format);
    println!("  Recovery directory: {}", config.output.recovery_dir);

    println!("\n✓ Configuration is valid");
    println!("✓ Query fingerprint: {}", settings.fingerprint());
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, settings: FetchSettings, config_hash: &str) -> Result<()> {
    let endpoint = settings.endpoint;
    let mut sink = open_sink(&config.output, config_hash, endpoint)?;

    let shutdown = Shutdown::shared();
    let harvester = harvester_from_config(&config, settings)?.with_shutdown(Arc::clone(&shutdown));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping workers");
            shutdown.request();
        }
    });

    let outcome = match harvester.run().await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            return Err(e.into());
        }
    };

    sink.save(&outcome)
        .with_context(|| format!("Failed to save to {}", sink.describe()))?;

    if !outcome.complete {
        if let Some(dir) = &outcome.recovery_dir {
            tracing::warn!("Partial results saved; recovery files in {}", dir.display());
        }
    }

    print_statistics(&outcome.stats, outcome.complete);
    Ok(())
}
