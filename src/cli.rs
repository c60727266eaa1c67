//! Command-line interface definitions for Awful Categorize.
//!
//! Most behaviour lives in `config.yaml`; the flags here pick the config file,
//! carry the API credential, and override a few values for one-off runs.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the Awful Categorize application.
///
/// # Examples
///
/// ```sh
/// # Categorize everything new in the configured feed
/// MISTRAL_API_KEY=... awful_categorize
///
/// # Use another config, stop after ten minutes
/// awful_categorize -c ./feeds/tech.yaml --time-budget 600
///
/// # See what a run would do without calling the model
/// awful_categorize --dry-run
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to config.yaml (defaults to ./config.yaml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// API key for the classifier endpoint
    #[arg(long, env = "MISTRAL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Override the feed URL from the config
    #[arg(short, long)]
    pub source_url: Option<String>,

    /// Override where results are stored (defaults to paths.data_dir/paths.output_file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only consider the first N feed entries
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Stop starting new work after this many seconds
    #[arg(long)]
    pub time_budget: Option<u64>,

    /// Report what would be categorized, without calling the model or writing results
    #[arg(long)]
    pub dry_run: bool,
}
