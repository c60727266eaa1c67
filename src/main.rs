//! # Awful Categorize
//!
//! Labels the articles of a JSON feed with a category (and optionally a short
//! summary) using an OpenAI-compatible chat model, and keeps the results in a
//! single JSON file that grows across runs.
//!
//! ## Usage
//!
//! ```sh
//! MISTRAL_API_KEY=... awful_categorize -c config.yaml
//! ```
//!
//! ## Architecture
//!
//! 1. **Start-up**: load config, check the credential and data directory,
//!    load prior results, fetch the feed. Any failure here aborts before a
//!    single result is written.
//! 2. **Run**: candidates are visited in feed order, in time-boxed batches.
//!    Already-stored articles are skipped; new ones are classified one at a
//!    time with backoff on rate limits, and each success is flushed to disk
//!    immediately.
//! 3. **Stop**: on completion, budget exhaustion or Ctrl-C the store is
//!    flushed and a summary is logged.

use clap::Parser;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod backoff;
mod classifier;
mod cli;
mod config;
mod error;
mod models;
mod pipeline;
mod scheduler;
mod source;
mod store;
mod utils;

use classifier::ChatClassifier;
use cli::Cli;
use config::AppConfig;
use models::StopReason;
use pipeline::{Pipeline, pending_count};
use store::ResultStore;
use utils::ensure_writable_dir;

/// Exit status after a clean flush following an operator interrupt.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let dotenv = dotenvy::dotenv();
    let args = Cli::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let config = match AppConfig::load(&config_path, args.config.is_some()) {
        Ok(config) => apply_overrides(config, &args),
        Err(e) => {
            init_tracing("info", None)?;
            error!(error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };

    init_tracing(&config.logging.level, Some(&config.log_path()))?;
    let start_time = std::time::Instant::now();
    info!(config = %config_path.display(), "awful_categorize starting up");
    if let Ok(path) = dotenv {
        debug!(path = %path.display(), "Loaded .env");
    }

    // --- Start-up checks: nothing below may touch the result file ---
    let api_key = match args.api_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => Some(key.to_string()),
        _ if args.dry_run => None,
        _ => {
            error!("MISTRAL_API_KEY is not set (env, .env or --api-key)");
            return Err("missing MISTRAL_API_KEY".into());
        }
    };

    let store_path = args.output.clone().unwrap_or_else(|| config.store_path());
    let store_dir = store_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    if let Err(e) = ensure_writable_dir(store_dir).await {
        error!(
            path = %store_dir.display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let store = match ResultStore::load(&store_path) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to load prior results");
            return Err(e.into());
        }
    };

    let candidates = match source::fetch_articles(
        &config.articles.source_url,
        config.articles.limit,
        std::time::Duration::from_secs(config.api.timeout_secs),
    )
    .await
    {
        Ok(candidates) => candidates,
        Err(e) => {
            error!(url = %config.articles.source_url, error = %e, "Failed to load source feed");
            return Err(e.into());
        }
    };

    if store.is_empty() {
        info!(path = %store.path().display(), "No prior results; every candidate is new");
    }
    let pending = pending_count(&store, &candidates);
    info!(
        candidates = candidates.len(),
        already_stored = store.len(),
        pending,
        "Prepared run"
    );

    let Some(api_key) = api_key.filter(|_| !args.dry_run) else {
        info!(pending, "Dry run; not calling the classifier");
        return Ok(ExitCode::SUCCESS);
    };

    let classifier = ChatClassifier::new(&config, &api_key)?;
    debug!(?classifier, "Classifier ready");

    // --- Shutdown: first Ctrl-C / SIGTERM stops the run after a flush ---
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_token.cancel();
    });

    let mut pipeline = Pipeline::from_config(&config, &classifier, store, shutdown);
    let summary = match pipeline.run(&candidates).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(
                error = %e,
                path = %pipeline.store().path().display(),
                "Failed to persist results; stopping"
            );
            return Err(e.into());
        }
    };

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        remaining = summary.remaining,
        stored = pipeline.store().len(),
        "Execution complete"
    );

    match summary.stop {
        StopReason::Completed => Ok(ExitCode::SUCCESS),
        StopReason::BudgetExhausted => {
            warn!(
                remaining = summary.remaining,
                "Time budget reached; run again to continue"
            );
            Ok(ExitCode::SUCCESS)
        }
        StopReason::Interrupted => {
            warn!("Interrupted by operator; progress saved");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
    }
}

/// Fold one-off CLI overrides into the loaded configuration.
fn apply_overrides(mut config: AppConfig, args: &Cli) -> AppConfig {
    if let Some(url) = &args.source_url {
        config.articles.source_url = url.clone();
    }
    if let Some(limit) = args.limit {
        config.articles.limit = Some(limit);
    }
    if let Some(secs) = args.time_budget {
        config.batch.time_budget_secs = Some(secs);
    }
    config
}

/// Console logging plus, when a path is given, an append-only log file.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let console = tfmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339());

    let file = match log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                tfmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler; only Ctrl-C will stop the run"),
        }
    }
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received SIGINT"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_config_values() {
        let args = Cli::parse_from([
            "awful_categorize",
            "--source-url",
            "https://example.com/feed.json",
            "--limit",
            "5",
            "--time-budget",
            "60",
        ]);
        let config = apply_overrides(AppConfig::default(), &args);

        assert_eq!(config.articles.source_url, "https://example.com/feed.json");
        assert_eq!(config.articles.limit, Some(5));
        assert_eq!(config.time_budget(), Some(std::time::Duration::from_secs(60)));
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let args = Cli::parse_from(["awful_categorize"]);
        let config = apply_overrides(AppConfig::default(), &args);

        assert_eq!(config.articles.limit, None);
        assert_eq!(config.time_budget(), None);
    }
}
