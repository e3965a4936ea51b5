//! # feed_digest
//!
//! A resumable pipeline that turns feed entries into summaries.
//!
//! ## Usage
//!
//! ```sh
//! feed_digest -c feed_digest.yaml
//! feed_digest --start-from summarise --show-summaries
//! feed_digest --start-from clear
//! ```
//!
//! ## Architecture
//!
//! Every run walks the same stage chain, and every item records how far it
//! got, so a run killed halfway is simply resumed by the next one:
//! 1. **Fetch**: poll RSS / Atom / arXiv sources, register unseen entries
//! 2. **Download**: retrieve each entry's document (PDF, HTML or text)
//! 3. **Parse**: extract plain text from the document
//! 4. **Extract**: locate title, abstract and conclusion
//! 5. **Summarise**: ask the LLM for a summary (bounded concurrency)
//! 6. **Output**: per-run summaries JSON, full document dump, `results.txt`
//!
//! Logs go to stderr and are appended to `run.log` in the data directory.

use clap::Parser;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod error;
mod extract;
mod feeds;
mod http;
mod models;
mod outputs;
mod pipeline;
mod retriever;
mod store;
mod summarizer;
mod utils;

use api::{RetryAsk, SummarizerBackend};
use cli::Cli;
use config::PipelineConfig;
use error::{ConfigError, PipelineError};
use http::HttpFetcher;
use pipeline::{Pipeline, StageName};
use store::StateStore;
use utils::ensure_writable_dir;

/// Base delay of the in-run summarizer backoff.
const SUMMARY_RETRY_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Configuration is loaded before tracing so the run log can live in the
    // configured data directory.
    let (config_path, allow_missing) = cli.config_source();
    let mut config = match PipelineConfig::load(&config_path, allow_missing) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("feed_digest: {e}");
            return ExitCode::from(2);
        }
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    let layout = config.layout();

    if let Err(e) = ensure_writable_dir(&layout.root).await {
        eprintln!(
            "feed_digest: data directory {} is not writable: {e}",
            layout.root.display()
        );
        return ExitCode::from(1);
    }
    if let Err(e) = init_tracing(&layout.run_log) {
        eprintln!("feed_digest: cannot open {}: {e}", layout.run_log.display());
        return ExitCode::from(1);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        data_dir = %layout.root.display(),
        feeds = config.feeds.len(),
        "feed_digest starting up"
    );

    match run(&cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Run failed");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Stderr plus an append-only `run.log`, both filtered by `RUST_LOG`
/// (default `info`).
fn init_tracing(run_log: &Path) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(run_log)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tfmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(io::stderr);
    let file_layer = tfmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

#[instrument(level = "info", skip_all, fields(start_from = ?cli.start_from))]
async fn run(cli: &Cli, config: &PipelineConfig) -> Result<(), PipelineError> {
    let start_time = Instant::now();
    let layout = config.layout();
    // Clear works from the layout alone so an unreadable state file can be
    // recovered.
    let store = if cli.start_from == Some(StageName::Clear) {
        let report = pipeline::reset(&layout).await?;
        info!(%report, "Clear complete");
        StateStore::open(&layout.state_file).await?
    } else {
        let store = StateStore::open(&layout.state_file).await?;
        let fetcher = HttpFetcher::new(
            &config.user_agent,
            Duration::from_secs(config.request_timeout_secs),
        )
        .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
        let backend =
            SummarizerBackend::load(cli.summarizer_config.as_deref(), &cli.template).await?;
        let asker = RetryAsk::new(backend.client(), config.summary_retries, SUMMARY_RETRY_DELAY);

        let report = Pipeline::new(config, &store, &fetcher, &asker)
            .run(cli.start_from)
            .await?;
        for stage in &report.stages {
            info!(run_id = %report.run_id, "{stage}");
        }
        info!(
            run_id = %report.run_id,
            summarized = report.summarized.len(),
            digest = %layout.digest_file.display(),
            "Results written"
        );
        store
    };

    if cli.show_summaries {
        let listing = pipeline::show_summaries(&store)
            .await
            .map_err(io::Error::other)?;
        print!("{listing}");
    }

    info!(elapsed = ?start_time.elapsed(), "feed_digest finished");
    Ok(())
}
