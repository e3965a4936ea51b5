//! Command-line interface definitions for feed_digest.
//!
//! Paths can also be supplied through environment variables, which is how the
//! scheduler that invokes each run usually sets them.

use clap::Parser;
use std::path::PathBuf;

use crate::pipeline::StageName;

/// Resumable feed-to-summary pipeline.
///
/// # Examples
///
/// ```sh
/// # Run every stage
/// feed_digest -c feed_digest.yaml
///
/// # Re-derive fields and summaries for items already processed
/// feed_digest --start-from extract
///
/// # Wipe state and artifacts, keep configuration
/// feed_digest --start-from clear
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Pipeline configuration file [default: feed_digest.yaml]
    #[arg(short, long, env = "FEED_DIGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory (overrides `data_dir` from the config file)
    #[arg(short, long, env = "FEED_DIGEST_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Run this stage and every later one; `clear` wipes state and artifacts
    #[arg(long, value_enum)]
    pub start_from: Option<StageName>,

    /// Print every summarized item when done
    #[arg(long)]
    pub show_summaries: bool,

    /// awful_aj config.yaml for the summarizer (default: awful_aj config dir)
    #[arg(long, env = "FEED_DIGEST_SUMMARIZER_CONFIG")]
    pub summarizer_config: Option<PathBuf>,

    /// awful_aj chat template used for summaries
    #[arg(long, default_value = "summarise")]
    pub template: String,
}

pub const DEFAULT_CONFIG: &str = "feed_digest.yaml";

impl Cli {
    /// The config path to load, and whether a missing file is acceptable
    /// (only for the built-in default path).
    pub fn config_source(&self) -> (PathBuf, bool) {
        match &self.config {
            Some(path) => (path.clone(), false),
            None => (PathBuf::from(DEFAULT_CONFIG), true),
        }
    }
}
