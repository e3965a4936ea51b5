//! Pipeline orchestration.
//!
//! A run executes the stages in [`StageName::RUN_ORDER`], starting from the
//! first stage or from the one named by `--start-from`. Each stage asks the
//! state store which items sit at its input stage, processes them with
//! per-item failure isolation, and returns a [`StageReport`]. Only fatal store
//! errors and output I/O errors abort a run.
//!
//! Naming a refreshing stage explicitly also re-processes every item at or
//! beyond that stage's output, in that stage and in each later one. Artifacts
//! are replaced in place and no item moves back down the chain:
//!
//! | `--start-from` | selects | also refreshes |
//! |----------------|---------|----------------|
//! | `fetch`        | feeds   | |
//! | `download`     | `Discovered` | |
//! | `parse`        | `Downloaded` | `Parsed` and beyond |
//! | `extract`      | `Parsed` | `Extracted` and beyond |
//! | `summarise`    | `Extracted` | `Summarized` |
//!
//! `clear` removes every record and derived artifact, then stops. It also
//! recovers a state file that no longer parses, see [`reset`].

pub mod report;

pub use report::{ItemOutcome, RunReport, StageReport};

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::io;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::api::AskAsync;
use crate::config::{DataLayout, PipelineConfig};
use crate::error::{PipelineError, StoreError};
use crate::extract::{extract_fields, extract_texts};
use crate::feeds::fetch_feeds;
use crate::http::Fetcher;
use crate::models::{CandidateItem, Stage, SummaryRecord};
use crate::outputs::{digest, json};
use crate::retriever::retrieve_documents;
use crate::store::StateStore;
use crate::summarizer::summarize_items;
use crate::utils::clear_directory;

/// Pipeline stages addressable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Clear,
    Fetch,
    Download,
    Parse,
    Extract,
    Summarise,
}

/// Dispatch entry: the item stage a pipeline stage consumes and produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRoute {
    pub name: StageName,
    pub input: Option<Stage>,
    pub output: Option<Stage>,
    /// Whether naming this stage re-processes items already at `output`.
    pub refreshes: bool,
}

const DISPATCH: [StageRoute; 6] = [
    StageRoute {
        name: StageName::Clear,
        input: None,
        output: None,
        refreshes: false,
    },
    StageRoute {
        name: StageName::Fetch,
        input: None,
        output: Some(Stage::Discovered),
        refreshes: false,
    },
    StageRoute {
        name: StageName::Download,
        input: Some(Stage::Discovered),
        output: Some(Stage::Downloaded),
        refreshes: false,
    },
    StageRoute {
        name: StageName::Parse,
        input: Some(Stage::Downloaded),
        output: Some(Stage::Parsed),
        refreshes: true,
    },
    StageRoute {
        name: StageName::Extract,
        input: Some(Stage::Parsed),
        output: Some(Stage::Extracted),
        refreshes: true,
    },
    StageRoute {
        name: StageName::Summarise,
        input: Some(Stage::Extracted),
        output: Some(Stage::Summarized),
        refreshes: true,
    },
];

impl StageName {
    /// Stages of a normal run, in order.
    pub const RUN_ORDER: [StageName; 5] = [
        StageName::Fetch,
        StageName::Download,
        StageName::Parse,
        StageName::Extract,
        StageName::Summarise,
    ];

    pub fn route(self) -> StageRoute {
        DISPATCH[self as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Clear => "clear",
            StageName::Fetch => "fetch",
            StageName::Download => "download",
            StageName::Parse => "parse",
            StageName::Extract => "extract",
            StageName::Summarise => "summarise",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Stages to execute for a `--start-from` value.
pub fn plan(start_from: Option<StageName>) -> Vec<StageName> {
    match start_from {
        Some(StageName::Clear) => vec![StageName::Clear],
        Some(first) => StageName::RUN_ORDER.into_iter().filter(|s| *s >= first).collect(),
        None => StageName::RUN_ORDER.to_vec(),
    }
}

/// Identifier of a run, also the name of its summaries directory.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

/// [`new_run_id`], suffixed with `-1`, `-2`, ... while a summaries directory
/// of that name already exists.
pub async fn unique_run_id(layout: &DataLayout, now: DateTime<Utc>) -> String {
    let base = new_run_id(now);
    let mut candidate = base.clone();
    let mut n = 0u32;
    while tokio::fs::try_exists(layout.summaries_dir.join(&candidate))
        .await
        .unwrap_or(false)
    {
        n += 1;
        candidate = format!("{base}-{n}");
    }
    candidate
}

/// Whether `name` re-processes finished items when the run starts from
/// `start_from`.
pub fn forces(start_from: Option<StageName>, name: StageName) -> bool {
    match start_from {
        Some(first) => first.route().refreshes && name >= first && name.route().refreshes,
        None => false,
    }
}

/// Everything one run needs.
pub struct Pipeline<'a, F, A> {
    pub config: &'a PipelineConfig,
    pub layout: DataLayout,
    pub store: &'a StateStore,
    pub fetcher: &'a F,
    pub asker: &'a A,
}

impl<'a, F, A> Pipeline<'a, F, A>
where
    F: Fetcher,
    A: AskAsync<Response = String>,
{
    pub fn new(config: &'a PipelineConfig, store: &'a StateStore, fetcher: &'a F, asker: &'a A) -> Self {
        Self {
            config,
            layout: config.layout(),
            store,
            fetcher,
            asker,
        }
    }

    /// Execute one run.
    #[instrument(level = "info", skip_all, fields(start_from = ?start_from))]
    pub async fn run(&self, start_from: Option<StageName>) -> Result<RunReport, PipelineError> {
        let t0 = Instant::now();
        let started_at = Utc::now();
        let mut report = RunReport {
            run_id: unique_run_id(&self.layout, started_at).await,
            ..RunReport::default()
        };
        info!(run_id = %report.run_id, "Run starting");

        for name in plan(start_from) {
            let force = forces(start_from, name);
            let stage_report = self.run_stage(name, force, &mut report).await?;
            report.stages.push(stage_report);
        }

        if start_from != Some(StageName::Clear) {
            self.emit_results(&mut report, started_at).await?;
        }

        let elapsed = t0.elapsed();
        info!(
            run_id = %report.run_id,
            ?elapsed,
            summarized = report.summarized.len(),
            "Run complete"
        );
        Ok(report)
    }

    async fn run_stage(
        &self,
        name: StageName,
        force: bool,
        run: &mut RunReport,
    ) -> Result<StageReport, PipelineError> {
        let config = self.config;
        let route = name.route();
        info!(
            stage = %name,
            input = ?route.input,
            output = ?route.output,
            force,
            "Stage starting"
        );
        let report = match name {
            StageName::Clear => clear(self.store, &self.layout).await?,
            StageName::Fetch => {
                let fetched = fetch_feeds(self.fetcher, self.store, &config.feeds).await?;
                let report = StageReport {
                    stage: StageName::Fetch,
                    selected: config.feeds.len(),
                    succeeded: fetched.sources_ok,
                    failed: fetched.sources_failed,
                    retried: 0,
                    reused: 0,
                };
                run.fetch = Some(fetched);
                report
            }
            StageName::Download => {
                retrieve_documents(
                    self.fetcher,
                    self.store,
                    &self.layout,
                    config.download_concurrency,
                    config.attempt_ceiling,
                )
                .await?
            }
            StageName::Parse => {
                extract_texts(self.store, &self.layout, config.download_concurrency, force).await?
            }
            StageName::Extract => extract_fields(self.store, force).await?,
            StageName::Summarise => {
                summarize_items(
                    self.asker,
                    self.store,
                    config.summarise_concurrency,
                    config.attempt_ceiling,
                    force,
                )
                .await?
            }
        };
        Ok(report)
    }

    /// Write the run's summaries, the full dump and the digest.
    async fn emit_results(&self, run: &mut RunReport, started_at: DateTime<Utc>) -> Result<(), PipelineError> {
        let fresh: Vec<CandidateItem> = self
            .store
            .summarized()
            .await
            .into_iter()
            .filter(|item| item.updated_at >= started_at)
            .collect();
        let records: Vec<SummaryRecord> = fresh.iter().filter_map(SummaryRecord::from_item).collect();
        run.summarized = records.iter().map(|r| r.id.clone()).collect();

        if !records.is_empty() {
            json::write_run_summaries(&self.layout, &run.run_id, &records).await?;
        }
        json::write_full_dump(&self.layout.full_dump_file, &self.store.snapshot().await).await?;

        let counts = self.store.stage_counts().await;
        let text = digest::render_digest(run, &counts, &records).map_err(io::Error::other)?;
        digest::write_digest(&self.layout.digest_file, &text).await?;
        Ok(())
    }
}

/// Remove every record and derived artifact. Configuration and the run log
/// are left alone.
#[instrument(level = "info", skip_all, fields(root = %layout.root.display()))]
pub async fn clear(store: &StateStore, layout: &DataLayout) -> Result<StageReport, PipelineError> {
    let cleared = store.clear_all().await?;

    for path in &cleared.artifact_paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete artifact");
                return Err(e.into());
            }
        }
    }
    let files = remove_artifacts(layout).await?;

    info!(records = cleared.removed, files, "Cleared pipeline state");
    Ok(StageReport {
        stage: StageName::Clear,
        selected: cleared.removed,
        succeeded: cleared.removed,
        failed: 0,
        retried: 0,
        reused: 0,
    })
}

/// `--start-from clear` straight from the data layout.
///
/// A readable state file is cleared through [`clear`]. One that no longer
/// parses is overwritten with an empty store instead, and the artifact
/// directories are emptied. Any other store error is returned unchanged.
///
/// # Errors
///
/// Returns [`PipelineError`] if the state file cannot be read or rewritten,
/// or an artifact cannot be removed.
#[instrument(level = "info", skip_all, fields(root = %layout.root.display()))]
pub async fn reset(layout: &DataLayout) -> Result<StageReport, PipelineError> {
    match StateStore::open(&layout.state_file).await {
        Ok(store) => clear(&store, layout).await,
        Err(e @ StoreError::Corruption { .. }) => {
            warn!(error = %e, "Discarding unreadable state file");
            StateStore::reset(&layout.state_file).await?;
            let files = remove_artifacts(layout).await?;
            info!(files, "Cleared pipeline state");
            Ok(StageReport::new(StageName::Clear))
        }
        Err(e) => Err(e.into()),
    }
}

/// Empty the artifact directories and delete the digest and full dump.
/// Returns the number of files removed.
async fn remove_artifacts(layout: &DataLayout) -> io::Result<usize> {
    let mut files = 0usize;
    for dir in layout.artifact_dirs() {
        files += clear_directory(dir).await?;
    }
    for path in [&layout.digest_file, &layout.full_dump_file] {
        match tokio::fs::remove_file(path).await {
            Ok(()) => files += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(files)
}

/// Listing of every summarized item, for `--show-summaries`.
pub async fn show_summaries(store: &StateStore) -> Result<String, fmt::Error> {
    let records: Vec<SummaryRecord> = store
        .summarized()
        .await
        .iter()
        .filter_map(SummaryRecord::from_item)
        .collect();
    digest::render_summaries(&records)
}
