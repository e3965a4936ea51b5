//! JSON output for a run.
//!
//! ```text
//! data_dir/
//! ├── summaries/
//! │   └── 20240105T101500.123Z/    # one directory per run
//! │       ├── 2401.01234v2.json    # one SummaryRecord per item
//! │       └── summaries.json       # id -> SummaryRecord
//! └── full_documents.json          # every item, any stage
//! ```

use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::config::DataLayout;
use crate::models::{CandidateItem, ExtractedRecord, Stage, SummaryRecord};
use crate::utils::write_atomic;

/// Write one file per record plus the `summaries.json` map into
/// `summaries/<run_id>/`.
///
/// # Arguments
///
/// * `layout` - Data directory layout
/// * `run_id` - Identifier of the run, used as the directory name
/// * `records` - Summaries produced during this run
///
/// # Returns
///
/// The run directory.
///
/// # Errors
///
/// Returns an [`io::Error`] if a record cannot be serialized or written.
///
/// # Examples
///
/// ```ignore
/// let dir = write_run_summaries(&layout, "20240105T101500.123Z", &records).await?;
/// assert!(dir.join("summaries.json").is_file());
/// ```
#[instrument(level = "info", skip_all, fields(%run_id, count = records.len()))]
pub async fn write_run_summaries(
    layout: &DataLayout,
    run_id: &str,
    records: &[SummaryRecord],
) -> io::Result<PathBuf> {
    let run_dir = layout.summaries_dir.join(run_id);
    for record in records {
        let path = run_dir.join(format!("{}.json", record.id));
        write_atomic(&path, &serde_json::to_vec_pretty(record)?).await?;
    }
    let map: BTreeMap<&str, &SummaryRecord> = records.iter().map(|r| (r.id.as_str(), r)).collect();
    write_atomic(&run_dir.join("summaries.json"), &serde_json::to_vec_pretty(&map)?).await?;
    info!(dir = %run_dir.display(), "Wrote run summaries");
    Ok(run_dir)
}

/// One entry of `full_documents.json`.
#[derive(Debug, Serialize)]
struct DocumentDump<'a> {
    id: &'a str,
    title: &'a str,
    source_url: &'a str,
    feed_source: &'a str,
    stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<&'a ExtractedRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<&'a str>,
    attempt_count: u32,
}

/// Snapshot of every item and what the pipeline knows about it.
///
/// Items in any stage are included, `Failed` ones with their last error.
/// The file is rewritten in full at the end of every run.
///
/// # Arguments
///
/// * `path` - Destination, normally `full_documents.json`
/// * `items` - Every item in the store
///
/// # Errors
///
/// Returns an [`io::Error`] if the dump cannot be serialized or written.
#[instrument(level = "info", skip_all, fields(count = items.len()))]
pub async fn write_full_dump(path: &Path, items: &[CandidateItem]) -> io::Result<()> {
    let dump: Vec<DocumentDump<'_>> = items
        .iter()
        .map(|item| DocumentDump {
            id: &item.id,
            title: item.display_title(),
            source_url: &item.source_url,
            feed_source: &item.feed_source,
            stage: item.current_stage,
            record: item.extracted_record.as_ref(),
            summary: item.summary.as_deref(),
            last_error: item.last_error.as_deref(),
            attempt_count: item.attempt_count,
        })
        .collect();
    write_atomic(path, &serde_json::to_vec_pretty(&dump)?).await?;
    info!(path = %path.display(), "Wrote full document dump");
    Ok(())
}
