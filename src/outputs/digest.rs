//! Plain-text digest (`results.txt`) and the `--show-summaries` listing.

use std::fmt::{self, Write};
use std::io;
use std::path::Path;
use tracing::{info, instrument};

use crate::models::{Stage, SummaryRecord};
use crate::pipeline::RunReport;
use crate::utils::write_atomic;

const RULE: &str = "----------------------------------------------------------------";

/// Render the digest of one run: stage reports, item counts per stage, then
/// every summary produced by the run.
pub fn render_digest(
    report: &RunReport,
    counts: &[(Stage, usize)],
    records: &[SummaryRecord],
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "Run {}", report.run_id)?;
    writeln!(out, "{RULE}")?;
    if let Some(fetch) = &report.fetch {
        writeln!(
            out,
            "Feeds: {} ok, {} failed; {} entries, {} new",
            fetch.sources_ok, fetch.sources_failed, fetch.entries_seen, fetch.new_items
        )?;
    }
    for stage in &report.stages {
        writeln!(out, "{stage}")?;
    }
    writeln!(out)?;
    writeln!(out, "Items by stage")?;
    for (stage, n) in counts {
        writeln!(out, "  {:<11} {}", stage.to_string(), n)?;
    }
    writeln!(out)?;
    writeln!(out, "Summaries this run: {}", records.len())?;
    for record in records {
        writeln!(out, "{RULE}")?;
        write_summary(&mut out, record)?;
    }
    Ok(out)
}

/// Render every given summary, as printed by `--show-summaries`.
pub fn render_summaries(records: &[SummaryRecord]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    if records.is_empty() {
        writeln!(out, "No summarized items.")?;
        return Ok(out);
    }
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            writeln!(out, "{RULE}")?;
        }
        write_summary(&mut out, record)?;
    }
    Ok(out)
}

fn write_summary(out: &mut String, record: &SummaryRecord) -> fmt::Result {
    writeln!(out, "[{}] {}", record.id, record.title)?;
    if let Some(authors) = record.record.authors.as_deref().filter(|a| !a.is_empty()) {
        writeln!(out, "Authors: {}", authors.join(", "))?;
    }
    if let Some(published) = record.published_at {
        writeln!(out, "Published: {}", published.format("%Y-%m-%d"))?;
    }
    writeln!(out, "Source: {} ({})", record.source_url, record.feed_source)?;
    writeln!(out)?;
    writeln!(out, "{}", record.summary)?;
    writeln!(out)
}

#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_digest(path: &Path, digest: &str) -> io::Result<()> {
    write_atomic(path, digest.as_bytes()).await?;
    info!(bytes = digest.len(), "Wrote digest");
    Ok(())
}
