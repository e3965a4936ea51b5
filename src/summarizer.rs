//! Summarization: `Extracted` -> `Summarized`.

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::api::AskAsync;
use crate::error::{CapabilityError, StoreError};
use crate::models::{ArtifactRef, CandidateItem, ExtractedRecord, Stage};
use crate::pipeline::{ItemOutcome, StageName, StageReport};
use crate::store::{StageFilter, StateStore};
use crate::utils::truncate_for_log;

const PROMPT_TAIL: &str = "Please provide a clear and concise summary of the key findings and implications.";

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Prompt for one record. `None` when neither abstract nor conclusion is set.
pub fn build_prompt(record: &ExtractedRecord) -> Option<String> {
    let abstract_text = present(&record.abstract_text);
    let conclusion = present(&record.conclusion);

    let which = match (abstract_text, conclusion) {
        (Some(_), Some(_)) => "the abstract and conclusion",
        (Some(_), None) => "the abstract",
        (None, Some(_)) => "the conclusion",
        (None, None) => return None,
    };
    let mut prompt = format!("Here is {which} from a research paper:\n\n");
    if let Some(a) = abstract_text {
        prompt.push_str(&format!("Abstract:\n{a}\n\n"));
    }
    if let Some(c) = conclusion {
        prompt.push_str(&format!("Conclusion:\n{c}\n\n"));
    }
    prompt.push_str(PROMPT_TAIL);
    Some(prompt)
}

/// Validate a model response and flag the sections the summary was written
/// without.
pub fn finish_summary(record: &ExtractedRecord, response: &str) -> Result<String, CapabilityError> {
    let summary = response.trim();
    if summary.is_empty() {
        return Err(CapabilityError("empty response".into()));
    }
    let flags: Vec<&str> = [
        present(&record.abstract_text).is_none().then_some("(missing abstract)"),
        present(&record.conclusion).is_none().then_some("(missing conclusion)"),
    ]
    .into_iter()
    .flatten()
    .collect();
    if flags.is_empty() {
        Ok(summary.to_string())
    } else {
        Ok(format!("{} {}", flags.join(" "), summary))
    }
}

/// Summarize one record through `asker`.
pub async fn summarize_record<A>(asker: &A, record: &ExtractedRecord) -> Result<String, CapabilityError>
where
    A: AskAsync<Response = String>,
{
    let prompt = build_prompt(record).ok_or_else(|| CapabilityError("record has no content".into()))?;
    let response = asker
        .ask(&prompt)
        .await
        .map_err(|e| CapabilityError(e.to_string()))?;
    finish_summary(record, &response)
}

/// Summarize every `Extracted` item. With `force`, items at `Summarized`
/// get a fresh summary in place and keep their stage.
#[instrument(level = "info", skip_all, fields(concurrency = concurrency, force = force))]
pub async fn summarize_items<A>(
    asker: &A,
    store: &StateStore,
    concurrency: usize,
    attempt_ceiling: u32,
    force: bool,
) -> Result<StageReport, StoreError>
where
    A: AskAsync<Response = String>,
{
    let mut items: Vec<CandidateItem> = store.list_items(StageFilter::At(Stage::Extracted)).await.collect();
    if force {
        items.extend(store.list_items(StageFilter::AtOrAbove(Stage::Summarized)).await);
    }
    info!(count = items.len(), "Summarizing items");

    let results = stream::iter(items)
        .map(|item| async move {
            let id = item.id.clone();
            let res = summarize_one(asker, store, attempt_ceiling, item).await;
            (id, res)
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    let report = StageReport::tally(StageName::Summarise, results)?;
    info!(%report, "Summarization complete");
    Ok(report)
}

async fn summarize_one<A>(
    asker: &A,
    store: &StateStore,
    attempt_ceiling: u32,
    item: CandidateItem,
) -> Result<ItemOutcome, StoreError>
where
    A: AskAsync<Response = String>,
{
    let refresh = item.current_stage != Stage::Extracted;
    let Some(record) = item.extracted_record.as_ref() else {
        // Only reachable for a hand-edited store.
        return Err(StoreError::MissingArtifact {
            id: item.id.clone(),
            stage: Stage::Extracted,
        });
    };

    match summarize_record(asker, record).await {
        Ok(summary) => {
            debug!(id = %item.id, summary = %truncate_for_log(&summary, 120), "Summarized");
            if refresh {
                store.refresh(&item.id, ArtifactRef::Summary(summary)).await?;
            } else {
                store.advance(&item.id, Stage::Summarized, ArtifactRef::Summary(summary)).await?;
            }
            Ok(ItemOutcome::Succeeded)
        }
        Err(e) if refresh => {
            warn!(id = %item.id, error = %e, "Re-summarization failed; keeping previous summary");
            Ok(ItemOutcome::Failed)
        }
        Err(e) => {
            let stage = store.record_failure(&item.id, &e.to_string(), attempt_ceiling).await?;
            warn!(id = %item.id, error = %e, %stage, "Summarization failed");
            Ok(if stage == Stage::Failed {
                ItemOutcome::Failed
            } else {
                ItemOutcome::Retried
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockAsk;

    fn record(abstract_text: Option<&str>, conclusion: Option<&str>) -> ExtractedRecord {
        ExtractedRecord {
            title: Some("T".into()),
            authors: None,
            abstract_text: abstract_text.map(str::to_string),
            conclusion: conclusion.map(str::to_string),
        }
    }

    #[test]
    fn test_prompt_with_both_sections() {
        let prompt = build_prompt(&record(Some("We do X."), Some("X works."))).unwrap();
        assert!(prompt.starts_with("Here is the abstract and conclusion from a research paper:\n\n"));
        assert!(prompt.contains("Abstract:\nWe do X.\n\n"));
        assert!(prompt.contains("Conclusion:\nX works.\n\n"));
        assert!(prompt.ends_with(PROMPT_TAIL));
    }

    #[test]
    fn test_prompt_with_one_section() {
        let prompt = build_prompt(&record(None, Some("X works."))).unwrap();
        assert!(prompt.starts_with("Here is the conclusion from"));
        assert!(!prompt.contains("Abstract:"));
        assert!(build_prompt(&record(None, Some("   "))).is_none());
    }

    #[test]
    fn test_finish_summary_flags_missing_sections() {
        let r = record(Some("abs"), None);
        assert_eq!(finish_summary(&r, "  Great.  ").unwrap(), "(missing conclusion) Great.");
        let full = record(Some("abs"), Some("con"));
        assert_eq!(finish_summary(&full, "Great.").unwrap(), "Great.");
        assert!(finish_summary(&full, " \n ").is_err());
    }

    #[tokio::test]
    async fn test_empty_response_is_capability_error() {
        let asker = MockAsk::answering("   ");
        let err = summarize_record(&asker, &record(Some("abs"), Some("con"))).await.unwrap_err();
        assert!(err.to_string().contains("empty response"));
        assert_eq!(asker.calls(), 1);
    }
}
