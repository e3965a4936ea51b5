//! Field extraction: `Parsed` -> `Extracted`.
//!
//! Sections are located with ordered heading rules. A heading match starts the
//! section, which runs until the first terminator line (next numbered heading,
//! acknowledgements, references). The first rule yielding more than
//! [`MIN_SECTION_CHARS`] characters wins. `Discussion` stands in for a missing
//! conclusion.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::error::{ExtractionError, StoreError};
use crate::models::{ArtifactRef, CandidateItem, ExtractedRecord, Stage};
use crate::pipeline::{ItemOutcome, StageName, StageReport};
use crate::store::{StageFilter, StateStore};
use crate::utils::collapse_whitespace;

pub const MIN_SECTION_CHARS: usize = 50;

/// One heading rule and the terminator that ends its section.
struct SectionRule {
    heading: Regex,
    end: &'static Lazy<Regex>,
}

fn rule(heading: &str, end: &'static Lazy<Regex>) -> SectionRule {
    SectionRule {
        heading: Regex::new(heading).expect("section heading regex"),
        end,
    }
}

static ABSTRACT_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:\d+(?:\.\d+)*(?:\.[ \t]*|[ \t]+)[A-Z]|(?i:introduction|keywords|index terms)\b)")
        .expect("abstract terminator regex")
});

static CONCLUSION_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:\d+(?:\.\d+)*(?:\.[ \t]*|[ \t]+)[A-Z]|(?i:acknowledge?ments?|references|bibliography|appendix)\b)")
        .expect("conclusion terminator regex")
});

static DISCUSSION_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:\d+(?:\.\d+)*(?:\.[ \t]*|[ \t]+)[A-Z]|(?i:conclusions?|concluding remarks|acknowledge?ments?|references|bibliography|appendix)\b)")
        .expect("discussion terminator regex")
});

static ABSTRACT_RULES: Lazy<Vec<SectionRule>> = Lazy::new(|| {
    vec![
        // "Abstract" on its own line
        rule(r"(?im)^[ \t]*abstract[ \t]*\r?\n", &ABSTRACT_END),
        // "Abstract - ...", "Abstract: ...", "Abstract. ..."
        rule(r"(?im)^[ \t]*abstract[ \t]*[-–—:.][ \t]*", &ABSTRACT_END),
        // "Abstract We propose ..."
        rule(r"(?m)^[ \t]*(?:Abstract|ABSTRACT)[ \t]+", &ABSTRACT_END),
    ]
});

static CONCLUSION_RULES: Lazy<Vec<SectionRule>> = Lazy::new(|| {
    vec![
        rule(
            r"(?im)^[ \t]*(?:\d+(?:\.\d+)*\.?[ \t]*)?(?:conclusions?(?:[ \t]+and[ \t]+(?:limitations|future[ \t]+work|outlook))?|concluding[ \t]+remarks)[ \t]*\r?\n",
            &CONCLUSION_END,
        ),
        rule(
            r"(?im)^[ \t]*(?:\d+(?:\.\d+)*\.?[ \t]*)?(?:conclusions?|concluding[ \t]+remarks)[ \t]*[:.][ \t]*",
            &CONCLUSION_END,
        ),
    ]
});

static DISCUSSION_RULES: Lazy<Vec<SectionRule>> = Lazy::new(|| {
    vec![
        rule(
            r"(?im)^[ \t]*(?:\d+(?:\.\d+)*\.?[ \t]*)?discussion(?:[ \t]+and[ \t]+(?:future[ \t]+work|analysis))?[ \t]*\r?\n",
            &DISCUSSION_END,
        ),
        rule(r"(?im)^[ \t]*(?:\d+(?:\.\d+)*\.?[ \t]*)?discussion[ \t]*[:.][ \t]*", &DISCUSSION_END),
    ]
});

/// Lines that are never a title.
static NOT_A_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:arxiv:|abstract\b|introduction\b|contents\b|preprint\b|under review\b|published as\b|https?://|page \d)")
        .expect("title filter regex")
});

fn find_section(text: &str, rules: &[SectionRule]) -> Option<String> {
    rules.iter().find_map(|rule| {
        let start = rule.heading.find(text)?.end();
        let rest = &text[start..];
        let end = rule.end.find(rest).map(|m| m.start()).unwrap_or(rest.len());
        let section = collapse_whitespace(&rest[..end]);
        (section.chars().count() > MIN_SECTION_CHARS).then_some(section)
    })
}

pub fn find_abstract(text: &str) -> Option<String> {
    find_section(text, &ABSTRACT_RULES)
}

/// Conclusion section, falling back to the discussion.
pub fn find_conclusion(text: &str) -> Option<String> {
    find_section(text, &CONCLUSION_RULES).or_else(|| find_section(text, &DISCUSSION_RULES))
}

/// First line of 10–300 characters that is not a heading or banner.
pub fn find_title(text: &str) -> Option<String> {
    text.lines()
        .map(collapse_whitespace)
        .filter(|line| (10..=300).contains(&line.chars().count()))
        .find(|line| !NOT_A_TITLE.is_match(line))
}

/// Derive the record for `item` from its text.
pub fn extract_record(text: &str, item: &CandidateItem) -> Result<ExtractedRecord, ExtractionError> {
    let record = ExtractedRecord {
        title: find_title(text).or_else(|| item.title.clone()),
        authors: (!item.authors.is_empty()).then(|| item.authors.iter().unique().cloned().collect()),
        abstract_text: find_abstract(text),
        conclusion: find_conclusion(text),
    };
    if !record.has_required_fields() {
        return Err(ExtractionError::NoFields);
    }
    Ok(record)
}

/// Extract fields for every `Parsed` item. With `force`, items that already
/// passed this stage (`Extracted` or `Summarized`) are re-derived from their
/// stored text and keep their stage.
#[instrument(level = "info", skip_all, fields(force = force))]
pub async fn extract_fields(store: &StateStore, force: bool) -> Result<StageReport, StoreError> {
    let mut items: Vec<CandidateItem> = store.list_items(StageFilter::At(Stage::Parsed)).await.collect();
    if force {
        items.extend(store.list_items(StageFilter::AtOrAbove(Stage::Extracted)).await);
    }
    info!(count = items.len(), "Extracting fields");

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let id = item.id.clone();
        results.push((id, extract_one(store, item).await));
    }

    let report = StageReport::tally(StageName::Extract, results)?;
    info!(%report, "Field extraction complete");
    Ok(report)
}

async fn extract_one(store: &StateStore, item: CandidateItem) -> Result<ItemOutcome, StoreError> {
    let refresh = item.current_stage != Stage::Parsed;
    let record = match &item.text_path {
        Some(path) => match tokio::fs::read_to_string(path).await {
            Ok(text) => extract_record(&text, &item),
            Err(_) => Err(ExtractionError::MissingArtifact(path.clone())),
        },
        None => Err(ExtractionError::MissingArtifact(item.content_hash.clone().into())),
    };

    match record {
        Ok(record) => {
            debug!(
                id = %item.id,
                has_abstract = record.abstract_text.is_some(),
                has_conclusion = record.conclusion.is_some(),
                "Extracted fields"
            );
            if refresh {
                store.refresh(&item.id, ArtifactRef::Record(record)).await?;
            } else {
                store.advance(&item.id, Stage::Extracted, ArtifactRef::Record(record)).await?;
            }
            Ok(ItemOutcome::Succeeded)
        }
        Err(e) if refresh => {
            warn!(id = %item.id, error = %e, "Re-extraction failed; keeping previous record");
            Ok(ItemOutcome::Failed)
        }
        Err(e) => {
            warn!(id = %item.id, error = %e, "Field extraction failed");
            store.mark_failed(&item.id, &e.to_string()).await?;
            Ok(ItemOutcome::Failed)
        }
    }
}
