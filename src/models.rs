//! Data models for pipeline items and their derived artifacts.
//!
//! - [`Stage`]: the checkpoint an item has reached
//! - [`FeedEntry`]: a normalized entry parsed from a feed
//! - [`CandidateItem`]: one tracked entry, as persisted in the state store
//! - [`ExtractedRecord`]: structured fields derived from document text
//! - [`ArtifactRef`]: the artifact a stage transition attaches to an item
//! - [`SummaryRecord`]: the per-item record emitted after a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::utils::{canonical_url, content_hash};

/// Pipeline stage an item has completed.
///
/// `Discovered` through `Summarized` form a strict chain; `Failed` is terminal
/// and sits outside the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovered,
    Downloaded,
    Parsed,
    Extracted,
    Summarized,
    Failed,
}

impl Stage {
    /// The stages of the success chain, in order.
    pub const CHAIN: [Stage; 5] = [
        Stage::Discovered,
        Stage::Downloaded,
        Stage::Parsed,
        Stage::Extracted,
        Stage::Summarized,
    ];

    /// Position in the success chain; `None` for `Failed`.
    pub fn rank(self) -> Option<usize> {
        Self::CHAIN.iter().position(|s| *s == self)
    }

    /// The stage that must directly precede `self` in an `advance`.
    pub fn predecessor(self) -> Option<Stage> {
        match self.rank() {
            Some(0) | None => None,
            Some(i) => Some(Self::CHAIN[i - 1]),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Summarized | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Discovered => "discovered",
            Stage::Downloaded => "downloaded",
            Stage::Parsed => "parsed",
            Stage::Extracted => "extracted",
            Stage::Summarized => "summarized",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A normalized entry parsed from an RSS or Atom feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    /// Feed-provided identifier (`<guid>` / `<id>`), if any.
    pub guid: Option<String>,
    pub title: Option<String>,
    /// The entry's landing page.
    pub link: Option<String>,
    /// Where the document itself lives (PDF link for Atom/arXiv entries).
    pub document_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub authors: Vec<String>,
}

impl FeedEntry {
    /// URL used to retrieve the document: the explicit document link, else the
    /// entry link.
    pub fn source_url(&self) -> Option<&str> {
        self.document_url.as_deref().or(self.link.as_deref())
    }
}

/// Format of a retrieved document, recorded as its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Html,
    Text,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [DocumentKind::Pdf, DocumentKind::Html, DocumentKind::Text];

    pub fn extension(self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Html => "html",
            DocumentKind::Text => "txt",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.extension() == ext)
    }

    /// Guess the kind from the leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            return Some(DocumentKind::Pdf);
        }
        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
        let head = head.trim_start_matches('\u{feff}').trim_start();
        if head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<body") {
            return Some(DocumentKind::Html);
        }
        None
    }
}

/// Structured fields derived from an item's text.
///
/// Fields that were not found are `None` and are omitted when serialized, so
/// "not found" never looks like "found but empty".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
}

impl ExtractedRecord {
    /// True when at least one of the content fields the summarizer needs is set.
    pub fn has_required_fields(&self) -> bool {
        self.abstract_text.is_some() || self.conclusion.is_some()
    }
}

/// Artifact attached to an item by a stage transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactRef {
    /// Path of the retrieved document (Downloaded).
    Document(PathBuf),
    /// Path of the extracted plain text (Parsed).
    Text(PathBuf),
    /// Structured fields (Extracted).
    Record(ExtractedRecord),
    /// Summary text (Summarized).
    Summary(String),
}

impl ArtifactRef {
    /// The stage this artifact belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            ArtifactRef::Document(_) => Stage::Downloaded,
            ArtifactRef::Text(_) => Stage::Parsed,
            ArtifactRef::Record(_) => Stage::Extracted,
            ArtifactRef::Summary(_) => Stage::Summarized,
        }
    }
}

/// One discovered feed entry tracked through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: String,
    pub source_url: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub feed_source: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub current_stage: Stage,
    #[serde(default)]
    pub local_document_path: Option<PathBuf>,
    #[serde(default)]
    pub text_path: Option<PathBuf>,
    #[serde(default)]
    pub extracted_record: Option<ExtractedRecord>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CandidateItem {
    /// Build a fresh `Discovered` item from a feed entry.
    ///
    /// Returns `None` when the entry carries no usable URL.
    pub fn from_entry(entry: &FeedEntry, feed_source: &str) -> Option<Self> {
        let source_url = entry.source_url()?.trim().to_string();
        if source_url.is_empty() {
            return None;
        }
        let content_hash = content_hash(&canonical_url(&source_url));
        let id = entry
            .guid
            .as_deref()
            .map(item_id_from_guid)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| content_hash[..16].to_string());
        let now = Utc::now();

        Some(Self {
            id,
            source_url,
            link: entry.link.clone(),
            title: entry.title.clone(),
            authors: entry.authors.clone(),
            feed_source: feed_source.to_string(),
            published_at: entry.published_at,
            content_hash,
            current_stage: Stage::Discovered,
            local_document_path: None,
            text_path: None,
            extracted_record: None,
            summary: None,
            last_error: None,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Display title: extracted title, else feed title, else id.
    pub fn display_title(&self) -> &str {
        self.extracted_record
            .as_ref()
            .and_then(|r| r.title.as_deref())
            .or(self.title.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Derive a filesystem- and log-friendly id from a feed GUID.
///
/// arXiv GUIDs look like `http://arxiv.org/abs/2401.01234v2`; the last path
/// segment is kept. Anything outside `[A-Za-z0-9._-]` becomes `_`.
fn item_id_from_guid(guid: &str) -> String {
    let trimmed = guid.trim().trim_end_matches('/');
    let tail = trimmed.rsplit('/').next().unwrap_or(trimmed);
    tail.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(96)
        .collect()
}

/// Structured per-item record written to the summaries directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub id: String,
    pub title: String,
    pub source_url: String,
    pub feed_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub record: ExtractedRecord,
    pub summary: String,
}

impl SummaryRecord {
    pub fn from_item(item: &CandidateItem) -> Option<Self> {
        let summary = item.summary.clone()?;
        Some(Self {
            id: item.id.clone(),
            title: item.display_title().to_string(),
            source_url: item.source_url.clone(),
            feed_source: item.feed_source.clone(),
            published_at: item.published_at,
            record: item.extracted_record.clone().unwrap_or_default(),
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(guid: Option<&str>, link: &str) -> FeedEntry {
        FeedEntry {
            guid: guid.map(str::to_string),
            title: Some("A Paper".into()),
            link: Some(link.into()),
            document_url: None,
            published_at: None,
            authors: vec!["Ada Lovelace".into()],
        }
    }

    #[test]
    fn test_stage_chain() {
        assert_eq!(Stage::Downloaded.predecessor(), Some(Stage::Discovered));
        assert_eq!(Stage::Summarized.predecessor(), Some(Stage::Extracted));
        assert_eq!(Stage::Discovered.predecessor(), None);
        assert_eq!(Stage::Failed.predecessor(), None);
        assert_eq!(Stage::Failed.rank(), None);
        assert!(Stage::Failed.is_terminal());
        assert!(Stage::Summarized.is_terminal());
        assert!(!Stage::Parsed.is_terminal());
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::Summarized).unwrap();
        assert_eq!(json, "\"summarized\"");
    }

    #[test]
    fn test_item_id_from_arxiv_guid() {
        let e = entry(Some("http://arxiv.org/abs/2401.01234v2"), "http://arxiv.org/abs/2401.01234v2");
        let item = CandidateItem::from_entry(&e, "arxiv").unwrap();
        assert_eq!(item.id, "2401.01234v2");
        assert_eq!(item.current_stage, Stage::Discovered);
        assert_eq!(item.attempt_count, 0);
    }

    #[test]
    fn test_item_id_falls_back_to_hash() {
        let e = entry(None, "https://example.com/paper.pdf");
        let item = CandidateItem::from_entry(&e, "example").unwrap();
        assert_eq!(item.id.len(), 16);
        assert!(item.content_hash.starts_with(&item.id));
    }

    #[test]
    fn test_same_url_same_hash() {
        let a = CandidateItem::from_entry(&entry(None, "https://Example.com/p#top"), "x").unwrap();
        let b = CandidateItem::from_entry(&entry(None, "https://example.com/p"), "y").unwrap();
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_entry_without_url_is_skipped() {
        let e = FeedEntry {
            guid: Some("x".into()),
            title: None,
            link: None,
            document_url: None,
            published_at: None,
            authors: vec![],
        };
        assert!(CandidateItem::from_entry(&e, "x").is_none());
    }

    #[test]
    fn test_record_omits_missing_fields() {
        let record = ExtractedRecord {
            title: Some("T".into()),
            abstract_text: Some("abstract".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("abstract_text"));
        assert!(!json.contains("conclusion"));
        assert!(!json.contains("authors"));
        assert!(record.has_required_fields());
        assert!(!ExtractedRecord::default().has_required_fields());
    }

    #[test]
    fn test_document_kind_sniff_and_extension() {
        assert_eq!(DocumentKind::sniff(b"%PDF-1.7\n..."), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::sniff(b"  <!DOCTYPE html><html>"), Some(DocumentKind::Html));
        assert_eq!(DocumentKind::sniff(b"plain words"), None);
        assert_eq!(
            DocumentKind::from_path(Path::new("/d/abc.PDF")),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(DocumentKind::from_path(Path::new("/d/abc.bin")), None);
    }
}
