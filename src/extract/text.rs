//! Text extraction: `Downloaded` -> `Parsed`.
//!
//! PDFs go through `lopdf` on the blocking pool, HTML through `scraper`, and
//! plain text is read as lossy UTF-8. The normalized text is written to
//! `text/<content_hash>.txt`.

use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use crate::config::DataLayout;
use crate::error::{ExtractionError, StoreError};
use crate::models::{ArtifactRef, CandidateItem, DocumentKind, Stage};
use crate::pipeline::{ItemOutcome, StageName, StageReport};
use crate::store::{StageFilter, StateStore};
use crate::utils::{normalize_text, write_atomic};

static BODY: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("body").ok());

const SKIPPED_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "template", "svg"];

/// Extract text for every `Downloaded` item. With `force`, items that already
/// passed this stage have their text regenerated in place.
#[instrument(level = "info", skip_all, fields(force = force))]
pub async fn extract_texts(
    store: &StateStore,
    layout: &DataLayout,
    concurrency: usize,
    force: bool,
) -> Result<StageReport, StoreError> {
    let mut items: Vec<CandidateItem> = store.list_items(StageFilter::At(Stage::Downloaded)).await.collect();
    if force {
        items.extend(store.list_items(StageFilter::AtOrAbove(Stage::Parsed)).await);
    }
    info!(count = items.len(), "Extracting text");

    let results = stream::iter(items)
        .map(|item| async move {
            let id = item.id.clone();
            let res = extract_one(store, layout, item).await;
            (id, res)
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    let report = StageReport::tally(StageName::Parse, results)?;
    info!(%report, "Text extraction complete");
    Ok(report)
}

async fn extract_one(
    store: &StateStore,
    layout: &DataLayout,
    item: CandidateItem,
) -> Result<ItemOutcome, StoreError> {
    let refresh = item.current_stage != Stage::Downloaded;
    let text = match &item.local_document_path {
        Some(path) => document_text(path).await,
        None => Err(ExtractionError::MissingArtifact(layout.documents_dir.join(&item.content_hash))),
    };

    let text = match text {
        Ok(text) => text,
        Err(e) if refresh => {
            warn!(id = %item.id, error = %e, "Re-extraction failed; keeping previous text");
            return Ok(ItemOutcome::Failed);
        }
        Err(e) => {
            warn!(id = %item.id, error = %e, "Text extraction failed");
            store.mark_failed(&item.id, &e.to_string()).await?;
            return Ok(ItemOutcome::Failed);
        }
    };

    let path = layout.text_path(&item.content_hash);
    write_atomic(&path, text.as_bytes()).await?;
    if refresh {
        store.refresh(&item.id, ArtifactRef::Text(path)).await?;
    } else {
        store.advance(&item.id, Stage::Parsed, ArtifactRef::Text(path)).await?;
    }
    debug!(id = %item.id, chars = text.len(), "Extracted text");
    Ok(ItemOutcome::Succeeded)
}

/// Read a stored document and return its normalized text.
pub async fn document_text(path: &Path) -> Result<String, ExtractionError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|_| ExtractionError::MissingArtifact(path.to_path_buf()))?;
    let kind = DocumentKind::from_path(path)
        .or_else(|| DocumentKind::sniff(&bytes))
        .unwrap_or(DocumentKind::Text);

    let raw = match kind {
        DocumentKind::Pdf => tokio::task::spawn_blocking(move || pdf_text(&bytes))
            .await
            .map_err(|e| ExtractionError::Unreadable(e.to_string()))??,
        DocumentKind::Html => html_text(&String::from_utf8_lossy(&bytes)),
        DocumentKind::Text => String::from_utf8_lossy(&bytes).into_owned(),
    };

    let text = normalize_text(&raw);
    if text.is_empty() {
        return Err(ExtractionError::Empty);
    }
    Ok(text)
}

/// Text of every page, in page order.
pub fn pdf_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractionError::Unreadable(e.to_string()))?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Err(ExtractionError::Empty);
    }
    doc.extract_text(&pages)
        .map_err(|e| ExtractionError::Unreadable(e.to_string()))
}

/// Visible text of an HTML document's `<body>`, one block per line.
pub fn html_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let root = BODY
        .as_ref()
        .and_then(|sel| doc.select(sel).next())
        .unwrap_or_else(|| doc.root_element());
    let mut out = String::new();
    collect_text(root, &mut out);
    out
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(e) => {
                let name = e.name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
                if matches!(name, "p" | "div" | "br" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "tr" | "section" | "article") {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}
