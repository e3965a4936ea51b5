//! Document retrieval: `Discovered` -> `Downloaded`.
//!
//! Documents are stored content-addressed as
//! `documents/<content_hash>.<pdf|html|txt>`. A document left behind by an
//! interrupted run is picked up instead of downloaded again.

use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

use crate::config::DataLayout;
use crate::error::{HttpError, RetrievalError, StoreError};
use crate::http::{FetchedBody, Fetcher};
use crate::models::{ArtifactRef, CandidateItem, DocumentKind, Stage};
use crate::pipeline::{ItemOutcome, StageName, StageReport};
use crate::store::{StageFilter, StateStore};
use crate::utils::{file_is_nonempty, write_atomic};

/// Download the document of every `Discovered` item.
#[instrument(level = "info", skip_all, fields(concurrency = concurrency))]
pub async fn retrieve_documents<F: Fetcher>(
    fetcher: &F,
    store: &StateStore,
    layout: &DataLayout,
    concurrency: usize,
    attempt_ceiling: u32,
) -> Result<StageReport, StoreError> {
    let items: Vec<CandidateItem> = store.list_items(StageFilter::At(Stage::Discovered)).await.collect();
    info!(count = items.len(), "Retrieving documents");

    let results = stream::iter(items)
        .map(|item| async move {
            let id = item.id.clone();
            let res = retrieve_one(fetcher, store, layout, attempt_ceiling, item).await;
            (id, res)
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    let report = StageReport::tally(StageName::Download, results)?;
    info!(%report, "Retrieval complete");
    Ok(report)
}

async fn retrieve_one<F: Fetcher>(
    fetcher: &F,
    store: &StateStore,
    layout: &DataLayout,
    attempt_ceiling: u32,
    item: CandidateItem,
) -> Result<ItemOutcome, StoreError> {
    if let Some(path) = existing_document(layout, &item).await {
        debug!(id = %item.id, path = %path.display(), "Reusing document on disk");
        store.advance(&item.id, Stage::Downloaded, ArtifactRef::Document(path)).await?;
        return Ok(ItemOutcome::Reused);
    }

    match download(fetcher, &item.source_url).await {
        Ok((kind, bytes)) => {
            let path = layout
                .documents_dir
                .join(format!("{}.{}", item.content_hash, kind.extension()));
            write_atomic(&path, &bytes).await?;
            store.advance(&item.id, Stage::Downloaded, ArtifactRef::Document(path)).await?;
            info!(id = %item.id, kind = kind.extension(), bytes = bytes.len(), "Downloaded document");
            Ok(ItemOutcome::Succeeded)
        }
        Err(e) if e.is_permanent() => {
            warn!(id = %item.id, url = %item.source_url, error = %e, "Retrieval failed permanently");
            store.mark_failed(&item.id, &e.to_string()).await?;
            Ok(ItemOutcome::Failed)
        }
        Err(e) => {
            let stage = store.record_failure(&item.id, &e.to_string(), attempt_ceiling).await?;
            warn!(id = %item.id, url = %item.source_url, error = %e, %stage, "Retrieval failed; will retry next run");
            Ok(if stage == Stage::Failed {
                ItemOutcome::Failed
            } else {
                ItemOutcome::Retried
            })
        }
    }
}

/// A non-empty document already on disk for `item`: the recorded path, or any
/// `documents/<content_hash>.*` left by an interrupted run.
pub async fn existing_document(layout: &DataLayout, item: &CandidateItem) -> Option<PathBuf> {
    if let Some(path) = &item.local_document_path {
        if file_is_nonempty(path).await {
            return Some(path.clone());
        }
    }
    for kind in DocumentKind::ALL {
        let path = layout
            .documents_dir
            .join(format!("{}.{}", item.content_hash, kind.extension()));
        if file_is_nonempty(&path).await {
            return Some(path);
        }
    }
    None
}

async fn download<F: Fetcher>(fetcher: &F, url: &str) -> Result<(DocumentKind, Vec<u8>), RetrievalError> {
    let body = fetcher.get(url).await.map_err(classify_transport)?;
    let kind = classify_response(&body)?;
    Ok((kind, body.bytes))
}

/// Transport failures are transient unless the URL itself is unusable.
pub fn classify_transport(err: HttpError) -> RetrievalError {
    match err {
        HttpError::InvalidUrl(_) => RetrievalError::Permanent(err.to_string()),
        _ => RetrievalError::Transient(err.to_string()),
    }
}

/// Decide what a completed response means for the item.
pub fn classify_response(body: &FetchedBody) -> Result<DocumentKind, RetrievalError> {
    match body.status {
        200..=299 => {}
        400 | 401 | 403 | 404 | 410 | 451 => {
            return Err(RetrievalError::Permanent(format!("HTTP {}", body.status)));
        }
        status => return Err(RetrievalError::Transient(format!("HTTP {status}"))),
    }
    if body.bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(RetrievalError::Permanent("empty response body".into()));
    }
    if let Some(DocumentKind::Pdf) = DocumentKind::sniff(&body.bytes) {
        return Ok(DocumentKind::Pdf);
    }
    match body.content_type.as_deref() {
        Some("application/pdf" | "application/x-pdf") => Ok(DocumentKind::Pdf),
        Some("text/html" | "application/xhtml+xml") => Ok(DocumentKind::Html),
        Some("text/plain") => Ok(DocumentKind::Text),
        None => Ok(DocumentKind::sniff(&body.bytes).unwrap_or(DocumentKind::Text)),
        Some(other) => Err(RetrievalError::Permanent(format!(
            "unsupported content type {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::fake::FakeFetcher;
    use crate::models::FeedEntry;
    use crate::store::Upsert;

    fn body(status: u16, ctype: Option<&str>, bytes: &[u8]) -> FetchedBody {
        FetchedBody {
            status,
            content_type: ctype.map(str::to_string),
            bytes: bytes.to_vec(),
        }
    }

    async fn setup(urls: &[&str]) -> (tempfile::TempDir, StateStore, DataLayout, Vec<String>) {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let store = StateStore::open(&layout.state_file).await.unwrap();
        let mut ids = Vec::new();
        for url in urls {
            let entry = FeedEntry {
                guid: None,
                title: Some("Paper".into()),
                link: Some(url.to_string()),
                document_url: None,
                published_at: None,
                authors: vec![],
            };
            let item = CandidateItem::from_entry(&entry, "test").unwrap();
            let Upsert::Inserted(id) = store.upsert_candidate(item).await.unwrap() else {
                panic!("expected insert");
            };
            ids.push(id);
        }
        (dir, store, layout, ids)
    }

    #[test]
    fn test_classify_response() {
        assert_eq!(
            classify_response(&body(200, Some("application/pdf"), b"%PDF-1.4")).unwrap(),
            DocumentKind::Pdf
        );
        // arXiv sometimes labels PDFs as octet-stream.
        assert_eq!(
            classify_response(&body(200, Some("application/octet-stream"), b"%PDF-1.5")).unwrap(),
            DocumentKind::Pdf
        );
        assert_eq!(
            classify_response(&body(200, Some("text/html"), b"<html></html>")).unwrap(),
            DocumentKind::Html
        );
        assert!(classify_response(&body(404, Some("text/html"), b"gone")).unwrap_err().is_permanent());
        assert!(classify_response(&body(410, None, b"gone")).unwrap_err().is_permanent());
        assert!(!classify_response(&body(503, None, b"busy")).unwrap_err().is_permanent());
        assert!(!classify_response(&body(429, None, b"slow down")).unwrap_err().is_permanent());
        assert!(classify_response(&body(200, Some("image/png"), b"\x89PNG")).unwrap_err().is_permanent());
        assert!(classify_response(&body(200, Some("application/pdf"), b"  ")).unwrap_err().is_permanent());
    }

    #[test]
    fn test_classify_transport() {
        assert!(!classify_transport(HttpError::Timeout).is_permanent());
        assert!(!classify_transport(HttpError::Connect("refused".into())).is_permanent());
        assert!(classify_transport(HttpError::InvalidUrl("x".into())).is_permanent());
    }

    #[tokio::test]
    async fn test_download_advances_item() {
        let (_dir, store, layout, ids) = setup(&["https://papers.test/a.pdf"]).await;
        let fetcher = FakeFetcher::new();
        fetcher.serve("https://papers.test/a.pdf", 200, "application/pdf", b"%PDF-1.4 body");

        let report = retrieve_documents(&fetcher, &store, &layout, 4, 3).await.unwrap();
        assert_eq!(report.succeeded, 1);

        let item = store.get(&ids[0]).await.unwrap();
        assert_eq!(item.current_stage, Stage::Downloaded);
        let path = item.local_document_path.unwrap();
        assert_eq!(path.extension().unwrap(), "pdf");
        assert!(path.starts_with(&layout.documents_dir));
        assert_eq!(std::fs::read(path).unwrap(), b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn test_not_found_fails_without_download() {
        let (_dir, store, layout, ids) = setup(&["https://papers.test/missing.pdf"]).await;
        let fetcher = FakeFetcher::new();

        let report = retrieve_documents(&fetcher, &store, &layout, 4, 3).await.unwrap();
        assert_eq!(report.failed, 1);

        let item = store.get(&ids[0]).await.unwrap();
        assert_eq!(item.current_stage, Stage::Failed);
        assert!(item.local_document_path.is_none());
        assert!(item.last_error.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_timeouts_hit_ceiling() {
        let (_dir, store, layout, ids) = setup(&["https://slow.test/a.pdf"]).await;
        let fetcher = FakeFetcher::new();
        fetcher.timeout("https://slow.test/a.pdf");

        for expected in [Stage::Discovered, Stage::Discovered, Stage::Failed] {
            retrieve_documents(&fetcher, &store, &layout, 4, 3).await.unwrap();
            assert_eq!(store.get(&ids[0]).await.unwrap().current_stage, expected);
        }
        // Failed items are not selected again.
        let report = retrieve_documents(&fetcher, &store, &layout, 4, 3).await.unwrap();
        assert_eq!(report.selected, 0);
        assert_eq!(fetcher.hits("https://slow.test/a.pdf"), 3);
    }

    #[tokio::test]
    async fn test_orphaned_document_is_reused() {
        let (_dir, store, layout, ids) = setup(&["https://papers.test/a.pdf"]).await;
        let item = store.get(&ids[0]).await.unwrap();
        let orphan = layout.documents_dir.join(format!("{}.pdf", item.content_hash));
        write_atomic(&orphan, b"%PDF-1.4 from last run").await.unwrap();

        let fetcher = FakeFetcher::new();
        let report = retrieve_documents(&fetcher, &store, &layout, 4, 3).await.unwrap();
        assert_eq!(report.reused, 1);
        assert_eq!(fetcher.total_hits(), 0);
        assert_eq!(store.get(&ids[0]).await.unwrap().local_document_path, Some(orphan));
    }
}
