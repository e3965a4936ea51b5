//! Feed fetching: poll every configured source and register new entries.
//!
//! Each source is fetched and parsed independently. A source that fails
//! (transport error, non-success status, malformed XML) is logged and skipped;
//! the remaining sources are still fetched. Entries are turned into
//! [`CandidateItem`]s and inserted into the state store, which ignores any
//! entry whose content hash it already knows.
//!
//! | Kind | Request | Parsing |
//! |------|---------|---------|
//! | `rss` | configured URL | RSS 2.0 / RSS 1.0 |
//! | `atom` | configured URL | Atom |
//! | `arxiv` | arXiv API keyword query | Atom with PDF links |

pub mod parse;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::config::FeedSource;
use crate::error::{SourceFetchError, StoreError};
use crate::http::Fetcher;
use crate::models::{CandidateItem, FeedEntry};
use crate::store::{StateStore, Upsert};

/// Outcome of the fetch stage.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub entries_seen: usize,
    pub new_items: usize,
}

/// Fetch every source and upsert its entries.
///
/// Only store errors escape; per-source failures are counted in the report.
#[instrument(level = "info", skip_all, fields(sources = sources.len()))]
pub async fn fetch_feeds<F: Fetcher>(
    fetcher: &F,
    store: &StateStore,
    sources: &[FeedSource],
) -> Result<FetchReport, StoreError> {
    let mut report = FetchReport::default();

    for source in sources {
        let entries = match fetch_source(fetcher, source).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(feed = %source.name, error = %e, "Feed fetch failed; skipping source");
                report.sources_failed += 1;
                continue;
            }
        };
        report.sources_ok += 1;
        report.entries_seen += entries.len();

        let mut new_items = 0usize;
        for entry in &entries {
            let Some(item) = CandidateItem::from_entry(entry, &source.name) else {
                warn!(feed = %source.name, title = ?entry.title, "Entry has no URL; skipping");
                continue;
            };
            if let Upsert::Inserted(id) = store.upsert_candidate(item).await? {
                debug!(feed = %source.name, %id, "Registered new item");
                new_items += 1;
            }
        }
        info!(
            feed = %source.name,
            entries = entries.len(),
            new_items,
            "Fetched feed"
        );
        report.new_items += new_items;
    }

    info!(
        sources_ok = report.sources_ok,
        sources_failed = report.sources_failed,
        entries = report.entries_seen,
        new_items = report.new_items,
        "Feed fetch complete"
    );
    Ok(report)
}

/// Fetch and parse one source.
#[instrument(level = "info", skip_all, fields(feed = %source.name))]
pub async fn fetch_source<F: Fetcher>(
    fetcher: &F,
    source: &FeedSource,
) -> Result<Vec<FeedEntry>, SourceFetchError> {
    let url = source
        .request_url()
        .map_err(|e| SourceFetchError::Malformed(e.to_string()))?;
    let body = fetcher.get(&url).await?;
    if !body.is_success() {
        return Err(SourceFetchError::Status {
            status: body.status,
        });
    }
    let entries = parse::parse_feed(&body.text())?;
    let limit = match source.kind {
        crate::config::FeedKind::Arxiv => source.max_results,
        _ => entries.len(),
    };
    Ok(entries.into_iter().take(limit).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedKind;
    use crate::http::fake::FakeFetcher;
    use crate::models::Stage;

    const FEED: &str = r#"<rss version="2.0"><channel>
        <item><title>A</title><link>https://example.org/a.pdf</link></item>
        <item><title>B</title><link>https://example.org/b.pdf</link></item>
        <item><title>no link</title></item>
    </channel></rss>"#;

    fn rss(name: &str, url: &str) -> FeedSource {
        FeedSource {
            name: name.into(),
            kind: FeedKind::Rss,
            url: Some(url.into()),
            keywords: vec![],
            max_results: 25,
        }
    }

    #[tokio::test]
    async fn test_fetch_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(&dir.path().join("state.json")).await.unwrap();
        let fetcher = FakeFetcher::new();
        fetcher.serve("https://feeds.test/rss", 200, "application/rss+xml", FEED.as_bytes());
        let sources = vec![rss("blog", "https://feeds.test/rss")];

        let first = fetch_feeds(&fetcher, &store, &sources).await.unwrap();
        assert_eq!(first.new_items, 2);
        assert_eq!(first.entries_seen, 3);

        let second = fetch_feeds(&fetcher, &store, &sources).await.unwrap();
        assert_eq!(second.new_items, 0);
        assert_eq!(store.len().await, 2);
        assert!(store
            .snapshot()
            .await
            .iter()
            .all(|i| i.current_stage == Stage::Discovered));
    }

    #[tokio::test]
    async fn test_failing_source_does_not_abort_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(&dir.path().join("state.json")).await.unwrap();
        let fetcher = FakeFetcher::new();
        fetcher.timeout("https://down.test/rss");
        fetcher.serve("https://broken.test/rss", 200, "text/xml", b"<rss><channel>");
        fetcher.serve("https://feeds.test/rss", 200, "text/xml", FEED.as_bytes());
        let sources = vec![
            rss("down", "https://down.test/rss"),
            rss("broken", "https://broken.test/rss"),
            rss("missing", "https://missing.test/rss"),
            rss("blog", "https://feeds.test/rss"),
        ];

        let report = fetch_feeds(&fetcher, &store, &sources).await.unwrap();
        assert_eq!(report.sources_failed, 3);
        assert_eq!(report.sources_ok, 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_same_url_across_feeds_is_one_item() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(&dir.path().join("state.json")).await.unwrap();
        let fetcher = FakeFetcher::new();
        fetcher.serve("https://one.test/rss", 200, "text/xml", FEED.as_bytes());
        fetcher.serve("https://two.test/rss", 200, "text/xml", FEED.as_bytes());
        let sources = vec![rss("one", "https://one.test/rss"), rss("two", "https://two.test/rss")];

        let report = fetch_feeds(&fetcher, &store, &sources).await.unwrap();
        assert_eq!(report.new_items, 2);
        assert!(store.snapshot().await.iter().all(|i| i.feed_source == "one"));
    }
}
