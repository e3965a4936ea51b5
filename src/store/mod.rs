//! Durable per-item checkpoint store.
//!
//! The store is one JSON document (`state.json`) holding every
//! [`CandidateItem`] keyed by id. It is loaded once per invocation and kept in
//! memory behind a [`RwLock`]. Every mutation takes the write lock, applies the
//! change, and rewrites the file atomically (temp file + fsync + rename) before
//! the lock is released, so a stage transition and the artifact reference it
//! records land on disk together or not at all.
//!
//! All item mutation goes through [`StateStore::upsert_candidate`],
//! [`StateStore::advance`], [`StateStore::refresh`],
//! [`StateStore::record_failure`] and [`StateStore::mark_failed`].

mod io;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::StoreError;
use crate::models::{ArtifactRef, CandidateItem, Stage};
use crate::utils::file_is_nonempty;
use io::{JsonRead, read_json_file, write_json_file};

const STORE_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    items: BTreeMap<String, CandidateItem>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    items: &'a BTreeMap<String, CandidateItem>,
}

#[derive(Debug, Default)]
struct StoreState {
    items: BTreeMap<String, CandidateItem>,
    /// content_hash -> id
    by_hash: HashMap<String, String>,
}

/// Which items a [`StateStore::list_items`] cursor yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFilter {
    /// Items exactly at the stage.
    At(Stage),
    /// Items at the stage or any earlier stage of the success chain.
    AtOrBelow(Stage),
    /// Items at the stage or any later stage of the success chain (never
    /// `Failed`).
    AtOrAbove(Stage),
}

impl StageFilter {
    pub fn matches(&self, stage: Stage) -> bool {
        match *self {
            StageFilter::At(s) => stage == s,
            StageFilter::AtOrBelow(s) => match (stage.rank(), s.rank()) {
                (Some(a), Some(b)) => a <= b,
                _ => stage == s,
            },
            StageFilter::AtOrAbove(s) => match (stage.rank(), s.rank()) {
                (Some(a), Some(b)) => a >= b,
                _ => stage == s,
            },
        }
    }
}

/// Result of [`StateStore::upsert_candidate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    Inserted(String),
    /// An item with the same content hash already exists (its id).
    Existing(String),
}

/// What [`StateStore::clear_all`] removed.
#[derive(Debug, Default)]
pub struct ClearReport {
    pub removed: usize,
    /// Artifact files referenced by the removed items; the caller deletes them.
    pub artifact_paths: Vec<PathBuf>,
}

/// Lazy, restartable cursor over a snapshot of the store.
///
/// Items are yielded in id order. [`ItemCursor::rewind`] restarts the
/// sequence; later store mutations are not observed.
#[derive(Debug, Clone)]
pub struct ItemCursor {
    items: Arc<Vec<CandidateItem>>,
    filter: StageFilter,
    pos: usize,
}

impl ItemCursor {
    pub fn rewind(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for ItemCursor {
    type Item = CandidateItem;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(item) = self.items.get(self.pos) {
            self.pos += 1;
            if self.filter.matches(item.current_stage) {
                return Some(item.clone());
            }
        }
        None
    }
}

/// JSON-file backed state store.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl StateStore {
    /// Open the store at `path`, creating an empty one if the file is absent.
    ///
    /// An unparsable file, an unknown format version, an entry whose key does
    /// not match its id, or a duplicated content hash is reported as
    /// [`StoreError::Corruption`].
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let corruption = |reason: String| StoreError::Corruption {
            path: path.to_path_buf(),
            reason,
        };

        let file = match read_json_file::<StoreFile>(path).await? {
            JsonRead::Missing => {
                info!("No state file; starting with an empty store");
                StoreFile {
                    version: STORE_VERSION,
                    items: BTreeMap::new(),
                }
            }
            JsonRead::Parsed(file) => file,
            JsonRead::Invalid(err) => return Err(corruption(err.to_string())),
        };

        if file.version != STORE_VERSION {
            return Err(corruption(format!(
                "unsupported store version {} (expected {})",
                file.version, STORE_VERSION
            )));
        }

        let mut by_hash = HashMap::with_capacity(file.items.len());
        for (key, item) in &file.items {
            if key != &item.id {
                return Err(corruption(format!("entry '{}' holds item '{}'", key, item.id)));
            }
            if let Some(other) = by_hash.insert(item.content_hash.clone(), key.clone()) {
                return Err(corruption(format!(
                    "items '{}' and '{}' share content hash {}",
                    other, key, item.content_hash
                )));
            }
        }

        info!(items = file.items.len(), "Loaded state store");
        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(StoreState {
                items: file.items,
                by_hash,
            }),
        })
    }

    /// Replace whatever is at `path` with an empty store, without reading it.
    ///
    /// This is the recovery path for a corrupt state file; the previous
    /// contents are discarded.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn reset(path: &Path) -> Result<(), StoreError> {
        let empty = BTreeMap::new();
        let file = StoreFileRef {
            version: STORE_VERSION,
            items: &empty,
        };
        write_json_file(path, &file).await?;
        warn!("State store reset");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let file = StoreFileRef {
            version: STORE_VERSION,
            items: &state.items,
        };
        write_json_file(&self.path, &file).await
    }

    /// Replace `id` with `item` and persist; the previous value is restored if
    /// the write fails.
    async fn commit(
        &self,
        state: &mut StoreState,
        item: CandidateItem,
    ) -> Result<CandidateItem, StoreError> {
        let id = item.id.clone();
        let previous = state.items.insert(id.clone(), item.clone());
        if let Err(e) = self.persist(state).await {
            match previous {
                Some(prev) => {
                    state.items.insert(id, prev);
                }
                None => {
                    state.items.remove(&id);
                }
            }
            return Err(e);
        }
        Ok(item)
    }

    /// Insert `item` unless an item with the same content hash exists.
    ///
    /// If the derived id is already taken by a different item, the id is
    /// suffixed with the first eight characters of the content hash.
    #[instrument(level = "debug", skip_all, fields(id = %item.id))]
    pub async fn upsert_candidate(&self, mut item: CandidateItem) -> Result<Upsert, StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.by_hash.get(&item.content_hash) {
            debug!(existing = %existing, "Content hash already known");
            return Ok(Upsert::Existing(existing.clone()));
        }
        if state.items.contains_key(&item.id) {
            let suffix = &item.content_hash[..8.min(item.content_hash.len())];
            item.id = format!("{}-{}", item.id, suffix);
        }
        item.current_stage = Stage::Discovered;
        let hash = item.content_hash.clone();
        let id = item.id.clone();
        self.commit(&mut state, item).await?;
        state.by_hash.insert(hash, id.clone());
        Ok(Upsert::Inserted(id))
    }

    /// Record that `id` completed `new_stage`, attaching `artifact`.
    ///
    /// Fails with [`StoreError::StaleStage`] unless the item sits at the
    /// immediate predecessor of `new_stage`, and with
    /// [`StoreError::MissingArtifact`] if the artifact of the current stage or
    /// the supplied artifact is missing or empty.
    #[instrument(level = "debug", skip_all, fields(%id, stage = %new_stage))]
    pub async fn advance(
        &self,
        id: &str,
        new_stage: Stage,
        artifact: ArtifactRef,
    ) -> Result<CandidateItem, StoreError> {
        let mut state = self.state.write().await;
        let mut item = state
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if new_stage.predecessor() != Some(item.current_stage) {
            return Err(StoreError::StaleStage {
                id: id.to_string(),
                current: item.current_stage,
                requested: new_stage,
            });
        }
        if !has_artifact(&item, item.current_stage).await {
            return Err(StoreError::MissingArtifact {
                id: id.to_string(),
                stage: item.current_stage,
            });
        }
        if artifact.stage() != new_stage || !artifact_is_present(&artifact).await {
            return Err(StoreError::MissingArtifact {
                id: id.to_string(),
                stage: new_stage,
            });
        }

        attach(&mut item, artifact);
        item.current_stage = new_stage;
        item.last_error = None;
        // The ceiling applies per stage.
        item.attempt_count = 0;
        item.updated_at = Utc::now();
        self.commit(&mut state, item).await
    }

    /// Replace the artifact of a stage `id` has already completed, without
    /// changing its stage. Used when an operator re-runs a stage: an item at
    /// `Summarized` can have its text, record or summary replaced.
    ///
    /// Fails with [`StoreError::StaleStage`] when the item has not reached the
    /// artifact's stage (or is `Failed`).
    #[instrument(level = "debug", skip_all, fields(%id))]
    pub async fn refresh(&self, id: &str, artifact: ArtifactRef) -> Result<CandidateItem, StoreError> {
        let mut state = self.state.write().await;
        let mut item = state
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let stage = artifact.stage();
        let reached = matches!(
            (item.current_stage.rank(), stage.rank()),
            (Some(current), Some(wanted)) if current >= wanted
        );
        if !reached {
            return Err(StoreError::StaleStage {
                id: id.to_string(),
                current: item.current_stage,
                requested: stage,
            });
        }
        if !artifact_is_present(&artifact).await {
            return Err(StoreError::MissingArtifact {
                id: id.to_string(),
                stage,
            });
        }

        attach(&mut item, artifact);
        item.last_error = None;
        item.updated_at = Utc::now();
        self.commit(&mut state, item).await
    }

    /// Record a recoverable failure: increment the attempt count and store the
    /// error, leaving the stage unchanged. Once `attempt_count` reaches
    /// `ceiling` the item is marked `Failed`. A `Summarized` item keeps its
    /// stage. Returns the resulting stage.
    #[instrument(level = "debug", skip_all, fields(%id))]
    pub async fn record_failure(&self, id: &str, error: &str, ceiling: u32) -> Result<Stage, StoreError> {
        let mut state = self.state.write().await;
        let mut item = state
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        item.attempt_count = item.attempt_count.saturating_add(1);
        item.last_error = Some(error.to_string());
        item.updated_at = Utc::now();
        if item.attempt_count >= ceiling && !item.current_stage.is_terminal() {
            warn!(attempts = item.attempt_count, ceiling, "Attempt ceiling reached; marking failed");
            item.current_stage = Stage::Failed;
        }
        let item = self.commit(&mut state, item).await?;
        Ok(item.current_stage)
    }

    /// Record a permanent failure: the item moves to `Failed` (a `Summarized`
    /// item keeps its stage).
    #[instrument(level = "debug", skip_all, fields(%id))]
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<Stage, StoreError> {
        let mut state = self.state.write().await;
        let mut item = state
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        item.attempt_count = item.attempt_count.saturating_add(1);
        item.last_error = Some(error.to_string());
        item.updated_at = Utc::now();
        if !item.current_stage.is_terminal() {
            item.current_stage = Stage::Failed;
        }
        let item = self.commit(&mut state, item).await?;
        Ok(item.current_stage)
    }

    pub async fn get(&self, id: &str) -> Option<CandidateItem> {
        self.state.read().await.items.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    /// Cursor over the items matching `filter`, in id order.
    pub async fn list_items(&self, filter: StageFilter) -> ItemCursor {
        let items: Vec<CandidateItem> = self.state.read().await.items.values().cloned().collect();
        ItemCursor {
            items: Arc::new(items),
            filter,
            pos: 0,
        }
    }

    /// Every item, in id order.
    pub async fn snapshot(&self) -> Vec<CandidateItem> {
        self.state.read().await.items.values().cloned().collect()
    }

    /// Items at `Summarized`, in id order.
    pub async fn summarized(&self) -> Vec<CandidateItem> {
        self.list_items(StageFilter::At(Stage::Summarized)).await.collect()
    }

    /// Number of items per stage, chain order then `Failed`.
    pub async fn stage_counts(&self) -> Vec<(Stage, usize)> {
        let state = self.state.read().await;
        Stage::CHAIN
            .iter()
            .chain(std::iter::once(&Stage::Failed))
            .map(|stage| {
                let n = state
                    .items
                    .values()
                    .filter(|item| item.current_stage == *stage)
                    .count();
                (*stage, n)
            })
            .collect()
    }

    /// Remove every record. The returned report lists the artifact files the
    /// removed items referenced; deleting them is the caller's job.
    #[instrument(level = "info", skip_all)]
    pub async fn clear_all(&self) -> Result<ClearReport, StoreError> {
        let mut state = self.state.write().await;
        let removed_items = std::mem::take(&mut state.items);
        let removed_hashes = std::mem::take(&mut state.by_hash);

        if let Err(e) = self.persist(&state).await {
            state.items = removed_items;
            state.by_hash = removed_hashes;
            return Err(e);
        }

        let artifact_paths = removed_items
            .values()
            .flat_map(|item| {
                item.local_document_path
                    .iter()
                    .chain(item.text_path.iter())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        let report = ClearReport {
            removed: removed_items.len(),
            artifact_paths,
        };
        info!(removed = report.removed, "Cleared state store");
        Ok(report)
    }
}

/// Whether the artifact that `stage` is defined by exists on `item`.
async fn has_artifact(item: &CandidateItem, stage: Stage) -> bool {
    match stage {
        Stage::Discovered => true,
        Stage::Downloaded => match &item.local_document_path {
            Some(p) => file_is_nonempty(p).await,
            None => false,
        },
        Stage::Parsed => match &item.text_path {
            Some(p) => file_is_nonempty(p).await,
            None => false,
        },
        Stage::Extracted => item
            .extracted_record
            .as_ref()
            .is_some_and(|r| r.has_required_fields()),
        Stage::Summarized => item.summary.as_deref().is_some_and(|s| !s.trim().is_empty()),
        Stage::Failed => false,
    }
}

async fn artifact_is_present(artifact: &ArtifactRef) -> bool {
    match artifact {
        ArtifactRef::Document(p) | ArtifactRef::Text(p) => file_is_nonempty(p).await,
        ArtifactRef::Record(r) => r.has_required_fields(),
        ArtifactRef::Summary(s) => !s.trim().is_empty(),
    }
}

fn attach(item: &mut CandidateItem, artifact: ArtifactRef) {
    match artifact {
        ArtifactRef::Document(p) => item.local_document_path = Some(p),
        ArtifactRef::Text(p) => item.text_path = Some(p),
        ArtifactRef::Record(r) => item.extracted_record = Some(r),
        ArtifactRef::Summary(s) => item.summary = Some(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractedRecord, FeedEntry};
    use crate::utils::write_atomic;

    fn item(url: &str) -> CandidateItem {
        let entry = FeedEntry {
            guid: None,
            title: Some("Title".into()),
            link: Some(url.into()),
            document_url: None,
            published_at: None,
            authors: vec![],
        };
        CandidateItem::from_entry(&entry, "test").unwrap()
    }

    async fn open_temp() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(&dir.path().join("state.json")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_hash() {
        let (_dir, store) = open_temp().await;
        let first = store.upsert_candidate(item("https://x.org/a")).await.unwrap();
        let Upsert::Inserted(id) = first else {
            panic!("expected insert");
        };
        let second = store.upsert_candidate(item("https://x.org/a#frag")).await.unwrap();
        assert_eq!(second, Upsert::Existing(id));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_id_collision_gets_suffix() {
        let (_dir, store) = open_temp().await;
        let mut a = item("https://x.org/a");
        a.id = "same".into();
        let mut b = item("https://x.org/b");
        b.id = "same".into();
        store.upsert_candidate(a).await.unwrap();
        let res = store.upsert_candidate(b.clone()).await.unwrap();
        assert_eq!(res, Upsert::Inserted(format!("same-{}", &b.content_hash[..8])));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_advance_requires_predecessor_and_artifact() {
        let (dir, store) = open_temp().await;
        let it = item("https://x.org/a");
        let id = it.id.clone();
        store.upsert_candidate(it).await.unwrap();

        // Skipping a stage is stale.
        let err = store
            .advance(&id, Stage::Parsed, ArtifactRef::Text(dir.path().join("t.txt")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleStage { .. }));

        // Missing document file.
        let doc = dir.path().join("doc.pdf");
        let err = store
            .advance(&id, Stage::Downloaded, ArtifactRef::Document(doc.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingArtifact { stage: Stage::Downloaded, .. }));

        write_atomic(&doc, b"%PDF-1.4").await.unwrap();
        let advanced = store
            .advance(&id, Stage::Downloaded, ArtifactRef::Document(doc.clone()))
            .await
            .unwrap();
        assert_eq!(advanced.current_stage, Stage::Downloaded);
        assert_eq!(advanced.local_document_path, Some(doc.clone()));

        // Duplicate advancement is rejected.
        let err = store
            .advance(&id, Stage::Downloaded, ArtifactRef::Document(doc.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleStage { .. }));

        // The current stage's artifact vanished: cannot move on.
        std::fs::remove_file(&doc).unwrap();
        let text = dir.path().join("t.txt");
        write_atomic(&text, b"text").await.unwrap();
        let err = store
            .advance(&id, Stage::Parsed, ArtifactRef::Text(text))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingArtifact { stage: Stage::Downloaded, .. }));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let id = {
            let store = StateStore::open(&path).await.unwrap();
            let it = item("https://x.org/a");
            let id = it.id.clone();
            store.upsert_candidate(it).await.unwrap();
            store.record_failure(&id, "timeout", 3).await.unwrap();
            id
        };

        let store = StateStore::open(&path).await.unwrap();
        let reloaded = store.get(&id).await.unwrap();
        assert_eq!(reloaded.attempt_count, 1);
        assert_eq!(reloaded.last_error.as_deref(), Some("timeout"));
        assert_eq!(reloaded.current_stage, Stage::Discovered);
        // Dedup index is rebuilt on load.
        let again = store.upsert_candidate(item("https://x.org/a")).await.unwrap();
        assert_eq!(again, Upsert::Existing(id));
    }

    #[tokio::test]
    async fn test_attempt_ceiling_marks_failed() {
        let (_dir, store) = open_temp().await;
        let it = item("https://x.org/a");
        let id = it.id.clone();
        store.upsert_candidate(it).await.unwrap();

        assert_eq!(store.record_failure(&id, "e1", 3).await.unwrap(), Stage::Discovered);
        assert_eq!(store.record_failure(&id, "e2", 3).await.unwrap(), Stage::Discovered);
        assert_eq!(store.record_failure(&id, "e3", 3).await.unwrap(), Stage::Failed);

        let failed = store.get(&id).await.unwrap();
        assert_eq!(failed.attempt_count, 3);
        assert_eq!(failed.last_error.as_deref(), Some("e3"));
        assert_eq!(store.list_items(StageFilter::At(Stage::Discovered)).await.count(), 0);
    }

    #[tokio::test]
    async fn test_mark_failed_is_terminal() {
        let (_dir, store) = open_temp().await;
        let it = item("https://x.org/a");
        let id = it.id.clone();
        store.upsert_candidate(it).await.unwrap();
        assert_eq!(store.mark_failed(&id, "404").await.unwrap(), Stage::Failed);
        let err = store
            .advance(&id, Stage::Downloaded, ArtifactRef::Document(PathBuf::from("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleStage { current: Stage::Failed, .. }));
    }

    #[tokio::test]
    async fn test_refresh_keeps_stage() {
        let (dir, store) = open_temp().await;
        let it = item("https://x.org/a");
        let id = it.id.clone();
        store.upsert_candidate(it).await.unwrap();
        let doc = dir.path().join("d.pdf");
        let text = dir.path().join("d.txt");
        write_atomic(&doc, b"doc").await.unwrap();
        write_atomic(&text, b"text").await.unwrap();
        store.advance(&id, Stage::Downloaded, ArtifactRef::Document(doc)).await.unwrap();
        store.advance(&id, Stage::Parsed, ArtifactRef::Text(text)).await.unwrap();
        let first = ExtractedRecord {
            abstract_text: Some("first".into()),
            ..Default::default()
        };
        store.advance(&id, Stage::Extracted, ArtifactRef::Record(first)).await.unwrap();

        let second = ExtractedRecord {
            conclusion: Some("second".into()),
            ..Default::default()
        };
        let refreshed = store.refresh(&id, ArtifactRef::Record(second.clone())).await.unwrap();
        assert_eq!(refreshed.current_stage, Stage::Extracted);
        assert_eq!(refreshed.extracted_record, Some(second));

        let err = store.refresh(&id, ArtifactRef::Summary("s".into())).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleStage { .. }));

        // Earlier artifacts of a finished item are replaced in place.
        store.advance(&id, Stage::Summarized, ArtifactRef::Summary("s".into())).await.unwrap();
        let third = ExtractedRecord {
            abstract_text: Some("third".into()),
            ..Default::default()
        };
        let refreshed = store.refresh(&id, ArtifactRef::Record(third.clone())).await.unwrap();
        assert_eq!(refreshed.current_stage, Stage::Summarized);
        assert_eq!(refreshed.extracted_record, Some(third));
        assert_eq!(refreshed.summary.as_deref(), Some("s"));
    }

    #[tokio::test]
    async fn test_advance_resets_attempt_count() {
        let (dir, store) = open_temp().await;
        let it = item("https://x.org/a");
        let id = it.id.clone();
        store.upsert_candidate(it).await.unwrap();
        store.record_failure(&id, "timeout", 3).await.unwrap();
        store.record_failure(&id, "timeout", 3).await.unwrap();

        let doc = dir.path().join("d.pdf");
        write_atomic(&doc, b"doc").await.unwrap();
        let advanced = store.advance(&id, Stage::Downloaded, ArtifactRef::Document(doc)).await.unwrap();
        assert_eq!(advanced.attempt_count, 0);

        // The next stage gets its own full allowance.
        assert_eq!(store.record_failure(&id, "bad", 3).await.unwrap(), Stage::Downloaded);
        assert_eq!(store.record_failure(&id, "bad", 3).await.unwrap(), Stage::Downloaded);
        assert_eq!(store.record_failure(&id, "bad", 3).await.unwrap(), Stage::Failed);
    }

    #[tokio::test]
    async fn test_reset_replaces_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ truncated").unwrap();
        assert!(StateStore::open(&path).await.is_err());

        StateStore::reset(&path).await.unwrap();
        assert_eq!(StateStore::open(&path).await.unwrap().len().await, 0);
    }

    #[tokio::test]
    async fn test_list_items_filters_and_rewinds() {
        let (_dir, store) = open_temp().await;
        for url in ["https://x.org/a", "https://x.org/b", "https://x.org/c"] {
            store.upsert_candidate(item(url)).await.unwrap();
        }
        let first_id = store.snapshot().await[0].id.clone();
        store.mark_failed(&first_id, "gone").await.unwrap();

        let mut cursor = store.list_items(StageFilter::AtOrBelow(Stage::Extracted)).await;
        assert_eq!(cursor.by_ref().count(), 2);
        cursor.rewind();
        let ids: Vec<_> = cursor.map(|i| i.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&first_id));
        assert_eq!(store.list_items(StageFilter::At(Stage::Failed)).await.count(), 1);
        assert_eq!(store.list_items(StageFilter::AtOrAbove(Stage::Discovered)).await.count(), 2);
        assert_eq!(store.list_items(StageFilter::AtOrAbove(Stage::Parsed)).await.count(), 0);
    }

    #[tokio::test]
    async fn test_clear_all_reports_artifacts() {
        let (dir, store) = open_temp().await;
        let it = item("https://x.org/a");
        let id = it.id.clone();
        store.upsert_candidate(it).await.unwrap();
        let doc = dir.path().join("d.pdf");
        write_atomic(&doc, b"doc").await.unwrap();
        store.advance(&id, Stage::Downloaded, ArtifactRef::Document(doc.clone())).await.unwrap();

        let report = store.clear_all().await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.artifact_paths, vec![doc]);
        assert_eq!(store.len().await, 0);

        let reopened = StateStore::open(store.path()).await.unwrap();
        assert_eq!(reopened.len().await, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let err = StateStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corruption { .. }));
        assert!(err.is_fatal());

        std::fs::write(&path, br#"{"version": 99, "items": {}}"#).unwrap();
        assert!(matches!(
            StateStore::open(&path).await.unwrap_err(),
            StoreError::Corruption { .. }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_hash_on_disk_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut a = item("https://x.org/a");
        a.id = "a".into();
        let mut b = a.clone();
        b.id = "b".into();
        let mut items = BTreeMap::new();
        items.insert("a".to_string(), a);
        items.insert("b".to_string(), b);
        let file = StoreFileRef {
            version: STORE_VERSION,
            items: &items,
        };
        std::fs::write(&path, serde_json::to_vec(&file).unwrap()).unwrap();
        assert!(matches!(
            StateStore::open(&path).await.unwrap_err(),
            StoreError::Corruption { .. }
        ));
    }
}
