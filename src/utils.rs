//! Utility functions for hashing, URL canonicalization, string handling, and
//! file system operations.
//!
//! This module provides helpers used throughout the pipeline:
//! - Content hashing and URL canonicalization for deduplication
//! - String truncation and whitespace normalization for logging and text
//! - Atomic file writes and artifact checks for content-addressed storage
//! - Directory validation and cleanup

use sha2::{Digest, Sha256};
use std::error::Error;
use std::fs as stdfs;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// SHA-256 of `input`, lowercase hex.
///
/// Item identities are the hash of the canonical source URL, so the same
/// link seen through two feeds maps to one item.
///
/// # Arguments
///
/// * `input` - The string to hash, usually a [`canonical_url`]
///
/// # Returns
///
/// A 64-character lowercase hexadecimal digest.
///
/// # Examples
///
/// ```ignore
/// let h = content_hash("https://example.com/a");
/// assert_eq!(h.len(), 64);
/// assert_eq!(h, content_hash("https://example.com/a"));
/// ```
pub fn content_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical form of a source URL used as the deduplication identity.
///
/// Parsing lowercases the scheme and host and drops default ports; the
/// fragment and a trailing slash are stripped. Strings that do not parse as
/// URLs are only trimmed.
///
/// # Arguments
///
/// * `raw` - The link as it appeared in the feed
///
/// # Returns
///
/// The canonical URL string.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(canonical_url("HTTPS://Example.com/a/#x"), "https://example.com/a");
/// ```
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            let path = url.path().to_string();
            if path.len() > 1 && path.ends_with('/') {
                url.set_path(path.trim_end_matches('/'));
            }
            url.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to at most `max` bytes (on a char boundary) with
/// an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Collapse runs of whitespace to a single space and trim the ends.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(collapse_whitespace("  a \t b\n c "), "a b c");
/// ```
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize extracted text: trim every line, drop runs of blank lines so at
/// most one empty line separates paragraphs.
///
/// # Arguments
///
/// * `s` - Raw text from a PDF, HTML or plain-text document
///
/// # Returns
///
/// The normalized text with no trailing newline.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(normalize_text("  Title \n\n\n\nBody  text\n"), "Title\n\nBody text");
/// ```
pub fn normalize_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut blank_run = 0usize;
    for line in s.lines() {
        let line = collapse_whitespace(line);
        if line.is_empty() {
            blank_run += 1;
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
            continue;
        }
        blank_run = 0;
        out.push_str(&line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Whether `path` exists, is a regular file, and is non-empty.
///
/// Used to decide whether a recorded artifact can be reused instead of
/// recomputed. Any metadata error counts as `false`.
pub async fn file_is_nonempty(path: &Path) -> bool {
    match fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// Sibling temp path used for atomic writes (`name.tmp`).
///
/// # Examples
///
/// ```ignore
/// assert_eq!(temp_path(Path::new("/d/state.json")), PathBuf::from("/d/state.json.tmp"));
/// ```
pub fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|name| format!("{}.tmp", name.to_string_lossy()))
        .unwrap_or_else(|| "artifact.tmp".to_string());
    tmp.set_file_name(file_name);
    tmp
}

/// Atomically write `bytes` to `path` using a temp file + fsync + rename.
///
/// Readers never observe a partially written file: either the old contents
/// (or nothing) or the complete new contents. Missing parent directories are
/// created.
///
/// # Arguments
///
/// * `path` - Destination file
/// * `bytes` - Complete new contents
///
/// # Errors
///
/// Returns the underlying [`std::io::Error`] if the parent directory cannot be
/// created or the temp file cannot be written, synced or renamed. The
/// destination is left untouched in that case.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    let tmp = temp_path(path);
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await
}

/// Remove every entry inside `dir`, keeping the directory itself.
///
/// A missing directory is not an error.
///
/// # Arguments
///
/// * `dir` - Directory to empty
///
/// # Returns
///
/// The number of entries removed. Subdirectories count once.
///
/// # Errors
///
/// Returns the first I/O error other than `NotFound`.
#[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
pub async fn clear_directory(dir: &Path) -> std::io::Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Directory not found; nothing to clear");
            return Ok(0);
        }
        Err(e) => return Err(e),
    };

    let mut count = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let res = if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        match res {
            Ok(()) => count += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete artifact");
                return Err(e);
            }
        }
    }
    info!(count, "Cleared directory");
    Ok(count)
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a scratch file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    if let Err(e) = fs::create_dir_all(path).await {
        return Err(Box::new(e));
    }
    // Try a small sync write using std fs (simpler error surface)
    let scratch = path.join("..__write_check__");
    match stdfs::File::create(&scratch) {
        Ok(_) => {
            let _ = stdfs::remove_file(&scratch);
            debug!("Directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_char_boundary() {
        let s = "é".repeat(10);
        let result = truncate_for_log(&s, 3);
        assert!(result.starts_with('é'));
        assert!(result.contains("bytes)"));
    }

    #[test]
    fn test_content_hash_is_stable_hex() {
        let a = content_hash("https://example.com/a");
        let b = content_hash("https://example.com/a");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, content_hash("https://example.com/b"));
    }

    #[test]
    fn test_canonical_url() {
        assert_eq!(
            canonical_url("HTTPS://Example.COM/papers/1/#section"),
            "https://example.com/papers/1"
        );
        assert_eq!(canonical_url("  https://example.com/a  "), "https://example.com/a");
        assert_eq!(canonical_url("not a url"), "not a url");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b  c "), "a b c");
    }

    #[test]
    fn test_normalize_text() {
        let raw = "  Title  \n\n\n\nFirst   line\nsecond\n\n  \n";
        assert_eq!(normalize_text(raw), "Title\n\nFirst line\nsecond");
    }

    #[tokio::test]
    async fn test_write_atomic_and_nonempty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/file.txt");
        assert!(!file_is_nonempty(&path).await);

        write_atomic(&path, b"hello").await.unwrap();
        assert!(file_is_nonempty(&path).await);
        assert!(!temp_path(&path).exists());

        write_atomic(&path, b"").await.unwrap();
        assert!(!file_is_nonempty(&path).await);
    }

    #[tokio::test]
    async fn test_clear_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("docs");
        write_atomic(&root.join("a.pdf"), b"x").await.unwrap();
        write_atomic(&root.join("sub/b.txt"), b"y").await.unwrap();

        let removed = clear_directory(&root).await.unwrap();
        assert_eq!(removed, 2);
        assert!(root.exists());
        assert_eq!(stdfs::read_dir(&root).unwrap().count(), 0);

        let missing = dir.path().join("missing");
        assert_eq!(clear_directory(&missing).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ensure_writable_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        ensure_writable_dir(&target).await.unwrap();
        assert!(target.is_dir());
        assert_eq!(stdfs::read_dir(&target).unwrap().count(), 0);
    }

    #[test]
    fn test_temp_path_is_sibling() {
        assert_eq!(
            temp_path(Path::new("/d/state.json")),
            PathBuf::from("/d/state.json.tmp")
        );
    }
}
