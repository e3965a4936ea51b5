//! Pipeline configuration loaded from YAML.
//!
//! Every field has a serde default, so an empty file (or no file at all, when
//! the default path is used) yields a working configuration with no feeds.
//!
//! ```yaml
//! data_dir: ./data
//! attempt_ceiling: 3
//! download_concurrency: 4
//! feeds:
//!   - name: jepa
//!     kind: arxiv
//!     keywords: ["JEPA", "joint embedding predictive architecture"]
//!     max_results: 25
//!   - name: lab-blog
//!     kind: rss
//!     url: https://example.org/feed.xml
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::error::ConfigError;

const ARXIV_API: &str = "https://export.arxiv.org/api/query";

/// Format of a feed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Rss,
    Atom,
    /// arXiv API keyword query (Atom response).
    Arxiv,
}

/// One configured feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSource {
    pub name: String,
    pub kind: FeedKind,
    /// Feed URL (required for `rss` / `atom`).
    #[serde(default)]
    pub url: Option<String>,
    /// Query keywords, OR-ed together (`arxiv` only).
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl FeedSource {
    /// Resolve the URL to poll for this source.
    pub fn request_url(&self) -> Result<String, ConfigError> {
        match self.kind {
            FeedKind::Rss | FeedKind::Atom => self.url.clone().ok_or_else(|| {
                ConfigError::Invalid(format!("feed '{}' has no url", self.name))
            }),
            FeedKind::Arxiv => {
                if let Some(url) = &self.url {
                    return Ok(url.clone());
                }
                if self.keywords.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "arxiv feed '{}' needs keywords or a url",
                        self.name
                    )));
                }
                let query = self
                    .keywords
                    .iter()
                    .map(|k| format!("all:\"{}\"", k.trim()))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                Ok(format!(
                    "{}?search_query={}&start=0&max_results={}&sortBy=submittedDate&sortOrder=descending",
                    ARXIV_API,
                    urlencoding::encode(&query),
                    self.max_results
                ))
            }
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    /// Failures allowed per item before it is marked `Failed`.
    pub attempt_ceiling: u32,
    pub download_concurrency: usize,
    pub summarise_concurrency: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// In-run retries for each summarizer call (on top of cross-run attempts).
    pub summary_retries: usize,
    pub feeds: Vec<FeedSource>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            attempt_ceiling: 3,
            download_concurrency: 4,
            summarise_concurrency: 2,
            request_timeout_secs: 60,
            user_agent: format!("feed_digest/{}", env!("CARGO_PKG_VERSION")),
            summary_retries: 2,
            feeds: Vec::new(),
        }
    }
}

fn default_max_results() -> usize {
    25
}

impl PipelineConfig {
    /// Load configuration from `path`.
    ///
    /// When `allow_missing` is set and the file does not exist, defaults are
    /// returned instead of an error.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path, allow_missing: bool) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if allow_missing && e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config file found; using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config = Self::from_yaml(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!(feeds = config.feeds.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = if raw.trim().is_empty() {
            PipelineConfig::default()
        } else {
            serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attempt_ceiling == 0 {
            return Err(ConfigError::Invalid("attempt_ceiling must be at least 1".into()));
        }
        if self.download_concurrency == 0 || self.summarise_concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency limits must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be at least 1".into()));
        }
        let mut seen = HashSet::new();
        for feed in &self.feeds {
            if !seen.insert(feed.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate feed name '{}'", feed.name)));
            }
            feed.request_url()?;
        }
        Ok(())
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }
}

/// On-disk layout under the data directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DataLayout {
    pub root: PathBuf,
    pub state_file: PathBuf,
    pub documents_dir: PathBuf,
    pub text_dir: PathBuf,
    pub summaries_dir: PathBuf,
    pub digest_file: PathBuf,
    pub full_dump_file: PathBuf,
    pub run_log: PathBuf,
}

impl DataLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            state_file: root.join("state.json"),
            documents_dir: root.join("documents"),
            text_dir: root.join("text"),
            summaries_dir: root.join("summaries"),
            digest_file: root.join("results.txt"),
            full_dump_file: root.join("full_documents.json"),
            run_log: root.join("run.log"),
        }
    }

    /// Directories whose contents are derived artifacts, removed by `clear`.
    pub fn artifact_dirs(&self) -> [&Path; 3] {
        [&self.documents_dir, &self.text_dir, &self.summaries_dir]
    }

    pub fn text_path(&self, content_hash: &str) -> PathBuf {
        self.text_dir.join(format!("{content_hash}.txt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_is_default() {
        let config = PipelineConfig::from_yaml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.attempt_ceiling, 3);
    }

    #[test]
    fn test_parse_feeds() {
        let raw = r#"
data_dir: /tmp/fd
attempt_ceiling: 5
feeds:
  - name: jepa
    kind: arxiv
    keywords: ["JEPA", "world model"]
    max_results: 10
  - name: blog
    kind: rss
    url: https://example.org/feed.xml
"#;
        let config = PipelineConfig::from_yaml(raw).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/fd"));
        assert_eq!(config.attempt_ceiling, 5);
        assert_eq!(config.download_concurrency, 4);
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].kind, FeedKind::Arxiv);
        assert_eq!(config.feeds[1].url.as_deref(), Some("https://example.org/feed.xml"));
    }

    #[test]
    fn test_arxiv_url_is_encoded() {
        let feed = FeedSource {
            name: "jepa".into(),
            kind: FeedKind::Arxiv,
            url: None,
            keywords: vec!["JEPA".into(), "world model".into()],
            max_results: 7,
        };
        let url = feed.request_url().unwrap();
        assert!(url.starts_with(ARXIV_API));
        assert!(url.contains("max_results=7"));
        assert!(url.contains("all%3A%22JEPA%22%20OR%20all%3A%22world%20model%22"));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(PipelineConfig::from_yaml("attempt_ceiling: 0").is_err());
        assert!(PipelineConfig::from_yaml("download_concurrency: 0").is_err());
        let missing_url = "feeds:\n  - name: a\n    kind: rss\n";
        assert!(matches!(
            PipelineConfig::from_yaml(missing_url),
            Err(ConfigError::Invalid(_))
        ));
        let dup = "feeds:\n  - {name: a, kind: rss, url: 'http://x'}\n  - {name: a, kind: atom, url: 'http://y'}\n";
        assert!(PipelineConfig::from_yaml(dup).is_err());
        assert!(matches!(
            PipelineConfig::from_yaml("feeds: [[["),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yaml");
        assert!(PipelineConfig::load(&path, true).is_ok());
        assert!(matches!(
            PipelineConfig::load(&path, false),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_layout() {
        let layout = DataLayout::new(Path::new("/data"));
        assert_eq!(layout.state_file, PathBuf::from("/data/state.json"));
        assert_eq!(layout.text_path("abc"), PathBuf::from("/data/text/abc.txt"));
        assert_eq!(layout.artifact_dirs().len(), 3);
    }
}
