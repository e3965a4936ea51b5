//! Error taxonomy for the pipeline.
//!
//! Errors fall into two groups:
//!
//! - **Per-item / per-source errors** ([`SourceFetchError`], [`RetrievalError`],
//!   [`ExtractionError`], [`CapabilityError`]). These are caught at the stage
//!   boundary, recorded against the item, and never abort a run.
//! - **Run-level errors** ([`StoreError`] corruption and I/O, [`ConfigError`]).
//!   These propagate to the orchestrator and `main`, which exits non-zero.

use crate::models::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// A whole feed source could not be fetched or parsed. The source is skipped.
#[derive(Debug, Error)]
pub enum SourceFetchError {
    #[error("feed request failed: {0}")]
    Http(#[from] HttpError),

    #[error("feed returned HTTP {status}")]
    Status { status: u16 },

    #[error("malformed feed: {0}")]
    Malformed(String),
}

/// Transport-level failure from a [`crate::http::Fetcher`].
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::Timeout
        } else if err.is_connect() {
            HttpError::Connect(err.to_string())
        } else if err.is_builder() {
            HttpError::InvalidUrl(err.to_string())
        } else {
            HttpError::Other(err.to_string())
        }
    }
}

/// Document retrieval failure, split by whether a later run could succeed.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("transient retrieval failure: {0}")]
    Transient(String),

    #[error("permanent retrieval failure: {0}")]
    Permanent(String),
}

impl RetrievalError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, RetrievalError::Permanent(_))
    }
}

/// Text or field extraction failure. Malformed documents do not improve with
/// retry, so these are terminal for the item.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unreadable document: {0}")]
    Unreadable(String),

    #[error("document produced no text")]
    Empty,

    #[error("no required fields found (abstract, conclusion)")]
    NoFields,

    #[error("artifact missing: {}", .0.display())]
    MissingArtifact(PathBuf),
}

/// The external summarization capability failed (quota, timeout, empty answer).
#[derive(Debug, Error)]
#[error("summarizer failed: {0}")]
pub struct CapabilityError(pub String);

/// State store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store corrupted at {}: {reason}", path.display())]
    Corruption { path: PathBuf, reason: String },

    #[error("state store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("item {id} is at {current:?}; cannot advance to {requested:?}")]
    StaleStage {
        id: String,
        current: Stage,
        requested: Stage,
    },

    #[error("item {id} is missing the artifact required at {stage:?}")]
    MissingArtifact { id: String, stage: Stage },

    #[error("item not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Whether this error must abort the run rather than being recorded
    /// against a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Corruption { .. } | StoreError::Io(_) | StoreError::Serialization(_)
        )
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("summarizer backend unavailable: {0}")]
    Summarizer(String),
}

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("artifact I/O error: {0}")]
    Artifact(#[from] std::io::Error),
}

impl PipelineError {
    /// Process exit code for this error: 2 for configuration, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Config(_) => 2,
            _ => 1,
        }
    }
}
