//! HTTP access behind a small trait so stages can run against an in-memory
//! fake in tests.
//!
//! - [`Fetcher`]: async GET returning status, content type and body
//! - [`HttpFetcher`]: the `reqwest` implementation used in production

use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::HttpError;

/// A completed HTTP response (any status).
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub status: u16,
    /// `Content-Type` without parameters, lowercased.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedBody {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Async GET. Implementors return `Ok` for any HTTP status and `Err` only for
/// transport failures.
pub trait Fetcher {
    async fn get(&self, url: &str) -> Result<FetchedBody, HttpError>;
}

/// `reqwest`-backed [`Fetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, url: &str) -> Result<FetchedBody, HttpError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(normalize_content_type);
        let bytes = resp.bytes().await?.to_vec();
        debug!(status, bytes = bytes.len(), ?content_type, "HTTP response");
        Ok(FetchedBody {
            status,
            content_type,
            bytes,
        })
    }
}

/// `"Application/PDF; charset=binary"` -> `"application/pdf"`.
pub fn normalize_content_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}
