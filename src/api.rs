//! LLM access for the summarizer, with exponential backoff.
//!
//! - [`AskAsync`]: async text-in, response-out capability
//! - [`AskFnWrapper`]: adapts `awful_aj::api::ask` to [`AskAsync`]
//! - [`RetryAsk`]: decorator adding in-run retries to any [`AskAsync`]
//! - [`SummarizerBackend`]: the `awful_aj` config and chat template, loaded once
//!
//! In-run retries only smooth over blips. An item whose call still fails is
//! recorded against its attempt count and picked up again by the next run.

use awful_aj::api::ask;
use awful_aj::{config::AwfulJadeConfig, config_dir, template::ChatTemplate};
use rand::{Rng, rng};
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::error::ConfigError;

/// Async LLM interaction.
///
/// Implemented by the `awful_aj` client, by [`RetryAsk`] around any other
/// implementation, and by a scripted mock in tests.
pub trait AskAsync {
    /// The type of response returned by the LLM.
    type Response;

    /// Send `text` to the LLM.
    ///
    /// # Arguments
    ///
    /// * `text` - The full prompt
    ///
    /// # Returns
    ///
    /// The LLM's response, or an error if the request failed.
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Adds exponential backoff with jitter to an [`AskAsync`].
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    /// The wrapped client.
    inner: T,
    /// Retries after the first attempt.
    max_retries: usize,
    /// Delay before the first retry (doubles with each attempt).
    base_delay: StdDuration,
    /// Cap on any single delay.
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// Wrap `inner` with retries.
    ///
    /// # Arguments
    ///
    /// * `inner` - The [`AskAsync`] implementation to wrap
    /// * `max_retries` - Retries after the first attempt (0 means a single call)
    /// * `base_delay` - Delay before the first retry; doubles on each attempt
    ///
    /// The maximum delay defaults to 30 seconds; see [`RetryAsk::with_max_delay`].
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    /// Cap every backoff delay at `max_delay` (before jitter).
    pub fn with_max_delay(mut self, max_delay: StdDuration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// The wrapped client.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = if delay.is_zero() {
            0
        } else {
            rng().random_range(0..=250)
        };
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    type Response = T::Response;

    #[instrument(level = "debug", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// `awful_aj` configuration and chat template for the summarizer.
pub struct SummarizerBackend {
    pub config: AwfulJadeConfig,
    pub template: ChatTemplate,
}

impl SummarizerBackend {
    /// Load the backend config and the named chat template.
    ///
    /// # Arguments
    ///
    /// * `config_path` - `awful_aj` config file; `None` means
    ///   `<awful_aj config dir>/config.yaml`
    /// * `template_name` - Chat template name, resolved by `awful_aj`
    ///
    /// # Errors
    ///
    /// [`ConfigError::Summarizer`] when the config dir cannot be located, the
    /// path is not valid UTF-8, or the config or template fails to load.
    #[instrument(level = "info", skip_all, fields(template = template_name))]
    pub async fn load(config_path: Option<&Path>, template_name: &str) -> Result<Self, ConfigError> {
        let path: PathBuf = match config_path {
            Some(p) => p.to_path_buf(),
            None => config_dir()
                .map_err(|e| ConfigError::Summarizer(format!("no awful_aj config dir: {e}")))?
                .join("config.yaml"),
        };
        let path_str = path
            .to_str()
            .ok_or_else(|| ConfigError::Summarizer(format!("not a valid config filename: {}", path.display())))?;
        let config = awful_aj::config::load_config(path_str)
            .map_err(|e| ConfigError::Summarizer(format!("{}: {e}", path.display())))?;
        let template = awful_aj::template::load_template(template_name)
            .await
            .map_err(|e| ConfigError::Summarizer(format!("template '{template_name}': {e}")))?;
        info!(config_path = %path.display(), "Loaded summarizer backend");
        Ok(Self { config, template })
    }

    /// An [`AskAsync`] client borrowing this backend.
    pub fn client(&self) -> AskFnWrapper<'_> {
        AskFnWrapper {
            config: &self.config,
            template: &self.template,
        }
    }
}

/// [`AskAsync`] over `awful_aj::api::ask`.
pub struct AskFnWrapper<'a> {
    pub config: &'a AwfulJadeConfig,
    pub template: &'a ChatTemplate,
}

impl AskAsync for AskFnWrapper<'_> {
    type Response = String;

    #[instrument(level = "debug", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        let res = ask(self.config, text.to_string(), self.template, None, None).await;
        let dt = t0.elapsed();

        if let Err(e) = &res {
            warn!(elapsed_ms = dt.as_millis() as u64, error = %e, "API call failed");
        }
        res
    }
}
