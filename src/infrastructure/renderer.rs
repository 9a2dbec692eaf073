//! Page rendering collaborator
//!
//! The pipeline only needs "give me the document at this URL once it is
//! ready". `HttpRenderer` answers that with plain HTTP requests and treats a
//! response as ready when the stage's ready selector matches. A browser
//! backend can implement [`Renderer`] without touching the pipeline.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use scraper::{Html, Selector};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::infrastructure::config::RendererConfig;

/// One render call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub url: String,
    /// CSS selector that must match before the document counts as rendered
    pub ready_selector: String,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Scroll the page to trigger lazy-loaded content
    pub scroll: bool,
}

impl RenderRequest {
    pub fn new(url: impl Into<String>, ready_selector: impl Into<String>, config: &RendererConfig) -> Self {
        Self {
            url: url.into(),
            ready_selector: ready_selector.into(),
            timeout: Duration::from_secs(config.timeout_secs),
            scroll: config.scroll,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid ready selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Ready selector '{selector}' never matched on {url}")]
    NotReady { url: String, selector: String },

    #[error("Gave up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<RenderError>,
    },
}

impl RenderError {
    /// Whether another attempt within the same claim may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidUrl { .. } | Self::InvalidSelector { .. } | Self::Exhausted { .. } => false,
            Self::HttpStatus { status, .. } => !matches!(status, 400 | 401 | 404 | 410),
            Self::Request { .. } | Self::Timeout { .. } | Self::NotReady { .. } => true,
        }
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Returns the fully rendered document, or fails after the renderer's
    /// bounded retry budget is spent
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError>;
}

/// reqwest-based renderer with bounded retries and exponential backoff
pub struct HttpRenderer {
    client: Client,
    max_attempts: u32,
    backoff_base: Duration,
    user_agent: String,
}

impl HttpRenderer {
    pub fn new(config: &RendererConfig) -> anyhow::Result<Self> {
        if config.user_agents.is_empty() {
            anyhow::bail!("At least one user agent is required");
        }
        let user_agent = config.user_agents[fastrand::usize(..config.user_agents.len())].clone();

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&user_agent).context("Invalid user agent")?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("es-AR,es;q=0.9,en;q=0.8"));

        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        info!(user_agent = %user_agent, "HTTP renderer ready");
        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            user_agent,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Exponential backoff with up to 50% jitter
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_base * 2_u32.saturating_pow(attempt.saturating_sub(1));
        let jitter_ms = fastrand::u64(0..=(base.as_millis() as u64) / 2);
        base + Duration::from_millis(jitter_ms)
    }

    async fn attempt(&self, request: &RenderRequest, ready: &Selector) -> Result<String, RenderError> {
        let response = self
            .client
            .get(&request.url)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(request, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::HttpStatus {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(request, &e))?;

        if !document_matches(&body, ready) {
            return Err(RenderError::NotReady {
                url: request.url.clone(),
                selector: request.ready_selector.clone(),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
        Url::parse(&request.url).map_err(|e| RenderError::InvalidUrl {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;
        let ready = Selector::parse(&request.ready_selector).map_err(|e| RenderError::InvalidSelector {
            selector: request.ready_selector.clone(),
            reason: e.to_string(),
        })?;

        if request.scroll {
            debug!(url = %request.url, "Scroll requested; plain HTTP rendering has nothing to scroll");
        }

        let mut attempt = 1;
        loop {
            match self.attempt(request, &ready).await {
                Ok(body) => {
                    if attempt > 1 {
                        info!(url = %request.url, attempt, "Rendered after retry");
                    }
                    return Ok(body);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RenderError::Exhausted {
                        url: request.url.clone(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        url = %request.url,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Render attempt failed, retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn classify_reqwest_error(request: &RenderRequest, error: &reqwest::Error) -> RenderError {
    if error.is_timeout() {
        RenderError::Timeout {
            url: request.url.clone(),
            timeout: request.timeout,
        }
    } else {
        RenderError::Request {
            url: request.url.clone(),
            message: error.to_string(),
        }
    }
}

/// `Html` is not `Send`, so the check stays in a synchronous helper
fn document_matches(body: &str, ready: &Selector) -> bool {
    Html::parse_document(body).select(ready).next().is_some()
}
