//! HTTP fetching for sitemaps, post pages and media.
//!
//! [`Fetcher`] wraps a shared `reqwest` client. Every request races against a
//! [`CancellationToken`] so an interrupted run aborts in-flight transfers
//! instead of letting them finish into a discarded result.

use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::{Result, StackpullError};

/// HTTP client configuration for fetching pages and media.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    pub timeout: u64,
    /// Custom User-Agent string.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: 30,
            user_agent: "Mozilla/5.0 (compatible; stackpull/0.1; +https://substack.com)".to_string(),
        }
    }
}

/// Performs HTTP GET requests. No retries, no caching.
///
/// Cloning is cheap: clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    timeout: u64,
}

impl Fetcher {
    /// Builds a fetcher from the given configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(StackpullError::HttpError)?;

        Ok(Self { client, timeout: config.timeout })
    }

    /// Fetches the body of `url` as raw bytes.
    ///
    /// Returns [`StackpullError::Cancelled`] as soon as `cancel` fires, even
    /// while the request or the body transfer is still in flight.
    pub async fn fetch_bytes(&self, url: &str, cancel: &CancellationToken) -> Result<Bytes> {
        let parsed_url = parse_http_url(url)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StackpullError::Cancelled),
            result = self.get(parsed_url) => result,
        }
    }

    /// Fetches the body of `url` as UTF-8 text.
    pub async fn fetch_text(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        let bytes = self.fetch_bytes(url, cancel).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn get(&self, url: Url) -> Result<Bytes> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url.clone())
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/*;q=0.8,*/*;q=0.5",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StackpullError::HttpStatus { url: url.to_string(), status: status.as_u16() });
        }

        response.bytes().await.map_err(|e| self.map_transport_error(e))
    }

    fn map_transport_error(&self, e: reqwest::Error) -> StackpullError {
        if e.is_timeout() { StackpullError::Timeout { timeout: self.timeout } } else { StackpullError::HttpError(e) }
    }
}

/// Parses `url` and rejects anything that is not http or https.
pub(crate) fn parse_http_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| StackpullError::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(StackpullError::InvalidUrl(format!(
            "{url}: unsupported scheme {other} (expected http or https)"
        ))),
    }
}
