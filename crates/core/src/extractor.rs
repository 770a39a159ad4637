//! Post extraction and the concurrent batch runner.
//!
//! [`Extractor`] ties the pipeline together: ledger check, page fetch, payload
//! decode, media download and URL rewriting. A single post goes through
//! [`Extractor::extract_post`]; many posts go through [`Extractor::run_all`],
//! which fans out over a bounded number of tasks and streams one
//! [`ExtractResult`] per input URL back to the caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use stackpull_core::{ExtractResult, Extractor, ExtractorConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> stackpull_core::Result<()> {
//! let config = ExtractorConfig::builder().output_dir("posts").concurrency(4).build();
//! let extractor = Extractor::new(config)?;
//!
//! let urls = vec!["https://example.substack.com/p/hello".to_string()];
//! let mut run = extractor.run_all(urls, CancellationToken::new());
//! while let Some(result) = run.next().await {
//!     if let ExtractResult::Failed { url, error } = result {
//!         eprintln!("{url}: {error}");
//!     }
//! }
//! let summary = run.finish().await?;
//! println!("{} downloaded", summary.completed);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::fetch::{FetchConfig, Fetcher};
use crate::filter::DateFilter;
use crate::ledger::Ledger;
use crate::media::{MediaPolicy, download_media, extract_media_urls, rewrite_media_urls};
use crate::payload::extract_post_from_html;
use crate::post::{OutputFormat, Post, post_id};
use crate::sitemap;
use crate::{Result, StackpullError};

/// Default ledger file name, relative to the working directory.
pub const DEFAULT_LEDGER_FILE: &str = "downloaded_posts.log";

/// Default number of posts processed at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Configuration for an [`Extractor`].
///
/// ```rust
/// use stackpull_core::{ExtractorConfig, MediaPolicy};
///
/// let config = ExtractorConfig::builder()
///     .output_dir("archive")
///     .force(true)
///     .media_policy(MediaPolicy::BestEffort)
///     .build();
/// assert_eq!(config.concurrency, 8);
/// ```
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Root directory; each post lands in `<output_dir>/<slug>/` (default: `.`).
    pub output_dir: PathBuf,

    /// Path of the dedup ledger (default: `downloaded_posts.log`).
    pub ledger_path: PathBuf,

    /// Re-download posts already listed in the ledger (default: false).
    pub force: bool,

    /// Maximum number of posts in flight during a batch (default: 8).
    pub concurrency: usize,

    /// Handling of individual media download failures (default: fail fast).
    pub media_policy: MediaPolicy,

    /// Render each extracted post to `<output_dir>/<slug>/<slug>.<ext>` before
    /// recording it (default: none, the caller handles output).
    pub output_format: Option<OutputFormat>,

    /// HTTP settings shared by page and media requests.
    pub fetch: FetchConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_FILE),
            force: false,
            concurrency: DEFAULT_CONCURRENCY,
            media_policy: MediaPolicy::default(),
            output_format: None,
            fetch: FetchConfig::default(),
        }
    }
}

impl ExtractorConfig {
    /// Creates a new builder for ExtractorConfig.
    pub fn builder() -> ExtractorConfigBuilder {
        ExtractorConfigBuilder::new()
    }
}

/// Builder for ExtractorConfig.
pub struct ExtractorConfigBuilder {
    config: ExtractorConfig,
}

impl ExtractorConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self { config: ExtractorConfig::default() }
    }

    /// Sets the output root directory.
    pub fn output_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.config.output_dir = value.into();
        self
    }

    /// Sets the ledger file path.
    pub fn ledger_path(mut self, value: impl Into<PathBuf>) -> Self {
        self.config.ledger_path = value.into();
        self
    }

    /// Sets whether ledger hits are downloaded again.
    pub fn force(mut self, value: bool) -> Self {
        self.config.force = value;
        self
    }

    /// Sets the batch concurrency. Zero is treated as one.
    pub fn concurrency(mut self, value: usize) -> Self {
        self.config.concurrency = value.max(1);
        self
    }

    /// Sets the media failure policy.
    pub fn media_policy(mut self, value: MediaPolicy) -> Self {
        self.config.media_policy = value;
        self
    }

    /// Sets the format posts are written in.
    pub fn output_format(mut self, value: OutputFormat) -> Self {
        self.config.output_format = Some(value);
        self
    }

    /// Sets the HTTP configuration.
    pub fn fetch(mut self, value: FetchConfig) -> Self {
        self.config.fetch = value;
        self
    }

    /// Builds the config.
    pub fn build(self) -> ExtractorConfig {
        self.config
    }
}

impl Default for ExtractorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a post was not extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The post id is already in the ledger.
    AlreadyProcessed,
    /// The page payload decoded but carried no post (empty slug).
    NoPost,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyProcessed => write!(f, "already downloaded"),
            SkipReason::NoPost => write!(f, "no post on page"),
        }
    }
}

/// Outcome of extracting a single post.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// The post, with its body pointing at locally stored media.
    Extracted(Post),
    /// Nothing was extracted, and that is not an error.
    Skipped(SkipReason),
}

/// One entry of a batch result stream.
#[derive(Debug)]
pub enum ExtractResult {
    Completed(Box<Post>),
    Skipped { url: String, reason: SkipReason },
    Failed { url: String, error: StackpullError },
}

impl ExtractResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExtractResult::Completed(_))
    }
}

/// Counters reported once a batch has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Ids newly appended to the ledger.
    pub recorded: usize,
}

impl BatchSummary {
    fn count(&mut self, result: &ExtractResult) {
        match result {
            ExtractResult::Completed(_) => self.completed += 1,
            ExtractResult::Skipped { .. } => self.skipped += 1,
            ExtractResult::Failed { .. } => self.failed += 1,
        }
    }
}

/// Handle on a running batch.
///
/// Results arrive in completion order. Once the stream is drained,
/// [`BatchRun::finish`] reports the summary, or the error raised while
/// committing completed ids to the ledger.
pub struct BatchRun {
    results: mpsc::Receiver<ExtractResult>,
    handle: JoinHandle<Result<BatchSummary>>,
}

impl BatchRun {
    /// Waits for the next result; `None` once every URL has been reported.
    pub async fn next(&mut self) -> Option<ExtractResult> {
        self.results.recv().await
    }

    /// Waits for the coordinator and returns the batch summary.
    pub async fn finish(self) -> Result<BatchSummary> {
        drop(self.results);
        self.handle.await.map_err(|e| StackpullError::Task(e.to_string()))?
    }

    /// Drains every result, then finishes.
    pub async fn collect(mut self) -> Result<(Vec<ExtractResult>, BatchSummary)> {
        let mut results = Vec::new();
        while let Some(result) = self.next().await {
            results.push(result);
        }
        let summary = self.finish().await?;
        Ok((results, summary))
    }
}

/// Extracts posts and keeps the ledger in sync.
///
/// Cloning is cheap; clones share the HTTP client and the in-memory ledger.
#[derive(Clone)]
pub struct Extractor {
    fetcher: Fetcher,
    ledger: Arc<RwLock<Ledger>>,
    config: Arc<ExtractorConfig>,
}

impl Extractor {
    /// Builds an extractor and loads the ledger. A ledger that cannot be read aborts.
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let fetcher = Fetcher::new(&config.fetch)?;
        Self::with_fetcher(config, fetcher)
    }

    /// Builds an extractor around an existing fetcher.
    pub fn with_fetcher(config: ExtractorConfig, fetcher: Fetcher) -> Result<Self> {
        let ledger = Ledger::load(&config.ledger_path)?;
        Ok(Self { fetcher, ledger: Arc::new(RwLock::new(ledger)), config: Arc::new(config) })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Root directory posts are written under.
    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Returns true if `id` is in the ledger.
    pub fn is_processed(&self, id: &str) -> bool {
        self.ledger_read().contains(id)
    }

    /// Lists the post URLs of a publication, using this extractor's fetcher.
    pub async fn discover(
        &self,
        base: &str,
        filter: Option<&DateFilter>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        sitemap::discover(&self.fetcher, base, filter, cancel).await
    }

    /// Extracts one post and records it in the ledger right away.
    #[instrument(level = "info", skip_all, fields(url = %url))]
    pub async fn extract_post(&self, url: &str, cancel: &CancellationToken) -> Result<Extraction> {
        let id = post_id(url);
        let extraction = self.extract_uncommitted(url, id.as_deref(), cancel).await?;

        if matches!(extraction, Extraction::Extracted(_))
            && let Some(id) = id
        {
            self.commit(vec![id]).await?;
        }

        Ok(extraction)
    }

    /// Extracts every URL with at most `concurrency` posts in flight.
    ///
    /// Exactly one [`ExtractResult`] is delivered per input URL. Ids of
    /// completed posts are appended to the ledger in one batch after all
    /// tasks have finished.
    pub fn run_all(&self, urls: Vec<String>, cancel: CancellationToken) -> BatchRun {
        let (tx, results) = mpsc::channel(urls.len().max(1));
        let extractor = self.clone();
        let handle = tokio::spawn(async move { extractor.coordinate(urls, tx, cancel).await });
        BatchRun { results, handle }
    }

    #[instrument(level = "info", skip_all, fields(urls = urls.len()))]
    async fn coordinate(
        self,
        urls: Vec<String>,
        tx: mpsc::Sender<ExtractResult>,
        cancel: CancellationToken,
    ) -> Result<BatchSummary> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut task_urls = HashMap::new();
        let mut summary = BatchSummary::default();
        let mut new_ids = Vec::new();

        for url in urls {
            let id = post_id(&url);
            if let Some(id) = &id
                && !self.config.force
                && self.is_processed(id)
            {
                debug!(%url, "Already in ledger");
                let result = ExtractResult::Skipped { url, reason: SkipReason::AlreadyProcessed };
                summary.count(&result);
                // The receiver may already be gone; the summary still counts it.
                let _ = tx.send(result).await;
                continue;
            }

            let extractor = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let task_url = url.clone();
            let handle = tasks.spawn(async move {
                let result = extractor.run_one(task_url, id.as_deref(), &semaphore, &cancel).await;
                let completed_id = if result.is_completed() { id } else { None };
                (result, completed_id)
            });
            task_urls.insert(handle.id(), url);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let result = match joined {
                Ok((task_id, (result, completed_id))) => {
                    task_urls.remove(&task_id);
                    new_ids.extend(completed_id);
                    result
                }
                Err(e) => {
                    error!(error = %e, "Extraction task did not finish");
                    let url = task_urls.remove(&e.id()).unwrap_or_default();
                    ExtractResult::Failed { url, error: StackpullError::Task(e.to_string()) }
                }
            };
            summary.count(&result);
            let _ = tx.send(result).await;
        }

        summary.recorded = self.commit(new_ids).await?;
        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            recorded = summary.recorded,
            "Batch finished"
        );
        drop(tx);
        Ok(summary)
    }

    async fn run_one(
        &self,
        url: String,
        id: Option<&str>,
        semaphore: &Semaphore,
        cancel: &CancellationToken,
    ) -> ExtractResult {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StackpullError::Cancelled),
            permit = semaphore.acquire() => permit.map_err(|e| StackpullError::Task(e.to_string())),
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(error) => return ExtractResult::Failed { url, error },
        };

        match self.extract_uncommitted(&url, id, cancel).await {
            Ok(Extraction::Extracted(post)) => ExtractResult::Completed(Box::new(post)),
            Ok(Extraction::Skipped(reason)) => ExtractResult::Skipped { url, reason },
            Err(error) => {
                debug!(%url, %error, "Extraction failed");
                ExtractResult::Failed { url, error }
            }
        }
    }

    /// Runs the pipeline for one URL without touching the ledger.
    async fn extract_uncommitted(&self, url: &str, id: Option<&str>, cancel: &CancellationToken) -> Result<Extraction> {
        if let Some(id) = id
            && !self.config.force
            && self.is_processed(id)
        {
            debug!(%url, "Already in ledger");
            return Ok(Extraction::Skipped(SkipReason::AlreadyProcessed));
        }

        let html = self.fetcher.fetch_text(url, cancel).await?;
        let mut post = extract_post_from_html(url, &html)?;

        if !post.is_found() {
            debug!(%url, "Page payload carries no post");
            return Ok(Extraction::Skipped(SkipReason::NoPost));
        }
        check_slug(&post.slug)?;

        let media_urls = extract_media_urls(&post.body_html);
        let post_dir = post.output_dir(&self.config.output_dir);
        let media = download_media(&self.fetcher, &media_urls, &post_dir, self.config.media_policy, cancel).await?;
        post.body_html = rewrite_media_urls(&post.body_html, &media);

        if let Some(format) = self.config.output_format {
            let path = post.output_path(&self.config.output_dir, format);
            let content = post.render(format)?;
            tokio::fs::create_dir_all(&post_dir).await?;
            tokio::fs::write(&path, content).await?;
            debug!(path = %path.display(), "Wrote post");
        }

        info!(slug = %post.slug, media = media.len(), "Extracted post");
        Ok(Extraction::Extracted(post))
    }

    /// Appends `ids` to the ledger file on the blocking pool.
    async fn commit(&self, ids: Vec<String>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || {
            let mut ledger = ledger.write().unwrap_or_else(PoisonError::into_inner);
            ledger.record(ids)
        })
        .await
        .map_err(|e| StackpullError::Task(e.to_string()))?
    }

    fn ledger_read(&self) -> RwLockReadGuard<'_, Ledger> {
        self.ledger.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The slug names a directory under the output root, so it must be a single
/// plain path component.
fn check_slug(slug: &str) -> Result<()> {
    if slug == "." || slug == ".." || slug.contains(['/', '\\']) {
        return Err(StackpullError::PayloadShape(format!("unusable post slug {slug:?}")));
    }
    Ok(())
}
