//! Error types for stackpull operations.
//!
//! This module defines the main error type [`StackpullError`] which represents
//! every failure the pipeline can report: fetching, sitemap and payload parsing,
//! double-encoded JSON decoding, media downloads, ledger and file I/O, and
//! cancellation.
//!
//! An already-processed post is *not* an error. The extractor reports it as
//! [`crate::Extraction::Skipped`] instead.
//!
//! # Example
//!
//! ```rust
//! use stackpull_core::{StackpullError, Result};
//!
//! fn require_slug(slug: &str) -> Result<&str> {
//!     if slug.is_empty() {
//!         return Err(StackpullError::PayloadShape("post has no slug".to_string()));
//!     }
//!     Ok(slug)
//! }
//! ```

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which of the two JSON decoding passes failed.
///
/// The post payload is a JSON string literal whose content is itself JSON, so
/// decoding happens twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// Unescaping the outer `"..."` string literal.
    Outer,
    /// Deserializing the inner `{"post": {...}}` object.
    Inner,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeStage::Outer => write!(f, "outer string literal"),
            DecodeStage::Inner => write!(f, "inner post object"),
        }
    }
}

/// Main error type for the extraction pipeline.
///
/// # Example
///
/// ```rust
/// use stackpull_core::{StackpullError, decode_post};
///
/// match decode_post(r#"{\"post\": {\"slug\""#) {
///     Ok(post) => println!("decoded {}", post.slug),
///     Err(StackpullError::Decode { stage, .. }) => println!("bad payload ({stage})"),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum StackpullError {
    /// HTTP request errors from reqwest.
    ///
    /// Covers DNS failures, refused connections, TLS problems and body read errors.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Request timeout.
    #[error("Request timed out after {timeout} seconds")]
    Timeout { timeout: u64 },

    /// The server answered with a non-success status code.
    #[error("HTTP {status} while fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The sitemap document could not be interpreted.
    #[error("Failed to parse sitemap: {0}")]
    SitemapParse(String),

    /// No script element on the page carries the post preload payload.
    ///
    /// The page is reachable but does not contain a post in the expected shape.
    #[error("No post payload found on {url}")]
    PayloadNotFound { url: String },

    /// The preload script was found but the `JSON.parse("...")` call is malformed.
    #[error("Malformed post payload: {0}")]
    PayloadShape(String),

    /// One of the two JSON decoding passes failed.
    #[error("Failed to decode {stage}: {source}")]
    Decode {
        stage: DecodeStage,
        #[source]
        source: serde_json::Error,
    },

    /// A referenced media item could not be downloaded or written.
    #[error("Failed to download media {url}: {reason}")]
    Media { url: String, reason: String },

    /// The dedup ledger could not be read or appended to.
    #[error("Ledger error at {}: {source}", path.display())]
    Ledger {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled before the operation finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// An extraction task ended without reporting a result (panicked or aborted).
    #[error("Extraction task failed: {0}")]
    Task(String),

    /// Unknown output format requested.
    #[error("Unknown format: {0}. Valid options: html, md, txt")]
    UnknownFormat(String),

    /// HTML conversion to another representation failed.
    #[error("Conversion failed: {0}")]
    Conversion(String),
}

impl StackpullError {
    /// Returns true for errors raised because the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StackpullError::Cancelled)
    }
}

/// Result type alias for StackpullError.
pub type Result<T> = std::result::Result<T, StackpullError>;
