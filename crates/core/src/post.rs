//! The post record and its output representations.
//!
//! A [`Post`] is decoded from the preload payload embedded in a post page.
//! Its `body_html` is the raw article fragment; the `to_*` methods turn it
//! into the format written to disk.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::formatters::{MarkdownConfig, TextConfig, convert_to_markdown, convert_to_text};
use crate::{Result, StackpullError};

static POST_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/p/([^/?#]+)").unwrap());

/// Output format for a rendered post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// The body fragment as-is, under an `<h1>` title.
    #[default]
    Html,
    /// Markdown converted from the body fragment.
    Markdown,
    /// Plain text with tags stripped.
    Text,
}

impl OutputFormat {
    /// File extension used for `<slug>.<ext>`.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Markdown => "md",
            OutputFormat::Text => "txt",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = StackpullError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "md" | "markdown" => Ok(Self::Markdown),
            "txt" | "text" => Ok(Self::Text),
            _ => Err(StackpullError::UnknownFormat(s.to_string())),
        }
    }
}

/// A post as published on the platform.
///
/// Field names follow the JSON payload. Fields the platform sends as `null`
/// decode to their default value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default, deserialize_with = "nullable")]
    pub id: u64,
    #[serde(default, deserialize_with = "nullable")]
    pub publication_id: u64,
    #[serde(rename = "type", default, deserialize_with = "nullable")]
    pub post_type: String,
    #[serde(default, deserialize_with = "nullable")]
    pub slug: String,
    #[serde(default, deserialize_with = "nullable")]
    pub post_date: String,
    #[serde(default, deserialize_with = "nullable")]
    pub canonical_url: String,
    #[serde(default)]
    pub previous_post_slug: Option<String>,
    #[serde(default)]
    pub next_post_slug: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "wordcount", default, deserialize_with = "nullable")]
    pub word_count: u64,
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub body_html: String,
}

/// The `{"post": {...}}` envelope of the preload payload.
///
/// Non-post pages carry preloads too; they decode to an empty post.
#[derive(Debug, Deserialize)]
pub(crate) struct PostWrapper {
    #[serde(default)]
    pub post: Post,
}

fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Post {
    /// Returns true if the payload actually described a post.
    pub fn is_found(&self) -> bool {
        !self.slug.is_empty()
    }

    /// Directory holding the rendered post and its media: `<root>/<slug>`.
    pub fn output_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.slug)
    }

    /// Path of the rendered post: `<root>/<slug>/<slug>.<ext>`.
    pub fn output_path(&self, root: &Path, format: OutputFormat) -> PathBuf {
        self.output_dir(root).join(format!("{}.{}", self.slug, format.extension()))
    }

    /// Returns the body as HTML, optionally under an `<h1>` title.
    pub fn to_html(&self, with_title: bool) -> String {
        if with_title {
            format!("<h1>{}</h1>\n\n{}", escape_html(&self.title), self.body_html)
        } else {
            self.body_html.clone()
        }
    }

    /// Converts the body to Markdown, rewriting video embeds into linked thumbnails.
    pub fn to_markdown(&self, with_title: bool) -> Result<String> {
        let config = MarkdownConfig { include_title_heading: with_title, rewrite_video_embeds: true };
        convert_to_markdown(&self.body_html, Some(&self.title), &config)
    }

    /// Converts the body to plain text.
    pub fn to_text(&self, with_title: bool) -> Result<String> {
        let config = TextConfig { include_title: with_title, preserve_paragraphs: true, line_width: 0 };
        convert_to_text(&self.body_html, Some(&self.title), &config)
    }

    /// Serializes the whole record as JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| StackpullError::Conversion(e.to_string()))
    }

    /// Renders the post, title included, in `format`.
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Html => Ok(self.to_html(true)),
            OutputFormat::Markdown => self.to_markdown(true),
            OutputFormat::Text => self.to_text(true),
        }
    }

    /// Renders the post and writes it to `path`, creating parent directories.
    pub fn write_to_file(&self, path: &Path, format: OutputFormat) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = self.render(format)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Derives the ledger key from a post URL: the segment after `/p/`.
///
/// ```rust
/// use stackpull_core::post_id;
///
/// assert_eq!(post_id("https://x.substack.com/p/hello-world?s=w"), Some("hello-world".to_string()));
/// assert_eq!(post_id("https://x.substack.com/about"), None);
/// ```
pub fn post_id(url: &str) -> Option<String> {
    POST_ID_RE.captures(url).and_then(|caps| caps.get(1)).map(|m| m.as_str().to_string())
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
