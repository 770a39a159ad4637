//! Downloading the images referenced by a post and localizing their URLs.
//!
//! The media pass runs in three steps: collect the `img` sources of the body
//! fragment, download each one into the post directory, then rewrite the body
//! so it points at the local files.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::fetch::Fetcher;
use crate::{Result, StackpullError};

/// Extensions kept as-is when deriving a local filename.
pub const IMAGE_EXTENSIONS: [&str; 5] = [".jpeg", ".jpg", ".png", ".gif", ".webp"];

/// Extension appended when the URL carries no recognised one.
pub const DEFAULT_EXTENSION: &str = ".jpg";

/// Original media URL → local filename, for one post.
pub type MediaMap = BTreeMap<String, String>;

/// What to do when a single media item cannot be downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaPolicy {
    /// Abort the whole post extraction on the first failure.
    #[default]
    FailFast,
    /// Log a warning and keep the remote URL for that item.
    BestEffort,
}

impl std::str::FromStr for MediaPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail-fast" | "failfast" | "strict" => Ok(Self::FailFast),
            "best-effort" | "besteffort" | "lenient" => Ok(Self::BestEffort),
            _ => Err(format!("Invalid media policy: {}. Valid options: fail-fast, best-effort", s)),
        }
    }
}

/// Collects distinct `img` sources in first-seen order.
///
/// Empty sources and inline `data:` URIs are skipped.
pub fn extract_media_urls(body_html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(body_html);
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    fragment
        .select(&selector)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty() && !src.starts_with("data:"))
        .filter(|src| seen.insert(src.to_string()))
        .map(str::to_string)
        .collect()
}

/// Derives a local filename from a media URL.
///
/// The URL is percent-decoded first, since image CDNs often embed the original
/// object URL as an encoded path segment.
///
/// ```rust
/// use stackpull_core::media_filename;
///
/// assert_eq!(media_filename("https://cdn.example.com/a/photo.png?w=600"), "photo.png");
/// assert_eq!(media_filename("https://cdn.example.com/fetch/https%3A%2F%2Fs3.aws%2Fabc_1024x768"), "abc_1024x768.jpg");
/// ```
pub fn media_filename(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let decoded = urlencoding::decode(without_query)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| without_query.to_string());
    let decoded = decoded.split(['?', '#']).next().unwrap_or_default();

    let name = decoded.rsplit('/').next().unwrap_or_default().trim();
    let name = name.trim_start_matches('.');
    if name.is_empty() {
        return format!("image{DEFAULT_EXTENSION}");
    }

    let lower = name.to_lowercase();
    if IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        name.to_string()
    } else {
        format!("{name}{DEFAULT_EXTENSION}")
    }
}

/// Picks `name`, or `stem-2.ext`, `stem-3.ext`... if already taken.
fn unique_filename(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) => name.split_at(idx),
        None => (name.as_str(), ""),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{stem}-{n}{ext}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Downloads every URL into `dir` and returns the URL → filename mapping.
///
/// Items are fetched one after another. Under [`MediaPolicy::FailFast`] the
/// first failure aborts with [`StackpullError::Media`]; under
/// [`MediaPolicy::BestEffort`] failed items are logged and left out of the map.
/// Cancellation always aborts.
pub async fn download_media(
    fetcher: &Fetcher,
    urls: &[String],
    dir: &Path,
    policy: MediaPolicy,
    cancel: &CancellationToken,
) -> Result<MediaMap> {
    let mut downloaded = MediaMap::new();
    if urls.is_empty() {
        return Ok(downloaded);
    }

    tokio::fs::create_dir_all(dir).await?;

    let mut taken = HashSet::new();
    for url in urls {
        let filename = unique_filename(media_filename(url), &mut taken);

        match download_one(fetcher, url, &dir.join(&filename), cancel).await {
            Ok(bytes) => {
                debug!(%url, %filename, bytes, "Downloaded media");
                downloaded.insert(url.clone(), filename);
            }
            Err(StackpullError::Cancelled) => return Err(StackpullError::Cancelled),
            Err(e) => match policy {
                MediaPolicy::FailFast => {
                    return Err(StackpullError::Media { url: url.clone(), reason: e.to_string() });
                }
                MediaPolicy::BestEffort => {
                    warn!(%url, error = %e, "Media download failed; keeping remote URL");
                }
            },
        }
    }

    Ok(downloaded)
}

async fn download_one(fetcher: &Fetcher, url: &str, path: &Path, cancel: &CancellationToken) -> Result<usize> {
    let bytes = fetcher.fetch_bytes(url, cancel).await?;
    tokio::fs::write(path, &bytes).await?;
    Ok(bytes.len())
}

/// Replaces every occurrence of each mapped URL in `body` with its filename.
///
/// Both the raw URL and its `&amp;`-escaped form are replaced, since sources
/// are read decoded but appear escaped in the markup. Longer URLs go first so
/// a URL that prefixes another cannot clobber it.
pub fn rewrite_media_urls(body: &str, media: &MediaMap) -> String {
    let mut pairs: Vec<(&String, &String)> = media.iter().collect();
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut rewritten = body.to_string();
    for (url, filename) in pairs {
        let escaped = url.replace('&', "&amp;");
        if escaped != *url {
            rewritten = rewritten.replace(&escaped, filename);
        }
        rewritten = rewritten.replace(url.as_str(), filename);
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_media_urls_distinct_in_order() {
        let html = r#"
            <p><img src="https://cdn.example.com/b.png"></p>
            <img src="https://cdn.example.com/a.jpg">
            <img src="https://cdn.example.com/b.png">
            <img src="data:image/png;base64,AAAA">
            <img src="">
        "#;
        let urls = extract_media_urls(html);
        assert_eq!(urls, vec!["https://cdn.example.com/b.png", "https://cdn.example.com/a.jpg"]);
    }

    #[test]
    fn test_extract_media_urls_decodes_entities() {
        let html = r#"<img src="https://cdn.example.com/i?w=1&amp;h=2">"#;
        assert_eq!(extract_media_urls(html), vec!["https://cdn.example.com/i?w=1&h=2"]);
    }

    #[test]
    fn test_media_filename() {
        assert_eq!(media_filename("https://cdn.example.com/img/photo.jpeg"), "photo.jpeg");
        assert_eq!(media_filename("https://cdn.example.com/img/photo.GIF"), "photo.GIF");
        assert_eq!(media_filename("https://cdn.example.com/img/photo"), "photo.jpg");
        assert_eq!(media_filename("https://cdn.example.com/img/photo.png#frag"), "photo.png");
        assert_eq!(media_filename("https://cdn.example.com/"), "image.jpg");
    }

    #[test]
    fn test_media_filename_nested_encoded_url() {
        let url = "https://substackcdn.com/image/fetch/w_1456,c_limit/https%3A%2F%2Fbucket.s3.amazonaws.com%2Fpublic%2Fimages%2F1a2b_800x600.png";
        assert_eq!(media_filename(url), "1a2b_800x600.png");
    }

    #[test]
    fn test_unique_filename() {
        let mut taken = HashSet::new();
        assert_eq!(unique_filename("a.png".to_string(), &mut taken), "a.png");
        assert_eq!(unique_filename("a.png".to_string(), &mut taken), "a-2.png");
        assert_eq!(unique_filename("a.png".to_string(), &mut taken), "a-3.png");
    }

    #[test]
    fn test_rewrite_media_urls() {
        let body = r#"<img src="https://cdn.example.com/one.png"><img src="https://cdn.example.com/two.jpg">"#;
        let mut media = MediaMap::new();
        media.insert("https://cdn.example.com/one.png".to_string(), "one.png".to_string());
        media.insert("https://cdn.example.com/two.jpg".to_string(), "two.jpg".to_string());

        let rewritten = rewrite_media_urls(body, &media);
        assert_eq!(rewritten, r#"<img src="one.png"><img src="two.jpg">"#);
        assert!(!rewritten.contains("https://cdn.example.com"));
    }

    #[test]
    fn test_rewrite_prefers_longer_urls() {
        let body = r#"<a href="https://cdn.example.com/a.png.large"><img src="https://cdn.example.com/a.png"></a>"#;
        let mut media = MediaMap::new();
        media.insert("https://cdn.example.com/a.png".to_string(), "a.png".to_string());
        media.insert("https://cdn.example.com/a.png.large".to_string(), "a-large.jpg".to_string());

        let rewritten = rewrite_media_urls(body, &media);
        assert_eq!(rewritten, r#"<a href="a-large.jpg"><img src="a.png"></a>"#);
    }

    #[test]
    fn test_rewrite_escaped_ampersands() {
        let body = r#"<img src="https://cdn.example.com/i?w=1&amp;h=2">"#;
        let mut media = MediaMap::new();
        media.insert("https://cdn.example.com/i?w=1&h=2".to_string(), "i.jpg".to_string());

        assert_eq!(rewrite_media_urls(body, &media), r#"<img src="i.jpg">"#);
    }

    #[test]
    fn test_media_policy_from_str() {
        assert_eq!("fail-fast".parse::<MediaPolicy>().unwrap(), MediaPolicy::FailFast);
        assert_eq!("best-effort".parse::<MediaPolicy>().unwrap(), MediaPolicy::BestEffort);
        assert!("sometimes".parse::<MediaPolicy>().is_err());
    }
}
