//! Post discovery through a publication's sitemap.
//!
//! The sitemap lists every page of a publication as
//! `<url><loc>…</loc><lastmod>…</lastmod></url>`. Post pages are recognised by
//! the `/p/` path marker; everything else (about page, archive, podcasts index)
//! is ignored.

use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use crate::fetch::{Fetcher, parse_http_url};
use crate::filter::DateFilter;
use crate::{Result, StackpullError};

/// Path segment that marks a post page.
pub const POST_PATH_MARKER: &str = "/p/";

/// One `<url>` entry of a sitemap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<String>,
}

impl SitemapEntry {
    pub fn is_post(&self) -> bool {
        self.loc.contains(POST_PATH_MARKER)
    }

    /// A missing last-modified date compares as the empty string, so undated
    /// entries pass a `before` bound and fail any `after` bound.
    fn passes(&self, filter: Option<&DateFilter>) -> bool {
        filter.is_none_or(|filter| filter.admits(self.lastmod.as_deref().unwrap_or_default()))
    }
}

/// Returns the sitemap location for a publication base URL.
///
/// ```rust
/// use stackpull_core::sitemap_url;
///
/// let url = sitemap_url("https://example.substack.com").unwrap();
/// assert_eq!(url.as_str(), "https://example.substack.com/sitemap.xml");
/// ```
pub fn sitemap_url(base: &str) -> Result<Url> {
    let mut url = parse_http_url(base)?;
    let path = format!("{}/sitemap.xml", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Reduces any publication or post URL to `scheme://host[:port]`.
pub fn publication_root(url: &str) -> Result<String> {
    let parsed = parse_http_url(url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| StackpullError::InvalidUrl(format!("{url}: missing host")))?;

    Ok(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

/// Parses a sitemap document into its entries, in document order.
///
/// `cancel` is checked between entries; a cancelled run returns
/// [`StackpullError::Cancelled`] rather than a partial list.
pub fn parse_sitemap(xml: &str, cancel: &CancellationToken) -> Result<Vec<SitemapEntry>> {
    let document = Html::parse_document(xml);
    let url_selector = selector("url")?;
    let loc_selector = selector("loc")?;
    let lastmod_selector = selector("lastmod")?;

    let mut entries = Vec::new();
    for node in document.select(&url_selector) {
        if cancel.is_cancelled() {
            return Err(StackpullError::Cancelled);
        }

        let loc = match node.select(&loc_selector).next() {
            Some(loc) => loc.text().collect::<String>().trim().to_string(),
            None => continue,
        };
        if loc.is_empty() {
            continue;
        }

        let lastmod = node
            .select(&lastmod_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());

        entries.push(SitemapEntry { loc, lastmod });
    }

    Ok(entries)
}

/// Keeps post entries that pass `filter`, preserving order.
pub fn select_posts(entries: Vec<SitemapEntry>, filter: Option<&DateFilter>) -> Vec<String> {
    entries
        .into_iter()
        .filter(|entry| entry.is_post() && entry.passes(filter))
        .map(|entry| entry.loc)
        .collect()
}

/// Fetches the sitemap of `base` and returns the post URLs it lists.
///
/// An empty list is not an error; fetch and parse failures are.
#[instrument(level = "info", skip_all, fields(base = %base))]
pub async fn discover(
    fetcher: &Fetcher,
    base: &str,
    filter: Option<&DateFilter>,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let url = sitemap_url(base)?;
    let xml = fetcher.fetch_text(url.as_str(), cancel).await?;

    let entries = parse_sitemap(&xml, cancel)?;
    let total = entries.len();
    let urls = select_posts(entries, filter);

    debug!(sitemap = %url, entries = total, "Parsed sitemap");
    info!(posts = urls.len(), "Discovered post URLs");
    Ok(urls)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| StackpullError::SitemapParse(e.to_string()))
}
