use std::sync::LazyLock;

use lol_html::html_content::ContentType;
use regex::Regex;

use crate::{Result, StackpullError};

static YOUTUBE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:youtube\.com|youtube-nocookie\.com)/embed/([^&?/]+)").unwrap());

/// Configuration for Markdown conversion
#[derive(Debug, Clone, Default)]
pub struct MarkdownConfig {
    /// Include title as H1 heading at the start of content
    pub include_title_heading: bool,
    /// Turn embedded YouTube players into linked thumbnails
    pub rewrite_video_embeds: bool,
}

/// Convert an HTML fragment to Markdown
pub fn convert_to_markdown(html: &str, title: Option<&str>, config: &MarkdownConfig) -> Result<String> {
    let mut output = String::new();

    if config.include_title_heading
        && let Some(title) = title.filter(|t| !t.is_empty())
    {
        output.push_str(&format!("# {}\n\n", title));
    }

    let processed_html = if config.rewrite_video_embeds { rewrite_video_embeds(html)? } else { html.to_string() };

    output.push_str(&html_to_markdown(&processed_html)?);

    Ok(output)
}

/// Convert HTML to Markdown using htmd crate
#[cfg(feature = "markdown")]
fn html_to_markdown(html: &str) -> Result<String> {
    htmd::convert(html).map_err(|e| StackpullError::Conversion(e.to_string()))
}

/// Fallback HTML to text conversion when markdown feature is disabled
#[cfg(not(feature = "markdown"))]
fn html_to_markdown(html: &str) -> Result<String> {
    let doc = scraper::Html::parse_fragment(html);
    Ok(doc.root_element().text().collect::<String>())
}

/// HTML for a YouTube embed: the video thumbnail wrapped in a link to the video.
///
/// The converter renders it as `[![title](thumbnail)](watch-url)`.
fn youtube_link(src: &str, title: &str) -> Option<String> {
    let id = YOUTUBE_ID_RE.captures(src)?.get(1)?.as_str();
    Some(format!(
        r#"<p><a href="https://www.youtube.com/watch?v={id}"><img src="https://img.youtube.com/vi/{id}/0.jpg" alt="{}"></a></p>"#,
        escape_attr(title)
    ))
}

/// Replace YouTube `<iframe>` players with a linked thumbnail.
///
/// Iframes pointing anywhere else are left untouched.
pub fn rewrite_video_embeds(html: &str) -> Result<String> {
    let mut output = Vec::new();
    let mut rewriter = lol_html::HtmlRewriter::new(
        lol_html::Settings {
            element_content_handlers: vec![lol_html::element!("iframe", |el| {
                let src = el.get_attribute("src").unwrap_or_default();
                let title = el.get_attribute("title").unwrap_or_default();
                if let Some(link) = youtube_link(&src, &title) {
                    el.replace(&link, ContentType::Html);
                }
                Ok(())
            })],
            ..Default::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    rewriter
        .write(html.as_bytes())
        .map_err(|e| StackpullError::Conversion(e.to_string()))?;
    rewriter.end().map_err(|e| StackpullError::Conversion(e.to_string()))?;

    String::from_utf8(output).map_err(|e| StackpullError::Conversion(e.to_string()))
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}
