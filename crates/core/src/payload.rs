//! Locating and decoding the post payload embedded in a post page.
//!
//! Post pages carry their data in a script element of the form
//!
//! ```text
//! window._preloads = JSON.parse("{\"post\":{\"slug\":\"abc\",...}}")
//! ```
//!
//! The argument is a JSON string literal whose content is itself JSON, so the
//! payload is decoded twice: once to unescape the literal, once to read the
//! post object.

use scraper::{Html, Selector};

use crate::error::DecodeStage;
use crate::post::{Post, PostWrapper};
use crate::{Result, StackpullError};

/// Marker identifying the preload script.
pub const PRELOAD_MARKER: &str = "window._preloads";

const PARSE_CALL_OPEN: &str = "JSON.parse(\"";
const PARSE_CALL_CLOSE: &str = "\")";

/// Returns the text of the first script holding the preload payload.
pub fn find_script_content(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script").ok()?;

    document
        .select(&selector)
        .map(|script| script.text().collect::<String>())
        .find(|text| text.contains(PRELOAD_MARKER) && text.contains("JSON.parse("))
}

/// Slices the escaped JSON out of the `JSON.parse("...")` call.
///
/// The slice runs from the first opening quote to the last `")`, so the
/// escaped content may itself contain `")` sequences.
pub fn extract_json_string(script: &str) -> Result<&str> {
    let start = script
        .find(PARSE_CALL_OPEN)
        .ok_or_else(|| StackpullError::PayloadShape("JSON.parse(\" call not found".to_string()))?
        + PARSE_CALL_OPEN.len();
    let end = script
        .rfind(PARSE_CALL_CLOSE)
        .ok_or_else(|| StackpullError::PayloadShape("closing \") not found".to_string()))?;

    if start > end {
        return Err(StackpullError::PayloadShape("JSON.parse call is empty or truncated".to_string()));
    }

    Ok(&script[start..end])
}

/// Decodes the escaped payload into a [`Post`].
///
/// Fails with [`StackpullError::Decode`] naming the stage that broke; no
/// partially decoded post is ever returned.
pub fn decode_post(escaped: &str) -> Result<Post> {
    let literal = format!("\"{escaped}\"");
    let inner: String = serde_json::from_str(&literal)
        .map_err(|source| StackpullError::Decode { stage: DecodeStage::Outer, source })?;

    let wrapper: PostWrapper = serde_json::from_str(&inner)
        .map_err(|source| StackpullError::Decode { stage: DecodeStage::Inner, source })?;

    Ok(wrapper.post)
}

/// Runs the whole locate-and-unwrap sequence on a fetched post page.
pub fn extract_post_from_html(url: &str, html: &str) -> Result<Post> {
    let script = find_script_content(html).ok_or_else(|| StackpullError::PayloadNotFound { url: url.to_string() })?;
    let escaped = extract_json_string(&script)?;
    decode_post(escaped)
}
