//! Archive posts from newsletter publications.
//!
//! Post URLs come from the publication sitemap. Each post page is decoded from
//! its embedded preload payload, its images are stored next to it, and a ledger
//! of processed post ids keeps reruns from downloading the same post again.

pub mod error;
pub mod extractor;
pub mod fetch;
pub mod filter;
pub mod formatters;
pub mod ledger;
pub mod media;
pub mod payload;
pub mod post;
pub mod sitemap;

pub use error::{DecodeStage, Result, StackpullError};
pub use extractor::{
    BatchRun, BatchSummary, ExtractResult, Extraction, Extractor, ExtractorConfig, ExtractorConfigBuilder, SkipReason,
};
pub use fetch::{FetchConfig, Fetcher};
pub use filter::DateFilter;
pub use formatters::{MarkdownConfig, TextConfig, convert_to_markdown, convert_to_text, rewrite_video_embeds};
pub use ledger::Ledger;
pub use media::{MediaMap, MediaPolicy, download_media, extract_media_urls, media_filename, rewrite_media_urls};
pub use payload::{decode_post, extract_json_string, extract_post_from_html, find_script_content};
pub use post::{OutputFormat, Post, post_id};
pub use sitemap::{SitemapEntry, discover, parse_sitemap, publication_root, select_posts, sitemap_url};
