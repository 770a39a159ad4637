pub mod markdown;
pub mod text;

pub use markdown::{MarkdownConfig, convert_to_markdown, rewrite_video_embeds};
pub use text::{TextConfig, convert_to_text};
