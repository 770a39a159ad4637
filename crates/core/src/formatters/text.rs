use crate::Result;
use scraper::{ElementRef, Html};

const BLOCK_ELEMENTS: [&str; 17] = [
    "p",
    "div",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "li",
    "blockquote",
    "pre",
    "td",
    "th",
    "figure",
    "figcaption",
    "hr",
    "tr",
];

const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Configuration for plain text output
#[derive(Debug, Clone, Default)]
pub struct TextConfig {
    /// Start with the title, underlined
    pub include_title: bool,

    /// Preserve paragraph structure with double newlines
    pub preserve_paragraphs: bool,

    /// Wrap lines at specified width (0 = no wrapping)
    pub line_width: usize,
}

/// Convert an HTML fragment to plain text with specified configuration
pub fn convert_to_text(html: &str, title: Option<&str>, config: &TextConfig) -> Result<String> {
    let mut output = String::new();

    if config.include_title
        && let Some(title) = title.filter(|t| !t.is_empty())
    {
        output.push_str(title);
        output.push('\n');
        output.push_str(&"=".repeat(title.chars().count()));
        output.push_str("\n\n");
    }

    let text = if config.preserve_paragraphs { extract_text_with_paragraphs(html) } else { extract_plain_text(html) };

    let final_text = if config.line_width > 0 { wrap_text(&text, config.line_width) } else { text };

    output.push_str(&final_text);

    Ok(output.trim().to_string())
}

/// Extract plain text from HTML, stripping all tags
fn extract_plain_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    fragment.root_element().text().collect::<String>()
}

/// Extract text from HTML while preserving paragraph structure
fn extract_text_with_paragraphs(html: &str) -> String {
    let fragment = Html::parse_fragment(html);

    let mut blocks = BlockCollector::default();
    blocks.collect(fragment.root_element());
    blocks.flush();

    blocks.blocks.join("\n\n")
}

#[derive(Default)]
struct BlockCollector {
    current: String,
    blocks: Vec<String>,
    /// Set while a list item has not produced any text yet
    pending_marker: bool,
}

impl BlockCollector {
    fn collect(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            if let Some(text) = child.value().as_text() {
                self.current.push_str(text);
                continue;
            }

            let Some(child) = ElementRef::wrap(child) else { continue };
            let name = child.value().name();

            if SKIPPED_ELEMENTS.contains(&name) {
                continue;
            }
            if name == "br" {
                self.current.push('\n');
                continue;
            }

            let is_block = BLOCK_ELEMENTS.contains(&name);
            if is_block {
                self.flush();
                if name == "li" {
                    self.pending_marker = true;
                }
            }

            self.collect(child);

            if is_block {
                self.flush();
                if name == "li" {
                    self.pending_marker = false;
                }
            }
        }
    }

    /// Collapse whitespace inside each line of the current block and move it to `blocks`.
    /// The first non-empty block of a list item gets the `- ` marker.
    fn flush(&mut self) {
        let normalized = self
            .current
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        self.current.clear();

        if normalized.is_empty() {
            return;
        }
        if std::mem::take(&mut self.pending_marker) {
            self.blocks.push(format!("- {normalized}"));
        } else {
            self.blocks.push(normalized);
        }
    }
}

/// Wrap text to specified line width, keeping paragraph breaks
fn wrap_text(text: &str, width: usize) -> String {
    if width == 0 {
        return text.to_string();
    }

    text.split("\n\n")
        .map(|paragraph| {
            paragraph
                .lines()
                .map(|line| {
                    let words: Vec<&str> = line.split_whitespace().collect();
                    if words.is_empty() { String::new() } else { wrap_words(&words, width) }
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Wrap a slice of words to specified width
fn wrap_words(words: &[&str], width: usize) -> String {
    let mut lines = Vec::new();
    let mut current_line = Vec::new();
    let mut current_length = 0;

    for &word in words {
        let word_len = word.chars().count();

        if current_length == 0 {
            current_line.push(word);
            current_length = word_len;
        } else if current_length + 1 + word_len <= width {
            current_length += 1 + word_len;
            current_line.push(word);
        } else {
            lines.push(current_line.join(" "));
            current_line = vec![word];
            current_length = word_len;
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line.join(" "));
    }

    lines.join("\n")
}
