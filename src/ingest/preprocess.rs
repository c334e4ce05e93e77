//! Builds the text that gets embedded for a bookmark.
//!
//! Non-empty fields are joined as `Label: value` parts separated by ` | `.
//! Page content is cut to `MAX_EMBEDDED_CONTENT` characters first so the
//! title and description keep their weight.

use sha2::{Digest, Sha256};

/// Maximum page content characters included in the embedding text
const MAX_EMBEDDED_CONTENT: usize = 1000;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Fields that make up a bookmark's embedding text.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddingFields<'a> {
    pub url: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub content: &'a str,
    pub folder: &'a str,
    pub browser: &'a str,
}

/// Returns `None` if every field is empty after trimming.
pub fn embedding_text(fields: &EmbeddingFields<'_>) -> Option<String> {
    let content = truncate_chars(fields.content.trim(), MAX_EMBEDDED_CONTENT);
    let parts: Vec<String> = [
        ("URL", fields.url.trim()),
        ("Title", fields.title.trim()),
        ("Description", fields.description.trim()),
        ("Content", content.as_str()),
        ("Folder", fields.folder.trim()),
        ("Browser", fields.browser.trim()),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(label, value)| format!("{}: {}", label, value))
    .collect();

    if parts.is_empty() {
        return None;
    }
    Some(parts.join(" | "))
}

/// Cut `text` to at most `max_chars` characters, marking the cut with "...".
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    // Count in chars so UTF-8 sequences are never split
    let keep = max_chars.saturating_sub(TRUNCATION_SUFFIX.len());
    let truncated: String = text.chars().take(keep).collect();
    format!("{}{}", truncated.trim_end(), TRUNCATION_SUFFIX)
}

/// Collapse runs of whitespace into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable document id for a bookmark URL (sha256, hex).
pub fn document_id(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.trim().as_bytes()))
}

/// Hash of the embedded text, recorded in the ledger for change detection.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}
