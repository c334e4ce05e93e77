//! HTML title, description and body text extraction.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use crate::ingest::preprocess::{collapse_whitespace, truncate_chars};

/// Maximum characters of body text kept per page
pub const MAX_CONTENT_CHARS: usize = 5000;

/// Maximum characters kept for a description
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Paragraphs shorter than this are not used as a description
const MIN_PARAGRAPH_CHARS: usize = 50;

/// Elements whose text is never part of the page content
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "nav", "header", "footer", "iframe",
];

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

static META: Lazy<Selector> = Lazy::new(|| selector("meta"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static BODY: Lazy<Selector> = Lazy::new(|| selector("body"));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| selector("p"));
static JSON_LD: Lazy<Selector> = Lazy::new(|| selector(r#"script[type="application/ld+json"]"#));
static CONTENT_ROOTS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["main", "article", r#"[role="main"]"#, "body"]
        .into_iter()
        .map(selector)
        .collect()
});

/// What a page contributes to a bookmark.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: String,
}

impl PageContent {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.content.is_empty()
    }
}

/// Extract title, description and visible text from an HTML document.
///
/// Title: og:title, twitter:title, JSON-LD name/headline, then `<title>`.
/// Description: og:description, meta description, twitter:description,
/// JSON-LD description, then the first long paragraph.
pub fn extract_page(html: &str) -> PageContent {
    let document = Html::parse_document(html);

    let mut og_title = None;
    let mut twitter_title = None;
    let mut og_description = None;
    let mut meta_description = None;
    let mut twitter_description = None;

    for element in document.select(&META) {
        let meta_prop = element.attr("property").unwrap_or_default();
        let meta_key = element.attr("name").unwrap_or(meta_prop).to_lowercase();
        let meta_value = element.attr("content").unwrap_or_default().trim();
        if meta_value.is_empty() {
            continue;
        }

        let slot = match meta_key.as_str() {
            "og:title" => &mut og_title,
            "twitter:title" => &mut twitter_title,
            "og:description" => &mut og_description,
            "description" => &mut meta_description,
            "twitter:description" => &mut twitter_description,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(meta_value.to_string());
        }
    }

    let mut ld_title = None;
    let mut ld_description = None;
    for element in document.select(&JSON_LD) {
        let json_text = element.text().collect::<String>();
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&json_text) {
            extract_from_json_ld(&json, &mut ld_title, &mut ld_description);
        }
    }

    let title_tag = document
        .select(&TITLE)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|t| !t.is_empty());

    let title = og_title.or(twitter_title).or(ld_title).or(title_tag);

    let description = og_description
        .or(meta_description)
        .or(twitter_description)
        .or(ld_description)
        .or_else(|| first_long_paragraph(&document))
        .map(|d| truncate_chars(&collapse_whitespace(&d), MAX_DESCRIPTION_CHARS));

    let content = document
        .select(&BODY)
        .next()
        .map(visible_text)
        .map(|text| truncate_chars(&text, MAX_CONTENT_CHARS))
        .unwrap_or_default();

    PageContent {
        title: title.map(|t| collapse_whitespace(&t)),
        description,
        content,
    }
}

/// Text of `root` outside of scripts, styles and navigation chrome.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|el| SKIPPED_TAGS.contains(&el.name()))
                .unwrap_or(false)
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    collapse_whitespace(&out)
}

fn first_long_paragraph(document: &Html) -> Option<String> {
    for root_selector in CONTENT_ROOTS.iter() {
        let Some(root) = document.select(root_selector).next() else {
            continue;
        };
        let found = root
            .select(&PARAGRAPH)
            .map(|p| collapse_whitespace(&p.text().collect::<String>()))
            .find(|text| text.chars().count() > MIN_PARAGRAPH_CHARS);
        if found.is_some() {
            return found;
        }
    }
    None
}

fn extract_from_json_ld(
    json: &serde_json::Value,
    title: &mut Option<String>,
    description: &mut Option<String>,
) {
    // Handle @graph arrays
    if let Some(graph) = json.get("@graph").and_then(|g| g.as_array()) {
        for item in graph {
            extract_from_json_ld(item, title, description);
        }
        return;
    }
    // Handle top-level arrays
    if let Some(arr) = json.as_array() {
        for item in arr {
            extract_from_json_ld(item, title, description);
        }
        return;
    }

    if title.is_none() {
        if let Some(name) = json
            .get("name")
            .or_else(|| json.get("headline"))
            .and_then(|v| v.as_str())
        {
            let trimmed = name.trim();
            if !trimmed.is_empty() {
                *title = Some(trimmed.to_string());
            }
        }
    }
    if description.is_none() {
        if let Some(desc) = ["description", "abstract"]
            .iter()
            .find_map(|key| json.get(*key).and_then(|v| v.as_str()))
        {
            let trimmed = desc.trim();
            if !trimmed.is_empty() {
                *description = Some(trimmed.to_string());
            }
        }
    }
}
