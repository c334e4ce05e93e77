//! Reader for the Chromium `Bookmarks` JSON file shared by Chrome, Edge,
//! Brave, Opera and Vivaldi.

use std::path::Path;

use serde::Deserialize;

use super::{Bookmark, Browser, BrowserError};

/// Microseconds between 1601-01-01 and the unix epoch
const WEBKIT_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

#[derive(Deserialize)]
struct BookmarkFile {
    roots: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct Node {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    date_added: Option<String>,
    #[serde(default)]
    children: Vec<Node>,
}

pub fn read_bookmarks(path: &Path, browser: Browser) -> Result<Vec<Bookmark>, BrowserError> {
    let data = std::fs::read(path).map_err(|source| BrowserError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let bookmarks = parse_bookmarks(&data, browser).map_err(|source| BrowserError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!(
        "{}: read {} bookmarks from {}",
        browser,
        bookmarks.len(),
        path.display()
    );
    Ok(bookmarks)
}

/// Flatten every URL node under `roots`, depth first.
pub fn parse_bookmarks(data: &[u8], browser: Browser) -> Result<Vec<Bookmark>, serde_json::Error> {
    let file: BookmarkFile = serde_json::from_slice(data)?;
    let mut out = Vec::new();

    for (key, value) in file.roots {
        // `roots` also carries bookkeeping values that are not folders
        let Ok(root) = serde_json::from_value::<Node>(value) else {
            log::debug!("{}: skipping non-folder root '{}'", browser, key);
            continue;
        };
        let name = if root.name.is_empty() { key } else { root.name.clone() };
        walk(&root, &name, browser, &mut out);
    }
    Ok(out)
}

fn walk(node: &Node, folder: &str, browser: Browser, out: &mut Vec<Bookmark>) {
    for child in &node.children {
        match (child.kind.as_str(), &child.url) {
            ("url", Some(url)) => out.push(Bookmark {
                url: url.clone(),
                title: child.name.trim().to_string(),
                folder: folder.to_string(),
                added_at: child.date_added.as_deref().and_then(webkit_to_unix_millis),
                browser,
            }),
            ("folder", _) => {
                let path = if folder.is_empty() {
                    child.name.clone()
                } else {
                    format!("{}/{}", folder, child.name)
                };
                walk(child, &path, browser, out);
            }
            _ => {}
        }
    }
}

/// Chromium stores timestamps as microseconds since 1601 in a string.
fn webkit_to_unix_millis(raw: &str) -> Option<i64> {
    let micros: i64 = raw.trim().parse().ok()?;
    if micros <= 0 {
        return None;
    }
    Some((micros - WEBKIT_EPOCH_OFFSET_MICROS) / 1000)
}
