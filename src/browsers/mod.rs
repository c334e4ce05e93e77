//! Bookmark discovery for Chromium-family browsers and Firefox.
//!
//! Chromium browsers keep a `Bookmarks` JSON file in each profile directory
//! (Default, Profile 1-3); Firefox keeps `places.sqlite` in each profile under
//! its profiles directory. Custom paths configured per browser are added to
//! the per-OS defaults.

mod chromium;
mod firefox;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::config::BrowserConfig;

const PROFILES: &[&str] = &["Default", "Profile 1", "Profile 2", "Profile 3"];

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("no bookmark files found for {0}")]
    NotFound(Browser),

    #[error("{browser} is disabled in the configuration")]
    Disabled { browser: Browser },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to query {path}: {source}")]
    Sqlite {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("unknown browser '{0}'")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Chrome,
    Chromium,
    Edge,
    Brave,
    Opera,
    Vivaldi,
    Firefox,
    /// ChatGPT Atlas
    Atlas,
    /// Perplexity Comet
    Comet,
}

/// On-disk bookmark format of a browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookmarkFormat {
    /// `Bookmarks` JSON tree
    Chromium,
    /// `places.sqlite` database
    FirefoxPlaces,
}

impl Browser {
    pub const ALL: [Browser; 9] = [
        Browser::Chrome,
        Browser::Chromium,
        Browser::Edge,
        Browser::Brave,
        Browser::Opera,
        Browser::Vivaldi,
        Browser::Firefox,
        Browser::Atlas,
        Browser::Comet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::Chromium => "chromium",
            Browser::Edge => "edge",
            Browser::Brave => "brave",
            Browser::Opera => "opera",
            Browser::Vivaldi => "vivaldi",
            Browser::Firefox => "firefox",
            Browser::Atlas => "atlas",
            Browser::Comet => "comet",
        }
    }

    pub fn format(&self) -> BookmarkFormat {
        match self {
            Browser::Firefox => BookmarkFormat::FirefoxPlaces,
            _ => BookmarkFormat::Chromium,
        }
    }

    /// File looked for when a configured custom path is a directory.
    pub fn file_name(&self) -> &'static str {
        match self.format() {
            BookmarkFormat::Chromium => "Bookmarks",
            BookmarkFormat::FirefoxPlaces => "places.sqlite",
        }
    }

    /// Default bookmark file candidates for `os`, relative to `home`.
    ///
    /// Firefox profiles have random directory names, so its profiles
    /// directory is listed; the other browsers need no file system access.
    pub fn candidate_paths(&self, home: &Path, os: Os) -> Vec<PathBuf> {
        let support = home.join("Library/Application Support");
        match (os, self) {
            (Os::Linux, Browser::Firefox) => return firefox_profiles(&home.join(".mozilla/firefox")),
            (Os::MacOs, Browser::Firefox) => return firefox_profiles(&support.join("Firefox/Profiles")),
            (Os::Windows, Browser::Firefox) => {
                return firefox_profiles(&home.join("AppData/Roaming/Mozilla/Firefox/Profiles"))
            }
            (Os::MacOs, Browser::Atlas) => {
                return vec![
                    support.join("ChatGPT Atlas/Default/Bookmarks"),
                    support.join("ChatGPT Atlas/Profile 1/Bookmarks"),
                    support.join("Atlas/Default/Bookmarks"),
                ]
            }
            (_, Browser::Atlas) => return Vec::new(),
            // Comet on macOS names the file in the singular
            (Os::MacOs, Browser::Comet) => return vec![support.join("Comet/Default/Bookmark")],
            _ => {}
        }

        let (base, profiled) = match (os, self) {
            // Handled above
            (_, Browser::Firefox | Browser::Atlas) | (Os::MacOs, Browser::Comet) => {
                return Vec::new()
            }

            (Os::Linux, Browser::Chrome) => (home.join(".config/google-chrome"), true),
            (Os::Linux, Browser::Chromium) => (home.join(".config/chromium"), true),
            (Os::Linux, Browser::Edge) => (home.join(".config/microsoft-edge"), true),
            (Os::Linux, Browser::Brave) => {
                (home.join(".config/BraveSoftware/Brave-Browser"), true)
            }
            (Os::Linux, Browser::Vivaldi) => (home.join(".config/vivaldi"), true),
            (Os::Linux, Browser::Opera) => (home.join(".config/opera"), false),
            (Os::Linux, Browser::Comet) => (home.join(".config/perplexity-comet"), true),

            (Os::MacOs, Browser::Chrome) => (support.join("Google/Chrome"), true),
            (Os::MacOs, Browser::Chromium) => (support.join("Chromium"), true),
            (Os::MacOs, Browser::Edge) => (support.join("Microsoft Edge"), true),
            (Os::MacOs, Browser::Brave) => (support.join("BraveSoftware/Brave-Browser"), true),
            (Os::MacOs, Browser::Opera) => (support.join("com.operasoftware.Opera"), false),
            (Os::MacOs, Browser::Vivaldi) => (support.join("Vivaldi"), true),

            (Os::Windows, Browser::Opera) => (
                home.join("AppData/Roaming/Opera Software/Opera Stable"),
                false,
            ),
            (Os::Windows, Browser::Chrome) => (local_app_data(home, "Google/Chrome"), true),
            (Os::Windows, Browser::Chromium) => (local_app_data(home, "Chromium"), true),
            (Os::Windows, Browser::Edge) => (local_app_data(home, "Microsoft/Edge"), true),
            (Os::Windows, Browser::Brave) => {
                (local_app_data(home, "BraveSoftware/Brave-Browser"), true)
            }
            (Os::Windows, Browser::Vivaldi) => (local_app_data(home, "Vivaldi"), true),
            (Os::Windows, Browser::Comet) => (local_app_data(home, "Perplexity/Comet"), true),
        };

        if profiled {
            PROFILES
                .iter()
                .map(|profile| base.join(profile).join("Bookmarks"))
                .collect()
        } else {
            vec![base.join("Bookmarks")]
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Browser {
    type Err = BrowserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        match lowered.as_str() {
            "google-chrome" | "google chrome" => return Ok(Browser::Chrome),
            "microsoft-edge" | "microsoft edge" => return Ok(Browser::Edge),
            "mozilla firefox" => return Ok(Browser::Firefox),
            "chatgpt atlas" | "chatgpt-atlas" => return Ok(Browser::Atlas),
            "perplexity comet" | "perplexity-comet" => return Ok(Browser::Comet),
            _ => {}
        }
        Browser::ALL
            .into_iter()
            .find(|b| b.as_str() == lowered)
            .ok_or_else(|| BrowserError::Unknown(s.to_string()))
    }
}

fn local_app_data(home: &Path, vendor: &str) -> PathBuf {
    home.join("AppData/Local").join(vendor).join("User Data")
}

/// `places.sqlite` of every profile directory under `profiles`, sorted.
fn firefox_profiles(profiles: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(profiles) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .map(|path| path.join("places.sqlite"))
        .collect();
    paths.sort();
    paths
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    MacOs,
    Windows,
}

impl Os {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Os::MacOs
        } else if cfg!(target_os = "windows") {
            Os::Windows
        } else {
            Os::Linux
        }
    }
}

/// A bookmark as read from a browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub url: String,
    pub title: String,
    /// Folder path joined with "/"
    pub folder: String,
    /// Unix millis
    pub added_at: Option<i64>,
    pub browser: Browser,
}

/// A detected browser and the bookmark files found for it.
#[derive(Debug, Clone, Serialize)]
pub struct BrowserSources {
    pub browser: Browser,
    pub paths: Vec<PathBuf>,
}

pub trait BookmarkSource {
    fn list_bookmarks(&self, browser: Browser) -> Result<Vec<Bookmark>, BrowserError>;
}

pub struct BrowserBookmarks {
    home: PathBuf,
    os: Os,
    settings: BTreeMap<Browser, BrowserConfig>,
}

impl BrowserBookmarks {
    pub fn new(home: PathBuf, os: Os, settings: BTreeMap<Browser, BrowserConfig>) -> Self {
        Self { home, os, settings }
    }

    /// Discover bookmarks under the current user's home directory.
    pub fn for_current_user(settings: BTreeMap<Browser, BrowserConfig>) -> anyhow::Result<Self> {
        let home = my_home()
            .context("failed to resolve home directory")?
            .context("home directory is not set")?;
        Ok(Self::new(home, Os::current(), settings))
    }

    pub fn is_enabled(&self, browser: Browser) -> bool {
        self.settings.get(&browser).map(|c| c.enabled).unwrap_or(true)
    }

    /// Existing bookmark files for `browser`: defaults first, then custom paths.
    ///
    /// A custom path naming a directory is searched for the browser's
    /// bookmark file (`Bookmarks` or `places.sqlite`).
    pub fn bookmark_files(&self, browser: Browser) -> Vec<PathBuf> {
        if !self.is_enabled(browser) {
            return Vec::new();
        }

        let custom = self
            .settings
            .get(&browser)
            .map(|c| c.paths.clone())
            .unwrap_or_default()
            .into_iter()
            .map(|path| {
                if path.is_dir() {
                    path.join(browser.file_name())
                } else {
                    path
                }
            });

        let mut files: Vec<PathBuf> = Vec::new();
        for path in browser.candidate_paths(&self.home, self.os).into_iter().chain(custom) {
            if path.is_file() && !files.contains(&path) {
                files.push(path);
            } else {
                log::trace!("{}: no bookmarks at {}", browser, path.display());
            }
        }
        files
    }

    pub fn available_browsers(&self) -> Vec<BrowserSources> {
        Browser::ALL
            .into_iter()
            .filter_map(|browser| {
                let paths = self.bookmark_files(browser);
                (!paths.is_empty()).then_some(BrowserSources { browser, paths })
            })
            .collect()
    }

    /// Bookmarks of every listed browser that has any. Unreadable files are
    /// logged and skipped.
    pub fn collect(&self, browsers: &[Browser]) -> Vec<Bookmark> {
        let mut all = Vec::new();
        for browser in browsers {
            match self.list_bookmarks(*browser) {
                Ok(bookmarks) => {
                    log::info!("{}: {} bookmarks", browser, bookmarks.len());
                    all.extend(bookmarks);
                }
                Err(BrowserError::NotFound(_) | BrowserError::Disabled { .. }) => {
                    log::debug!("{}: skipped", browser);
                }
                Err(e) => log::warn!("{}: {}", browser, e),
            }
        }
        all
    }
}

impl BookmarkSource for BrowserBookmarks {
    fn list_bookmarks(&self, browser: Browser) -> Result<Vec<Bookmark>, BrowserError> {
        if !self.is_enabled(browser) {
            return Err(BrowserError::Disabled { browser });
        }
        let files = self.bookmark_files(browser);
        if files.is_empty() {
            return Err(BrowserError::NotFound(browser));
        }

        let mut bookmarks = Vec::new();
        let mut last_error = None;
        let mut any_read = false;
        for file in &files {
            let result = match browser.format() {
                BookmarkFormat::Chromium => chromium::read_bookmarks(file, browser),
                BookmarkFormat::FirefoxPlaces => firefox::read_bookmarks(file, browser),
            };
            match result {
                Ok(found) => {
                    any_read = true;
                    bookmarks.extend(found);
                }
                Err(e) => {
                    log::warn!("{}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !any_read => Err(e),
            _ => Ok(bookmarks),
        }
    }
}
