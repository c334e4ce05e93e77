//! Persistent record of which URLs have been processed.
//!
//! Stored as a single JSON document rewritten atomically on every save. The
//! legacy form, a plain JSON array of URLs, is read as success entries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::{ensure_parent, write_atomic};

const LEDGER_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LedgerStatus {
    Success,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub url: String,
    /// Unix millis
    pub processed_at: i64,
    pub status: LedgerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl LedgerEntry {
    pub fn success(url: &str, content_hash: String, document_id: String) -> Self {
        Self {
            url: url.to_string(),
            processed_at: now_millis(),
            status: LedgerStatus::Success,
            content_hash: Some(content_hash),
            document_id: Some(document_id),
        }
    }

    pub fn failed(url: &str, reason: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            processed_at: now_millis(),
            status: LedgerStatus::Failed {
                reason: reason.into(),
            },
            content_hash: None,
            document_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == LedgerStatus::Success
    }
}

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    entries: Vec<LedgerEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredLedger {
    Current(LedgerFile),
    Legacy(Vec<String>),
}

pub struct UrlLedger {
    path: PathBuf,
    entries: HashMap<String, LedgerEntry>,
}

impl UrlLedger {
    /// Load the ledger at `path`; a missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let mut ledger = Self {
            path: path.to_path_buf(),
            entries: HashMap::new(),
        };
        if !path.exists() {
            return Ok(ledger);
        }

        let data = std::fs::read(path)?;
        match serde_json::from_slice::<StoredLedger>(&data)? {
            StoredLedger::Current(file) => {
                for entry in file.entries {
                    ledger.entries.insert(entry.url.clone(), entry);
                }
            }
            StoredLedger::Legacy(urls) => {
                log::info!("Migrating legacy URL list with {} entries", urls.len());
                let processed_at = now_millis();
                for url in urls {
                    ledger.entries.insert(
                        url.clone(),
                        LedgerEntry {
                            url,
                            processed_at,
                            status: LedgerStatus::Success,
                            content_hash: None,
                            document_id: None,
                        },
                    );
                }
            }
        }

        log::debug!("Loaded {} ledger entries from {}", ledger.len(), path.display());
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, url: &str) -> Option<&LedgerEntry> {
        self.entries.get(url)
    }

    /// True when `url` was processed successfully.
    pub fn is_done(&self, url: &str) -> bool {
        self.entries.get(url).map(|e| e.is_success()).unwrap_or(false)
    }

    pub fn success_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.len() - self.success_count()
    }

    /// Insert or replace the entries of a batch and save once.
    ///
    /// If saving fails the entries stay in memory and go out with the next save.
    pub fn record_batch(&mut self, entries: Vec<LedgerEntry>) -> Result<(), LedgerError> {
        if entries.is_empty() {
            return Ok(());
        }
        for entry in entries {
            self.entries.insert(entry.url.clone(), entry);
        }
        self.save()
    }

    pub fn save(&self) -> Result<(), LedgerError> {
        let mut entries: Vec<LedgerEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.url.cmp(&b.url));

        let data = serde_json::to_vec_pretty(&LedgerFile {
            version: LEDGER_VERSION,
            entries,
        })?;
        ensure_parent(&self.path)?;
        write_atomic(&self.path, &data)?;
        Ok(())
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UrlLedger::load(&dir.path().join("ledger.json")).unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.is_done("https://example.com"));
    }

    #[test]
    fn test_record_batch_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/ledger.json");

        let mut ledger = UrlLedger::load(&path).unwrap();
        ledger
            .record_batch(vec![
                LedgerEntry::success("https://a.example", "hash".into(), "id".into()),
                LedgerEntry::failed("https://b.example", "URL not found"),
            ])
            .unwrap();

        let reloaded = UrlLedger::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.is_done("https://a.example"));
        assert!(!reloaded.is_done("https://b.example"));
        assert_eq!(reloaded.success_count(), 1);
        assert_eq!(reloaded.failed_count(), 1);
        assert_eq!(
            reloaded.get("https://b.example").unwrap().status,
            LedgerStatus::Failed {
                reason: "URL not found".into()
            }
        );
        assert_eq!(
            reloaded.get("https://a.example").unwrap().document_id.as_deref(),
            Some("id")
        );
    }

    #[test]
    fn test_failed_entry_is_replaced_by_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let mut ledger = UrlLedger::load(&path).unwrap();

        ledger
            .record_batch(vec![LedgerEntry::failed("https://a.example", "timeout")])
            .unwrap();
        ledger
            .record_batch(vec![LedgerEntry::success("https://a.example", "h".into(), "d".into())])
            .unwrap();

        assert_eq!(ledger.len(), 1);
        assert!(UrlLedger::load(&path).unwrap().is_done("https://a.example"));
    }

    #[test]
    fn test_legacy_url_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_urls.json");
        std::fs::write(&path, r#"["https://a.example", "https://b.example"]"#).unwrap();

        let ledger = UrlLedger::load(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.is_done("https://a.example"));
        assert!(ledger.is_done("https://b.example"));

        // Saving upgrades the file to the current format
        ledger.save().unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["entries"][0]["status"]["state"], "success");
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(UrlLedger::load(&path), Err(LedgerError::Parse(_))));
    }

    #[test]
    fn test_failed_save_keeps_entries_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the ledger file should be makes the rename fail
        let path = dir.path().join("ledger.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let mut ledger = UrlLedger::load(&dir.path().join("missing.json")).unwrap();
        ledger.path = path;
        let result = ledger.record_batch(vec![LedgerEntry::failed("https://a.example", "x")]);
        assert!(result.is_err());
        assert_eq!(ledger.len(), 1);
    }
}
