//! Append-only JSON Lines logs: the bookmark metadata log and the failure log.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::storage::ensure_parent;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A stored bookmark as written to the metadata log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<i64>,
    pub browser: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    /// Unix millis
    pub fetched_at: i64,
    pub document_id: String,
}

/// A URL that could not be processed, as written to the failure log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub url: String,
    pub reason: String,
    /// RFC 3339
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
}

impl FailureRecord {
    pub fn new(url: &str, reason: &str, browser: Option<&str>) -> Self {
        Self {
            url: url.to_string(),
            reason: reason.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            browser: browser.map(str::to_string),
        }
    }
}

/// Durable destination for stored bookmark records.
pub trait MetadataSink: Send + Sync {
    fn append(&self, record: &BookmarkRecord) -> Result<(), LogError>;
}

pub struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one JSON line per record with a single open and flush.
    pub fn append_all<T: Serialize>(&self, records: &[T]) -> Result<(), LogError> {
        if records.is_empty() {
            return Ok(());
        }
        ensure_parent(&self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read every record. Lines that do not parse are skipped with a warning.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, LogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(&self.path)?);
        let mut records = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!(
                    "{}:{}: skipping unreadable line: {}",
                    self.path.display(),
                    number + 1,
                    e
                ),
            }
        }
        Ok(records)
    }

    /// Number of non-empty lines.
    pub fn count(&self) -> Result<usize, LogError> {
        if !self.path.exists() {
            return Ok(0);
        }
        let reader = BufReader::new(std::fs::File::open(&self.path)?);
        let mut count = 0;
        for line in reader.lines() {
            if !line?.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl MetadataSink for JsonlLog {
    fn append(&self, record: &BookmarkRecord) -> Result<(), LogError> {
        self.append_all(std::slice::from_ref(record))
    }
}
