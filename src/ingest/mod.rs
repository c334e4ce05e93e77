//! Bookmark ingestion: fetch each page, build its embedding text, store it,
//! and record the outcome so interrupted runs resume where they stopped.

pub mod extract;
pub mod fetch;
pub mod jsonl;
pub mod ledger;
pub mod preprocess;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::json;

use crate::browsers::Bookmark;
use crate::config::IngestConfig;
use crate::semantic::{SearchError, SemanticSearch};
use extract::PageContent;
use fetch::{FetchError, PageFetcher};
use jsonl::{BookmarkRecord, FailureRecord, JsonlLog, MetadataSink};
use ledger::{now_millis, LedgerEntry, LedgerError, UrlLedger};
use preprocess::{content_hash, document_id, embedding_text, EmbeddingFields};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("failed to start fetch workers: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Shared flag that stops a run between fetches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    /// Reprocess URLs the ledger already marks as done
    pub force_refresh: bool,
    pub url_limit: Option<usize>,
    pub show_progress: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl IngestOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            fetch_timeout: config.fetch_timeout(),
            force_refresh: false,
            url_limit: config.url_limit,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedUrl {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Unique bookmark URLs seen
    pub discovered: usize,
    pub already_processed: usize,
    pub skipped_invalid: usize,
    /// URLs whose fetch was started
    pub attempted: usize,
    pub stored: usize,
    pub failed: Vec<FailedUrl>,
    pub cancelled: bool,
}

/// A fetched bookmark waiting to be stored.
struct Prepared<'b> {
    bookmark: &'b Bookmark,
    page: PageContent,
    title: String,
    text: String,
}

pub struct Ingestor<'a> {
    search: &'a SemanticSearch,
    fetcher: Arc<dyn PageFetcher>,
    ledger: UrlLedger,
    metadata: Box<dyn MetadataSink + 'a>,
    failures: JsonlLog,
    cancel: CancelToken,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        search: &'a SemanticSearch,
        fetcher: Arc<dyn PageFetcher>,
        ledger: UrlLedger,
        metadata: Box<dyn MetadataSink + 'a>,
        failures: JsonlLog,
    ) -> Self {
        Self {
            search,
            fetcher,
            ledger,
            metadata,
            failures,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Process `bookmarks` in batches.
    ///
    /// Per-URL failures end up in the report, the ledger and the failure log.
    /// An error is returned only when a batch cannot be stored or the ledger
    /// cannot be saved; earlier batches stay recorded.
    pub fn run(
        &mut self,
        bookmarks: &[Bookmark],
        options: &IngestOptions,
    ) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport::default();
        let pending = self.select(bookmarks, options, &mut report);
        if pending.is_empty() {
            log::info!("Nothing to ingest");
            return Ok(report);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.concurrency.max(1))
            .thread_name(|i| format!("fetch-{}", i))
            .build()?;

        let bar = if options.show_progress {
            ProgressBar::new(pending.len() as u64).with_style(
                ProgressStyle::with_template("{bar:40} [{pos}/{len}] {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            )
        } else {
            ProgressBar::hidden()
        };

        log::info!(
            "Ingesting {} URLs in batches of {} with {} workers",
            pending.len(),
            options.batch_size,
            options.concurrency
        );

        for (number, batch) in pending.chunks(options.batch_size.max(1)).enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            log::debug!("Batch {}: {} URLs", number + 1, batch.len());

            let results: Vec<Result<PageContent, FetchError>> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|bookmark| {
                        if self.cancel.is_cancelled() {
                            return Err(FetchError::Cancelled);
                        }
                        let result = self
                            .fetcher
                            .fetch_and_extract(&bookmark.url, options.fetch_timeout);
                        bar.set_message(bookmark.url.clone());
                        bar.inc(1);
                        result
                    })
                    .collect()
            });

            self.process_batch(batch, results, &mut report)?;
        }

        bar.finish_and_clear();
        if self.cancel.is_cancelled() {
            report.cancelled = true;
        }

        log::info!(
            "Ingestion {}: {} stored, {} failed, {} already processed",
            if report.cancelled { "cancelled" } else { "finished" },
            report.stored,
            report.failed.len(),
            report.already_processed
        );
        Ok(report)
    }

    /// Deduplicate, drop invalid URLs and ledger successes, apply the limit.
    fn select<'b>(
        &self,
        bookmarks: &'b [Bookmark],
        options: &IngestOptions,
        report: &mut IngestReport,
    ) -> Vec<&'b Bookmark> {
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        for bookmark in bookmarks {
            let url = bookmark.url.trim();
            if !seen.insert(url) {
                continue;
            }
            report.discovered += 1;

            if !is_fetchable(url) {
                log::debug!("Skipping unsupported URL '{}'", url);
                report.skipped_invalid += 1;
                continue;
            }
            if !options.force_refresh && self.ledger.is_done(&bookmark.url) {
                report.already_processed += 1;
                continue;
            }
            pending.push(bookmark);
        }

        if let Some(limit) = options.url_limit {
            if pending.len() > limit {
                log::info!("Limiting run to {} of {} URLs", limit, pending.len());
                pending.truncate(limit);
            }
        }
        pending
    }

    fn process_batch(
        &mut self,
        batch: &[&Bookmark],
        results: Vec<Result<PageContent, FetchError>>,
        report: &mut IngestReport,
    ) -> Result<(), IngestError> {
        let mut entries = Vec::new();
        let mut failures = Vec::new();
        let mut prepared: HashMap<String, Prepared<'_>> = HashMap::new();
        let mut documents = Vec::new();

        for (bookmark, result) in batch.iter().copied().zip(results) {
            let page = match result {
                Ok(page) => page,
                Err(FetchError::Cancelled) => {
                    report.cancelled = true;
                    continue;
                }
                Err(e) => {
                    report.attempted += 1;
                    log::debug!("{}: {}", bookmark.url, e);
                    record_failure(bookmark, &e.to_string(), &mut entries, &mut failures, report);
                    continue;
                }
            };
            report.attempted += 1;

            let title = if bookmark.title.trim().is_empty() {
                page.title.clone().unwrap_or_default()
            } else {
                bookmark.title.trim().to_string()
            };
            let description = page.description.clone().unwrap_or_default();
            let fields = EmbeddingFields {
                url: &bookmark.url,
                title: &title,
                description: &description,
                content: &page.content,
                folder: &bookmark.folder,
                browser: bookmark.browser.as_str(),
            };
            let Some(text) = embedding_text(&fields) else {
                record_failure(bookmark, "no text to embed", &mut entries, &mut failures, report);
                continue;
            };

            let id = document_id(&bookmark.url);
            let mut document = json!({
                "id": id,
                "text": text,
                "url": bookmark.url,
                "title": title,
                "folder": bookmark.folder,
                "browser": bookmark.browser.as_str(),
                "description": description,
            });
            if let Some(added_at) = bookmark.added_at {
                document["added_at"] = json!(added_at);
            }
            documents.push(document);
            prepared.insert(
                id,
                Prepared {
                    bookmark,
                    page,
                    title,
                    text,
                },
            );
        }

        let outcome = match self.search.store_batch(&documents, "id", "text", None) {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = format!("store failed: {}", e);
                for item in prepared.values() {
                    record_failure(item.bookmark, &reason, &mut entries, &mut failures, report);
                }
                self.ledger.record_batch(entries)?;
                self.write_failures(&failures);
                return Err(e.into());
            }
        };

        if !outcome.is_complete() {
            log::debug!(
                "{} of {} documents were rejected by the store",
                outcome.failed_count(),
                documents.len()
            );
        }

        let fetched_at = now_millis();
        let mut records = Vec::with_capacity(outcome.stored.len());
        for id in &outcome.stored {
            let Some(item) = prepared.get(id) else {
                continue;
            };
            entries.push(LedgerEntry::success(
                &item.bookmark.url,
                content_hash(&item.text),
                id.clone(),
            ));
            records.push(BookmarkRecord {
                url: item.bookmark.url.clone(),
                title: item.title.clone(),
                folder: item.bookmark.folder.clone(),
                added_at: item.bookmark.added_at,
                browser: item.bookmark.browser.as_str().to_string(),
                description: item.page.description.clone().unwrap_or_default(),
                content: item.page.content.clone(),
                fetched_at,
                document_id: id.clone(),
            });
        }
        report.stored += records.len();

        for failed in &outcome.failed {
            if let Some(item) = prepared.get(&failed.key) {
                record_failure(item.bookmark, &failed.reason, &mut entries, &mut failures, report);
            }
        }

        for record in &records {
            if let Err(e) = self.metadata.append(record) {
                log::warn!("Failed to append metadata for {}: {}", record.url, e);
            }
        }
        self.write_failures(&failures);
        self.ledger.record_batch(entries)?;
        Ok(())
    }

    fn write_failures(&self, failures: &[FailureRecord]) {
        if let Err(e) = self.failures.append_all(failures) {
            log::warn!(
                "Failed to write {} entries to {}: {}",
                failures.len(),
                self.failures.path().display(),
                e
            );
        }
    }
}

fn record_failure(
    bookmark: &Bookmark,
    reason: &str,
    entries: &mut Vec<LedgerEntry>,
    failures: &mut Vec<FailureRecord>,
    report: &mut IngestReport,
) {
    entries.push(LedgerEntry::failed(&bookmark.url, reason));
    failures.push(FailureRecord::new(
        &bookmark.url,
        reason,
        Some(bookmark.browser.as_str()),
    ));
    report.failed.push(FailedUrl {
        url: bookmark.url.clone(),
        reason: reason.to_string(),
    });
}

/// Only absolute http(s) URLs with a host are fetched.
fn is_fetchable(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}
