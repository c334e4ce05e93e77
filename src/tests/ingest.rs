//! End-to-end ingestion runs with a scripted fetcher and the hashing embedder.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browsers::{Bookmark, Browser};
use crate::ingest::extract::PageContent;
use crate::ingest::fetch::{FetchError, PageFetcher};
use crate::ingest::jsonl::{BookmarkRecord, FailureRecord, JsonlLog};
use crate::ingest::ledger::{LedgerStatus, UrlLedger};
use crate::ingest::preprocess::document_id;
use crate::ingest::{CancelToken, IngestError, IngestOptions, Ingestor};
use crate::semantic::embeddings::EmbeddingError;
use crate::semantic::testing::hashing_cache;
use crate::semantic::{
    CollectionSpec, DistanceMetric, EmbeddingGenerator, MetadataFilter, MetadataValue,
    ModelCache, SearchOptions, SemanticSearch, VectorStore,
};

#[derive(Default)]
struct ScriptedFetcher {
    failures: HashMap<String, FetchError>,
    pages: HashMap<String, PageContent>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
    cancel_after: Option<(usize, CancelToken)>,
}

impl ScriptedFetcher {
    fn failing(urls: &[(&str, FetchError)]) -> Self {
        Self {
            failures: urls
                .iter()
                .map(|(url, e)| (url.to_string(), e.clone()))
                .collect(),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PageFetcher for ScriptedFetcher {
    fn fetch_and_extract(&self, url: &str, _timeout: Duration) -> Result<PageContent, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(url.to_string());
            calls.len()
        };
        if let Some((after, token)) = &self.cancel_after {
            if count >= *after {
                token.cancel();
            }
        }

        std::thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(e) = self.failures.get(url) {
            return Err(e.clone());
        }
        Ok(self.pages.get(url).cloned().unwrap_or_else(|| PageContent {
            title: Some(format!("Page title for {url}")),
            description: Some("notes about rust programming".to_string()),
            content: format!("Body text of {url}"),
        }))
    }
}

fn bookmark(url: &str, title: &str) -> Bookmark {
    Bookmark {
        url: url.to_string(),
        title: title.to_string(),
        folder: "Bar/Dev".to_string(),
        added_at: Some(1_700_000_000_000),
        browser: Browser::Chrome,
    }
}

fn bookmarks(count: usize) -> Vec<Bookmark> {
    (0..count)
        .map(|i| bookmark(&format!("https://site{i}.example/"), &format!("Site {i}")))
        .collect()
}

fn options(batch_size: usize, concurrency: usize) -> IngestOptions {
    IngestOptions {
        batch_size,
        concurrency,
        fetch_timeout: Duration::from_secs(1),
        force_refresh: false,
        url_limit: None,
        show_progress: false,
    }
}

fn open_search(dir: &Path) -> SemanticSearch {
    open_search_with(dir, hashing_cache(64))
}

fn open_search_with(dir: &Path, cache: Arc<ModelCache>) -> SemanticSearch {
    let spec = CollectionSpec {
        name: "bookmarks".to_string(),
        model: "hash".to_string(),
        metric: DistanceMetric::Cosine,
    };
    let store = VectorStore::open(&dir.join("db"), spec).unwrap();
    SemanticSearch::new(EmbeddingGenerator::new("hash", cache), store)
}

fn ingestor<'a>(
    search: &'a SemanticSearch,
    dir: &Path,
    fetcher: Arc<ScriptedFetcher>,
) -> Ingestor<'a> {
    let ledger = UrlLedger::load(&dir.join("ledger.json")).unwrap();
    Ingestor::new(
        search,
        fetcher,
        ledger,
        Box::new(JsonlLog::new(dir.join("metadata.jsonl"))),
        JsonlLog::new(dir.join("errors.jsonl")),
    )
}

#[test]
fn test_one_timeout_does_not_fail_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let search = open_search(dir.path());
    let input = bookmarks(10);
    let fetcher = Arc::new(ScriptedFetcher::failing(&[(
        "https://site3.example/",
        FetchError::Timeout,
    )]));

    let report = ingestor(&search, dir.path(), fetcher)
        .run(&input, &options(10, 4))
        .unwrap();

    assert_eq!(report.discovered, 10);
    assert_eq!(report.attempted, 10);
    assert_eq!(report.stored, 9);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].url, "https://site3.example/");
    assert!(!report.cancelled);
    assert_eq!(search.count().unwrap(), 9);

    let ledger = UrlLedger::load(&dir.path().join("ledger.json")).unwrap();
    assert_eq!(ledger.success_count(), 9);
    assert_eq!(ledger.failed_count(), 1);
    assert_eq!(
        ledger.get("https://site3.example/").unwrap().status,
        LedgerStatus::Failed {
            reason: "Request timeout".to_string()
        }
    );

    let failures: Vec<FailureRecord> = JsonlLog::new(dir.path().join("errors.jsonl"))
        .read_all()
        .unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].browser.as_deref(), Some("chrome"));

    let records: Vec<BookmarkRecord> = JsonlLog::new(dir.path().join("metadata.jsonl"))
        .read_all()
        .unwrap();
    assert_eq!(records.len(), 9);
    assert!(records.iter().all(|r| r.document_id == document_id(&r.url)));
}

#[test]
fn test_rerun_processes_only_unfinished_urls() {
    let dir = tempfile::tempdir().unwrap();
    let search = open_search(dir.path());
    let input = bookmarks(5);

    let first = Arc::new(ScriptedFetcher::failing(&[
        ("https://site1.example/", FetchError::NotFound),
        ("https://site4.example/", FetchError::Http(503)),
    ]));
    let report = ingestor(&search, dir.path(), first)
        .run(&input, &options(2, 2))
        .unwrap();
    assert_eq!(report.stored, 3);
    assert_eq!(report.failed.len(), 2);

    let stored_before = search.get(&document_id("https://site0.example/")).unwrap().unwrap();

    let second = Arc::new(ScriptedFetcher {
        pages: [(
            "https://site0.example/".to_string(),
            PageContent {
                title: Some("Changed".to_string()),
                description: None,
                content: "different body".to_string(),
            },
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    });
    let report = ingestor(&search, dir.path(), second.clone())
        .run(&input, &options(2, 2))
        .unwrap();

    assert_eq!(report.already_processed, 3);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.stored, 2);
    let mut calls = second.calls();
    calls.sort();
    assert_eq!(calls, vec!["https://site1.example/", "https://site4.example/"]);

    assert_eq!(search.count().unwrap(), 5);
    assert_eq!(
        search.get(&document_id("https://site0.example/")).unwrap().unwrap(),
        stored_before
    );
    let ledger = UrlLedger::load(&dir.path().join("ledger.json")).unwrap();
    assert_eq!(ledger.success_count(), 5);
}

#[test]
fn test_force_refresh_refetches_everything() {
    let dir = tempfile::tempdir().unwrap();
    let search = open_search(dir.path());
    let input = bookmarks(3);

    ingestor(&search, dir.path(), Arc::new(ScriptedFetcher::default()))
        .run(&input, &options(10, 2))
        .unwrap();

    let fetcher = Arc::new(ScriptedFetcher::default());
    let mut opts = options(10, 2);
    opts.force_refresh = true;
    let report = ingestor(&search, dir.path(), fetcher.clone())
        .run(&input, &opts)
        .unwrap();

    assert_eq!(report.already_processed, 0);
    assert_eq!(report.stored, 3);
    assert_eq!(fetcher.calls().len(), 3);
    assert_eq!(search.count().unwrap(), 3);
}

#[test]
fn test_fetch_pool_respects_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let search = open_search(dir.path());
    let input = bookmarks(24);
    let fetcher = Arc::new(ScriptedFetcher {
        delay: Duration::from_millis(20),
        ..Default::default()
    });

    let report = ingestor(&search, dir.path(), fetcher.clone())
        .run(&input, &options(12, 3))
        .unwrap();

    assert_eq!(report.stored, 24);
    let peak = fetcher.max_in_flight.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 3, "peak in-flight fetches: {peak}");
}

#[test]
fn test_cancellation_leaves_remaining_urls_unrecorded() {
    let dir = tempfile::tempdir().unwrap();
    let search = open_search(dir.path());
    let input = bookmarks(6);
    let token = CancelToken::new();
    let fetcher = Arc::new(ScriptedFetcher {
        cancel_after: Some((3, token.clone())),
        ..Default::default()
    });

    let report = ingestor(&search, dir.path(), fetcher.clone())
        .with_cancel_token(token)
        .run(&input, &options(2, 1))
        .unwrap();

    assert!(report.cancelled);
    let fetched = fetcher.calls();
    assert!(fetched.len() >= 3 && fetched.len() < 6, "{fetched:?}");

    let ledger = UrlLedger::load(&dir.path().join("ledger.json")).unwrap();
    assert_eq!(ledger.len(), fetched.len());
    for bookmark in &input {
        assert_eq!(
            ledger.get(&bookmark.url).is_some(),
            fetched.contains(&bookmark.url),
            "{}",
            bookmark.url
        );
    }
    // The last batch never starts
    assert!(ledger.get("https://site4.example/").is_none());
    assert!(ledger.get("https://site5.example/").is_none());
    assert_eq!(search.count().unwrap(), ledger.success_count());
}

#[test]
fn test_invalid_and_duplicate_urls_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let search = open_search(dir.path());
    let input = vec![
        bookmark("https://a.example/", "A"),
        bookmark("https://a.example/", "A again"),
        bookmark("", "empty"),
        bookmark("chrome://settings", "settings"),
        bookmark("javascript:alert(1)", "bookmarklet"),
        bookmark("https://b.example/", "B"),
        bookmark("https://c.example/", "C"),
    ];
    let fetcher = Arc::new(ScriptedFetcher::default());
    let mut opts = options(10, 2);
    opts.url_limit = Some(2);

    let report = ingestor(&search, dir.path(), fetcher.clone())
        .run(&input, &opts)
        .unwrap();

    assert_eq!(report.discovered, 6);
    assert_eq!(report.skipped_invalid, 3);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.stored, 2);
    let mut calls = fetcher.calls();
    calls.sort();
    assert_eq!(calls, vec!["https://a.example/", "https://b.example/"]);
    assert_eq!(
        search.get(&document_id("https://a.example/")).unwrap().unwrap().metadata["title"],
        MetadataValue::from("A")
    );
}

#[test]
fn test_enrichment_and_stored_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let search = open_search(dir.path());
    let mut untitled = bookmark("https://untitled.example/", "");
    untitled.browser = Browser::Brave;
    untitled.added_at = None;
    let input = vec![bookmark("https://titled.example/", "Kept title"), untitled];

    let fetcher = Arc::new(ScriptedFetcher::default());
    ingestor(&search, dir.path(), fetcher)
        .run(&input, &options(10, 2))
        .unwrap();

    let titled = search.get(&document_id("https://titled.example/")).unwrap().unwrap();
    assert_eq!(titled.metadata["title"], MetadataValue::from("Kept title"));
    assert_eq!(titled.metadata["folder"], MetadataValue::from("Bar/Dev"));
    assert_eq!(titled.metadata["added_at"], MetadataValue::Int(1_700_000_000_000));
    assert!(titled.text.starts_with("URL: https://titled.example/ | Title: Kept title"));

    let untitled = search.get(&document_id("https://untitled.example/")).unwrap().unwrap();
    assert_eq!(
        untitled.metadata["title"],
        MetadataValue::from("Page title for https://untitled.example/")
    );
    assert!(!untitled.metadata.contains_key("added_at"));

    let options = SearchOptions::default().with_filters(MetadataFilter::new().eq("browser", "brave"));
    let hits = search.search("rust programming", &options).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata["url"], MetadataValue::from("https://untitled.example/"));
}

#[test]
fn test_store_failure_stops_the_run_and_records_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(ModelCache::new(Box::new(|_| {
        Err(EmbeddingError::InitFailed("model unavailable".to_string()))
    })));
    let search = open_search_with(dir.path(), cache);
    let input = bookmarks(4);

    let result = ingestor(&search, dir.path(), Arc::new(ScriptedFetcher::default()))
        .run(&input, &options(2, 2));
    assert!(matches!(result, Err(IngestError::Search(_))));

    let ledger = UrlLedger::load(&dir.path().join("ledger.json")).unwrap();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger.success_count(), 0);
    assert!(ledger.get("https://site2.example/").is_none());
    assert_eq!(search.count().unwrap(), 0);
}
