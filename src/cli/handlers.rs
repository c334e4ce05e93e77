use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use inquire::error::InquireResult;
use serde::Serialize;
use serde_json::json;

use crate::browsers::{BookmarkSource, Browser, BrowserBookmarks};
use crate::config::Config;
use crate::ingest::fetch::{FetchSettings, HttpFetcher};
use crate::ingest::jsonl::{FailureRecord, JsonlLog};
use crate::ingest::ledger::UrlLedger;
use crate::ingest::{CancelToken, IngestOptions, Ingestor};
use crate::semantic::{MetadataFilter, ModelCache, SearchOptions, SemanticSearch};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_search(config: &Config) -> Result<SemanticSearch> {
    let cache = ModelCache::global(
        config.base_path().to_path_buf(),
        config.search.download_timeout(),
    );
    SemanticSearch::open(&config.search, cache).with_context(|| {
        format!(
            "failed to open collection '{}' in {}",
            config.search.collection,
            config.search.db_path.display()
        )
    })
}

pub fn handle_index(
    config: &Config,
    browsers: Vec<Browser>,
    force: bool,
    limit: Option<usize>,
    concurrency: Option<usize>,
    no_progress: bool,
    cancel: CancelToken,
) -> Result<()> {
    let source = BrowserBookmarks::for_current_user(config.browsers.clone())?;
    let bookmarks = if browsers.is_empty() {
        source.collect(&Browser::ALL)
    } else {
        let mut bookmarks = Vec::new();
        for browser in browsers {
            bookmarks.extend(source.list_bookmarks(browser)?);
        }
        bookmarks
    };
    if bookmarks.is_empty() {
        log::warn!("No bookmarks found");
    }

    let search = open_search(config)?;
    let fetcher = HttpFetcher::new(FetchSettings {
        max_retries: config.ingest.max_retries,
        accept_invalid_certs: config.ingest.accept_invalid_certs,
        ..Default::default()
    })?;
    let ledger = UrlLedger::load(&config.ledger_path)
        .with_context(|| format!("failed to load {}", config.ledger_path.display()))?;

    let mut options = IngestOptions::from_config(&config.ingest);
    options.force_refresh = force;
    if limit.is_some() {
        options.url_limit = limit;
    }
    if let Some(concurrency) = concurrency {
        options.concurrency = concurrency.max(1);
    }
    options.show_progress = !no_progress && std::io::stderr().is_terminal();

    let mut ingestor = Ingestor::new(
        &search,
        Arc::new(fetcher),
        ledger,
        Box::new(JsonlLog::new(config.metadata_log_path.clone())),
        JsonlLog::new(config.error_log_path.clone()),
    )
    .with_cancel_token(cancel);

    let report = ingestor.run(&bookmarks, &options)?;
    print_json(&report)
}

pub fn handle_search(
    config: &Config,
    query: &str,
    limit: usize,
    filters: &[String],
    no_distances: bool,
) -> Result<()> {
    let filters = MetadataFilter::from_pairs(filters).map_err(anyhow::Error::msg)?;
    let options = SearchOptions {
        limit,
        include_distances: !no_distances,
        ..Default::default()
    }
    .with_filters(filters);

    let hits = open_search(config)?.search(query, &options)?;
    print_json(&hits)
}

pub fn handle_get(config: &Config, id: &str, with_vector: bool) -> Result<()> {
    let search = open_search(config)?;
    let Some(document) = search.get(id)? else {
        bail!("document '{}' not found", id);
    };
    if !with_vector {
        return print_json(&document);
    }

    let mut value = serde_json::to_value(&document)?;
    value["vector"] = json!(search.get_vector(id)?);
    print_json(&value)
}

pub fn handle_delete(config: &Config, ids: &[String]) -> Result<()> {
    let search = open_search(config)?;
    let deleted = search.delete_batch(ids)?;
    if deleted < ids.len() {
        log::warn!("{} of {} ids were not in the collection", ids.len() - deleted, ids.len());
    }
    print_json(&json!({ "deleted": deleted }))
}

pub fn handle_stats(config: &Config) -> Result<()> {
    let stats = open_search(config)?.stats()?;
    let ledger = UrlLedger::load(&config.ledger_path)
        .with_context(|| format!("failed to load {}", config.ledger_path.display()))?;
    let metadata_records = JsonlLog::new(config.metadata_log_path.clone()).count()?;

    print_json(&json!({
        "collection": stats,
        "ledger": {
            "path": ledger.path(),
            "processed": ledger.success_count(),
            "failed": ledger.failed_count(),
        },
        "metadata_records": metadata_records,
    }))
}

pub fn handle_export(config: &Config, path: &Path) -> Result<()> {
    let exported = open_search(config)?.export(path)?;
    print_json(&json!({ "exported": exported, "path": path }))
}

pub fn handle_import(config: &Config, path: &Path) -> Result<()> {
    let imported = open_search(config)?
        .import(path)
        .with_context(|| format!("failed to import {}", path.display()))?;
    print_json(&json!({ "imported": imported }))
}

/// Ask before a destructive action. `false` means the user declined.
fn confirm(message: String) -> Result<bool> {
    match inquire::prompt_confirmation(message) {
        InquireResult::Ok(answer) => Ok(answer),
        InquireResult::Err(err) => bail!("{}", err),
    }
}

pub fn handle_clear(config: &Config, yes: bool) -> Result<()> {
    let search = open_search(config)?;
    let count = search.count()?;

    if !yes
        && !confirm(format!(
            "Remove all {} documents from '{}'? (y/n)",
            count, config.search.collection
        ))?
    {
        return Ok(());
    }

    search.clear()?;
    print_json(&json!({ "cleared": count }))
}

pub fn handle_drop(config: &Config, yes: bool) -> Result<()> {
    let search = open_search(config)?;
    let stats = search.stats()?;

    if !yes
        && !confirm(format!(
            "Delete collection '{}' with {} documents at {}? (y/n)",
            stats.collection_name,
            stats.total_documents,
            stats.path.display()
        ))?
    {
        return Ok(());
    }

    search.drop_collection()?;
    print_json(&json!({ "dropped": stats.collection_name }))
}

pub fn handle_failures(config: &Config) -> Result<()> {
    let failures: Vec<FailureRecord> = JsonlLog::new(config.error_log_path.clone()).read_all()?;
    print_json(&failures)
}

pub fn handle_browsers(config: &Config) -> Result<()> {
    let source = BrowserBookmarks::for_current_user(config.browsers.clone())?;
    print_json(&source.available_browsers())
}
