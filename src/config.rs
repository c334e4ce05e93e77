use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::browsers::Browser;
use crate::semantic::embeddings::{FastEmbedModel, DEFAULT_BATCH_SIZE, DEFAULT_DOWNLOAD_TIMEOUT};
use crate::semantic::{DistanceMetric, DEFAULT_MODEL};
use crate::storage::write_atomic;

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_DB_PATH: &str = "db";
const DEFAULT_COLLECTION: &str = "bookmarks";

const DEFAULT_INGEST_BATCH_SIZE: usize = 100;
const DEFAULT_CONCURRENCY: usize = 10;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_RETRIES: u32 = 2;
const MAX_RETRIES_LIMIT: u32 = 5;

const DEFAULT_LEDGER_PATH: &str = "processed_urls.json";
const DEFAULT_METADATA_LOG_PATH: &str = "bookmarks_metadata.jsonl";
const DEFAULT_ERROR_LOG_PATH: &str = "failed_urls.jsonl";

/// Base directory: `BOOKVEC_BASE_PATH`, else `~/.local/share/bookvec`.
pub fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("BOOKVEC_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }
    let home = my_home()
        .context("failed to resolve home directory")?
        .context("home directory is not set")?;
    Ok(home.join(".local/share/bookvec"))
}

/// Embedding and vector store settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Directory holding one subdirectory per collection
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub distance_metric: DistanceMetric,

    /// Texts per model call
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    /// Timeout for the first model load, download included
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            collection: default_collection(),
            model: default_model(),
            distance_metric: DistanceMetric::default(),
            embed_batch_size: default_embed_batch_size(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

impl SearchConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_embed_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT.as_secs()
}

/// Bookmark fetching settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// URLs per store call and ledger save
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,

    /// Simultaneous page fetches
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Budget for one URL, retries and backoff included
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Extra attempts for timeouts, connection errors, 5xx and 429, at most 5
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Cap on URLs processed per run
    #[serde(default)]
    pub url_limit: Option<usize>,

    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_ingest_batch_size(),
            concurrency: default_concurrency(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_retries: default_max_retries(),
            url_limit: None,
            accept_invalid_certs: false,
        }
    }
}

impl IngestConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_ingest_batch_size() -> usize {
    DEFAULT_INGEST_BATCH_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Per-browser discovery settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    /// Extra `Bookmarks` files or profile directories
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            paths: Vec::new(),
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub browsers: BTreeMap<Browser, BrowserConfig>,

    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_metadata_log_path")]
    pub metadata_log_path: PathBuf,
    #[serde(default = "default_error_log_path")]
    pub error_log_path: PathBuf,

    #[serde(default)]
    pub debug: bool,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,

    /// Messages produced while loading, before logging is set up
    #[serde(skip_serializing, skip_deserializing)]
    notices: Vec<(log::Level, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            ingest: IngestConfig::default(),
            browsers: BTreeMap::new(),
            ledger_path: default_ledger_path(),
            metadata_log_path: default_metadata_log_path(),
            error_log_path: default_error_log_path(),
            debug: false,
            base_path: PathBuf::new(),
            notices: Vec::new(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(DEFAULT_LEDGER_PATH)
}

fn default_metadata_log_path() -> PathBuf {
    PathBuf::from(DEFAULT_METADATA_LOG_PATH)
}

fn default_error_log_path() -> PathBuf {
    PathBuf::from(DEFAULT_ERROR_LOG_PATH)
}

impl Config {
    fn validate(&mut self) -> anyhow::Result<()> {
        let ingest = &mut self.ingest;
        let notices = &mut self.notices;
        if ingest.batch_size == 0 {
            notices.push((log::Level::Warn, "ingest.batch_size is 0, using 1".to_string()));
            ingest.batch_size = 1;
        }
        if ingest.concurrency == 0 {
            notices.push((log::Level::Warn, "ingest.concurrency is 0, using 1".to_string()));
            ingest.concurrency = 1;
        }
        if ingest.fetch_timeout_secs == 0 {
            bail!("ingest.fetch_timeout_secs must be greater than 0");
        }
        if ingest.url_limit == Some(0) {
            bail!("ingest.url_limit must be greater than 0 when set");
        }
        if ingest.max_retries > MAX_RETRIES_LIMIT {
            notices.push((
                log::Level::Warn,
                format!(
                    "ingest.max_retries is {}, using {}",
                    ingest.max_retries, MAX_RETRIES_LIMIT
                ),
            ));
            ingest.max_retries = MAX_RETRIES_LIMIT;
        }

        let search = &mut self.search;
        if search.embed_batch_size == 0 {
            notices.push((
                log::Level::Warn,
                "search.embed_batch_size is 0, using 1".to_string(),
            ));
            search.embed_batch_size = 1;
        }
        if search.download_timeout_secs == 0 {
            bail!("search.download_timeout_secs must be greater than 0");
        }
        if search.collection.trim().is_empty() {
            bail!("search.collection must not be empty");
        }
        FastEmbedModel::parse_model_name(&search.model)
            .with_context(|| format!("search.model '{}' is not supported", search.model))?;

        Ok(())
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(&base_path()?)
    }

    /// Load `config.yaml` from `base_path`, writing the defaults first if it
    /// does not exist. Relative paths in the file resolve against `base_path`.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        let created = !config_path.exists();
        if created {
            std::fs::create_dir_all(base_path)
                .with_context(|| format!("failed to create {}", base_path.display()))?;
            let defaults = serde_yml::to_string(&Self::default())?;
            write_atomic(&config_path, defaults.as_bytes())
                .with_context(|| format!("failed to write {}", config_path.display()))?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", config_path.display()))?;

        config.base_path = base_path.to_path_buf();
        if created {
            config.notices.push((
                log::Level::Info,
                format!("Wrote default configuration to {}", config_path.display()),
            ));
        }
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        config.resolve_paths();
        Ok(config)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Drain the messages collected by `load`, to be logged once logging is up.
    pub fn take_notices(&mut self) -> Vec<(log::Level, String)> {
        std::mem::take(&mut self.notices)
    }

    fn save(&self) -> anyhow::Result<()> {
        let config_path = self.base_path.join(CONFIG_FILE);
        let config_str = serde_yml::to_string(&self)?;
        write_atomic(&config_path, config_str.as_bytes())
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        Ok(())
    }

    fn resolve_paths(&mut self) {
        let base = self.base_path.clone();
        for path in [
            &mut self.search.db_path,
            &mut self.ledger_path,
            &mut self.metadata_log_path,
            &mut self.error_log_path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        for browser in self.browsers.values_mut() {
            for path in browser.paths.iter_mut() {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
        }
    }
}
