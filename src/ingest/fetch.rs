use std::error::Error;
use std::thread::sleep;
use std::time::{Duration, Instant};

use rand::random;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use crate::ingest::extract::{extract_page, PageContent};

const USER_AGENT_DEFAULT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const MAX_BACKOFF_DOUBLINGS: u32 = 6;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("Request timeout")]
    Timeout,

    #[error("HTTP {0} error")]
    Http(u16),

    #[error("Authentication required or access denied")]
    AccessDenied,

    #[error("URL not found")]
    NotFound,

    #[error("Not HTML content: {0}")]
    NotHtml(String),

    #[error("Connection error: {0}")]
    Network(String),

    #[error("Page has no extractable content")]
    Empty,

    #[error("Cancelled")]
    Cancelled,
}

impl FetchError {
    /// Timeouts, connection failures, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Network(_) => true,
            FetchError::Http(status) => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Fetches a page and extracts what a bookmark needs from it.
pub trait PageFetcher: Send + Sync {
    fn fetch_and_extract(&self, url: &str, timeout: Duration) -> Result<PageContent, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Extra attempts after the first for retryable failures
    pub max_retries: u32,
    /// Base delay before a retry, doubled per attempt plus jitter
    pub retry_delay: Duration,
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            accept_invalid_certs: false,
            user_agent: USER_AGENT_DEFAULT.to_string(),
        }
    }
}

/// Blocking reqwest fetcher. The client is shared across worker threads.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    settings: FetchSettings,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .pool_idle_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FetchError::Network(get_error(&e)))?;

        Ok(Self { client, settings })
    }

    /// Fetch the HTML of `url`, retrying transient failures.
    ///
    /// `timeout` bounds the whole fetch: every attempt gets what is left of it
    /// and no retry starts once the backoff would outlast it.
    pub fn fetch_html(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FetchError::Timeout);
            }
            match self.fetch_once(url, remaining) {
                Err(err) if err.is_retryable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    if delay >= deadline.saturating_duration_since(Instant::now()) {
                        log::debug!("{url}: no time left to retry after error: {}", err);
                        return Err(err);
                    }
                    log::debug!(
                        "{url}: retrying (attempt {}/{}) after error: {}, backoff {}ms",
                        attempt,
                        self.settings.max_retries,
                        err,
                        delay.as_millis()
                    );
                    sleep(delay);
                }
                result => return result,
            }
        }
    }

    fn fetch_once(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        log::debug!("{url}: requesting");

        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(classify_error)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::AccessDenied);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            log::debug!("{url}: {}", status);
            return Err(FetchError::Http(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if !content_type.contains("text/html") && !content_type.contains("application/xhtml") {
            return Err(FetchError::NotHtml(content_type));
        }

        resp.text().map_err(classify_error)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.settings.retry_delay.as_millis() as u64;
        let jitter = if base > 0 { random::<u64>() % base } else { 0 };
        let factor = 1u64 << (attempt.saturating_sub(1)).min(MAX_BACKOFF_DOUBLINGS);
        Duration::from_millis(base.saturating_mul(factor).saturating_add(jitter))
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch_and_extract(&self, url: &str, timeout: Duration) -> Result<PageContent, FetchError> {
        let html = self.fetch_html(url, timeout)?;
        let page = extract_page(&html);
        if page.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(page)
    }
}

fn classify_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(get_error(&err))
    }
}

/// Innermost useful message of a reqwest error chain.
fn get_error(error: &reqwest::Error) -> String {
    match error.source() {
        Some(e) => match e.source() {
            Some(e) => e.to_string(),
            None => e.to_string(),
        },
        None => error.to_string(),
    }
}
