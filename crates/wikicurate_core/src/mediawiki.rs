use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, RETRY_AFTER, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::category_graph::{PageBody, PageSource};
use crate::config::CurateConfig;
use crate::title::PageTitle;

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Sent as `maxlag`; 0 leaves it off.
    pub maxlag_seconds: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &CurateConfig) -> Self {
        Self {
            api_url: config.api_url(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
            maxlag_seconds: env_value_u64("WIKI_MAXLAG", 5),
        }
    }
}

/// Read-only MediaWiki API client. Requests are spaced by the read rate limit and
/// transient failures are retried with exponential backoff.
pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    /// Current wikitext of `title`. A page the wiki does not have comes back with
    /// `missing` set rather than as an error.
    pub fn get_page_text(&mut self, title: &PageTitle) -> Result<PageBody> {
        let pairs = page_content_query(title, self.config.maxlag_seconds);
        let response = self.fetch_query(&pairs)?;
        decode_page_body(title, response)
    }

    fn fetch_query(&mut self, pairs: &[(&'static str, String)]) -> Result<Value> {
        let url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;

        let mut retries = 0usize;
        loop {
            self.apply_rate_limit();
            match self.send_once(&url, pairs) {
                Attempt::Done(payload) => return Ok(payload),
                Attempt::Failed(error) => return Err(error),
                Attempt::Retry { reason, wait } => {
                    if retries >= self.config.max_retries {
                        bail!(
                            "MediaWiki API request gave up after {} attempts: {reason}",
                            retries + 1
                        );
                    }
                    let wait = wait.unwrap_or_else(|| self.backoff(retries));
                    tracing::debug!(%reason, retries, wait_ms = wait.as_millis() as u64, "retrying MediaWiki request");
                    sleep(wait);
                    retries += 1;
                }
            }
        }
    }

    fn send_once(&self, url: &Url, pairs: &[(&'static str, String)]) -> Attempt {
        let response = match self
            .client
            .get(url.clone())
            .header(USER_AGENT, self.config.user_agent.as_str())
            .query(pairs)
            .send()
        {
            Ok(response) => response,
            Err(error) if is_retryable_error(&error) => {
                return Attempt::Retry {
                    reason: error.to_string(),
                    wait: None,
                };
            }
            Err(error) => {
                return Attempt::Failed(
                    anyhow::Error::new(error).context("failed to call MediaWiki API"),
                );
            }
        };

        let status = response.status();
        let wait = retry_after(response.headers());
        if !status.is_success() {
            if is_retryable_status(status) {
                return Attempt::Retry {
                    reason: format!("HTTP {status}"),
                    wait,
                };
            }
            return Attempt::Failed(anyhow!("MediaWiki API request failed with HTTP {status}"));
        }

        match response.json::<Value>() {
            Ok(payload) => classify_payload(payload, wait),
            Err(error) => Attempt::Failed(
                anyhow::Error::new(error).context("failed to decode MediaWiki API JSON response"),
            ),
        }
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_read_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    /// Exponential backoff with up to 100ms of jitter, used when the server gave no
    /// `Retry-After`.
    fn backoff(&self, retries: usize) -> Duration {
        let exponent = u32::try_from(retries).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        Duration::from_millis(base.saturating_add(jitter))
    }
}

enum Attempt {
    Done(Value),
    Retry {
        reason: String,
        wait: Option<Duration>,
    },
    Failed(anyhow::Error),
}

/// An `error` object in an API response body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("MediaWiki API error [{code}]: {info}")]
pub struct ApiError {
    pub code: String,
    pub info: String,
}

impl ApiError {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let error = payload.get("error")?;
        let field = |name: &str, fallback: &str| {
            error
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or(fallback)
                .to_string()
        };
        Some(Self {
            code: field("code", "unknown_error"),
            info: field("info", "unknown info"),
        })
    }

    /// Replication lag and rate limiting clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self.code.as_str(), "maxlag" | "ratelimited")
    }
}

fn classify_payload(payload: Value, retry_after: Option<Duration>) -> Attempt {
    match ApiError::from_payload(&payload) {
        None => Attempt::Done(payload),
        Some(error) if error.is_transient() => Attempt::Retry {
            reason: error.to_string(),
            wait: retry_after,
        },
        Some(error) => Attempt::Failed(error.into()),
    }
}

fn page_content_query(title: &PageTitle, maxlag_seconds: u64) -> Vec<(&'static str, String)> {
    let mut pairs = vec![
        ("format", "json".to_string()),
        ("formatversion", "2".to_string()),
        ("action", "query".to_string()),
        ("titles", title.to_string()),
        ("prop", "revisions".to_string()),
        ("rvprop", "content".to_string()),
        ("rvslots", "main".to_string()),
    ];
    if maxlag_seconds > 0 {
        pairs.push(("maxlag", maxlag_seconds.to_string()));
    }
    pairs
}

/// `Retry-After` in delta-seconds form. HTTP dates are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

impl PageSource for MediaWikiClient {
    fn fetch_page(&mut self, title: &PageTitle) -> Result<Option<PageBody>> {
        let body = self
            .get_page_text(title)
            .with_context(|| format!("failed to fetch {title}"))?;
        Ok(Some(body))
    }
}

fn decode_page_body(requested: &PageTitle, response: Value) -> Result<PageBody> {
    let parsed: QueryResponse = serde_json::from_value(response)
        .context("failed to decode page content API response")?;
    let Some(page) = parsed.query.pages.into_iter().next() else {
        bail!("MediaWiki API returned no page for {requested}");
    };
    let title = PageTitle::parse(&page.title);

    if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
        return Ok(PageBody {
            title,
            wikitext: String::new(),
            missing: true,
        });
    }

    let content = page
        .revisions
        .into_iter()
        .next()
        .and_then(|revision| revision.slots)
        .and_then(|slots| slots.main)
        .map(|slot| slot.content)
        .with_context(|| format!("no revision content for {}", page.title))?;
    Ok(PageBody {
        title,
        wikitext: content,
        missing: false,
    })
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}
