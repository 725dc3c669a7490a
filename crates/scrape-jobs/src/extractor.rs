//! Page extraction collaborator.
//!
//! The worker only sees the [`Extractor`] trait: give it a URL, get back a
//! [`ScrapeResult`] or a classified [`FetchError`]. [`HttpExtractor`] is the
//! default implementation (plain HTTP fetch plus static HTML parsing, no
//! JavaScript rendering).

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::debug;
use url::Url;

use scrape_core::{defaults, Error, Result, ScrapeResult};

/// Per-call extraction settings derived from the job's options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    pub timeout: Duration,
    /// Overrides the extractor's default User-Agent.
    pub user_agent: Option<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
            user_agent: None,
        }
    }
}

/// Why an extraction failed. The `Display` form is `"<kind>: <message>"` and
/// is what ends up in the job's `error` field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("http: status {0}")]
    Http(u16),

    #[error("too_large: {0}")]
    TooLarge(String),

    #[error("parse: {0}")]
    Parse(String),
}

impl FetchError {
    /// Short classification tag.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::Timeout(_) => "timeout",
            FetchError::Http(_) => "http",
            FetchError::TooLarge(_) => "too_large",
            FetchError::Parse(_) => "parse",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Http(status.as_u16())
        } else if err.is_builder() || err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Fetches a page and turns it into structured content.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn fetch_and_extract(
        &self,
        url: &str,
        options: &ExtractOptions,
    ) -> std::result::Result<ScrapeResult, FetchError>;
}

/// Extractor backed by `reqwest` and `scraper`.
pub struct HttpExtractor {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpExtractor {
    /// Build with the default User-Agent and a 10 MB body cap.
    pub fn new() -> Result<Self> {
        Self::with_user_agent(defaults::USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,text/plain;q=0.8,*/*;q=0.5",
            ),
        );

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_body_bytes: defaults::MAX_PAGE_SIZE_BYTES,
        })
    }

    /// Limit how many body bytes are read before giving up.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn fetch_and_extract(
        &self,
        url: &str,
        options: &ExtractOptions,
    ) -> std::result::Result<ScrapeResult, FetchError> {
        let mut request = self.client.get(url).timeout(options.timeout);
        if let Some(user_agent) = &options.user_agent {
            request = request.header(USER_AGENT, user_agent);
        }

        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(declared) = response.content_length() {
            if declared > self.max_body_bytes as u64 {
                return Err(FetchError::TooLarge(format!(
                    "declared {} bytes exceeds limit of {}",
                    declared, self.max_body_bytes
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(FetchError::TooLarge(format!(
                    "body exceeds limit of {} bytes",
                    self.max_body_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(
            subsystem = "extractor",
            component = "http",
            url = %final_url,
            status = status.as_u16(),
            bytes = body.len(),
            "Fetched page"
        );

        let page = parse_page(&body, content_type.as_deref(), &final_url)?;

        Ok(ScrapeResult {
            url: final_url.to_string(),
            title: page.title,
            text: page.text,
            links: page.links,
            screenshot_ref: None,
            status_code: Some(status.as_u16()),
            content_type,
            content_length: Some(body.len() as u64),
            scraped_at: Some(Utc::now()),
        })
    }
}

/// Content pulled out of a fetched body.
#[derive(Debug, Default, PartialEq)]
pub struct ParsedPage {
    pub title: Option<String>,
    pub text: Option<String>,
    pub links: Vec<String>,
}

/// Parse a response body according to its content type.
///
/// HTML (or an unlabelled body) is parsed as a document, `text/plain` is kept
/// as text, and anything else is rejected.
pub fn parse_page(
    body: &[u8],
    content_type: Option<&str>,
    base: &Url,
) -> std::result::Result<ParsedPage, FetchError> {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase());

    let decoded = String::from_utf8_lossy(body);
    match mime.as_deref() {
        None | Some("text/html") | Some("application/xhtml+xml") => {
            let document = Html::parse_document(&decoded);
            Ok(ParsedPage {
                title: extract_title(&document),
                text: non_empty(extract_text(&document)),
                links: extract_links(&document, base),
            })
        }
        Some("text/plain") => Ok(ParsedPage {
            title: None,
            text: non_empty(truncate_chars(
                &collapse_whitespace(&decoded),
                defaults::MAX_TEXT_CHARS,
            )),
            links: Vec::new(),
        }),
        Some(other) => Err(FetchError::Parse(format!(
            "unsupported content type '{}'",
            other
        ))),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// Visible text of the document, whitespace-collapsed and capped.
fn extract_text(document: &Html) -> String {
    const HIDDEN: [&str; 5] = ["head", "script", "style", "noscript", "template"];

    let mut parts: Vec<&str> = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map_or(false, |el| HIDDEN.contains(&el.name()))
        });
        if !hidden {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed);
            }
        }
    }

    truncate_chars(&collapse_whitespace(&parts.join(" ")), defaults::MAX_TEXT_CHARS)
}

/// Absolute http(s) links in document order, fragments stripped, deduplicated.
fn extract_links(document: &Html, base: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(mut resolved) = base.join(href.trim()) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        resolved.set_fragment(None);
        let link = resolved.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }
    links
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
