//! HTTP page fetcher.
//!
//! Returns the page title and the markup of its `<body>` with scripts, styles,
//! and comments removed. Markup is kept on purpose: the chunker splits on block
//! tags and ingestion reads `href` targets for cross-references.

use super::FetchProvider;
use crate::config::FetchConfig;
use crate::types::FetchedDocument;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title pattern"));
static BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<body[^>]*>(.*)</body>").expect("valid body pattern"));
static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<noscript[^>]*>.*?</noscript>|<!--.*?-->")
        .expect("valid noise pattern")
});
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*(\n[ \t]*)+").expect("valid whitespace pattern"));

pub struct HttpFetcher {
    client: Result<Client, String>,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e));
        Self { client }
    }
}

/// The `<title>` text, trimmed and whitespace-collapsed.
pub fn extract_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .map(|caps| caps[1].split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

/// Body markup without scripts, styles, or comments. Falls back to the whole
/// document when there is no `<body>` element.
pub fn extract_body(html: &str) -> String {
    let body = BODY_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(html);
    let cleaned = NOISE_RE.replace_all(body, "");
    BLANK_LINES_RE
        .replace_all(&cleaned, "\n\n")
        .trim()
        .to_string()
}

#[async_trait]
impl FetchProvider for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchedDocument {
        let client = match &self.client {
            Ok(client) => client,
            Err(e) => return FetchedDocument::failed(url, e.clone()),
        };

        debug!(url = %url, "Fetching page");
        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Fetch failed");
                return FetchedDocument::failed(url, format!("Fetch failed: {}", e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Fetch returned non-success status");
            return FetchedDocument::failed(url, format!("HTTP {}", status));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return FetchedDocument::failed(url, format!("Failed to read response body: {}", e));
            }
        };

        if content_type.contains("html") || content_type.is_empty() {
            let title = extract_title(&body).unwrap_or_else(|| url.to_string());
            FetchedDocument::ok(url, title, extract_body(&body))
        } else if content_type.starts_with("text/") || content_type.contains("json") {
            FetchedDocument::ok(url, url, body)
        } else {
            FetchedDocument::failed(url, format!("Unsupported content type: {}", content_type))
        }
    }
}
