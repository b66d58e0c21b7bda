//! Web search providers.

use super::SearchProvider;
use super::openai_compat::{map_http_error, map_send_error};
use crate::config::SearchConfig;
use crate::error::ProviderError;
use crate::types::SearchResult;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

const SERPER_URL: &str = "https://google.serper.dev/search";

/// Google results through the Serper API.
pub struct SerperSearch {
    client: Client,
    api_key: Option<String>,
    env_var: String,
    timeout_secs: u64,
}

impl SerperSearch {
    pub fn new(config: &SearchConfig, api_key: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key,
            env_var: config.api_key_env.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    fn parse_response(json: &Value, num_results: usize) -> Vec<SearchResult> {
        json.get("organic")
            .and_then(|o| o.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let url = item.get("link")?.as_str()?.to_string();
                        Some(SearchResult {
                            title: str_field(item, "title"),
                            url,
                            snippet: str_field(item, "snippet"),
                        })
                    })
                    .take(num_results)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for SerperSearch {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredentials {
                provider: "serper".to_string(),
                env_var: self.env_var.clone(),
            })?;

        let response = self
            .client
            .post(SERPER_URL)
            .header("X-API-KEY", api_key)
            .json(&json!({"q": query, "num": num_results}))
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error("serper", status, &body));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ResponseParse {
                message: format!("Failed to parse search response: {}", e),
            })?;
        Ok(Self::parse_response(&json, num_results))
    }

    fn name(&self) -> &str {
        "serper"
    }
}

/// DuckDuckGo instant answers. Needs no API key but returns sparse results.
pub struct DuckDuckGoSearch {
    client: Client,
    timeout_secs: u64,
}

impl DuckDuckGoSearch {
    pub fn new(config: &SearchConfig, user_agent: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .user_agent(user_agent)
                .build()
                .unwrap_or_default(),
            timeout_secs: config.timeout_secs,
        }
    }

    fn parse_response(body: &Value, num_results: usize) -> Vec<SearchResult> {
        let mut results = Vec::new();

        if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str())
            && !abstract_text.is_empty()
            && let Some(url) = body.get("AbstractURL").and_then(|v| v.as_str())
            && !url.is_empty()
        {
            results.push(SearchResult {
                title: body
                    .get("Heading")
                    .and_then(|v| v.as_str())
                    .filter(|h| !h.is_empty())
                    .unwrap_or("Unknown")
                    .to_string(),
                url: url.to_string(),
                snippet: abstract_text.to_string(),
            });
        }

        // Topic groups nest their entries under "Topics".
        let mut topics: Vec<&Value> = Vec::new();
        for key in ["Results", "RelatedTopics"] {
            if let Some(items) = body.get(key).and_then(|v| v.as_array()) {
                for item in items {
                    match item.get("Topics").and_then(|t| t.as_array()) {
                        Some(nested) => topics.extend(nested.iter()),
                        None => topics.push(item),
                    }
                }
            }
        }

        for topic in topics {
            if results.len() >= num_results {
                break;
            }
            let (Some(text), Some(url)) = (
                topic.get("Text").and_then(|v| v.as_str()),
                topic.get("FirstURL").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            if url.is_empty() || results.iter().any(|r| r.url == url) {
                continue;
            }
            let title = text.split(" - ").next().unwrap_or(text).to_string();
            results.push(SearchResult {
                title,
                url: url.to_string(),
                snippet: text.to_string(),
            });
        }

        results.truncate(num_results);
        results
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let url = format!(
            "https://api.duckduckgo.com/?q={}&format=json&no_html=1&skip_disambig=1",
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error("duckduckgo", status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ResponseParse {
                message: format!("Failed to parse search response: {}", e),
            })?;
        Ok(Self::parse_response(&body, num_results))
    }

    fn name(&self) -> &str {
        "duckduckgo"
    }
}

fn str_field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
