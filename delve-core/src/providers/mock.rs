//! In-memory providers for tests and offline runs.

use super::{FetchProvider, GenerationProvider, GenerationRequest, SearchProvider};
use crate::error::ProviderError;
use crate::types::{FetchedDocument, SearchResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Generation provider that replays queued responses in order.
///
/// Once the queue is empty it answers with the fallback text. Every request is
/// recorded for later inspection.
pub struct MockGenerator {
    responses: Mutex<Vec<Result<String, String>>>,
    fallback: Option<String>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: Some("I'm a mock model. No queued responses available.".to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `text`.
    pub fn with_response(text: &str) -> Self {
        Self {
            fallback: Some(text.to_string()),
            ..Self::new()
        }
    }

    /// Fails every call with a connection error.
    pub fn failing() -> Self {
        Self {
            fallback: None,
            ..Self::new()
        }
    }

    pub fn queue_response(&self, text: &str) {
        self.responses.lock().unwrap().push(Ok(text.to_string()));
    }

    /// Queue a failure for the next call.
    pub fn queue_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push(Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationProvider for MockGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(request);
        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };
        let next = next.unwrap_or_else(|| {
            self.fallback
                .clone()
                .ok_or_else(|| "mock generator is failing".to_string())
        });
        next.map_err(|message| ProviderError::Connection { message })
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

/// Search provider with canned results per query.
#[derive(Default)]
pub struct StaticSearch {
    results: HashMap<String, Vec<SearchResult>>,
    default_results: Vec<SearchResult>,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    /// Returns no results for every query.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns `results` for every query.
    pub fn always(results: Vec<SearchResult>) -> Self {
        Self {
            default_results: results,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query: &str, results: Vec<SearchResult>) -> Self {
        self.results.insert(query.to_string(), results);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(ProviderError::Connection {
                message: "static search is failing".to_string(),
            });
        }
        let results = self
            .results
            .get(query)
            .unwrap_or(&self.default_results);
        Ok(results.iter().take(num_results).cloned().collect())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Fetcher serving pages from memory. Unknown URLs fail like a 404.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, (String, String)>,
    fetched: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, title: &str, content: &str) -> Self {
        self.pages
            .insert(url.to_string(), (title.to_string(), content.to_string()));
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchProvider for StaticFetcher {
    async fn fetch(&self, url: &str) -> FetchedDocument {
        self.fetched.lock().unwrap().push(url.to_string());
        match self.pages.get(url) {
            Some((title, content)) => FetchedDocument::ok(url, title.as_str(), content.as_str()),
            None => FetchedDocument::failed(url, "HTTP 404 Not Found"),
        }
    }
}
