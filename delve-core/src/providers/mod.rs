//! External collaborators of a research run.
//!
//! Every source of information the orchestrator talks to sits behind one of the
//! async traits below:
//! - `GenerationProvider`: chat-style text generation (policy, summaries, answers)
//! - `SearchProvider`: web search (Serper, DuckDuckGo)
//! - `FetchProvider`: page download and text extraction
//! - `EmbeddingProvider`: dense vectors for chunks and queries
//!
//! Use the `create_*` functions to build implementations from config.

pub mod embedding;
pub mod fetch;
pub mod logging;
pub mod mock;
pub mod openai_compat;
pub mod search;

use crate::config::{DelveConfig, RetryConfig};
use crate::error::ProviderError;
use crate::types::{FetchedDocument, SearchResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use embedding::{LocalEmbedder, OpenAiEmbedder};
pub use fetch::HttpFetcher;
pub use logging::LoggingGenerator;
pub use openai_compat::OpenAiCompatibleGenerator;
pub use search::{DuckDuckGoSearch, SerperSearch};

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Overrides the provider's default model.
    pub model: Option<String>,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: 0.0,
            max_tokens: None,
            model: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError>;

    /// Default model used when a request does not name one.
    fn model_name(&self) -> &str;
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError>;

    fn name(&self) -> &str;
}

/// Fetch failures are reported inside the returned document.
#[async_trait]
pub trait FetchProvider: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchedDocument;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries rate limits (respecting `retry_after_secs`), timeouts, connection
/// failures, and 5xx responses. Permanent errors return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !e.is_transient() || attempt >= config.max_retries {
                    return Err(e);
                }
                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

fn compute_backoff(config: &RetryConfig, attempt: u32, err: &ProviderError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    if let ProviderError::RateLimited { retry_after_secs } = err {
        return (retry_after_secs * 1000).max(computed);
    }
    computed
}

fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% jitter
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Read an API key from the environment.
pub fn resolve_api_key(provider: &str, env_var: &str) -> Result<String, ProviderError> {
    std::env::var(env_var)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| ProviderError::MissingCredentials {
            provider: provider.to_string(),
            env_var: env_var.to_string(),
        })
}

/// Build the generation provider shared by every role.
///
/// A missing API key is reported by the first generation call, so the run
/// still starts and ends through its error path with a partial answer.
pub fn create_generator(
    config: &DelveConfig,
) -> Result<Arc<dyn GenerationProvider>, ProviderError> {
    let api_key = resolve_api_key("llm", &config.llm.api_key_env).ok();
    if api_key.is_none() {
        tracing::warn!(
            env_var = %config.llm.api_key_env,
            "LLM API key not set; generation calls will fail"
        );
    }
    Ok(Arc::new(OpenAiCompatibleGenerator::new(
        &config.llm,
        config.retry.clone(),
        api_key,
    )?))
}

/// Wrap `generator` for prompt logging under `role` when enabled.
pub fn with_prompt_logging(
    config: &DelveConfig,
    generator: Arc<dyn GenerationProvider>,
    role: &str,
) -> Arc<dyn GenerationProvider> {
    if config.logging.log_prompts {
        Arc::new(LoggingGenerator::new(generator, role))
    } else {
        generator
    }
}

/// Build the configured search provider.
///
/// A missing Serper key is not an error here: the provider reports it on each
/// search so only SEARCH actions are affected.
pub fn create_search_provider(config: &DelveConfig) -> Arc<dyn SearchProvider> {
    match config.search.provider.as_str() {
        "duckduckgo" => Arc::new(DuckDuckGoSearch::new(&config.search, &config.fetch.user_agent)),
        _ => {
            let api_key = resolve_api_key("serper", &config.search.api_key_env).ok();
            if api_key.is_none() {
                tracing::warn!(
                    env_var = %config.search.api_key_env,
                    "Serper API key not set; searches will return no results"
                );
            }
            Arc::new(SerperSearch::new(&config.search, api_key))
        }
    }
}

pub fn create_fetcher(config: &DelveConfig) -> Arc<dyn FetchProvider> {
    Arc::new(HttpFetcher::new(&config.fetch))
}

/// Build the configured embedder, falling back to the local one when the
/// remote provider cannot be set up.
pub fn create_embedder(config: &DelveConfig) -> Arc<dyn EmbeddingProvider> {
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "openai" => match resolve_api_key("embedding", &embedding.api_key_env) {
            Ok(api_key) => {
                let base_url = embedding
                    .base_url
                    .clone()
                    .unwrap_or_else(|| config.llm.base_url.clone());
                Arc::new(OpenAiEmbedder::new(
                    base_url,
                    api_key,
                    embedding.model.clone(),
                    embedding.dimensions,
                    config.retry.clone(),
                ))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to local embeddings");
                Arc::new(LocalEmbedder::new(embedding.dimensions))
            }
        },
        _ => Arc::new(LocalEmbedder::new(embedding.dimensions)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_first_try() {
        let result = with_retry(&fast_retry(3), || async { Ok::<_, ProviderError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(&fast_retry(3), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Timeout { timeout_secs: 1 })
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error_no_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(&fast_retry(3), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(ProviderError::ResponseParse {
                    message: "bad".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(&fast_retry(2), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(ProviderError::Connection {
                    message: "refused".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Connection { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_respects_retry_after() {
        let config = fast_retry(3);
        let err = ProviderError::RateLimited {
            retry_after_secs: 2,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 2000);
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 500);
        assert_eq!(compute_exponential_backoff(&config, 1), 1000);
        assert_eq!(compute_exponential_backoff(&config, 20), 30_000);
    }

    #[test]
    fn test_resolve_api_key_missing() {
        let err = resolve_api_key("serper", "DELVE_TEST_SURELY_UNSET_KEY").unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredentials { .. }));
    }

    #[test]
    fn test_prompt_logging_only_when_enabled() {
        let base: Arc<dyn GenerationProvider> = Arc::new(mock::MockGenerator::new());
        let same = |a: &Arc<dyn GenerationProvider>| {
            Arc::as_ptr(a) as *const () == Arc::as_ptr(&base) as *const ()
        };

        let mut config = DelveConfig::default();
        assert!(same(&with_prompt_logging(&config, base.clone(), "reasoner")));

        config.logging.log_prompts = true;
        let wrapped = with_prompt_logging(&config, base.clone(), "reasoner");
        assert!(!same(&wrapped));
        assert_eq!(wrapped.model_name(), "mock-model");
    }

    #[test]
    fn test_create_embedder_defaults_to_local() {
        let embedder = create_embedder(&DelveConfig::default());
        assert_eq!(embedder.model_name(), "local-hash");
        assert_eq!(embedder.dimensions(), 512);
    }

    #[test]
    fn test_create_search_provider_by_name() {
        let mut config = DelveConfig::default();
        config.search.provider = "duckduckgo".into();
        assert_eq!(create_search_provider(&config).name(), "duckduckgo");
        config.search.provider = "serper".into();
        assert_eq!(create_search_provider(&config).name(), "serper");
    }
}
