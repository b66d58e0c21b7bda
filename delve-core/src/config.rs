//! Configuration system for Delve.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment variables -> explicit overrides.

use crate::error::ConfigError;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for a research run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelveConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub reasoner: ReasonerConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub synthesizer: SynthesizerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub consolidator: ConsolidatorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the OpenAI-compatible generation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the chat completions API.
    pub base_url: String,
    /// Default model for every role that does not set its own.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Decision policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Policy decisions allowed before consolidation is forced.
    pub max_iterations: usize,
    /// Hard limit on orchestrator node executions. Defaults to
    /// `3 * max_iterations + 8` when unset.
    pub step_ceiling: Option<usize>,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.1,
            max_tokens: Some(256),
            max_iterations: 5,
            step_ceiling: None,
        }
    }
}

impl ReasonerConfig {
    pub fn effective_step_ceiling(&self) -> usize {
        self.step_ceiling
            .unwrap_or(self.max_iterations.saturating_mul(3).saturating_add(8))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Upper bound on words per note.
    pub max_words: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.0,
            max_tokens: Some(400),
            max_words: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.2,
            max_tokens: Some(4096),
        }
    }
}

/// Web search provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// "serper" or "duckduckgo".
    pub provider: String,
    pub num_results: usize,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "serper".to_string(),
            num_results: 5,
            api_key_env: "SERPER_API_KEY".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: format!("Delve/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 5,
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "local" (hashed term frequency, offline) or "openai".
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    /// Base URL for the "openai" provider. Falls back to `llm.base_url`.
    pub base_url: Option<String>,
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 512,
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// Chunking and batching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Token ceiling for one embedding request.
    pub batch_token_budget: usize,
    /// Embedding requests in flight at once.
    pub embed_concurrency: usize,
    /// Directory of `.md` / `.txt` notes indexed at the start of every run.
    pub local_docs_dir: Option<PathBuf>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            batch_token_budget: 250_000,
            embed_concurrency: 1,
            local_docs_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k: usize,
    /// Follow cross-references from retrieved chunks into linked sources.
    pub follow_links: bool,
    pub link_depth: usize,
    pub link_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 6,
            follow_links: true,
            link_depth: 1,
            link_k: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidatorConfig {
    pub rerank: bool,
    pub top_n: usize,
}

impl Default for ConsolidatorConfig {
    fn default() -> Self {
        Self {
            rerank: true,
            top_n: 20,
        }
    }
}

/// Retry configuration for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit every prompt and response on the `delve::prompts` target.
    pub log_prompts: bool,
}

impl DelveConfig {
    /// Reject settings that cannot produce a working run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ingestion = &self.ingestion;
        if ingestion.chunk_size == 0 {
            return Err(invalid("ingestion.chunk_size must be greater than 0"));
        }
        if ingestion.chunk_overlap >= ingestion.chunk_size {
            return Err(invalid(format!(
                "ingestion.chunk_overlap ({}) must be smaller than chunk_size ({})",
                ingestion.chunk_overlap, ingestion.chunk_size
            )));
        }
        if ingestion.batch_token_budget == 0 {
            return Err(invalid("ingestion.batch_token_budget must be greater than 0"));
        }
        if ingestion.embed_concurrency == 0 {
            return Err(invalid("ingestion.embed_concurrency must be at least 1"));
        }
        if self.retrieval.k == 0 {
            return Err(invalid("retrieval.k must be greater than 0"));
        }
        if self.consolidator.top_n == 0 {
            return Err(invalid("consolidator.top_n must be greater than 0"));
        }
        if self.embedding.dimensions == 0 {
            return Err(invalid("embedding.dimensions must be greater than 0"));
        }
        if !matches!(self.search.provider.as_str(), "serper" | "duckduckgo") {
            return Err(ConfigError::UnknownProvider {
                kind: "search".into(),
                name: self.search.provider.clone(),
            });
        }
        if !matches!(self.embedding.provider.as_str(), "local" | "openai") {
            return Err(ConfigError::UnknownProvider {
                kind: "embedding".into(),
                name: self.embedding.provider.clone(),
            });
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "delve", "delve")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-local config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".delve").join("config.toml")
}

/// Load configuration by merging all layers.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DELVE_`)
/// 3. Workspace-local config (`.delve/config.toml`)
/// 4. User config (`~/.config/delve/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DelveConfig>,
) -> Result<DelveConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DelveConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DELVE_REASONER__MAX_ITERATIONS, DELVE_SEARCH__PROVIDER, etc.
    figment = figment.merge(Env::prefixed("DELVE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Write a config file with every default spelled out. Existing files are kept.
pub fn init_workspace_config(workspace: &Path) -> crate::error::Result<PathBuf> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        return Ok(path);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = toml::to_string_pretty(&DelveConfig::default())
        .map_err(|e| invalid(format!("failed to render default config: {e}")))?;
    std::fs::write(&path, rendered)?;
    Ok(path)
}
