//! Error types for the Delve research core.
//!
//! Uses `thiserror` for structured variants covering the provider, configuration,
//! policy-parsing, and evidence-store domains. Most of these are degraded locally
//! by the orchestrator; only policy and synthesis failures end a run early.

/// Top-level error type for the Delve core library.
#[derive(Debug, thiserror::Error)]
pub enum DelveError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from external collaborators (search, fetch, embedding, generation).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Missing credentials for {provider}: set {env_var}")]
    MissingCredentials { provider: String, env_var: String },

    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("HTTP {status} from {provider}: {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Provider returned {got} embeddings for {expected} inputs")]
    EmbeddingCount { expected: usize, got: usize },
}

impl ProviderError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::Connection { .. }
        ) || matches!(self, ProviderError::Http { status, .. } if *status >= 500)
    }
}

/// Errors from configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Unknown {kind} provider: {name}")]
    UnknownProvider { kind: String, name: String },
}

/// Errors from interpreting untrusted policy output.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Policy output was empty")]
    Empty,

    #[error("No action found in policy output")]
    MissingAction,

    #[error("Unknown action: {action}")]
    UnknownAction { action: String },
}

/// Errors from the in-memory evidence store.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Embedding dimension mismatch: store holds {expected}, batch has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Chunk {chunk_id} has no embedding")]
    MissingEmbedding { chunk_id: String },
}

/// Convenience type alias for Delve results.
pub type Result<T> = std::result::Result<T, DelveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::MissingCredentials {
            provider: "serper".into(),
            env_var: "SERPER_API_KEY".into(),
        };
        assert_eq!(
            err.to_string(),
            "Missing credentials for serper: set SERPER_API_KEY"
        );

        let err = ProviderError::Http {
            provider: "openai".into(),
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "HTTP 502 from openai: bad gateway");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Timeout { timeout_secs: 15 }.is_transient());
        assert!(ProviderError::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(
            ProviderError::Http {
                provider: "x".into(),
                status: 503,
                message: String::new(),
            }
            .is_transient()
        );
        assert!(
            !ProviderError::Http {
                provider: "x".into(),
                status: 401,
                message: String::new(),
            }
            .is_transient()
        );
        assert!(
            !ProviderError::ResponseParse {
                message: "bad json".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::DimensionMismatch {
            expected: 256,
            got: 128,
        };
        assert_eq!(
            err.to_string(),
            "Embedding dimension mismatch: store holds 256, batch has 128"
        );
    }

    #[test]
    fn test_top_level_from() {
        let err: DelveError = ParseError::MissingAction.into();
        assert!(matches!(err, DelveError::Parse(ParseError::MissingAction)));
        assert_eq!(
            err.to_string(),
            "Parse error: No action found in policy output"
        );

        let err: DelveError = ConfigError::Invalid {
            message: "overlap too large".into(),
        }
        .into();
        assert!(err.to_string().contains("overlap too large"));
    }
}
