//! Prompt/response logging for generation calls.
//!
//! Events go to the `delve::prompts` target at debug level, so they land in the
//! JSON log file without cluttering the terminal.

use super::{GenerationProvider, GenerationRequest};
use crate::error::ProviderError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Logs every call of `inner`, tagged with the role it serves
/// (`reasoner`, `summarizer`, `synthesizer`).
pub struct LoggingGenerator {
    inner: Arc<dyn GenerationProvider>,
    role: String,
}

impl LoggingGenerator {
    pub fn new(inner: Arc<dyn GenerationProvider>, role: impl Into<String>) -> Self {
        Self {
            inner,
            role: role.into(),
        }
    }
}

#[async_trait]
impl GenerationProvider for LoggingGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.inner.model_name().to_string());
        tracing::debug!(
            target: "delve::prompts",
            role = %self.role,
            model = %model,
            temperature = request.temperature,
            system_prompt = %request.system_prompt,
            user_prompt = %request.user_prompt,
            "prompt"
        );

        let started = Instant::now();
        let result = self.inner.generate(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => tracing::debug!(
                target: "delve::prompts",
                role = %self.role,
                model = %model,
                elapsed_ms,
                response = %response,
                "response"
            ),
            Err(e) => tracing::debug!(
                target: "delve::prompts",
                role = %self.role,
                model = %model,
                elapsed_ms,
                error = %e,
                "generation failed"
            ),
        }
        result
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
