//! OpenAI-compatible generation provider.
//!
//! Works with OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any endpoint
//! that follows the chat completions API format.

use super::{GenerationProvider, GenerationRequest, with_retry};
use crate::config::{LlmConfig, RetryConfig};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

pub struct OpenAiCompatibleGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    env_var: String,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl OpenAiCompatibleGenerator {
    /// Without an API key the generator still builds, but every call fails
    /// with [`ProviderError::MissingCredentials`].
    pub fn new(
        config: &LlmConfig,
        retry: RetryConfig,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Connection {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            env_var: config.api_key_env.clone(),
            timeout_secs: config.timeout_secs,
            retry,
        })
    }

    fn build_body(&self, request: &GenerationRequest) -> Value {
        let mut messages = Vec::new();
        if !request.system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": request.system_prompt}));
        }
        messages.push(json!({"role": "user", "content": request.user_prompt}));

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "temperature": request.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    /// Extract the assistant text from a chat completions response.
    fn parse_response(json: &Value) -> Result<String, ProviderError> {
        let message = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| ProviderError::ResponseParse {
                message: "No choices[0].message in response".to_string(),
            })?;
        Ok(message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn send_once(&self, api_key: &str, body: &Value) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| ProviderError::ApiRequest {
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            return Err(map_http_error("openai-compatible", status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| ProviderError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;
        Self::parse_response(&json)
    }
}

#[async_trait]
impl GenerationProvider for OpenAiCompatibleGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredentials {
                provider: "llm".to_string(),
                env_var: self.env_var.clone(),
            })?;
        let body = self.build_body(&request);
        debug!(
            url = %self.base_url,
            model = %body["model"],
            "Sending chat completion request"
        );
        with_retry(&self.retry, || self.send_once(api_key, &body)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Map a transport-level reqwest failure.
pub(crate) fn map_send_error(err: reqwest::Error, timeout_secs: u64) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout { timeout_secs }
    } else if err.is_connect() {
        ProviderError::Connection {
            message: err.to_string(),
        }
    } else {
        ProviderError::ApiRequest {
            message: format!("Request failed: {}", err),
        }
    }
}

/// Map a non-success HTTP status to the appropriate error.
pub(crate) fn map_http_error(
    provider: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> ProviderError {
    if status.as_u16() == 429 {
        // "Rate limit reached ... Please try again in 7s"
        let retry_after_secs = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")?
                    .get("message")?
                    .as_str()
                    .map(|s| s.to_string())
            })
            .and_then(|msg| {
                msg.split("in ")
                    .last()
                    .and_then(|s| s.trim().trim_end_matches(['s', '.']).parse::<u64>().ok())
            })
            .unwrap_or(5);
        return ProviderError::RateLimited { retry_after_secs };
    }
    ProviderError::Http {
        provider: provider.to_string(),
        status: status.as_u16(),
        message: body.chars().take(500).collect(),
    }
}
