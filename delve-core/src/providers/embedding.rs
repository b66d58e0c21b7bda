//! Embedding providers.
//!
//! `LocalEmbedder` hashes term frequencies into a fixed-size vector: offline,
//! deterministic, and good enough for lexical overlap. `OpenAiEmbedder` calls an
//! OpenAI-compatible `/embeddings` endpoint.

use super::openai_compat::{map_http_error, map_send_error};
use super::{EmbeddingProvider, with_retry};
use crate::config::RetryConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::HashMap;

/// Hashed term-frequency embedder.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Embed a single text. The result is L2-normalised, or all zeros when the
    /// text has no alphanumeric terms.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = simple_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// djb2
fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "local-hash"
    }
}

/// OpenAI-compatible embeddings endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    retry: RetryConfig,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        dimensions: usize,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dimensions,
            retry,
        }
    }

    /// Vectors from an `/embeddings` response, ordered by their `index` field.
    fn parse_response(json: &Value, expected: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| ProviderError::ResponseParse {
                message: "No data array in embeddings response".to_string(),
            })?;

        let mut indexed: Vec<(usize, Vec<f32>)> = data
            .iter()
            .enumerate()
            .map(|(pos, item)| {
                let index = item
                    .get("index")
                    .and_then(|i| i.as_u64())
                    .map(|i| i as usize)
                    .unwrap_or(pos);
                let vector = item
                    .get("embedding")
                    .and_then(|e| e.as_array())
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|v| v.as_f64())
                            .map(|v| v as f32)
                            .collect()
                    })
                    .unwrap_or_default();
                (index, vector)
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);

        if indexed.len() != expected {
            return Err(ProviderError::EmbeddingCount {
                expected,
                got: indexed.len(),
            });
        }
        Ok(indexed.into_iter().map(|(_, v)| v).collect())
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "input": texts,
        });
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = json!(self.dimensions);
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, 60))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::ApiRequest {
                message: format!("Failed to read response body: {}", e),
            })?;
        if !status.is_success() {
            return Err(map_http_error("embeddings", status, &text));
        }

        let json: Value = serde_json::from_str(&text).map_err(|e| ProviderError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })?;
        Self::parse_response(&json, texts.len())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        with_retry(&self.retry, || self.request(texts)).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
