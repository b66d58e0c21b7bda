//! Note ranking and context assembly for synthesis.

use crate::config::ConsolidatorConfig;
use crate::error::ProviderError;
use crate::providers::EmbeddingProvider;
use crate::store::cosine_similarity;
use crate::types::{Note, Question};
use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Context used when the run produced no notes at all.
pub const NO_INFORMATION: &str = "No information gathered during research.";

/// Scores passages by relevance to a query. Higher is more relevant.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, ProviderError>;
}

/// Cosine similarity between query and passage embeddings.
pub struct EmbeddingScorer {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingScorer {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl RelevanceScorer for EmbeddingScorer {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, ProviderError> {
        let mut texts = Vec::with_capacity(passages.len() + 1);
        texts.push(query.to_string());
        texts.extend(passages.iter().cloned());

        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(ProviderError::EmbeddingCount {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        let (query_vec, passage_vecs) = vectors.split_at(1);
        Ok(passage_vecs
            .iter()
            .map(|v| cosine_similarity(&query_vec[0], v))
            .collect())
    }
}

/// The bounded, formatted evidence handed to the synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedContext {
    pub text: String,
    pub notes: Vec<Note>,
    pub reranked: bool,
}

pub struct Consolidator {
    scorer: Option<Arc<dyn RelevanceScorer>>,
    config: ConsolidatorConfig,
}

impl Consolidator {
    pub fn new(config: ConsolidatorConfig, scorer: Option<Arc<dyn RelevanceScorer>>) -> Self {
        Self { scorer, config }
    }

    /// Up to `top_n` notes: by relevance when a scorer is enabled and works,
    /// otherwise in arrival order.
    pub async fn select(&self, question: &Question, notes: &[Note]) -> (Vec<Note>, bool) {
        let top_n = self.config.top_n;
        let scorer = self.scorer.as_ref().filter(|_| self.config.rerank);

        if let Some(scorer) = scorer
            && notes.len() > 1
        {
            let summaries: Vec<String> = notes.iter().map(|n| n.summary.clone()).collect();
            match scorer.score(question.text(), &summaries).await {
                Ok(scores) if scores.len() == notes.len() => {
                    let mut order: Vec<usize> = (0..notes.len()).collect();
                    order.sort_by(|&a, &b| {
                        scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal)
                    });
                    debug!(notes = notes.len(), top_n, "Re-ranked notes");
                    return (
                        order.into_iter().take(top_n).map(|i| notes[i].clone()).collect(),
                        true,
                    );
                }
                Ok(scores) => warn!(
                    expected = notes.len(),
                    got = scores.len(),
                    "Scorer returned wrong number of scores; keeping arrival order"
                ),
                Err(e) => warn!(error = %e, "Re-ranking failed; keeping arrival order"),
            }
        }

        (notes.iter().take(top_n).cloned().collect(), false)
    }

    pub async fn consolidate(&self, question: &Question, notes: &[Note]) -> ConsolidatedContext {
        if notes.is_empty() {
            return ConsolidatedContext {
                text: NO_INFORMATION.to_string(),
                notes: Vec::new(),
                reranked: false,
            };
        }
        let (selected, reranked) = self.select(question, notes).await;
        ConsolidatedContext {
            text: format_context(question, &selected),
            notes: selected,
            reranked,
        }
    }
}

/// Render notes with their full supporting excerpts under citation tags.
pub fn format_context(question: &Question, notes: &[Note]) -> String {
    let mut out = format!(
        "# Curated Research Notes for: {}\n\nKey findings gathered during research:\n",
        question.text()
    );
    for (i, note) in notes.iter().enumerate() {
        out.push_str(&format!("\n## Note {}\n{}\n", i + 1, note.summary.trim()));
        out.push_str("\n### Supporting excerpts\n");
        for chunk in &note.source_chunks {
            out.push_str(&format!("\n{}\n{}\n", chunk.citation(), chunk.text.trim()));
        }
    }
    out.push_str("\n---\nEnd of Notes.");
    out
}
