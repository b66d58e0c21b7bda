//! Similarity retrieval with bounded link expansion.
//!
//! The top `k` chunks for the query seed a breadth-first walk: for every chunk
//! that links to another stored document, the best `link_k` chunks of that
//! document (scored against the same query) are added, up to `link_depth` hops.

use crate::config::RetrievalConfig;
use crate::error::ProviderError;
use crate::providers::EmbeddingProvider;
use crate::store::{ChunkFilter, EvidenceStore};
use crate::types::Chunk;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Retriever {
    k: usize,
    follow_links: bool,
    link_depth: usize,
    link_k: usize,
}

impl Retriever {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            k: config.k,
            follow_links: config.follow_links,
            link_depth: config.link_depth,
            link_k: config.link_k,
        }
    }

    /// Chunks relevant to `query`, without their embeddings, de-duplicated by
    /// id in discovery order.
    pub async fn retrieve(
        &self,
        store: &EvidenceStore,
        embedder: &dyn EmbeddingProvider,
        query: &str,
    ) -> Result<Vec<Chunk>, ProviderError> {
        if store.is_empty() || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(ProviderError::EmbeddingCount {
                expected: 1,
                got: 0,
            })?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut results: Vec<Chunk> = Vec::new();
        let mut queue: VecDeque<(Chunk, usize)> = VecDeque::new();

        for hit in store.search(&query_vec, self.k, None) {
            if seen.insert(hit.chunk.id.clone()) {
                queue.push_back((hit.chunk.clone(), 0));
                results.push(hit.chunk);
            }
        }
        let seeded = results.len();

        if self.follow_links && self.link_k > 0 {
            let mut expanded: HashSet<String> = HashSet::new();
            while let Some((chunk, depth)) = queue.pop_front() {
                if depth >= self.link_depth {
                    continue;
                }
                for link in &chunk.links {
                    let Some(source) = store.find_source(link) else {
                        continue;
                    };
                    if source == chunk.source_url || !expanded.insert(source.to_string()) {
                        continue;
                    }
                    let filter = ChunkFilter::source(source);
                    for hit in store.search(&query_vec, self.link_k, Some(&filter)) {
                        if seen.insert(hit.chunk.id.clone()) {
                            queue.push_back((hit.chunk.clone(), depth + 1));
                            results.push(hit.chunk);
                        }
                    }
                }
            }
        }

        debug!(
            query = %query,
            seeded,
            expanded = results.len() - seeded,
            "Retrieved chunks"
        );
        for chunk in &mut results {
            chunk.embedding = Vec::new();
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LocalEmbedder;
    use pretty_assertions::assert_eq;

    fn chunk(id: &str, url: &str, text: &str, links: &[&str]) -> Chunk {
        Chunk {
            id: id.into(),
            source_url: url.into(),
            title: id.into(),
            chunk_index: 0,
            text: text.into(),
            embedding: LocalEmbedder::new(64).embed_one(text),
            links: links.iter().map(|l| l.to_string()).collect(),
        }
    }

    fn store() -> EvidenceStore {
        let mut store = EvidenceStore::new();
        store
            .insert(vec![
                chunk("a0", "https://a.example", "rust ownership borrowing", &["https://b.example/"]),
                chunk("a1", "https://a.example", "cooking pasta recipes", &[]),
                chunk("b0", "https://b.example", "borrow checker lifetimes", &["https://c.example"]),
                chunk("b1", "https://b.example", "gardening tomatoes", &[]),
                chunk("c0", "https://c.example", "rust ownership deep dive", &[]),
            ])
            .unwrap();
        store
    }

    fn config(k: usize, follow_links: bool, link_depth: usize) -> RetrievalConfig {
        RetrievalConfig {
            k,
            follow_links,
            link_depth,
            link_k: 1,
        }
    }

    fn ids(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_top_k_without_links() {
        let retriever = Retriever::new(&config(1, false, 1));
        let out = retriever
            .retrieve(&store(), &LocalEmbedder::new(64), "rust ownership borrowing")
            .await
            .unwrap();
        assert_eq!(ids(&out), vec!["a0"]);
        assert!(out[0].embedding.is_empty());
    }

    #[tokio::test]
    async fn test_link_expansion_depth_one() {
        let retriever = Retriever::new(&config(1, true, 1));
        let out = retriever
            .retrieve(&store(), &LocalEmbedder::new(64), "rust ownership borrowing")
            .await
            .unwrap();
        // a0 links to b; b0 links on to c, but depth 1 stops there.
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "a0");
        assert_eq!(out[1].source_url, "https://b.example");
    }

    #[tokio::test]
    async fn test_link_expansion_depth_two() {
        let retriever = Retriever::new(&RetrievalConfig {
            link_k: 2,
            ..config(1, true, 2)
        });
        let out = retriever
            .retrieve(&store(), &LocalEmbedder::new(64), "rust ownership borrowing")
            .await
            .unwrap();
        let sources: Vec<&str> = out.iter().map(|c| c.source_url.as_str()).collect();
        assert!(sources.contains(&"https://c.example"));
        let unique: HashSet<&str> = ids(&out).into_iter().collect();
        assert_eq!(unique.len(), out.len());
    }

    #[tokio::test]
    async fn test_empty_store_skips_embedding() {
        let retriever = Retriever::new(&RetrievalConfig::default());
        let out = retriever
            .retrieve(&EvidenceStore::new(), &LocalEmbedder::new(8), "anything")
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_links_to_unknown_sources_ignored() {
        let mut store = EvidenceStore::new();
        store
            .insert(vec![chunk("x", "https://x.example", "topic", &["https://nowhere.example"])])
            .unwrap();
        let out = Retriever::new(&RetrievalConfig::default())
            .retrieve(&store, &LocalEmbedder::new(64), "topic")
            .await
            .unwrap();
        assert_eq!(ids(&out), vec!["x"]);
    }
}
