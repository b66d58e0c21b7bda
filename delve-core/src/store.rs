//! In-memory evidence store.
//!
//! Holds every embedded chunk gathered during one run and answers cosine
//! similarity queries, optionally restricted to a single source URL. Content is
//! never de-duplicated: fetching the same passage twice stores it twice.

use crate::error::StoreError;
use crate::types::{Chunk, ScoredChunk};
use std::cmp::Ordering;

/// Cosine similarity between two vectors. Zero when either has no magnitude
/// or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Canonical form of a URL for comparisons: parsed, without fragment.
/// Unparseable input is returned unchanged.
pub fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

/// Restricts a search to chunks of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFilter {
    pub source_url: String,
}

impl ChunkFilter {
    pub fn source(url: impl Into<String>) -> Self {
        Self {
            source_url: url.into(),
        }
    }

    fn matches(&self, chunk: &Chunk) -> bool {
        chunk.source_url == self.source_url
    }
}

#[derive(Debug, Default)]
pub struct EvidenceStore {
    chunks: Vec<Chunk>,
    dimensions: Option<usize>,
    next_document: usize,
}

impl EvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    /// A fresh document number for building chunk ids.
    pub fn allocate_document_id(&mut self) -> usize {
        let id = self.next_document;
        self.next_document += 1;
        id
    }

    /// Append a batch of embedded chunks. The whole batch is rejected when any
    /// chunk lacks an embedding or disagrees with the store's dimension.
    pub fn insert(&mut self, chunks: Vec<Chunk>) -> Result<usize, StoreError> {
        let mut expected = self.dimensions;
        for chunk in &chunks {
            if chunk.embedding.is_empty() {
                return Err(StoreError::MissingEmbedding {
                    chunk_id: chunk.id.clone(),
                });
            }
            match expected {
                Some(dim) if dim != chunk.embedding.len() => {
                    return Err(StoreError::DimensionMismatch {
                        expected: dim,
                        got: chunk.embedding.len(),
                    });
                }
                Some(_) => {}
                None => expected = Some(chunk.embedding.len()),
            }
        }

        let count = chunks.len();
        self.dimensions = expected;
        self.chunks.extend(chunks);
        Ok(count)
    }

    /// Top `k` chunks by cosine similarity, best first. Ties keep insertion order.
    pub fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&ChunkFilter>,
    ) -> Vec<ScoredChunk> {
        if k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| filter.is_none_or(|f| f.matches(chunk)))
            .map(|(i, chunk)| (i, cosine_similarity(query_embedding, &chunk.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect()
    }

    /// The stored source URL that `url` refers to, ignoring fragments and
    /// normalisation differences such as a trailing slash after the host.
    pub fn find_source(&self, url: &str) -> Option<&str> {
        let wanted = normalize_url(url);
        self.chunks
            .iter()
            .map(|c| c.source_url.as_str())
            .find(|source| *source == url || normalize_url(source) == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, url: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: id.into(),
            source_url: url.into(),
            title: "T".into(),
            chunk_index: 0,
            text: id.into(),
            embedding,
            links: vec![],
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_insert_and_search_order() {
        let mut store = EvidenceStore::new();
        store
            .insert(vec![
                chunk("a", "u1", vec![1.0, 0.0]),
                chunk("b", "u1", vec![0.7, 0.7]),
                chunk("c", "u2", vec![0.0, 1.0]),
            ])
            .unwrap();
        let hits = store.search(&[1.0, 0.0], 2, None);
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut store = EvidenceStore::new();
        store
            .insert(vec![
                chunk("first", "u", vec![1.0, 0.0]),
                chunk("second", "u", vec![1.0, 0.0]),
            ])
            .unwrap();
        let hits = store.search(&[1.0, 0.0], 2, None);
        assert_eq!(hits[0].chunk.id, "first");
        assert_eq!(hits[1].chunk.id, "second");
    }

    #[test]
    fn test_filter_by_source() {
        let mut store = EvidenceStore::new();
        store
            .insert(vec![
                chunk("a", "u1", vec![1.0, 0.0]),
                chunk("c", "u2", vec![0.0, 1.0]),
            ])
            .unwrap();
        let hits = store.search(&[1.0, 0.0], 5, Some(&ChunkFilter::source("u2")));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "c");
        assert_eq!(store.find_source("u1"), Some("u1"));
        assert_eq!(store.find_source("u3"), None);
    }

    #[test]
    fn test_find_source_normalises() {
        let mut store = EvidenceStore::new();
        store
            .insert(vec![chunk("a", "https://a.example", vec![1.0])])
            .unwrap();
        assert_eq!(
            store.find_source("https://a.example/#intro"),
            Some("https://a.example")
        );
        assert_eq!(normalize_url("not a url"), "not a url");
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut store = EvidenceStore::new();
        store.insert(vec![chunk("a", "u", vec![1.0])]).unwrap();
        store.insert(vec![chunk("a2", "u", vec![1.0])]).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_dimension_mismatch_rejects_batch() {
        let mut store = EvidenceStore::new();
        store.insert(vec![chunk("a", "u", vec![1.0, 0.0])]).unwrap();
        let err = store
            .insert(vec![
                chunk("b", "u", vec![1.0, 0.0]),
                chunk("c", "u", vec![1.0, 0.0, 0.0]),
            ])
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::DimensionMismatch {
                expected: 2,
                got: 3
            }
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_inconsistent_first_batch_rejected() {
        let mut store = EvidenceStore::new();
        assert!(
            store
                .insert(vec![chunk("a", "u", vec![1.0]), chunk("b", "u", vec![1.0, 2.0])])
                .is_err()
        );
        assert_eq!(store.dimensions(), None);
        assert!(store.insert(vec![chunk("x", "u", vec![])]).is_err());
    }

    #[test]
    fn test_document_ids_increment() {
        let mut store = EvidenceStore::new();
        assert_eq!(store.allocate_document_id(), 0);
        assert_eq!(store.allocate_document_id(), 1);
    }

    #[test]
    fn test_search_empty_and_zero_k() {
        let store = EvidenceStore::new();
        assert!(store.search(&[1.0], 3, None).is_empty());
        assert!(store.search(&[1.0], 0, None).is_empty());
    }
}
