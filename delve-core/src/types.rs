//! Core data types flowing through a research run.

use crate::citation::CitationTag;
use serde::{Deserialize, Serialize};

/// The clarified research question.
///
/// Produced by an external clarification step and never modified during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub original: String,
    pub refined: String,
    /// Section headings the final answer should cover.
    pub outline: Vec<String>,
}

impl Question {
    /// A question with no clarification: the refined text equals the original
    /// and the outline is a single section named after the question.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            original: text.clone(),
            refined: text.clone(),
            outline: vec![text],
        }
    }

    pub fn with_outline(mut self, outline: Vec<String>) -> Self {
        if !outline.is_empty() {
            self.outline = outline;
        }
        self
    }

    pub fn with_refined(mut self, refined: impl Into<String>) -> Self {
        self.refined = refined.into();
        self
    }

    /// The text used for retrieval and ranking.
    pub fn text(&self) -> &str {
        if self.refined.trim().is_empty() {
            &self.original
        } else {
            &self.refined
        }
    }
}

/// A single web search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// A fetched web page, or the reason it could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub url: String,
    pub title: String,
    pub raw_content: Option<String>,
    pub error: Option<String>,
}

impl FetchedDocument {
    pub fn ok(url: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            raw_content: Some(content.into()),
            error: None,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            raw_content: None,
            error: Some(error.into()),
        }
    }

    /// Content suitable for ingestion, if any.
    pub fn content(&self) -> Option<&str> {
        if self.error.is_some() {
            return None;
        }
        self.raw_content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
    }
}

/// An embedded passage of a fetched document, with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source_url: String,
    pub title: String,
    pub chunk_index: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Absolute URLs of other documents this passage links to.
    #[serde(default)]
    pub links: Vec<String>,
}

impl Chunk {
    pub fn citation(&self) -> CitationTag {
        CitationTag::new(&self.source_url, &self.title, self.chunk_index)
    }
}

/// A retrieved chunk with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// A condensed, citation-tagged summary of one retrieval round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub summary: String,
    pub source_chunks: Vec<Chunk>,
}

impl Note {
    /// Returns `None` when there is nothing to attribute the summary to.
    pub fn new(summary: impl Into<String>, source_chunks: Vec<Chunk>) -> Option<Self> {
        if source_chunks.is_empty() {
            return None;
        }
        Some(Self {
            summary: summary.into(),
            source_chunks,
        })
    }
}

/// One numbered entry of a final answer's reference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub number: usize,
    pub title: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(idx: usize) -> Chunk {
        Chunk {
            id: format!("doc-0-chunk-{idx}"),
            source_url: "https://a.example".into(),
            title: "A".into(),
            chunk_index: idx,
            text: "text".into(),
            embedding: vec![],
            links: vec![],
        }
    }

    #[test]
    fn test_question_defaults() {
        let q = Question::new("What is X?");
        assert_eq!(q.refined, "What is X?");
        assert_eq!(q.outline, vec!["What is X?".to_string()]);
        let q = q.with_outline(vec![]);
        assert_eq!(q.outline.len(), 1);
        let q = q.with_refined("  ");
        assert_eq!(q.text(), "What is X?");
    }

    #[test]
    fn test_fetched_document_content() {
        assert_eq!(
            FetchedDocument::ok("u", "t", "body").content(),
            Some("body")
        );
        assert_eq!(FetchedDocument::ok("u", "t", "  \n").content(), None);
        assert_eq!(FetchedDocument::failed("u", "404").content(), None);
    }

    #[test]
    fn test_note_requires_source() {
        assert!(Note::new("summary", vec![]).is_none());
        let note = Note::new("summary", vec![chunk(0)]).unwrap();
        assert_eq!(note.source_chunks.len(), 1);
    }

    #[test]
    fn test_chunk_citation() {
        let tag = chunk(3).citation();
        assert_eq!(
            tag.to_string(),
            "[Source URL='https://a.example', Title='A', Chunk=3]"
        );
    }
}
