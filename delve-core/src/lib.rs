//! # Delve Core
//!
//! Core library for the Delve research agent.
//! Provides the research orchestrator, decision policy, evidence ingestion
//! and retrieval, note summarization, answer synthesis with numbered
//! citations, provider abstractions, and configuration.

pub mod chunk;
pub mod citation;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod ingest;
pub mod orchestrator;
pub mod policy;
pub mod providers;
pub mod retrieve;
pub mod state;
pub mod store;
pub mod summarizer;
pub mod synthesis;
pub mod tokens;
pub mod types;

// Re-export commonly used types at the crate root.
pub use chunk::RecursiveSplitter;
pub use citation::{CitationTag, ProcessedText, process_citations};
pub use config::{DelveConfig, init_workspace_config, load_config};
pub use consolidate::{ConsolidatedContext, Consolidator, EmbeddingScorer, RelevanceScorer};
pub use error::{ConfigError, DelveError, ParseError, ProviderError, Result, StoreError};
pub use ingest::{IngestReport, IngestionPipeline};
pub use orchestrator::{Providers, ResearchAgent, RunReport};
pub use policy::{Decision, DecisionPolicy, parse_decision};
pub use providers::{
    EmbeddingProvider, FetchProvider, GenerationProvider, GenerationRequest, SearchProvider,
};
pub use retrieve::Retriever;
pub use state::{Action, Node, RunState, SeenSet};
pub use store::EvidenceStore;
pub use summarizer::NoteSummarizer;
pub use synthesis::Synthesizer;
pub use tokens::TokenCounter;
pub use types::{Chunk, FetchedDocument, Note, Question, Reference, SearchResult};
