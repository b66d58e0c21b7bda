//! The research loop: runs nodes until the graph reaches `End` and reports
//! the answer.

use crate::citation::ProcessedText;
use crate::config::DelveConfig;
use crate::consolidate::{Consolidator, EmbeddingScorer, RelevanceScorer};
use crate::error::DelveError;
use crate::ingest::{IngestionPipeline, load_local_documents};
use crate::policy::DecisionPolicy;
use crate::providers::{
    EmbeddingProvider, FetchProvider, GenerationProvider, SearchProvider, create_embedder,
    create_fetcher, create_generator, create_search_provider, with_prompt_logging,
};
use crate::retrieve::Retriever;
use crate::state::{Node, RunState, next_node};
use crate::store::EvidenceStore;
use crate::summarizer::NoteSummarizer;
use crate::synthesis::{SYNTHESIS_FAILED, Synthesizer, partial_answer};
use crate::types::{Note, Question, Reference};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// The external capabilities a run depends on.
pub struct Providers {
    pub reasoner: Arc<dyn GenerationProvider>,
    pub summarizer: Arc<dyn GenerationProvider>,
    pub synthesizer: Arc<dyn GenerationProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub fetcher: Arc<dyn FetchProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    /// Note re-ranker. Embedding similarity is used when unset.
    pub scorer: Option<Arc<dyn RelevanceScorer>>,
}

impl Providers {
    /// One generator for every role.
    pub fn new(
        generator: Arc<dyn GenerationProvider>,
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn FetchProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            reasoner: generator.clone(),
            summarizer: generator.clone(),
            synthesizer: generator,
            search,
            fetcher,
            embedder,
            scorer: None,
        }
    }

    pub fn with_reasoner(mut self, generator: Arc<dyn GenerationProvider>) -> Self {
        self.reasoner = generator;
        self
    }

    pub fn with_summarizer(mut self, generator: Arc<dyn GenerationProvider>) -> Self {
        self.summarizer = generator;
        self
    }

    pub fn with_synthesizer(mut self, generator: Arc<dyn GenerationProvider>) -> Self {
        self.synthesizer = generator;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Build every provider from configuration.
    pub fn from_config(config: &DelveConfig) -> Result<Self, DelveError> {
        let generator = create_generator(config)?;
        Ok(Self::new(
            generator.clone(),
            create_search_provider(config),
            create_fetcher(config),
            create_embedder(config),
        )
        .with_reasoner(with_prompt_logging(config, generator.clone(), "reasoner"))
        .with_summarizer(with_prompt_logging(config, generator.clone(), "summarizer"))
        .with_synthesizer(with_prompt_logging(config, generator, "synthesizer")))
    }
}

/// Outcome of one research run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub question: String,
    pub final_answer: String,
    pub references: Vec<Reference>,
    pub iterations: usize,
    pub notes: Vec<Note>,
    pub chunks_indexed: usize,
    pub seen_queries: Vec<String>,
    pub seen_urls: Vec<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

pub struct ResearchAgent {
    policy: DecisionPolicy,
    summarizer: NoteSummarizer,
    synthesizer: Synthesizer,
    consolidator: Consolidator,
    ingestion: IngestionPipeline,
    retriever: Retriever,
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn FetchProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    local_docs_dir: Option<PathBuf>,
    num_results: usize,
    max_iterations: usize,
    step_ceiling: usize,
}

impl ResearchAgent {
    pub fn new(config: &DelveConfig, providers: Providers) -> Self {
        let scorer = providers.scorer.unwrap_or_else(|| {
            Arc::new(EmbeddingScorer::new(providers.embedder.clone())) as Arc<dyn RelevanceScorer>
        });
        let tokenizer_model = config.embedding.model.as_str();
        Self {
            policy: DecisionPolicy::new(providers.reasoner, config.reasoner.clone()),
            summarizer: NoteSummarizer::new(providers.summarizer, config.summarizer.clone()),
            synthesizer: Synthesizer::new(providers.synthesizer, config.synthesizer.clone()),
            consolidator: Consolidator::new(config.consolidator.clone(), Some(scorer)),
            ingestion: IngestionPipeline::new(&config.ingestion, tokenizer_model),
            retriever: Retriever::new(&config.retrieval),
            search: providers.search,
            fetcher: providers.fetcher,
            embedder: providers.embedder,
            local_docs_dir: config.ingestion.local_docs_dir.clone(),
            num_results: config.search.num_results,
            max_iterations: config.reasoner.max_iterations,
            step_ceiling: config.reasoner.effective_step_ceiling(),
        }
    }

    /// Build an agent with providers created from `config`.
    pub fn from_config(config: &DelveConfig) -> Result<Self, DelveError> {
        Ok(Self::new(config, Providers::from_config(config)?))
    }

    /// Research `question` from scratch. Always produces an answer; failures
    /// are reported in `RunReport::error` next to a partial answer.
    pub async fn run(&self, question: Question) -> RunReport {
        let started_at = Utc::now();
        let mut state = RunState::new(question, self.max_iterations);
        let span = info_span!(
            "research_run",
            run_id = %state.run_id,
            question = %state.question.text()
        );

        async {
            let mut store = EvidenceStore::new();
            if let Some(dir) = &self.local_docs_dir {
                self.index_local_documents(dir, &mut state, &mut store).await;
            }
            let mut node = Node::Reason;
            info!(max_iterations = self.max_iterations, "Research started");

            while node != Node::End {
                state.steps += 1;
                if state.steps > self.step_ceiling && node != Node::HandleError {
                    warn!(steps = state.steps, ceiling = self.step_ceiling, "Step ceiling exceeded");
                    state.error = Some(format!(
                        "Research exceeded the step ceiling of {} steps",
                        self.step_ceiling
                    ));
                    node = Node::HandleError;
                }
                debug!(node = ?node, step = state.steps, iteration = state.iteration, "Running node");
                self.run_node(node, &mut state, &mut store).await;
                node = next_node(node, &state);
            }

            info!(
                iterations = state.iteration,
                notes = state.notes.len(),
                chunks = store.len(),
                references = state.references.len(),
                failed = state.error.is_some(),
                "Research finished"
            );
        }
        .instrument(span)
        .await;

        RunReport {
            run_id: state.run_id,
            question: state.question.text().to_string(),
            final_answer: state
                .final_answer
                .unwrap_or_else(|| SYNTHESIS_FAILED.to_string()),
            references: state.references,
            iterations: state.iteration,
            notes: state.notes,
            chunks_indexed: state.chunks_indexed,
            seen_queries: state.seen_queries.into_vec(),
            seen_urls: state.seen_urls.into_vec(),
            error: state.error,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn index_local_documents(
        &self,
        dir: &Path,
        state: &mut RunState,
        store: &mut EvidenceStore,
    ) {
        let documents = match load_local_documents(dir) {
            Ok(documents) => documents,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to load local documents");
                return;
            }
        };
        if documents.is_empty() {
            warn!(dir = %dir.display(), "No local documents found");
            return;
        }
        let report = self
            .ingestion
            .ingest(store, self.embedder.as_ref(), &documents)
            .await;
        info!(
            dir = %dir.display(),
            documents = report.documents_ingested,
            inserted = report.inserted,
            "Indexed local documents"
        );
        state.chunks_indexed += report.inserted;
    }

    async fn run_node(&self, node: Node, state: &mut RunState, store: &mut EvidenceStore) {
        match node {
            Node::Reason => {
                self.policy.decide(state).await;
            }
            Node::Search => self.search_node(state).await,
            Node::Fetch => self.fetch_node(state).await,
            Node::Ingest => self.ingest_node(state, store).await,
            Node::Retrieve => self.retrieve_node(state, store).await,
            Node::Summarize => self.summarize_node(state).await,
            Node::Consolidate => {
                let context = self.consolidator.consolidate(&state.question, &state.notes).await;
                debug!(notes = context.notes.len(), reranked = context.reranked, "Context consolidated");
                state.combined_context = Some(context);
            }
            Node::Synthesize => self.synthesize_node(state).await,
            Node::HandleError => {
                let error = state.error.as_deref().unwrap_or("unknown error");
                warn!(error = %error, "Producing partial answer");
                let answer = partial_answer(&state.question, &state.notes, error);
                set_answer(state, answer);
            }
            Node::End => {}
        }
    }

    async fn search_node(&self, state: &mut RunState) {
        let Some(query) = state.current_query.clone() else {
            state.recent_results.clear();
            return;
        };
        match self.search.search(&query, self.num_results).await {
            Ok(results) => {
                info!(query = %query, results = results.len(), provider = self.search.name(), "Search complete");
                state.recent_results = results;
            }
            Err(e) => {
                warn!(query = %query, error = %e, "Search failed; continuing without results");
                state.recent_results.clear();
            }
        }
    }

    async fn fetch_node(&self, state: &mut RunState) {
        let Some(url) = state.url_to_fetch.clone() else {
            return;
        };
        let document = self.fetcher.fetch(&url).await;
        match &document.error {
            Some(error) => warn!(url = %url, error = %error, "Fetch failed"),
            None => info!(url = %url, title = %document.title, "Fetched page"),
        }
        state.pending_documents.push(document);
    }

    async fn ingest_node(&self, state: &mut RunState, store: &mut EvidenceStore) {
        let documents = std::mem::take(&mut state.pending_documents);
        if documents.is_empty() {
            return;
        }
        let report = self
            .ingestion
            .ingest(store, self.embedder.as_ref(), &documents)
            .await;
        info!(
            documents = report.documents_ingested,
            skipped = report.documents_skipped,
            inserted = report.inserted,
            failed_batches = report.failed_batches,
            "Ingestion complete"
        );
        state.chunks_indexed += report.inserted;
    }

    async fn retrieve_node(&self, state: &mut RunState, store: &EvidenceStore) {
        let query = state.current_query.clone().unwrap_or_default();
        match self.retriever.retrieve(store, self.embedder.as_ref(), &query).await {
            Ok(chunks) => {
                info!(query = %query, chunks = chunks.len(), "Retrieved evidence");
                state.retrieved_chunks = chunks;
            }
            Err(e) => {
                warn!(query = %query, error = %e, "Retrieval failed");
                state.retrieved_chunks.clear();
            }
        }
    }

    async fn summarize_node(&self, state: &mut RunState) {
        let chunks = std::mem::take(&mut state.retrieved_chunks);
        let focus = state
            .current_query
            .clone()
            .unwrap_or_else(|| state.question.text().to_string());
        match self.summarizer.summarize(&state.question, &focus, chunks).await {
            Ok(Some(note)) => {
                debug!(sources = note.source_chunks.len(), "Note added");
                state.notes.push(note);
            }
            Ok(None) => debug!(focus = %focus, "No evidence to summarize"),
            Err(e) => warn!(focus = %focus, error = %e, "Summarization failed; note skipped"),
        }
    }

    async fn synthesize_node(&self, state: &mut RunState) {
        let context = match state.combined_context.take() {
            Some(context) => context,
            None => self.consolidator.consolidate(&state.question, &state.notes).await,
        };
        match self.synthesizer.synthesize(&state.question, &context).await {
            Ok(answer) => set_answer(state, answer),
            Err(e) => state.error = Some(format!("Synthesis failed: {e}")),
        }
        state.combined_context = Some(context);
    }
}

fn set_answer(state: &mut RunState, answer: ProcessedText) {
    state.final_answer = Some(answer.text);
    state.references = answer.references;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LocalEmbedder;
    use crate::providers::mock::{MockGenerator, StaticFetcher, StaticSearch};

    fn config(max_iterations: usize) -> DelveConfig {
        let mut config = DelveConfig::default();
        config.reasoner.max_iterations = max_iterations;
        config.consolidator.rerank = false;
        config
    }

    fn agent(config: &DelveConfig, generator: Arc<MockGenerator>) -> ResearchAgent {
        ResearchAgent::new(
            config,
            Providers::new(
                generator,
                Arc::new(StaticSearch::empty()),
                Arc::new(StaticFetcher::new()),
                Arc::new(LocalEmbedder::new(64)),
            ),
        )
    }

    #[tokio::test]
    async fn test_immediate_stop() {
        let mock = Arc::new(MockGenerator::with_response("Action: STOP\nArgument: None"));
        let report = agent(&config(3), mock).run(Question::new("What is X?")).await;
        assert_eq!(report.iterations, 1);
        assert!(report.error.is_none());
        assert!(report.final_answer.contains("No information was gathered"));
        assert!(report.references.is_empty());
    }

    #[tokio::test]
    async fn test_policy_failure_gives_partial_answer() {
        let report = agent(&config(3), Arc::new(MockGenerator::failing()))
            .run(Question::new("What is X?"))
            .await;
        assert!(!report.succeeded());
        assert!(report.final_answer.contains("could not be completed"));
        assert_eq!(report.iterations, 1);
    }

    #[tokio::test]
    async fn test_step_ceiling_halts_run() {
        let mut config = config(100);
        config.reasoner.step_ceiling = Some(6);
        let mock = Arc::new(MockGenerator::new());
        for i in 0..100 {
            mock.queue_response(&format!("Action: SEARCH\nArgument: query {i}"));
        }
        let report = agent(&config, mock).run(Question::new("q")).await;
        assert!(report.error.as_deref().unwrap().contains("step ceiling of 6"));
        assert!(report.final_answer.contains("could not be completed"));
        assert_eq!(report.iterations, 3);
    }

    #[tokio::test]
    async fn test_report_json() {
        let mock = Arc::new(MockGenerator::with_response("Action: CONSOLIDATE\nArgument: None"));
        let report = agent(&config(2), mock).run(Question::new("q")).await;
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["iterations"], 1);
        assert!(json["final_answer"].as_str().unwrap().contains("No information"));
        assert!(json["error"].is_null());
    }

    #[tokio::test]
    async fn test_missing_llm_key_fails_inside_run() {
        let mut config = config(3);
        config.llm.api_key_env = "DELVE_TEST_SURELY_UNSET_LLM_KEY".into();
        let agent = ResearchAgent::from_config(&config).unwrap();

        let report = agent.run(Question::new("What is X?")).await;
        let error = report.error.as_deref().unwrap();
        assert!(error.contains("DELVE_TEST_SURELY_UNSET_LLM_KEY"));
        assert!(report.final_answer.contains("could not be completed"));
        assert_eq!(report.iterations, 1);
    }

    #[tokio::test]
    async fn test_local_documents_indexed_before_first_decision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ownership.md"),
            "Every Rust value has exactly one owner.",
        )
        .unwrap();
        let mut config = config(3);
        config.ingestion.local_docs_dir = Some(dir.path().to_path_buf());

        let mock = Arc::new(MockGenerator::with_response("Rust values have one owner."));
        mock.queue_response("Action: RETRIEVE\nArgument: ownership");
        mock.queue_response("- Each value has one owner.");
        mock.queue_response("Action: CONSOLIDATE\nArgument: None");
        let report = agent(&config, mock).run(Question::new("Who owns a value?")).await;

        assert!(report.error.is_none());
        assert_eq!(report.chunks_indexed, 1);
        assert_eq!(report.notes.len(), 1);
        let source = &report.notes[0].source_chunks[0];
        assert!(source.source_url.starts_with("file://"));
        assert!(source.source_url.ends_with("ownership.md"));
        assert_eq!(source.title, "ownership");
    }

    #[tokio::test]
    async fn test_missing_local_docs_dir_does_not_stop_run() {
        let mut config = config(2);
        config.ingestion.local_docs_dir = Some(PathBuf::from("/nonexistent/delve-notes"));
        let mock = Arc::new(MockGenerator::with_response("Action: STOP\nArgument: None"));
        let report = agent(&config, mock).run(Question::new("q")).await;
        assert!(report.error.is_none());
        assert_eq!(report.chunks_indexed, 0);
    }
}
