//! Per-run mutable state and the orchestrator's node graph.

use crate::consolidate::ConsolidatedContext;
use crate::types::{Chunk, FetchedDocument, Note, Question, Reference, SearchResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What the decision policy may ask for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Search,
    Fetch,
    Retrieve,
    Consolidate,
    Stop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Search => "SEARCH",
            Action::Fetch => "FETCH",
            Action::Retrieve => "RETRIEVE",
            Action::Consolidate => "CONSOLIDATE",
            Action::Stop => "STOP",
        };
        f.write_str(name)
    }
}

impl FromStr for Action {
    type Err = String;

    /// Case-insensitive. `RETRIEVE_CHUNKS` is accepted for `RETRIEVE`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_uppercase() })
            .collect();
        match normalized.as_str() {
            "SEARCH" => Ok(Action::Search),
            "FETCH" => Ok(Action::Fetch),
            "RETRIEVE" | "RETRIEVE_CHUNKS" => Ok(Action::Retrieve),
            "CONSOLIDATE" => Ok(Action::Consolidate),
            "STOP" => Ok(Action::Stop),
            _ => Err(s.trim().to_string()),
        }
    }
}

/// Orchestrator steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Node {
    Reason,
    Search,
    Fetch,
    Ingest,
    Retrieve,
    Summarize,
    Consolidate,
    Synthesize,
    HandleError,
    End,
}

/// Strings in first-seen order with constant-time membership checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    order: Vec<String>,
    index: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when `value` was already present.
    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if self.index.contains(&value) {
            return false;
        }
        self.index.insert(value.clone());
        self.order.push(value);
        true
    }

    pub fn contains(&self, value: &str) -> bool {
        self.index.contains(value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.order.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.order
    }
}

/// Everything a run knows, threaded through every node.
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: Uuid,
    pub question: Question,
    pub notes: Vec<Note>,
    pub seen_queries: SeenSet,
    pub seen_urls: SeenSet,
    pub iteration: usize,
    pub max_iterations: usize,
    pub next_action: Option<Action>,
    pub current_query: Option<String>,
    pub url_to_fetch: Option<String>,
    /// Results of the latest SEARCH; replaced only by the next SEARCH.
    pub recent_results: Vec<SearchResult>,
    pub pending_documents: Vec<FetchedDocument>,
    pub retrieved_chunks: Vec<Chunk>,
    pub combined_context: Option<ConsolidatedContext>,
    pub final_answer: Option<String>,
    pub references: Vec<Reference>,
    pub error: Option<String>,
    /// Node executions so far, checked against the step ceiling.
    pub steps: usize,
    pub chunks_indexed: usize,
}

impl RunState {
    pub fn new(question: Question, max_iterations: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            question,
            notes: Vec::new(),
            seen_queries: SeenSet::new(),
            seen_urls: SeenSet::new(),
            iteration: 0,
            max_iterations,
            next_action: None,
            current_query: None,
            url_to_fetch: None,
            recent_results: Vec::new(),
            pending_documents: Vec::new(),
            retrieved_chunks: Vec::new(),
            combined_context: None,
            final_answer: None,
            references: Vec::new(),
            error: None,
            steps: 0,
            chunks_indexed: 0,
        }
    }

    pub fn has_seen_query(&self, query: &str) -> bool {
        self.seen_queries.contains(query)
    }

    pub fn has_seen_url(&self, url: &str) -> bool {
        self.seen_urls.contains(url)
    }

    pub fn budget_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }
}

/// The node to run after `node`, given the state it left behind.
pub fn next_node(node: Node, state: &RunState) -> Node {
    if state.error.is_some() && !matches!(node, Node::HandleError | Node::End) {
        return Node::HandleError;
    }
    match node {
        Node::Reason => match state.next_action {
            Some(Action::Search) => Node::Search,
            Some(Action::Fetch) => Node::Fetch,
            Some(Action::Retrieve) => Node::Retrieve,
            Some(Action::Consolidate) | Some(Action::Stop) | None => Node::Consolidate,
        },
        Node::Search => Node::Reason,
        Node::Fetch => Node::Ingest,
        Node::Ingest => Node::Reason,
        Node::Retrieve => Node::Summarize,
        Node::Summarize => Node::Reason,
        Node::Consolidate => Node::Synthesize,
        Node::Synthesize | Node::HandleError | Node::End => Node::End,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(action: Option<Action>) -> RunState {
        let mut state = RunState::new(Question::new("q"), 5);
        state.next_action = action;
        state
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("search".parse::<Action>(), Ok(Action::Search));
        assert_eq!(" RETRIEVE_CHUNKS ".parse::<Action>(), Ok(Action::Retrieve));
        assert_eq!("retrieve chunks".parse::<Action>(), Ok(Action::Retrieve));
        assert_eq!("Consolidate".parse::<Action>(), Ok(Action::Consolidate));
        assert_eq!("browse".parse::<Action>(), Err("browse".to_string()));
        assert_eq!(Action::Retrieve.to_string(), "RETRIEVE");
    }

    #[test]
    fn test_reason_edges() {
        let cases = [
            (Some(Action::Search), Node::Search),
            (Some(Action::Fetch), Node::Fetch),
            (Some(Action::Retrieve), Node::Retrieve),
            (Some(Action::Consolidate), Node::Consolidate),
            (Some(Action::Stop), Node::Consolidate),
            (None, Node::Consolidate),
        ];
        for (action, expected) in cases {
            assert_eq!(next_node(Node::Reason, &state_with(action)), expected);
        }
    }

    #[test]
    fn test_fixed_edges() {
        let state = state_with(None);
        assert_eq!(next_node(Node::Search, &state), Node::Reason);
        assert_eq!(next_node(Node::Fetch, &state), Node::Ingest);
        assert_eq!(next_node(Node::Ingest, &state), Node::Reason);
        assert_eq!(next_node(Node::Retrieve, &state), Node::Summarize);
        assert_eq!(next_node(Node::Summarize, &state), Node::Reason);
        assert_eq!(next_node(Node::Consolidate, &state), Node::Synthesize);
        assert_eq!(next_node(Node::Synthesize, &state), Node::End);
        assert_eq!(next_node(Node::HandleError, &state), Node::End);
    }

    #[test]
    fn test_error_routes_to_handler() {
        let mut state = state_with(Some(Action::Search));
        state.error = Some("boom".into());
        for node in [Node::Reason, Node::Search, Node::Ingest, Node::Synthesize] {
            assert_eq!(next_node(node, &state), Node::HandleError);
        }
        assert_eq!(next_node(Node::HandleError, &state), Node::End);
    }

    #[test]
    fn test_seen_helpers() {
        let mut state = state_with(None);
        state.seen_queries.insert("rust");
        state.seen_urls.insert("https://a");
        assert!(state.has_seen_query("rust"));
        assert!(!state.has_seen_query("Rust"));
        assert!(state.has_seen_url("https://a"));
        assert!(!state.budget_exhausted());
        state.iteration = 5;
        assert!(state.budget_exhausted());
    }

    #[test]
    fn test_seen_set_keeps_first_order() {
        let mut seen = SeenSet::new();
        assert!(seen.insert("b"));
        assert!(seen.insert("a"));
        assert!(!seen.insert("b"));
        assert_eq!(seen.len(), 2);
        assert_eq!(seen.as_slice(), ["b".to_string(), "a".to_string()]);
        assert!(seen.contains("a"));
        assert!(!seen.contains("c"));
        assert_eq!(seen.into_vec(), vec!["b".to_string(), "a".to_string()]);
    }
}
