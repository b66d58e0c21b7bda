//! The decision policy: asks the model for the next research action, parses
//! its free-form reply, and validates it against the run state.

use crate::config::ReasonerConfig;
use crate::error::ParseError;
use crate::providers::{GenerationProvider, GenerationRequest};
use crate::state::{Action, RunState};
use crate::store::normalize_url;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You direct a web research process one step at a time. \
Choose exactly one next action:\n\
- SEARCH: run a web search. Argument: the search query.\n\
- FETCH: download one page from the latest search results. Argument: its exact URL.\n\
- RETRIEVE: look up already downloaded evidence and write a note about it. Argument: what to look for.\n\
- CONSOLIDATE: enough has been gathered; move on to writing the answer. Argument: None.\n\
- STOP: nothing more can be done. Argument: None.\n\
Never repeat a query you already searched and never fetch a page twice. \
Fetch before you retrieve; retrieval only sees pages that were fetched.\n\
Reply with exactly two lines:\n\
Action: <SEARCH|FETCH|RETRIEVE|CONSOLIDATE|STOP>\n\
Argument: <argument or None>";

/// Summaries longer than this are cut in the policy prompt.
const NOTE_PREVIEW_CHARS: usize = 300;

/// A validated next action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "argument", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Search(String),
    Fetch(String),
    Retrieve(String),
    Consolidate,
    Stop,
}

impl Decision {
    pub fn action(&self) -> Action {
        match self {
            Decision::Search(_) => Action::Search,
            Decision::Fetch(_) => Action::Fetch,
            Decision::Retrieve(_) => Action::Retrieve,
            Decision::Consolidate => Action::Consolidate,
            Decision::Stop => Action::Stop,
        }
    }

    pub fn argument(&self) -> Option<&str> {
        match self {
            Decision::Search(arg) | Decision::Fetch(arg) | Decision::Retrieve(arg) => Some(arg),
            Decision::Consolidate | Decision::Stop => None,
        }
    }
}

/// An action as the model wrote it, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDecision {
    pub action: Action,
    pub argument: Option<String>,
}

/// Extract the action and argument from model output.
///
/// Accepts `Action:` / `Argument:` lines (first occurrence wins, markdown
/// emphasis and list markers tolerated). Output without an `Action:` line may
/// instead be a JSON object with `action` and `argument` keys, optionally
/// inside a code fence.
pub fn parse_decision(output: &str) -> Result<RawDecision, ParseError> {
    let output = output.trim();
    if output.is_empty() {
        return Err(ParseError::Empty);
    }
    match parse_lines(output) {
        Some(raw) => raw,
        None => parse_json(output).unwrap_or(Err(ParseError::MissingAction)),
    }
}

/// `None` when no `Action:` line is present.
fn parse_lines(output: &str) -> Option<Result<RawDecision, ParseError>> {
    let mut action: Option<&str> = None;
    let mut argument: Option<&str> = None;
    for line in output.lines() {
        let line = line.trim_start_matches(|c: char| c.is_whitespace() || "*#->`".contains(c));
        if action.is_none()
            && let Some(value) = strip_label(line, "action")
        {
            action = Some(value);
        } else if argument.is_none()
            && let Some(value) = strip_label(line, "argument")
        {
            argument = Some(value);
        }
    }

    let action = clean_value(action?);
    Some(
        action
            .parse::<Action>()
            .map(|action| RawDecision {
                action,
                argument: argument.map(clean_value).and_then(non_empty_argument),
            })
            .map_err(|action| ParseError::UnknownAction { action }),
    )
}

fn parse_json(output: &str) -> Option<Result<RawDecision, ParseError>> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&output[start..=end]).ok()?;
    let object = value.as_object()?;

    let action = object
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("action"))
        .and_then(|(_, v)| v.as_str());
    let argument = object
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("argument"))
        .and_then(|(_, v)| v.as_str());

    let Some(action) = action else {
        return Some(Err(ParseError::MissingAction));
    };
    Some(
        action
            .parse::<Action>()
            .map(|action| RawDecision {
                action,
                argument: argument.map(clean_value).and_then(non_empty_argument),
            })
            .map_err(|action| ParseError::UnknownAction { action }),
    )
}

/// The text after `label:` when `line` starts with it, case-insensitively.
fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = line[label.len()..].trim_start_matches(['*', '_']).trim_start();
    rest.strip_prefix(':')
}

fn clean_value(value: &str) -> String {
    let value = value.trim().trim_matches(|c: char| matches!(c, '*' | '`' | '"' | '\'' | '_'));
    let value = value.trim();
    let value = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .or_else(|| value.strip_prefix('<').and_then(|v| v.strip_suffix('>')))
        .unwrap_or(value);
    value.trim().trim_matches(|c: char| c == '"' || c == '\'').trim().to_string()
}

fn non_empty_argument(value: String) -> Option<String> {
    if value.is_empty() || value.eq_ignore_ascii_case("none") || value.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(value)
    }
}

/// Turn a parsed action into one the orchestrator can execute. Anything
/// invalid for the current state becomes `Stop`.
pub fn validate_decision(raw: RawDecision, state: &RunState) -> Decision {
    match raw.action {
        Action::Search => match raw.argument {
            None => {
                warn!("SEARCH without a query; stopping");
                Decision::Stop
            }
            Some(query) if state.has_seen_query(&query) => {
                warn!(query = %query, "Query already searched; stopping");
                Decision::Stop
            }
            Some(query) => Decision::Search(query),
        },
        Action::Fetch => validate_fetch(raw.argument, state),
        Action::Retrieve => match raw.argument {
            None => {
                warn!("RETRIEVE without a query; stopping");
                Decision::Stop
            }
            Some(query) => Decision::Retrieve(query),
        },
        Action::Consolidate | Action::Stop => {
            if let Some(argument) = raw.argument {
                warn!(action = %raw.action, argument = %argument, "Ignoring argument");
            }
            if raw.action == Action::Consolidate {
                Decision::Consolidate
            } else {
                Decision::Stop
            }
        }
    }
}

fn validate_fetch(argument: Option<String>, state: &RunState) -> Decision {
    if state.recent_results.is_empty() {
        warn!("FETCH requested with no search results; stopping");
        return Decision::Stop;
    }
    let Some(requested) = argument else {
        warn!("FETCH without a URL; stopping");
        return Decision::Stop;
    };
    let exact = state.recent_results.iter().find(|r| r.url == requested);
    let Some(result) = exact.or_else(|| {
        let requested = normalize_url(&requested);
        state
            .recent_results
            .iter()
            .find(|r| normalize_url(&r.url) == requested)
    }) else {
        warn!(url = %requested, "URL is not among the latest search results; stopping");
        return Decision::Stop;
    };
    if state.has_seen_url(&result.url) {
        warn!(url = %result.url, "URL already fetched; stopping");
        return Decision::Stop;
    }
    Decision::Fetch(result.url.clone())
}

/// Record a decision in the run state and count the invocation.
pub fn apply_decision(state: &mut RunState, decision: &Decision) {
    state.next_action = Some(decision.action());
    state.current_query = None;
    state.url_to_fetch = None;
    match decision {
        Decision::Search(query) => {
            state.seen_queries.insert(query.as_str());
            state.current_query = Some(query.clone());
        }
        Decision::Fetch(url) => {
            state.seen_urls.insert(url.as_str());
            state.url_to_fetch = Some(url.clone());
        }
        Decision::Retrieve(query) => state.current_query = Some(query.clone()),
        Decision::Consolidate | Decision::Stop => {}
    }
    state.iteration += 1;
}

pub struct DecisionPolicy {
    generator: Arc<dyn GenerationProvider>,
    config: ReasonerConfig,
}

impl DecisionPolicy {
    pub fn new(generator: Arc<dyn GenerationProvider>, config: ReasonerConfig) -> Self {
        Self { generator, config }
    }

    pub fn build_prompt(&self, state: &RunState) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Research question: {}", state.question.text());
        if state.question.outline.len() > 1
            || state.question.outline.first().map(String::as_str) != Some(state.question.text())
        {
            prompt.push_str("Sections the answer must cover:\n");
            for section in &state.question.outline {
                let _ = writeln!(prompt, "- {section}");
            }
        }
        let _ = writeln!(
            prompt,
            "\nStep {} of {}. Notes so far: {}.",
            state.iteration + 1,
            state.max_iterations,
            state.notes.len()
        );

        prompt.push_str("\nQueries already searched:\n");
        push_list(&mut prompt, state.seen_queries.iter().map(String::as_str));

        prompt.push_str("\nLatest search results:\n");
        if state.recent_results.is_empty() {
            prompt.push_str("(none)\n");
        }
        for (i, result) in state.recent_results.iter().enumerate() {
            let marker = if state.has_seen_url(&result.url) {
                " [already fetched]"
            } else {
                ""
            };
            let _ = writeln!(
                prompt,
                "{}. {}{}\n   URL: {}\n   {}",
                i + 1,
                result.title,
                marker,
                result.url,
                result.snippet
            );
        }

        prompt.push_str("\nNotes gathered:\n");
        if state.notes.is_empty() {
            prompt.push_str("(none)\n");
        }
        for (i, note) in state.notes.iter().enumerate() {
            let preview: String = crate::citation::strip_tags(&note.summary)
                .chars()
                .take(NOTE_PREVIEW_CHARS)
                .collect();
            let _ = writeln!(prompt, "{}. {}", i + 1, preview.trim());
        }

        prompt.push_str("\nWhat is the next action?");
        prompt
    }

    /// Decide the next action and record it in `state`.
    ///
    /// Once the iteration budget is spent the answer is always `Consolidate`
    /// without asking the model. A model failure sets `state.error`.
    pub async fn decide(&self, state: &mut RunState) -> Decision {
        let decision = if state.budget_exhausted() {
            info!(
                iteration = state.iteration,
                max_iterations = state.max_iterations,
                "Iteration budget reached; consolidating"
            );
            Decision::Consolidate
        } else {
            let request = GenerationRequest::new(SYSTEM_PROMPT, self.build_prompt(state))
                .with_temperature(self.config.temperature)
                .with_max_tokens(self.config.max_tokens)
                .with_model(self.config.model.clone());
            match self.generator.generate(request).await {
                Ok(output) => match parse_decision(&output) {
                    Ok(raw) => validate_decision(raw, state),
                    Err(e) => {
                        warn!(error = %e, output = %output.trim(), "Unparseable decision; stopping");
                        Decision::Stop
                    }
                },
                Err(e) => {
                    state.error = Some(format!("Decision policy failed: {e}"));
                    Decision::Stop
                }
            }
        };

        debug!(
            iteration = state.iteration + 1,
            action = %decision.action(),
            argument = decision.argument().unwrap_or(""),
            "Decision"
        );
        apply_decision(state, &decision);
        decision
    }
}

fn push_list<'a>(prompt: &mut String, items: impl Iterator<Item = &'a str>) {
    let mut any = false;
    for item in items {
        any = true;
        let _ = writeln!(prompt, "- {item}");
    }
    if !any {
        prompt.push_str("(none)\n");
    }
}
