//! Condenses one round of retrieved chunks into a citation-tagged note.

use crate::citation::{strip_tags, tag_spans};
use crate::config::SummarizerConfig;
use crate::error::ProviderError;
use crate::providers::{GenerationProvider, GenerationRequest};
use crate::types::{Chunk, Note, Question};
use std::sync::Arc;
use tracing::{debug, warn};

/// Note text used when the model returns nothing.
pub const SUMMARY_FAILED: &str = "[Summary generation failed or produced no output]";

const SYSTEM_PROMPT: &str = "You condense research excerpts into a short, factual note. \
Each excerpt starts with a citation tag such as [Source URL='...', Title='...', Chunk=0]. \
Write concise bullet points covering only facts that help answer the research question. \
End every bullet with the exact citation tag of the excerpt it came from, copied character for character. \
Never invent, merge, or shorten tags. Skip excerpts that are irrelevant.";

pub struct NoteSummarizer {
    generator: Arc<dyn GenerationProvider>,
    config: SummarizerConfig,
}

impl NoteSummarizer {
    pub fn new(generator: Arc<dyn GenerationProvider>, config: SummarizerConfig) -> Self {
        Self { generator, config }
    }

    pub fn build_prompt(&self, question: &Question, focus: &str, chunks: &[Chunk]) -> String {
        let mut prompt = format!(
            "Research question: {}\nCurrent focus: {}\n\nWrite at most {} words.\n\nExcerpts:\n",
            question.text(),
            focus,
            self.config.max_words
        );
        for chunk in chunks {
            prompt.push_str(&format!("\n{}\n{}\n", chunk.citation(), chunk.text));
        }
        prompt
    }

    /// `Ok(None)` when there is nothing to summarize.
    pub async fn summarize(
        &self,
        question: &Question,
        focus: &str,
        chunks: Vec<Chunk>,
    ) -> Result<Option<Note>, ProviderError> {
        if chunks.is_empty() {
            return Ok(None);
        }

        let request = GenerationRequest::new(SYSTEM_PROMPT, self.build_prompt(question, focus, &chunks))
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
            .with_model(self.config.model.clone());
        let output = self.generator.generate(request).await?;

        let summary = if output.trim().is_empty() {
            warn!(chunks = chunks.len(), "Summarizer returned no output");
            SUMMARY_FAILED.to_string()
        } else {
            bound_words(output.trim(), self.config.max_words)
        };
        debug!(chunks = chunks.len(), words = summary.split_whitespace().count(), "Note created");
        Ok(Note::new(summary, chunks))
    }
}

/// Keep whole lines while the running word count, ignoring citation tags,
/// stays within `max_words`. A first line that is already over the limit is
/// cut at a word boundary instead, keeping its tags.
pub fn bound_words(text: &str, max_words: usize) -> String {
    let mut kept: Vec<String> = Vec::new();
    let mut words = 0;
    for line in text.lines() {
        let line_words = strip_tags(line).split_whitespace().count();
        if words + line_words > max_words {
            if kept.is_empty() {
                kept.push(truncate_line(line, max_words));
            }
            break;
        }
        words += line_words;
        kept.push(line.to_string());
    }
    kept.join("\n")
}

/// First `max_words` non-tag words of `line`. Tags are never split or
/// dropped; those that sat after the cut follow the last kept word.
fn truncate_line(line: &str, max_words: usize) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut words = 0;
    let mut pos = 0;
    for span in tag_spans(line) {
        take_words(&line[pos..span.start], max_words, &mut words, &mut parts);
        let tag = &line[span.clone()];
        if !parts.contains(&tag) {
            parts.push(tag);
        }
        pos = span.end;
    }
    take_words(&line[pos..], max_words, &mut words, &mut parts);
    parts.join(" ")
}

fn take_words<'a>(
    segment: &'a str,
    max_words: usize,
    words: &mut usize,
    parts: &mut Vec<&'a str>,
) {
    for word in segment.split_whitespace() {
        if *words == max_words {
            return;
        }
        *words += 1;
        parts.push(word);
    }
}
