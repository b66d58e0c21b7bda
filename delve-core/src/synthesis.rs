//! Final answer generation and citation post-processing.

use crate::citation::{ProcessedText, process_citations};
use crate::config::SynthesizerConfig;
use crate::consolidate::ConsolidatedContext;
use crate::error::ProviderError;
use crate::providers::{GenerationProvider, GenerationRequest};
use crate::types::{Note, Question};
use std::sync::Arc;
use tracing::{info, warn};

/// Answer used when the model returns nothing.
pub const SYNTHESIS_FAILED: &str = "Synthesis failed or produced no output.";

const SYSTEM_PROMPT: &str = "You are a research writer. Answer the question using only the curated notes and excerpts provided. \
Organise the answer under the outline sections as markdown headings. \
Every sentence that states a fact from an excerpt must end with that excerpt's citation tag, \
copied exactly as it appears, for example [Source URL='https://example.com', Title='Example', Chunk=0]. \
Do not invent tags and do not add a reference list. \
If the notes do not cover a section, say so briefly instead of guessing.";

pub struct Synthesizer {
    generator: Arc<dyn GenerationProvider>,
    config: SynthesizerConfig,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn GenerationProvider>, config: SynthesizerConfig) -> Self {
        Self { generator, config }
    }

    pub fn build_prompt(&self, question: &Question, context: &ConsolidatedContext) -> String {
        let outline: String = question
            .outline
            .iter()
            .map(|section| format!("- {section}\n"))
            .collect();
        format!(
            "Question: {}\n\nOutline:\n{}\nResearch context:\n\n{}",
            question.text(),
            outline,
            context.text
        )
    }

    /// Write the cited answer. Runs without notes skip the model entirely.
    pub async fn synthesize(
        &self,
        question: &Question,
        context: &ConsolidatedContext,
    ) -> Result<ProcessedText, ProviderError> {
        if context.notes.is_empty() {
            info!("No notes gathered; skipping synthesis");
            return Ok(ProcessedText {
                text: no_information_answer(question),
                references: Vec::new(),
            });
        }

        let request = GenerationRequest::new(SYSTEM_PROMPT, self.build_prompt(question, context))
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
            .with_model(self.config.model.clone());
        let output = self.generator.generate(request).await?;

        if output.trim().is_empty() {
            warn!("Synthesizer returned no output");
            return Ok(ProcessedText {
                text: SYNTHESIS_FAILED.to_string(),
                references: Vec::new(),
            });
        }
        Ok(process_citations(output.trim()))
    }
}

pub fn no_information_answer(question: &Question) -> String {
    format!(
        "No information was gathered while researching \"{}\", so no answer can be given. \
         Try rephrasing the question or allowing more research iterations.",
        question.text()
    )
}

/// Best-effort answer after a fatal error: the failure plus whatever notes
/// were gathered, with their citations numbered.
pub fn partial_answer(question: &Question, notes: &[Note], error: &str) -> ProcessedText {
    let mut text = format!(
        "Research on \"{}\" could not be completed: {}\n",
        question.text(),
        error
    );
    if notes.is_empty() {
        text.push_str("\nNo findings were gathered before the failure.");
    } else {
        text.push_str("\nPartial findings gathered before the failure:\n");
        for note in notes {
            text.push_str(&format!("\n{}\n", note.summary.trim()));
        }
    }
    process_citations(text.trim_end())
}
