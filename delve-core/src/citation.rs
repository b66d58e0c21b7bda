//! Inline citation tags and the reference-numbering post-processor.
//!
//! A tag looks like `[Source URL='https://a.example', Title='A', Chunk=0]`. Tags
//! are carried verbatim through summarization and synthesis, then rewritten here
//! into `[ref:N]` markers plus a trailing reference list. Two tags are the same
//! citation only when their strings are identical.

use crate::types::Reference;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

const FIELD: &str = r"[A-Za-z0-9_]+=(?:'[^']*'|[^,\]'\s]+)";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\[Source\s+{FIELD}(?:,\s*{FIELD})*\s*\]")).expect("valid tag pattern")
});

static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9_]+)=(?:'([^']*)'|([^,\]'\s]+))").expect("valid field pattern")
});

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_URL: &str = "Unknown URL";

/// Structured provenance of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CitationTag {
    pub url: String,
    pub title: String,
    pub chunk_index: usize,
}

impl CitationTag {
    /// Single quotes are removed from the url and title so the rendered tag
    /// always parses back.
    pub fn new(url: &str, title: &str, chunk_index: usize) -> Self {
        Self {
            url: url.replace('\'', ""),
            title: title.replace('\'', ""),
            chunk_index,
        }
    }
}

impl fmt::Display for CitationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Source URL='{}', Title='{}', Chunk={}]",
            self.url, self.title, self.chunk_index
        )
    }
}

/// Every tag substring in `text`, in order of appearance.
pub fn find_tags(text: &str) -> Vec<&str> {
    TAG_RE.find_iter(text).map(|m| m.as_str()).collect()
}

/// Byte ranges of every tag in `text`.
pub fn tag_spans(text: &str) -> Vec<Range<usize>> {
    TAG_RE.find_iter(text).map(|m| m.range()).collect()
}

/// `text` with every tag removed.
pub fn strip_tags(text: &str) -> String {
    TAG_RE.replace_all(text, "").into_owned()
}

/// Key/value fields of a single tag. Quoted values are unquoted.
pub fn parse_fields(tag: &str) -> HashMap<String, String> {
    FIELD_RE
        .captures_iter(tag)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (caps[1].to_string(), value)
        })
        .collect()
}

/// Text whose tags were replaced by reference numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedText {
    pub text: String,
    pub references: Vec<Reference>,
}

/// Rewrites citation tags into `[ref:N]` markers with a reference section.
///
/// Numbers are assigned by first appearance. Text without tags comes back
/// untouched, which also makes a second pass over processed text a no-op.
pub fn process_citations(text: &str) -> ProcessedText {
    let mut numbers: HashMap<&str, usize> = HashMap::new();
    let mut references = Vec::new();

    for tag in find_tags(text) {
        if numbers.contains_key(tag) {
            continue;
        }
        let number = references.len() + 1;
        numbers.insert(tag, number);
        let fields = parse_fields(tag);
        references.push(Reference {
            number,
            title: fields
                .get("Title")
                .filter(|t| !t.is_empty())
                .cloned()
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            url: fields
                .get("URL")
                .filter(|u| !u.is_empty())
                .cloned()
                .unwrap_or_else(|| UNKNOWN_URL.to_string()),
        });
    }

    if references.is_empty() {
        return ProcessedText {
            text: text.to_string(),
            references,
        };
    }

    let body = TAG_RE.replace_all(text, |caps: &Captures| {
        format!("[ref:{}]", numbers.get(&caps[0]).copied().unwrap_or_default())
    });

    let mut out = body.into_owned();
    out.push_str("\n\n---\nReferences:");
    for reference in &references {
        out.push_str(&format!(
            "\n[{}] {} ({})",
            reference.number, reference.title, reference.url
        ));
    }

    ProcessedText {
        text: out,
        references,
    }
}
