//! Evidence ingestion: fetched documents -> chunks -> embedded batches -> store.

use crate::chunk::RecursiveSplitter;
use crate::config::IngestionConfig;
use crate::providers::EmbeddingProvider;
use crate::store::{EvidenceStore, normalize_url};
use crate::tokens::TokenCounter;
use crate::types::{Chunk, FetchedDocument};
use futures::StreamExt;
use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href\s*=\s*["']([^"'\s]+)["']"#).expect("valid href pattern")
});
static MARKDOWN_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\]\(([^)\s]+)\)").expect("valid markdown link pattern")
});
/// `[[target]]`, `[[target|text]]`, and `[[target#heading]]`.
static WIKI_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\[\]|#]+)(?:#[^\[\]|]*)?(?:\|[^\[\]]*)?\]\]")
        .expect("valid wiki link pattern")
});

/// File extensions read from a local notes directory.
const LOCAL_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// What happened during one ingestion call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub documents_ingested: usize,
    pub documents_skipped: usize,
    pub chunks: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub inserted: usize,
}

/// Absolute link targets in `text`, resolved against `base_url`, in order of
/// first appearance. Links back to `base_url` itself are dropped.
///
/// Web pages only yield http(s) links. Local notes (`file://` bases) also
/// yield `file://` links, including wiki links, whose targets get a `.md`
/// extension unless they already name a `.md` or `.txt` file.
pub fn extract_links(text: &str, base_url: &str) -> Vec<String> {
    let base = url::Url::parse(base_url).ok();
    let local = base.as_ref().is_some_and(|b| b.scheme() == "file");
    let own = normalize_url(base_url);

    let mut found: Vec<(usize, String)> = HREF_RE
        .captures_iter(text)
        .chain(MARKDOWN_LINK_RE.captures_iter(text))
        .filter_map(|caps| caps.get(1).map(|m| (m.start(), m.as_str().to_string())))
        .collect();
    if local {
        found.extend(
            WIKI_LINK_RE
                .captures_iter(text)
                .filter_map(|caps| caps.get(1).map(|m| (m.start(), wiki_target(m.as_str())))),
        );
    }
    found.sort_by_key(|(pos, _)| *pos);

    let mut links: Vec<String> = Vec::new();
    for (_, raw) in found {
        let resolved = match &base {
            Some(base) => base.join(&raw).ok(),
            None => url::Url::parse(&raw).ok(),
        };
        let Some(resolved) = resolved else { continue };
        match resolved.scheme() {
            "http" | "https" => {}
            "file" if local => {}
            _ => continue,
        }
        let link = normalize_url(resolved.as_str());
        if link == own || links.contains(&link) {
            continue;
        }
        links.push(link);
    }
    links
}

fn wiki_target(target: &str) -> String {
    let target = target.trim();
    let lower = target.to_ascii_lowercase();
    if LOCAL_EXTENSIONS.iter().any(|ext| lower.ends_with(&format!(".{ext}"))) {
        target.to_string()
    } else {
        format!("{target}.md")
    }
}

/// Read every `.md` and `.txt` file under `dir` as a document with a
/// `file://` URL and the file stem as its title. Unreadable files are skipped.
pub fn load_local_documents(dir: &Path) -> std::io::Result<Vec<FetchedDocument>> {
    if !dir.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        ));
    }

    let mut documents = Vec::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name().into_iter().flatten() {
        let path = entry.path();
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| LOCAL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !entry.file_type().is_file() || !supported {
            continue;
        }
        let loaded = std::fs::canonicalize(path).and_then(|absolute| {
            let content = std::fs::read_to_string(&absolute)?;
            Ok((absolute, content))
        });
        let (absolute, content) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping file");
                continue;
            }
        };
        let Ok(url) = url::Url::from_file_path(&absolute) else {
            warn!(path = %absolute.display(), "Skipping file without a file URL");
            continue;
        };
        let title = absolute
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        documents.push(FetchedDocument::ok(url.as_str(), title, content));
    }
    debug!(dir = %dir.display(), documents = documents.len(), "Loaded local documents");
    Ok(documents)
}

/// Group consecutive items into batches whose token sum stays within `budget`.
///
/// An item that would overflow the current batch starts a new one. An item
/// larger than the whole budget gets a batch of its own.
pub fn pack_batches(token_counts: &[usize], budget: usize) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (i, &tokens) in token_counts.iter().enumerate() {
        if i > start && used + tokens > budget {
            batches.push(start..i);
            start = i;
            used = 0;
        }
        used += tokens;
    }
    if start < token_counts.len() {
        batches.push(start..token_counts.len());
    }
    batches
}

pub struct IngestionPipeline {
    splitter: RecursiveSplitter,
    counter: TokenCounter,
    batch_token_budget: usize,
    concurrency: usize,
}

impl IngestionPipeline {
    /// `tokenizer_model` should name the embedding model so batch budgets match
    /// the provider's own accounting.
    pub fn new(config: &IngestionConfig, tokenizer_model: &str) -> Self {
        Self {
            splitter: RecursiveSplitter::new(config.chunk_size, config.chunk_overlap),
            counter: TokenCounter::for_model(tokenizer_model),
            batch_token_budget: config.batch_token_budget.max(1),
            concurrency: config.embed_concurrency.max(1),
        }
    }

    /// Split a document into un-embedded chunks with provenance and links.
    pub fn chunk_document(&self, document_id: usize, document: &FetchedDocument) -> Vec<Chunk> {
        let Some(content) = document.content() else {
            return Vec::new();
        };
        let title = if document.title.trim().is_empty() {
            document.url.clone()
        } else {
            document.title.trim().to_string()
        };
        self.splitter
            .split(content)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| Chunk {
                id: format!("doc-{document_id}-chunk-{chunk_index}"),
                source_url: document.url.clone(),
                title: title.clone(),
                chunk_index,
                links: extract_links(&text, &document.url),
                text,
                embedding: Vec::new(),
            })
            .collect()
    }

    /// Chunk, embed, and store `documents`. Failures are logged and counted,
    /// never returned: one bad batch does not stop the others.
    pub async fn ingest(
        &self,
        store: &mut EvidenceStore,
        embedder: &dyn EmbeddingProvider,
        documents: &[FetchedDocument],
    ) -> IngestReport {
        let mut report = IngestReport::default();
        let mut chunks = Vec::new();

        for document in documents {
            if document.content().is_none() {
                warn!(
                    url = %document.url,
                    error = document.error.as_deref().unwrap_or("empty content"),
                    "Skipping document"
                );
                report.documents_skipped += 1;
                continue;
            }
            let document_id = store.allocate_document_id();
            let doc_chunks = self.chunk_document(document_id, document);
            debug!(url = %document.url, chunks = doc_chunks.len(), "Split document");
            report.documents_ingested += 1;
            chunks.extend(doc_chunks);
        }
        report.chunks = chunks.len();
        if chunks.is_empty() {
            return report;
        }

        let token_counts: Vec<usize> = chunks.iter().map(|c| self.counter.count(&c.text)).collect();
        let ranges = pack_batches(&token_counts, self.batch_token_budget);
        report.batches = ranges.len();

        let mut remaining = chunks.into_iter();
        let mut batches: Vec<Vec<Chunk>> = Vec::with_capacity(ranges.len());
        for range in &ranges {
            let tokens: usize = token_counts[range.clone()].iter().sum();
            if tokens > self.batch_token_budget {
                warn!(
                    tokens,
                    budget = self.batch_token_budget,
                    "Chunk exceeds the batch token budget on its own"
                );
            }
            batches.push(remaining.by_ref().take(range.len()).collect());
        }

        let embedded: Vec<(usize, Result<Vec<Chunk>, String>)> =
            futures::stream::iter(batches.into_iter().enumerate())
                .map(|(batch, chunks)| async move { (batch, embed_batch(embedder, chunks).await) })
                .buffered(self.concurrency)
                .collect()
                .await;

        for (batch, result) in embedded {
            let inserted = result.and_then(|chunks| store.insert(chunks).map_err(|e| e.to_string()));
            match inserted {
                Ok(count) => report.inserted += count,
                Err(error) => {
                    warn!(batch, error = %error, "Skipping failed embedding batch");
                    report.failed_batches += 1;
                }
            }
        }

        info!(
            documents = report.documents_ingested,
            chunks = report.chunks,
            batches = report.batches,
            failed_batches = report.failed_batches,
            inserted = report.inserted,
            "Ingestion complete"
        );
        report
    }
}

async fn embed_batch(
    embedder: &dyn EmbeddingProvider,
    mut chunks: Vec<Chunk>,
) -> Result<Vec<Chunk>, String> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed(&texts).await.map_err(|e| e.to_string())?;
    if vectors.len() != chunks.len() {
        return Err(format!(
            "embedder returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        ));
    }
    for (chunk, vector) in chunks.iter_mut().zip(vectors) {
        chunk.embedding = vector;
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::providers::LocalEmbedder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(chunk_size: usize, budget: usize) -> IngestionConfig {
        IngestionConfig {
            chunk_size,
            chunk_overlap: 0,
            batch_token_budget: budget,
            embed_concurrency: 1,
            local_docs_dir: None,
        }
    }

    /// Fails every other batch.
    struct FlakyEmbedder {
        inner: LocalEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
                return Err(ProviderError::Connection {
                    message: "flaky".into(),
                });
            }
            self.inner.embed(texts).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    #[test]
    fn test_pack_batches() {
        assert_eq!(pack_batches(&[3, 3, 3], 10), vec![0..3]);
        assert_eq!(pack_batches(&[4, 4, 4], 10), vec![0..2, 2..3]);
        assert_eq!(pack_batches(&[2, 20, 2], 10), vec![0..1, 1..2, 2..3]);
        assert_eq!(pack_batches(&[10, 1], 10), vec![0..1, 1..2]);
        assert!(pack_batches(&[], 10).is_empty());
    }

    #[test]
    fn test_extract_links() {
        let text = r##"See <a href="/docs/intro">intro</a>, <a href='https://other.example/x#part'>x</a>,
            [md](https://third.example/page) and <a href="#top">top</a>
            and <a href="mailto:a@b.c">mail</a> and again [dup](https://other.example/x)"##;
        let links = extract_links(text, "https://site.example/guide");
        assert_eq!(
            links,
            vec![
                "https://site.example/docs/intro",
                "https://other.example/x",
                "https://third.example/page",
            ]
        );
    }

    #[test]
    fn test_extract_wiki_links_from_local_notes() {
        let text = "See [[Other Note]], [[guide.txt|the guide]], [[Other Note#Intro]], \
            [rel](sub/deep.md) and [web](https://web.example/a).";
        let links = extract_links(text, "file:///notes/index.md");
        assert_eq!(
            links,
            vec![
                "file:///notes/Other%20Note.md",
                "file:///notes/guide.txt",
                "file:///notes/sub/deep.md",
                "https://web.example/a",
            ]
        );
    }

    #[test]
    fn test_web_pages_ignore_wiki_and_file_links() {
        let text = "[[Other Note]] and [f](file:///etc/passwd) and [ok](/docs)";
        assert_eq!(
            extract_links(text, "https://site.example/guide"),
            vec!["https://site.example/docs"]
        );
    }

    #[test]
    fn test_load_local_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("alpha.md"), "Alpha links to [[beta.txt|Beta]].").unwrap();
        std::fs::write(dir.path().join("beta.txt"), "Beta text.").unwrap();
        std::fs::write(dir.path().join("sub").join("gamma.MD"), "Gamma.").unwrap();
        std::fs::write(dir.path().join("skip.pdf"), "binary").unwrap();

        let docs = load_local_documents(dir.path()).unwrap();
        let titles: Vec<&str> = docs.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["alpha", "beta", "gamma"]);
        assert!(docs.iter().all(|d| d.url.starts_with("file://")));

        let alpha = &docs[0];
        let links = extract_links(alpha.content().unwrap(), &alpha.url);
        assert_eq!(links, vec![docs[1].url.clone()]);
    }

    #[test]
    fn test_load_local_documents_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_local_documents(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_chunk_document_metadata() {
        let pipeline = IngestionPipeline::new(&config(40, 1000), "text-embedding-3-small");
        let doc = FetchedDocument::ok(
            "https://a.example",
            "",
            "First paragraph with words.\n\nSecond paragraph with more words.",
        );
        let chunks = pipeline.chunk_document(7, &doc);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].id, "doc-7-chunk-1");
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[0].title, "https://a.example");
        assert!(chunks.iter().all(|c| c.embedding.is_empty()));
    }

    #[tokio::test]
    async fn test_ingest_skips_failed_documents() {
        let pipeline = IngestionPipeline::new(&config(200, 1000), "text-embedding-3-small");
        let mut store = EvidenceStore::new();
        let docs = vec![
            FetchedDocument::failed("https://bad.example", "HTTP 500"),
            FetchedDocument::ok("https://empty.example", "E", "   "),
            FetchedDocument::ok("https://good.example", "G", "Useful text about rust."),
        ];
        let report = pipeline
            .ingest(&mut store, &LocalEmbedder::new(32), &docs)
            .await;
        assert_eq!(report.documents_skipped, 2);
        assert_eq!(report.documents_ingested, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(store.len(), 1);
        assert!(store.find_source("https://good.example").is_some());
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_others() {
        let pipeline = IngestionPipeline::new(&config(30, 12), "text-embedding-3-small");
        let text = (0..12)
            .map(|i| format!("paragraph number {i} here"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let docs = vec![FetchedDocument::ok("https://a.example", "A", text)];
        let embedder = FlakyEmbedder {
            inner: LocalEmbedder::new(16),
            calls: AtomicUsize::new(0),
        };
        let mut store = EvidenceStore::new();
        let report = pipeline.ingest(&mut store, &embedder, &docs).await;
        assert!(report.batches > 2);
        assert!(report.failed_batches > 0);
        assert_eq!(store.len(), report.inserted);
        assert!(report.inserted > 0 && report.inserted < report.chunks);
    }
}
