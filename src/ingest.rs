//! Indexing pipeline orchestration.
//!
//! Turns a [`Document`] into rows of the vector index:
//!
//! ```text
//! received ─▶ chunked ─▶ embedding ─▶ appended ─▶ done
//!                            │            │
//!                            ▼            ▼
//!                         failed       failed
//!                   (no usable chunk) (persist error)
//! ```
//!
//! Chunks whose embedding fails are logged and left out; the rest of the
//! document is appended in **one** store call, so a document is either
//! absent from the index or present with every chunk that could be
//! embedded. A document with no embeddable chunk mutates nothing.
//!
//! [`rebuild_index`](IndexingPipeline::rebuild_index) empties the store and
//! re-runs the per-document path over every known document, skipping blank
//! and too-short text and extraction-error placeholders.

use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::chunk::chunk_text;
use crate::config::{Config, DuplicatePolicy};
use crate::embedding::{EmbedMode, Embedder};
use crate::error::{EmbeddingError, IndexError, IndexingError};
use crate::models::{ChunkMetadata, Document, IndexReport};
use crate::store::VectorIndexStore;

/// Why a rebuild left a document out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    TooShort { chars: usize, min: usize },
    ExtractionError(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Empty => write!(f, "empty content"),
            SkipReason::TooShort { chars, min } => {
                write!(f, "content too short ({} < {} chars)", chars, min)
            }
            SkipReason::ExtractionError(marker) => write!(f, "extraction error: {}", marker),
        }
    }
}

/// Per-document result of a rebuild.
#[derive(Debug)]
pub enum DocumentOutcome {
    Indexed(IndexReport),
    Skipped {
        document_id: String,
        title: String,
        reason: SkipReason,
    },
    Failed {
        document_id: String,
        title: String,
        error: IndexingError,
    },
}

#[derive(Debug, Default)]
pub struct RebuildReport {
    pub outcomes: Vec<DocumentOutcome>,
}

impl RebuildReport {
    pub fn indexed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, DocumentOutcome::Indexed(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, DocumentOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, DocumentOutcome::Failed { .. }))
            .count()
    }

    pub fn chunks_indexed(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                DocumentOutcome::Indexed(r) => r.chunks_indexed,
                _ => 0,
            })
            .sum()
    }
}

impl fmt::Display for RebuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} indexed, {} skipped, {} failed ({} chunks)",
            self.indexed(),
            self.skipped(),
            self.failed(),
            self.chunks_indexed()
        )
    }
}

pub struct IndexingPipeline {
    store: Arc<VectorIndexStore>,
    embedder: Arc<dyn Embedder>,
    chunk_size: usize,
    overlap: usize,
    concurrency: usize,
    on_duplicate: DuplicatePolicy,
    error_markers: Vec<String>,
    min_content_chars: usize,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl IndexingPipeline {
    pub fn new(config: &Config, store: Arc<VectorIndexStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            concurrency: config.embedding.concurrency.max(1),
            on_duplicate: config.indexing.on_duplicate,
            error_markers: config.documents.extraction_error_markers.clone(),
            min_content_chars: config.documents.min_content_chars,
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<VectorIndexStore> {
        &self.store
    }

    /// Chunk, embed and append one document.
    ///
    /// # Errors
    ///
    /// - [`IndexingError::EmptyDocument`] when chunking yields nothing
    /// - [`IndexingError::Failed`] when no chunk could be embedded
    /// - [`IndexingError::Index`] when the append is rejected or not persisted
    pub async fn index_document(&self, doc: &Document) -> Result<IndexReport, IndexingError> {
        let chunks = chunk_text(&doc.text, self.chunk_size, self.overlap)?;
        if chunks.is_empty() {
            return Err(IndexingError::EmptyDocument(doc.id.clone()));
        }
        let content_hash = doc.content_hash();

        let skip_duplicates = self.on_duplicate == DuplicatePolicy::Skip;
        let already_indexed = || {
            info!(document = %doc.id, "document already indexed, skipping");
            IndexReport {
                document_id: doc.id.clone(),
                title: doc.title.clone(),
                chunks_total: chunks.len(),
                chunks_indexed: 0,
                failed_chunks: Vec::new(),
                already_indexed: true,
            }
        };
        if skip_duplicates && self.store.contains_document(&doc.id, &content_hash) {
            return Ok(already_indexed());
        }

        // Futures own their inputs; `buffered` keeps results in chunk order.
        let embeds: Vec<_> = chunks
            .iter()
            .map(|chunk| {
                let embedder = Arc::clone(&self.embedder);
                let text = chunk.text.clone();
                async move { embedder.embed(&text, EmbedMode::Document).await }
            })
            .collect();
        let results: Vec<Result<Vec<f32>, EmbeddingError>> = stream::iter(embeds)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut vectors = Vec::with_capacity(chunks.len());
        let mut metadata = Vec::with_capacity(chunks.len());
        let mut failed_chunks = Vec::new();

        for (chunk, result) in chunks.iter().zip(results) {
            match result {
                Ok(vector) => {
                    vectors.push(vector);
                    metadata.push(ChunkMetadata {
                        document_id: doc.id.clone(),
                        title: doc.title.clone(),
                        chunk_index: chunk.index,
                        start: chunk.start,
                        text: chunk.text.clone(),
                        content_hash: content_hash.clone(),
                        author: doc.author.clone(),
                        tags: doc.tags.clone(),
                        category: doc.category.clone(),
                    });
                }
                Err(e) => {
                    warn!(
                        document = %doc.id,
                        chunk = chunk.index,
                        error = %e,
                        "chunk embedding failed, leaving it out"
                    );
                    failed_chunks.push(chunk.index);
                }
            }
        }

        if vectors.is_empty() {
            return Err(IndexingError::Failed {
                document_id: doc.id.clone(),
                attempted: chunks.len(),
            });
        }

        let chunks_indexed = vectors.len();
        let store = Arc::clone(&self.store);
        let (document_id, hash) = (doc.id.clone(), content_hash.clone());
        let appended = tokio::task::spawn_blocking(move || {
            if skip_duplicates {
                store.append_if_absent(vectors, metadata, &document_id, &hash)
            } else {
                store.append(vectors, metadata).map(Some)
            }
        })
        .await
        .map_err(|e| IndexError::Worker(e.to_string()))??;
        if appended.is_none() {
            return Ok(already_indexed());
        }

        let report = IndexReport {
            document_id: doc.id.clone(),
            title: doc.title.clone(),
            chunks_total: chunks.len(),
            chunks_indexed,
            failed_chunks,
            already_indexed: false,
        };
        info!(document = %doc.id, title = %doc.title, "{}", report);
        Ok(report)
    }

    /// Why `doc` should not be indexed by a rebuild, if at all.
    pub fn screen(&self, doc: &Document) -> Option<SkipReason> {
        let trimmed = doc.text.trim();
        if trimmed.is_empty() {
            return Some(SkipReason::Empty);
        }
        if let Some(marker) = self
            .error_markers
            .iter()
            .find(|m| !m.is_empty() && trimmed.starts_with(m.as_str()))
        {
            return Some(SkipReason::ExtractionError(marker.clone()));
        }
        let chars = trimmed.chars().count();
        if chars < self.min_content_chars {
            return Some(SkipReason::TooShort {
                chars,
                min: self.min_content_chars,
            });
        }
        None
    }

    /// Discard the index and re-index `documents` in order.
    ///
    /// Only one rebuild runs at a time; a second caller waits for the first.
    /// Per-document failures are reported, not propagated.
    ///
    /// # Errors
    ///
    /// [`IndexError`] when the store cannot be reset.
    pub async fn rebuild_index(
        &self,
        documents: Vec<Document>,
    ) -> Result<RebuildReport, IndexError> {
        let _rebuild = self.rebuild_lock.lock().await;

        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.reset())
            .await
            .map_err(|e| IndexError::Worker(e.to_string()))??;
        info!(documents = documents.len(), "index reset, rebuilding");

        let mut report = RebuildReport::default();
        for doc in documents {
            if let Some(reason) = self.screen(&doc) {
                info!(document = %doc.id, %reason, "skipping document");
                report.outcomes.push(DocumentOutcome::Skipped {
                    document_id: doc.id,
                    title: doc.title,
                    reason,
                });
                continue;
            }

            match self.index_document(&doc).await {
                Ok(r) => report.outcomes.push(DocumentOutcome::Indexed(r)),
                Err(error) => {
                    warn!(document = %doc.id, error = %error, "document failed to index");
                    report.outcomes.push(DocumentOutcome::Failed {
                        document_id: doc.id,
                        title: doc.title,
                        error,
                    });
                }
            }
        }

        info!("rebuild finished: {}", report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Embeds to `[len, first byte]`, failing texts that contain `FAIL`.
    struct ToyEmbedder;

    #[async_trait]
    impl Embedder for ToyEmbedder {
        fn model_name(&self) -> &str {
            "toy"
        }

        async fn embed(&self, text: &str, _mode: EmbedMode) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("FAIL") {
                return Err(EmbeddingError::MalformedResponse("toy failure".into()));
            }
            Ok(vec![text.len() as f32, text.as_bytes()[0] as f32])
        }
    }

    fn pipeline(tmp: &TempDir, tweak: impl FnOnce(&mut Config)) -> IndexingPipeline {
        let mut config = Config::minimal(tmp.path());
        config.chunking.chunk_size = 10;
        config.chunking.overlap = 0;
        tweak(&mut config);
        let store = Arc::new(VectorIndexStore::load(&config.index.dir).unwrap());
        IndexingPipeline::new(&config, store, Arc::new(ToyEmbedder))
    }

    #[tokio::test]
    async fn test_partial_failure_appends_successes_in_order() {
        let tmp = TempDir::new().unwrap();
        let p = pipeline(&tmp, |_| {});
        // Five 10-char chunks; the 2nd and 4th fail.
        let text = "aaaaaaaaaaFAILbbbbbbccccccccccFAILddddddeeeeeeeeee";
        let report = p
            .index_document(&Document::new("d1", "Doc", text))
            .await
            .unwrap();
        assert_eq!(report.chunks_total, 5);
        assert_eq!(report.chunks_indexed, 3);
        assert_eq!(report.failed_chunks, vec![1, 3]);
        assert_eq!(report.to_string(), "3 of 5 chunks indexed");
        assert_eq!(p.store().len(), 3);
    }

    #[tokio::test]
    async fn test_all_failed_mutates_nothing() {
        let tmp = TempDir::new().unwrap();
        let p = pipeline(&tmp, |_| {});
        let err = p
            .index_document(&Document::new("d1", "Doc", "FAIL FAIL"))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexingError::Failed { attempted: 1, .. }));
        assert!(p.store().is_empty());
    }

    #[tokio::test]
    async fn test_empty_document() {
        let tmp = TempDir::new().unwrap();
        let p = pipeline(&tmp, |_| {});
        assert!(matches!(
            p.index_document(&Document::new("d1", "Doc", "   ")).await,
            Err(IndexingError::EmptyDocument(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_policies() {
        let tmp = TempDir::new().unwrap();
        let doc = Document::new("d1", "Doc", "hello world, again");

        let append = pipeline(&tmp, |_| {});
        append.index_document(&doc).await.unwrap();
        append.index_document(&doc).await.unwrap();
        assert_eq!(append.store().len(), 4);

        let tmp2 = TempDir::new().unwrap();
        let skip = pipeline(&tmp2, |c| c.indexing.on_duplicate = DuplicatePolicy::Skip);
        skip.index_document(&doc).await.unwrap();
        let second = skip.index_document(&doc).await.unwrap();
        assert!(second.already_indexed);
        assert_eq!(skip.store().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_duplicates_append_once() {
        let tmp = TempDir::new().unwrap();
        let p = Arc::new(pipeline(&tmp, |c| {
            c.indexing.on_duplicate = DuplicatePolicy::Skip
        }));
        let doc = Document::new("d1", "Doc", "hello world, again");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (p, doc) = (Arc::clone(&p), doc.clone());
                tokio::spawn(async move { p.index_document(&doc).await })
            })
            .collect();
        let mut fresh = 0;
        for h in handles {
            if !h.await.unwrap().unwrap().already_indexed {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
        assert_eq!(p.store().len(), 2);
    }

    #[tokio::test]
    async fn test_rebuild_screens_documents() {
        let tmp = TempDir::new().unwrap();
        let p = pipeline(&tmp, |_| {});
        p.index_document(&Document::new("old", "Old", "stale content here"))
            .await
            .unwrap();

        let docs = vec![
            Document::new("a", "A", "A perfectly fine document."),
            Document::new("b", "B", "short"),
            Document::new("c", "C", "Error reading PDF: broken xref table"),
            Document::new("d", "D", ""),
            Document::new("e", "E", "FAIL FAIL."),
        ];
        let report = p.rebuild_index(docs).await.unwrap();
        assert_eq!(report.indexed(), 1);
        assert_eq!(report.skipped(), 3);
        assert_eq!(report.failed(), 1);
        let stats = p.store().stats();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.rows, 3);
        match &report.outcomes[2] {
            DocumentOutcome::Skipped { reason, .. } => {
                assert_eq!(
                    reason,
                    &SkipReason::ExtractionError("Error reading PDF".into())
                )
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
