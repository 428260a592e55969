//! The knowledge base: one handle over the whole retrieval pipeline.
//!
//! [`KnowledgeBase`] wires the uploads directory, the vector index store,
//! the embedder and the generator together from a [`Config`] and exposes
//! the query API:
//!
//! | Operation | Does |
//! |-----------|------|
//! | [`index_document`](KnowledgeBase::index_document) | record a document in uploads, index it |
//! | [`add_upload`](KnowledgeBase::add_upload) | copy a file into uploads, then index it |
//! | [`rebuild_index`](KnowledgeBase::rebuild_index) | re-index every upload from scratch |
//! | [`retrieve`](KnowledgeBase::retrieve) | nearest chunks for a query |
//! | [`answer`](KnowledgeBase::answer) | retrieve, then generate a grounded reply |
//!
//! The handle is `Send + Sync`; share it behind an `Arc` to index and answer
//! from several tasks at once.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use knowledge_rag::config::load_config;
//! use knowledge_rag::knowledge::KnowledgeBase;
//!
//! let config = load_config("./config/krag.toml".as_ref())?;
//! let kb = KnowledgeBase::open(&config)?;
//! println!("{}", kb.answer("How do I rotate the API token?").await?);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::answer::{Answer, AnswerComposer};
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{AnswerError, IndexError, IndexingError};
use crate::generation::{create_generator, Generator};
use crate::ingest::{IndexingPipeline, RebuildReport};
use crate::models::{Document, IndexReport, RetrievedChunk};
use crate::retrieval::RetrievalService;
use crate::sources::{NewUpload, UploadsDir};
use crate::store::{IndexStats, VectorIndexStore};

pub struct KnowledgeBase {
    uploads: UploadsDir,
    pipeline: IndexingPipeline,
    retrieval: RetrievalService,
    composer: AnswerComposer,
}

impl KnowledgeBase {
    /// Open the knowledge base with the providers named in `config`.
    ///
    /// Fails if the persisted index is corrupt; see [`open_for_rebuild`](Self::open_for_rebuild).
    pub fn open(config: &Config) -> Result<Self> {
        let store = VectorIndexStore::load(&config.index.dir).with_context(|| {
            "Failed to load the vector index (run `krag rebuild` to recreate it)"
        })?;
        Self::with_configured_providers(config, store)
    }

    /// Like [`open`](Self::open), but a corrupt index is replaced by an empty one.
    pub fn open_for_rebuild(config: &Config) -> Result<Self> {
        let store = match VectorIndexStore::load(&config.index.dir) {
            Ok(store) => store,
            Err(e @ IndexError::Corrupt { .. }) => {
                warn!(error = %e, "discarding corrupt index");
                VectorIndexStore::empty(&config.index.dir)
            }
            Err(e) => return Err(e).context("Failed to load the vector index"),
        };
        Self::with_configured_providers(config, store)
    }

    fn with_configured_providers(config: &Config, store: VectorIndexStore) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::assemble(config, store, embedder, generator)
    }

    /// Open with caller-supplied providers instead of the configured ones.
    pub fn with_providers(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let store = VectorIndexStore::load(&config.index.dir)
            .with_context(|| "Failed to load the vector index")?;
        Self::assemble(config, store, embedder, generator)
    }

    fn assemble(
        config: &Config,
        store: VectorIndexStore,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(store);
        Ok(Self {
            uploads: UploadsDir::new(&config.documents)?,
            pipeline: IndexingPipeline::new(config, Arc::clone(&store), Arc::clone(&embedder)),
            retrieval: RetrievalService::new(store, embedder, config.retrieval.top_k),
            composer: AnswerComposer::new(&config.generation, generator),
        })
    }

    pub fn uploads(&self) -> &UploadsDir {
        &self.uploads
    }

    pub fn stats(&self) -> IndexStats {
        self.pipeline.store().stats()
    }

    /// Record `doc` in the uploads directory and index it.
    ///
    /// The recorded copy is what [`rebuild_index`](Self::rebuild_index)
    /// re-indexes later, so a rebuild reproduces the same chunks.
    pub async fn index_document(&self, doc: &Document) -> Result<IndexReport, IndexingError> {
        self.uploads
            .record_document(doc)
            .map_err(|e| IndexingError::Record {
                document_id: doc.id.clone(),
                reason: format!("{:#}", e),
            })?;

        let result = self.pipeline.index_document(doc).await;
        self.record_status(&doc.id, result.is_ok());
        result
    }

    fn record_status(&self, id: &str, indexed: bool) {
        let status = if indexed { "indexed" } else { "error" };
        if let Err(e) = self.uploads.set_status(id, status) {
            warn!(id = %id, error = %format!("{:#}", e), "could not record upload status");
        }
    }

    /// Register `path` in the uploads directory and index it.
    ///
    /// The sidecar's status becomes `indexed` or `error`. A registered upload
    /// stays in the directory even when indexing fails, so a later rebuild
    /// can pick it up.
    pub async fn add_upload(&self, path: &Path, upload: NewUpload) -> Result<IndexReport> {
        let (sidecar, doc) = self.uploads.register_upload(path, upload)?;

        let skip = self.pipeline.screen(&doc);
        let result = match skip {
            Some(reason) => Err(anyhow::anyhow!("Upload not indexed: {}", reason)),
            None => self.pipeline.index_document(&doc).await.map_err(anyhow::Error::from),
        };

        self.record_status(&sidecar.id, result.is_ok());
        result
    }

    /// Discard the index and re-index every document in the uploads directory.
    pub async fn rebuild_index(&self) -> Result<RebuildReport> {
        let documents = self.uploads.load_documents()?;
        let report = self.pipeline.rebuild_index(documents).await?;
        Ok(report)
    }

    pub async fn retrieve(&self, query: &str, k: Option<usize>) -> Vec<RetrievedChunk> {
        self.retrieval.retrieve(query, k).await
    }

    /// Retrieve context for `query` and compose an answer with its sources.
    pub async fn ask(&self, query: &str, k: Option<usize>) -> Result<Answer, AnswerError> {
        let chunks = self.retrieval.retrieve(query, k).await;
        self.composer.compose(query, chunks).await
    }

    /// Answer `query` from the top `top_k` chunks.
    pub async fn answer(&self, query: &str) -> Result<String, AnswerError> {
        Ok(self.ask(query, None).await?.text)
    }
}
