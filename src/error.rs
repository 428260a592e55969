//! Typed failures for the retrieval pipeline.
//!
//! Each stage reports its own error type so callers can tell "no results"
//! apart from "service unreachable" or "index damaged":
//!
//! | Type | Raised by | Policy |
//! |------|-----------|--------|
//! | [`ChunkingError`] | [`chunk`](crate::chunk) | fatal, rejects the call |
//! | [`EmbeddingError`] | [`embedding`](crate::embedding) | per chunk, skipped and logged |
//! | [`IndexError`] | [`store`](crate::store) | propagated; `Corrupt` needs a rebuild |
//! | [`IndexingError`] | [`ingest`](crate::ingest) | per document, reported to caller |
//! | [`AnswerError`] | [`answer`](crate::answer) | surfaced, never retried here |
//!
//! Application layers (config, CLI, uploads directory) stay on `anyhow`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Malformed chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    #[error("chunk size must be > 0")]
    ZeroChunkSize,

    #[error("overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

/// A single embedding call that produced no vector.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{provider} rate limited the request: {body}")]
    RateLimited { provider: String, body: String },

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} connection error: {message}")]
    Network { provider: String, message: String },

    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),
}

/// Failures of the vector index store.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("corrupt index at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("vector dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("append received {vectors} vectors but {metadata} metadata records")]
    LengthMismatch { vectors: usize, metadata: usize },

    #[error("append requires at least one vector")]
    EmptyBatch,

    #[error("index I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("index metadata could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("index worker stopped before finishing: {0}")]
    Worker(String),
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IndexError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Document-level indexing outcome that mutated nothing.
#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("indexing failed for '{document_id}': none of {attempted} chunks could be embedded")]
    Failed {
        document_id: String,
        attempted: usize,
    },

    #[error("document '{0}' has no indexable text")]
    EmptyDocument(String),

    #[error("could not record document '{document_id}' in uploads: {reason}")]
    Record { document_id: String, reason: String },

    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// The generation capability did not return an answer.
#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("answer generation failed: {0}")]
    GenerationFailed(String),
}
