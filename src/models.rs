//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the documents, indexed chunks, and retrieval
//! results that flow between the pipeline stages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A submitted document, as supplied by the uploads directory or a caller.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: String,
    /// Plain text, or an extraction-error marker produced upstream.
    pub text: String,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: text.into(),
            author: None,
            tags: Vec::new(),
            category: None,
            created_at: Utc::now(),
        }
    }

    /// SHA-256 of the document text, used to detect duplicate indexing.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Metadata persisted for one row of the vector index.
///
/// Stored in the ordered list beside the vectors: row *i* of the index
/// belongs to entry *i* of the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub title: String,
    pub chunk_index: usize,
    /// Character offset of the chunk within the trimmed document text.
    pub start: usize,
    pub text: String,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// A chunk returned by the retrieval service, closest first.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub metadata: ChunkMetadata,
    /// Euclidean distance to the query vector (smaller is closer).
    pub distance: f32,
}

/// Outcome of indexing a single document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub document_id: String,
    pub title: String,
    pub chunks_total: usize,
    pub chunks_indexed: usize,
    /// Chunk indices whose embedding failed and were left out.
    pub failed_chunks: Vec<usize>,
    /// True when the duplicate policy skipped the document.
    pub already_indexed: bool,
}

impl IndexReport {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}

impl fmt::Display for IndexReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.already_indexed {
            return write!(f, "already indexed");
        }
        write!(
            f,
            "{} of {} chunks indexed",
            self.chunks_indexed, self.chunks_total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display() {
        let report = IndexReport {
            document_id: "d1".into(),
            title: "Guide".into(),
            chunks_total: 5,
            chunks_indexed: 3,
            failed_chunks: vec![1, 4],
            already_indexed: false,
        };
        assert_eq!(report.to_string(), "3 of 5 chunks indexed");
        assert!(!report.is_complete());
    }

    #[test]
    fn test_content_hash_stable() {
        let a = Document::new("1", "A", "same text");
        let b = Document::new("2", "B", "same text");
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_metadata_omits_empty_optionals() {
        let meta = ChunkMetadata {
            document_id: "d".into(),
            title: "t".into(),
            chunk_index: 0,
            start: 0,
            text: "x".into(),
            content_hash: "h".into(),
            author: None,
            tags: Vec::new(),
            category: None,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("author"));
        assert!(!json.contains("tags"));
        let back: ChunkMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
