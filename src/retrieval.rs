//! Query-time retrieval: embed the query, then ask the store for neighbours.
//!
//! Retrieval never fails outward. A blank query, an unreachable embedding
//! service, or a query vector the store rejects all mean "no context", which
//! the answer composer turns into its fallback reply. Each of these is
//! logged so an empty result can still be diagnosed.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::embedding::{EmbedMode, Embedder};
use crate::models::RetrievedChunk;
use crate::store::VectorIndexStore;

pub struct RetrievalService {
    store: Arc<VectorIndexStore>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl RetrievalService {
    pub fn new(store: Arc<VectorIndexStore>, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            store,
            embedder,
            top_k,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// The `k` (default `top_k`) chunks closest to `query`, closest first.
    pub async fn retrieve(&self, query: &str, k: Option<usize>) -> Vec<RetrievedChunk> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let k = k.unwrap_or(self.top_k);

        let vector = match self.embedder.embed(query, EmbedMode::Query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed, answering without context");
                return Vec::new();
            }
        };

        let store = Arc::clone(&self.store);
        let hits = match tokio::task::spawn_blocking(move || store.search(&vector, k)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!(error = %e, "index search failed, answering without context");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "index search worker stopped");
                return Vec::new();
            }
        };

        debug!(k, hits = hits.len(), "retrieved chunks");
        hits
    }
}
