//! Chunk retrieval for chat grounding.
//!
//! Primary path is the backend's `match_documents` RPC. When that fails
//! (RPC missing, backend down) the fallback fetches a bounded set of
//! stored chunks and scores them locally with cosine similarity. Both
//! paths degrade to an empty result rather than erroring; an empty
//! result means an ungrounded answer, not a failed request.

use std::sync::Arc;

use crate::backend::BackendService;
use crate::config::RetrievalConfig;
use crate::embedding::cosine_similarity;
use crate::models::{Embedding, RetrievedChunk};

/// Row cap for the manual fallback scan. A behavior contract, not a
/// tuning knob: raising it changes which chunks ground an answer.
pub const MANUAL_SCAN_LIMIT: usize = 20;

/// Retrieve the best-matching chunks for `query`, best first, at most
/// `cfg.match_count`. Never errors; degradations are logged.
pub async fn retrieve(
    backend: &Arc<dyn BackendService>,
    user_id: &str,
    query: &Embedding,
    cfg: &RetrievalConfig,
) -> Vec<RetrievedChunk> {
    match backend
        .similarity_search(user_id, &query.values, cfg.match_threshold, cfg.match_count)
        .await
    {
        Ok(chunks) => chunks,
        Err(err) => {
            tracing::warn!(error = %err, "similarity rpc failed, falling back to manual scan");
            manual_scan(backend, user_id, query, cfg.match_count).await
        }
    }
}

/// Fetch up to [`MANUAL_SCAN_LIMIT`] stored chunks and rank them locally.
/// Chunks without an embedding, or whose embedding length differs from
/// the query's, score 0.
async fn manual_scan(
    backend: &Arc<dyn BackendService>,
    user_id: &str,
    query: &Embedding,
    limit: usize,
) -> Vec<RetrievedChunk> {
    let stored = match backend.list_chunks(user_id, MANUAL_SCAN_LIMIT).await {
        Ok(stored) => stored,
        Err(err) => {
            tracing::warn!(error = %err, "manual scan could not list chunks");
            return Vec::new();
        }
    };

    let mut scored: Vec<RetrievedChunk> = stored
        .into_iter()
        .map(|chunk| {
            let similarity = chunk
                .embedding
                .as_deref()
                .map(|stored_vec| cosine_similarity(stored_vec, &query.values))
                .unwrap_or(0.0);
            RetrievedChunk {
                content: chunk.content,
                similarity,
                source_document_name: chunk.document_name,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

/// Join chunk contents into the prompt context block.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Source document names, deduplicated, first-seen order preserved.
pub fn source_names(chunks: &[RetrievedChunk]) -> Vec<String> {
    let mut names = Vec::new();
    for chunk in chunks {
        if !names.contains(&chunk.source_document_name) {
            names.push(chunk.source_document_name.clone());
        }
    }
    names
}
