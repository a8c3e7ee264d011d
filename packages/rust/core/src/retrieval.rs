//! Retrieval context builder: query → nearest chunks → prompt context.

use std::sync::Arc;

use tracing::{debug, instrument};

use carebot_providers::{EmbeddingProvider, VectorIndex};
use carebot_shared::{CarebotError, Result, RetrievalConfig, RetrievedChunk};

/// Ranked chunks and the context text assembled from them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedContext {
    /// In the order the index returned them (decreasing similarity).
    pub chunks: Vec<RetrievedChunk>,
    pub text: String,
}

/// Embeds a query once and assembles context from the vector index.
///
/// The order of equal-score hits is whatever the index returns.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    /// Retrieve with the configured `top_k`.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievedContext> {
        self.build_context(query, self.config.top_k).await
    }

    /// Fetch up to `k` chunks for `query` and format them as prompt context.
    ///
    /// Every failure (embedding, search, missing chunk, no hits) is a
    /// `RetrievalFailure`; an empty context is never returned.
    #[instrument(skip_all, fields(k = k, query_chars = query.len()))]
    pub async fn build_context(&self, query: &str, k: usize) -> Result<RetrievedContext> {
        let vector = self
            .embedder
            .encode(query)
            .await
            .map_err(|e| CarebotError::RetrievalFailure(format!("embedding failed: {e}")))?;

        let neighbors = self
            .index
            .search(&vector, k)
            .map_err(|e| CarebotError::RetrievalFailure(format!("index search failed: {e}")))?;

        if neighbors.is_empty() {
            return Err(CarebotError::RetrievalFailure(format!(
                "no chunks matched (index holds {})",
                self.index.len()
            )));
        }

        let chunks = neighbors
            .iter()
            .map(|n| {
                let chunk = self.index.chunk(n.index).ok_or_else(|| {
                    CarebotError::RetrievalFailure(format!("index returned unknown chunk {}", n.index))
                })?;
                Ok(RetrievedChunk {
                    content: chunk.content,
                    source_id: chunk.source_id,
                    similarity: n.score,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut text = format_context(&chunks);
        if let Some(max) = self.config.max_context_chars {
            text = truncate_context(&text, max);
        }

        debug!(
            chunks = chunks.len(),
            context_chars = text.len(),
            "context assembled"
        );
        Ok(RetrievedContext { chunks, text })
    }
}

/// `Source i (File: <source>):` followed by the content, one block per chunk,
/// separated by blank lines, in the given order.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    let mut parts = Vec::with_capacity(chunks.len() * 3);
    for (i, chunk) in chunks.iter().enumerate() {
        parts.push(format!("Source {} (File: {}):", i + 1, chunk.source_id));
        parts.push(chunk.content.clone());
        parts.push(String::new());
    }
    parts.join("\n")
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_context(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => text[..byte].to_string(),
        None => text.to_string(),
    }
}
