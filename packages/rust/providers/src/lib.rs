//! Capability providers consumed by the carebot core.
//!
//! The core only sees the traits defined here. Concrete implementations talk
//! to HTTP services ([`HttpIntentClassifier`], [`HttpEmbeddingProvider`],
//! [`ChatCompletionResponder`]) or hold data in memory ([`FlatIndex`]).
//! Every implementation is built once at startup and shared behind an `Arc`.

mod chat;
mod classifier;
mod embeddings;
mod http;
mod index;
mod stream;

use async_trait::async_trait;

use carebot_shared::{Answers, GenerationRequest, IntentPrediction, Result};

pub use chat::ChatCompletionResponder;
pub use classifier::HttpIntentClassifier;
pub use embeddings::HttpEmbeddingProvider;
pub use index::FlatIndex;
pub use stream::{DEFAULT_STREAM_CAPACITY, FragmentSender, FragmentStream};

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Maps one message to an intent label with a confidence.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn predict(&self, text: &str) -> Result<IntentPrediction>;
}

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Encode several texts in one call; one vector per input, same order.
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Encode a single text.
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.encode_batch(&[text]).await?;
        vectors.pop().ok_or_else(|| {
            carebot_shared::CarebotError::parse("embedding provider returned no vectors")
        })
    }

    /// Vector dimensionality, once known.
    fn dimension(&self) -> Option<usize>;
}

/// One search hit: the position of a chunk in the index and its similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    /// Higher is more similar.
    pub score: f32,
}

/// A chunk as stored in a vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub content: String,
    pub source_id: String,
}

/// Nearest-neighbour search over indexed chunks.
///
/// Results are ordered by decreasing score. The order of equal scores is up to
/// the implementation.
pub trait VectorIndex: Send + Sync {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// The chunk stored at `index`.
    fn chunk(&self, index: usize) -> Option<IndexedChunk>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A generative model backend.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Backend description for logs and health output.
    fn describe(&self) -> String;

    /// Generate a complete reply.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Generate a reply as a fragment stream.
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream>;
}

/// Turns completed questionnaire answers into a program text.
#[async_trait]
pub trait ProgramGenerator: Send + Sync {
    async fn generate_program(&self, answers: &Answers) -> Result<String>;
}
