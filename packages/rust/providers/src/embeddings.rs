//! Remote embedding provider (OpenAI-style `/embeddings` body).

use std::sync::OnceLock;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use carebot_shared::{CarebotError, EmbeddingsConfig, Result};

use crate::EmbeddingProvider;
use crate::http::{build_client, parse_endpoint, post_json};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding service reached over HTTP. The first response fixes the dimension.
#[derive(Debug)]
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: Url,
    model: String,
    dimension: OnceLock<usize>,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingsConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            endpoint: parse_endpoint(&config.endpoint)?,
            model: config.model.clone(),
            dimension: OnceLock::new(),
        })
    }

    fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<()> {
        for vector in vectors {
            if vector.is_empty() {
                return Err(CarebotError::parse("embedding provider returned an empty vector"));
            }
            let expected = *self.dimension.get_or_init(|| vector.len());
            if vector.len() != expected {
                return Err(CarebotError::validation(format!(
                    "embedding dimension changed: expected {expected}, got {}",
                    vector.len()
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    #[instrument(skip_all, fields(model = %self.model, inputs = texts.len()))]
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response: EmbeddingResponse = post_json(&self.client, &self.endpoint, &request).await?;

        if response.data.len() != texts.len() {
            return Err(CarebotError::parse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        let vectors: Vec<Vec<f32>> = response.data.into_iter().map(|d| d.embedding).collect();
        self.check_dimensions(&vectors)?;
        debug!(dimension = ?self.dimension.get(), "embeddings received");
        Ok(vectors)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }
}
