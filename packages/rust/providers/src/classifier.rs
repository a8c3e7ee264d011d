//! Remote intent classifier.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use carebot_shared::{CarebotError, ClassifierConfig, IntentPrediction, Result};

use crate::IntentClassifier;
use crate::http::{build_client, parse_endpoint, post_json};

#[derive(Serialize)]
struct PredictRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    label: String,
    confidence: f64,
}

/// Classifier served over HTTP: `POST {"text"}` answers `{"label", "confidence"}`.
#[derive(Debug, Clone)]
pub struct HttpIntentClassifier {
    client: Client,
    endpoint: Url,
}

impl HttpIntentClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            endpoint: parse_endpoint(&config.endpoint)?,
        })
    }
}

#[async_trait]
impl IntentClassifier for HttpIntentClassifier {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn predict(&self, text: &str) -> Result<IntentPrediction> {
        let response: PredictResponse =
            post_json(&self.client, &self.endpoint, &PredictRequest { text }).await?;

        if !response.confidence.is_finite() || !(0.0..=1.0).contains(&response.confidence) {
            return Err(CarebotError::parse(format!(
                "classifier confidence out of range: {}",
                response.confidence
            )));
        }

        debug!(label = %response.label, confidence = response.confidence, "intent predicted");
        Ok(IntentPrediction::new(response.label, response.confidence))
    }
}
