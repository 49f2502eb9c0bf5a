// src/vector/voyage.rs
// Voyage AI embeddings API client

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, ServerError};

/// HTTP timeout
const TIMEOUT_SECS: u64 = 30;

/// Retry attempts after the first try
const RETRY_ATTEMPTS: usize = 2;

/// API endpoint
const API_URL: &str = "https://api.voyageai.com/v1/embeddings";

/// Supported embedding models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub enum VoyageModel {
    #[serde(rename = "voyage-3-large")]
    Voyage3Large,
    #[serde(rename = "voyage-3.5")]
    Voyage35,
    #[serde(rename = "voyage-3.5-lite")]
    Voyage35Lite,
    #[serde(rename = "voyage-code-3")]
    VoyageCode3,
}

impl VoyageModel {
    /// Model name for API calls
    pub fn model_name(&self) -> &'static str {
        match self {
            Self::Voyage3Large => "voyage-3-large",
            Self::Voyage35 => "voyage-3.5",
            Self::Voyage35Lite => "voyage-3.5-lite",
            Self::VoyageCode3 => "voyage-code-3",
        }
    }
}

impl std::fmt::Display for VoyageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.model_name())
    }
}

/// Whether the text being embedded is stored content or a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Document,
    Query,
}

impl InputType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Query => "query",
        }
    }
}

/// Element type of the returned vectors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputDtype {
    #[default]
    Float,
    Int8,
    Uint8,
    Binary,
    Ubinary,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    embedding: Vec<f64>,
}

/// Voyage AI embeddings client.
pub struct VoyageClient {
    api_key: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl VoyageClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, API_URL.to_string())
    }

    /// Test hook: point the client at a mock server.
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key,
            base_url,
            http_client,
        }
    }

    /// Embed all `inputs` in a single batched call. The returned vectors are
    /// positionally aligned with the inputs.
    pub async fn generate_embeddings(
        &self,
        inputs: &[String],
        model: VoyageModel,
        output_dimension: u32,
        output_dtype: OutputDtype,
        input_type: InputType,
        cancellation: &CancellationToken,
    ) -> Result<Vec<Vec<f64>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "input": inputs,
            "model": model.model_name(),
            "input_type": input_type.as_str(),
            "output_dimension": output_dimension,
            "output_dtype": output_dtype,
        });

        let mut last_error = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            if cancellation.is_cancelled() {
                return Err(ServerError::Cancelled);
            }

            let request = self
                .http_client
                .post(&self.base_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send();

            let response = tokio::select! {
                _ = cancellation.cancelled() => return Err(ServerError::Cancelled),
                response = request => response,
            };

            match response {
                Ok(response) if response.status().is_success() => {
                    let parsed: EmbeddingsResponse = response
                        .json()
                        .await
                        .map_err(|e| ServerError::EmbeddingService(e.to_string()))?;
                    if parsed.data.len() != inputs.len() {
                        return Err(ServerError::EmbeddingService(format!(
                            "expected {} embeddings, got {}",
                            inputs.len(),
                            parsed.data.len()
                        )));
                    }
                    debug!(
                        count = inputs.len(),
                        model = %model,
                        "generated embeddings"
                    );
                    return Ok(parsed.data.into_iter().map(|e| e.embedding).collect());
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    last_error = Some(format!("API error {status}: {text}"));
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(ServerError::EmbeddingService(
            last_error.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_round_trip_through_serde() {
        let json = serde_json::to_string(&VoyageModel::Voyage35Lite).expect("serializes");
        assert_eq!(json, "\"voyage-3.5-lite\"");
        let parsed: VoyageModel = serde_json::from_str("\"voyage-code-3\"").expect("parses");
        assert_eq!(parsed, VoyageModel::VoyageCode3);
    }

    #[test]
    fn output_dtype_defaults_to_float() {
        assert_eq!(OutputDtype::default(), OutputDtype::Float);
        let json = serde_json::to_string(&OutputDtype::Ubinary).expect("serializes");
        assert_eq!(json, "\"ubinary\"");
    }

    #[tokio::test]
    async fn empty_input_skips_the_network() {
        let client = VoyageClient::new("pa-test".into());
        let vectors = client
            .generate_embeddings(
                &[],
                VoyageModel::Voyage35Lite,
                1024,
                OutputDtype::Float,
                InputType::Document,
                &CancellationToken::new(),
            )
            .await
            .expect("empty input is a no-op");
        assert!(vectors.is_empty());
    }
}
