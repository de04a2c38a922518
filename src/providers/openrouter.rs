//! OpenRouter embeddings adapter (`POST {endpoint}/embeddings`)

use super::{Embedder, ProviderError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenRouterEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenRouterEmbedder {
    pub fn new(endpoint: &str, api_key: String, model: &str, dimension: usize) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/embeddings", endpoint.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for OpenRouterEmbedder {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!("embeddings endpoint returned {}", status)));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::InvalidResponse("no embedding returned".to_string()))?;

        if vector.len() != self.dimension {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} dimensions, got {}",
                self.dimension,
                vector.len()
            )));
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_is_joined_once() {
        let embedder =
            OpenRouterEmbedder::new("https://openrouter.ai/api/v1/", "key".to_string(), "model", 384).unwrap();
        assert_eq!(embedder.url, "https://openrouter.ai/api/v1/embeddings");
        assert_eq!(embedder.dimension(), 384);
    }

    #[tokio::test]
    #[ignore] // requires network and OPENROUTER_API_KEY
    async fn test_live_embedding() {
        let key = std::env::var("OPENROUTER_API_KEY").unwrap();
        let embedder = OpenRouterEmbedder::new(
            "https://openrouter.ai/api/v1",
            key,
            "openai/text-embedding-3-small",
            1536,
        )
        .unwrap();
        let vector = embedder.embed("sanctions").await.unwrap();
        assert_eq!(vector.len(), 1536);
    }
}
