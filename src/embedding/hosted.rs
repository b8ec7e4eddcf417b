use async_trait::async_trait;

use super::{
    build_client, check_vectors, post_embeddings, resolve_dims, ApiKey, EmbeddingProvider,
    RetryPolicy,
};
use crate::config::{EmbeddingConfig, ProviderKind};
use crate::error::EmbeddingError;

/// What a request embeds. Voyage produces asymmetric retrieval embeddings
/// from the distinction; OpenAI has no query mode and ignores it.
#[derive(Debug, Clone, Copy)]
enum InputType {
    Document,
    Query,
}

/// Embedding provider backed by a hosted `POST {base_url}/embeddings` API.
///
/// Both supported backends share the transport, retry policy, and response
/// shape; only the request body differs:
///
/// | Backend | Body |
/// |---------|------|
/// | Voyage  | `model`, `input`, `input_type` (`document` or `query`) |
/// | OpenAI  | `model`, `input` |
///
/// The API key is read from `embedding.api_key_env` (default
/// `VOYAGE_API_KEY` / `OPENAI_API_KEY`) when the provider is built and
/// reported missing on the first request.
pub struct HostedProvider {
    kind: ProviderKind,
    client: reqwest::Client,
    url: String,
    api_key: ApiKey,
    model: String,
    dims: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl HostedProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Ok(Self {
            kind: config.provider,
            client: build_client(config)?,
            url: format!("{}/embeddings", config.base_url()),
            api_key: ApiKey::from_env(config),
            model: config.model().to_string(),
            dims: resolve_dims(config)?,
            batch_size: config.batch_size().max(1),
            retry: RetryPolicy::from_config(config),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request_body(&self, texts: &[String], input_type: InputType) -> serde_json::Value {
        match self.kind {
            ProviderKind::Voyage => serde_json::json!({
                "model": self.model,
                "input": texts,
                "input_type": match input_type {
                    InputType::Document => "document",
                    InputType::Query => "query",
                },
            }),
            ProviderKind::OpenAI => serde_json::json!({
                "model": self.model,
                "input": texts,
            }),
        }
    }

    async fn request(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let provider = self.kind.as_str();
        let body = self.request_body(texts, input_type);

        let api_key = self.api_key.get()?;
        let vectors = self
            .retry
            .run(provider, || {
                post_embeddings(&self.client, provider, &self.url, api_key, &body)
            })
            .await?;

        check_vectors(provider, texts.len(), self.dims, &vectors)?;
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for HostedProvider {
    fn provider_name(&self) -> &str {
        self.kind.as_str()
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.request(batch, InputType::Document).await?);
        }
        Ok(out)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self
            .request(&[text.to_string()], InputType::Query)
            .await?;
        vectors.pop().ok_or_else(|| {
            EmbeddingError::malformed(self.kind.as_str(), "empty query embedding response")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(kind: ProviderKind) -> HostedProvider {
        let config = EmbeddingConfig {
            provider: kind,
            dims: Some(3),
            ..EmbeddingConfig::default()
        };
        HostedProvider::new(&config).unwrap()
    }

    #[test]
    fn test_voyage_body_carries_input_type() {
        let voyage = provider(ProviderKind::Voyage);
        let texts = vec!["a".to_string()];
        let body = voyage.request_body(&texts, InputType::Query);
        assert_eq!(body["model"], "voyage-2");
        assert_eq!(body["input"], serde_json::json!(["a"]));
        assert_eq!(body["input_type"], "query");
        assert_eq!(
            voyage.request_body(&texts, InputType::Document)["input_type"],
            "document"
        );
    }

    #[test]
    fn test_openai_body_has_no_input_type() {
        let openai = provider(ProviderKind::OpenAI);
        let body = openai.request_body(&["a".to_string()], InputType::Query);
        assert_eq!(body["model"], "text-embedding-3-small");
        assert!(body.get("input_type").is_none());
        assert_eq!(openai.provider_name(), "openai");
    }
}
