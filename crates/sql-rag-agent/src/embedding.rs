// sql-rag-agent/crates/sql-rag-agent/src/embedding.rs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use anyhow::Context;
use tracing::debug;

use crate::config::Config;

/// Text in, fixed-length vector out. Used identically at build and query time.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier stamped onto a persisted index; a mismatch forces a rebuild.
    fn model_name(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Embedding backend returned no vector"))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    base_url: String,
    api_key: Option<String>,
    api_version: Option<String>,
    model: String,
    http_client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            api_version: None,
            model: model.into(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.llm_timeout())
            .build()
            .context("Failed to build embedding HTTP client")?;
        Ok(Self {
            base_url: config.embedding_base_url.clone(),
            api_key: config.embedding_api_key.clone(),
            api_version: config.embedding_api_version.clone(),
            model: config.embedding_model.clone(),
            http_client,
        })
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Azure deployments are addressed by path and versioned by query string.
    fn embeddings_url(&self) -> String {
        match &self.api_version {
            Some(_) => format!("{}/openai/deployments/{}/embeddings", self.base_url, self.model),
            None => format!("{}/embeddings", self.base_url),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Requesting {} embeddings from {}", texts.len(), self.base_url);

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut builder = self.http_client.post(self.embeddings_url()).json(&request);
        builder = match (&self.api_version, &self.api_key) {
            (Some(version), key) => {
                let builder = builder.query(&[("api-version", version.as_str())]);
                match key {
                    Some(key) => builder.header("api-key", key),
                    None => builder,
                }
            }
            (None, Some(key)) => builder.bearer_auth(key),
            (None, None) => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Embedding request failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Embedding backend returned {}: {}", status, body));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse embedding response: {}", e))?;
        if parsed.data.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Embedding backend returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            ));
        }
        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
