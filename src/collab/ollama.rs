//! Ollama-backed artifact generator.
//!
//! Captions go through `/api/generate` with the content attached as a
//! base64 image; embeddings through `/api/embed`. Embeddings are
//! L2-normalized here, before storage.

use super::{ArtifactGenerator, l2_normalize};
use crate::error::{Error, Result};
use crate::model::{Generated, GeneratedPayload, RequestKind};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use tracing::debug;

const CAPTION_PROMPT: &str = "Describe this image in one concise sentence.";

pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    default_caption_model: String,
    default_embedding_model: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaGenerator {
    pub fn new(
        base_url: impl Into<String>,
        default_caption_model: impl Into<String>,
        default_embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            default_caption_model: default_caption_model.into(),
            default_embedding_model: default_embedding_model.into(),
        }
    }

    fn resolve_model<'a>(&'a self, kind: RequestKind, hint: &'a str) -> &'a str {
        if !hint.is_empty() {
            return hint;
        }
        match kind {
            RequestKind::Caption => &self.default_caption_model,
            RequestKind::Embedding => &self.default_embedding_model,
        }
    }

    async fn caption(&self, bytes: &[u8], model: &str) -> Result<String> {
        let image = base64::engine::general_purpose::STANDARD.encode(bytes);
        let body = serde_json::json!({
            "model": model,
            "prompt": CAPTION_PROMPT,
            "images": [image],
            "stream": false,
        });

        let start = std::time::Instant::now();
        let resp: GenerateResponse = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Generation(format!("ollama generate: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Generation(format!("ollama generate: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Generation(format!("ollama generate decode: {e}")))?;

        debug!(model, elapsed = ?start.elapsed(), "caption generated");
        Ok(resp.response.trim().to_string())
    }

    async fn embed(&self, bytes: &[u8], model: &str) -> Result<Vec<f32>> {
        let input = String::from_utf8_lossy(bytes).into_owned();
        let body = serde_json::json!({
            "model": model,
            "input": input,
        });

        let start = std::time::Instant::now();
        let resp: EmbedResponse = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Generation(format!("ollama embed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Generation(format!("ollama embed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Generation(format!("ollama embed decode: {e}")))?;

        let mut vector = resp
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Generation("ollama embed returned no vectors".to_string()))?;

        l2_normalize(&mut vector);
        debug!(model, dim = vector.len(), elapsed = ?start.elapsed(), "embedding generated");
        Ok(vector)
    }
}

#[async_trait]
impl ArtifactGenerator for OllamaGenerator {
    async fn generate(
        &self,
        kind: RequestKind,
        bytes: &[u8],
        model_hint: &str,
    ) -> Result<Generated> {
        let model = self.resolve_model(kind, model_hint).to_string();
        let payload = match kind {
            RequestKind::Caption => GeneratedPayload::Caption(self.caption(bytes, &model).await?),
            RequestKind::Embedding => GeneratedPayload::Embedding(self.embed(bytes, &model).await?),
        };
        Ok(Generated { model, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_hint_falls_back_to_kind_default() {
        let g = OllamaGenerator::new("http://localhost:11434", "llava:7b", "nomic-embed-text");
        assert_eq!(g.resolve_model(RequestKind::Caption, ""), "llava:7b");
        assert_eq!(g.resolve_model(RequestKind::Embedding, ""), "nomic-embed-text");
        assert_eq!(g.resolve_model(RequestKind::Caption, "llava:13b"), "llava:13b");
    }
}
