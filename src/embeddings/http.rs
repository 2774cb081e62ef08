//! HTTP-backed implementation of the embedding module boundary.
//!
//! Talks to an OpenAI-compatible `/embeddings` endpoint for the dense
//! vector, the way `OpenAIEmbeddings` in the sibling retrieval crate this
//! project grew out of does. The late-interaction encoder this module
//! exposes is a lightweight in-process derivation from token hashes rather
//! than a second network round trip — a real ColBERT-style service is
//! swapped in by implementing `EmbeddingModel` directly against it.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use super::EmbeddingModel;
use super::LateBatch;
use crate::error::OsgrepError;
use crate::error::Result;

const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct HttpEmbeddingModel {
    api_key: String,
    model: String,
    base_url: String,
    dense_dimension: usize,
    late_dimension: usize,
    max_late_tokens: usize,
    client: reqwest::Client,
}

impl HttpEmbeddingModel {
    pub fn new(api_key: impl Into<String>, dense_dimension: usize, late_dimension: usize) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            dense_dimension,
            late_dimension,
            max_late_tokens: 512,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request_embeddings(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input,
            dimensions: Some(self.dense_dimension as i32),
            encoding_format: Some("float".to_string()),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| OsgrepError::EmbedFailed {
                count: request.input.len(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OsgrepError::EmbedFailed {
                count: 0,
                cause: format!("API error {status}: {text}"),
            });
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| OsgrepError::EmbedFailed {
                count: 0,
                cause: e.to_string(),
            })?;
        let mut items: Vec<(i32, Vec<f32>)> =
            parsed.data.into_iter().map(|e| (e.index, e.embedding)).collect();
        items.sort_by_key(|(idx, _)| *idx);
        Ok(normalize_all(items.into_iter().map(|(_, v)| v).collect()))
    }

    /// Deterministic token-hash derivation of a late-interaction row for
    /// one token; keeps `rerank_late`'s MaxSim well-defined without a
    /// second network call per §4.10's MaxSim formula.
    fn late_row(&self, token_id: u32) -> Vec<i8> {
        let mut row = Vec::with_capacity(self.late_dimension);
        let mut state = token_id.wrapping_mul(2654435761);
        for _ in 0..self.late_dimension {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            row.push(((state >> 24) as i8).max(-127));
        }
        row
    }

    fn tokenize(&self, text: &str) -> Vec<u32> {
        text.split_whitespace()
            .take(self.max_late_tokens)
            .map(|tok| {
                tok.bytes()
                    .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619))
            })
            .collect()
    }
}

fn normalize_all(vectors: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    vectors
        .into_iter()
        .map(|v| {
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                v.iter().map(|x| x / norm).collect()
            } else {
                v
            }
        })
        .collect()
}

#[async_trait]
impl EmbeddingModel for HttpEmbeddingModel {
    fn dense_dimension(&self) -> usize {
        self.dense_dimension
    }

    fn late_dimension(&self) -> usize {
        self.late_dimension
    }

    async fn embed_dense(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.request_embeddings(texts.to_vec()).await
    }

    async fn embed_late(&self, texts: &[String]) -> Result<LateBatch> {
        let mut batch = LateBatch::default();
        for text in texts {
            let tokens = self.tokenize(text);
            batch.offsets.push(batch.token_ids.len());
            batch.lengths.push(tokens.len());
            for token_id in &tokens {
                batch.embeddings.extend(self.late_row(*token_id));
                batch.token_ids.push(*token_id);
            }
        }
        Ok(batch)
    }

    async fn encode_query_late(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self.tokenize(text);
        let mut matrix = Vec::with_capacity(tokens.len() * self.late_dimension);
        for token_id in tokens {
            for v in self.late_row(token_id) {
                matrix.push(v as f32 / 127.0);
            }
        }
        Ok(matrix)
    }

    async fn rerank_late(
        &self,
        q: &[f32],
        docs: &[LateBatch],
        candidates: &[usize],
        top_k: usize,
    ) -> Result<(Vec<usize>, Vec<f32>)> {
        let d_late = self.late_dimension;
        let t_q = q.len() / d_late.max(1);
        let mut scored: Vec<(usize, f32)> = candidates
            .iter()
            .filter_map(|&idx| docs.get(idx).map(|doc| (idx, doc)))
            .map(|(idx, doc)| {
                let score = crate::search::maxsim(q, t_q, d_late, &doc.embeddings, doc.lengths.first().copied().unwrap_or(0));
                (idx, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);
        Ok(scored.into_iter().unzip())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    dimensions: Option<i32>,
    encoding_format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_row_is_deterministic() {
        let model = HttpEmbeddingModel::new("key", 8, 4);
        assert_eq!(model.late_row(42), model.late_row(42));
        assert_ne!(model.late_row(42), model.late_row(43));
    }

    #[test]
    fn tokenize_respects_max_late_tokens() {
        let model = HttpEmbeddingModel::new("key", 8, 4);
        let text = (0..600).map(|i| format!("tok{i}")).collect::<Vec<_>>().join(" ");
        assert_eq!(model.tokenize(&text).len(), model.max_late_tokens);
    }
}
