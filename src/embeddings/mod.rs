//! Embedding adapter (C4, §4.4): a thin, batching interface over the
//! external embedding module. The dense/late-interaction models themselves
//! are out of scope (§1) — this module only defines the boundary and an
//! HTTP-backed implementation of it.

mod http;

pub use http::HttpEmbeddingModel;

use async_trait::async_trait;

use crate::config::EMBED_BATCH_SIZE;
use crate::error::Result;

/// Late-interaction batch returned by `embed_late`: `embeddings` is the
/// row-major concatenation of each text's `[T_i x D_late]` INT8 matrix;
/// `lengths[i]` and `offsets[i]` index into it and into the parallel
/// `token_ids` array (§4.4).
#[derive(Debug, Clone, Default)]
pub struct LateBatch {
    pub embeddings: Vec<i8>,
    pub token_ids: Vec<u32>,
    pub lengths: Vec<usize>,
    pub offsets: Vec<usize>,
}

impl LateBatch {
    /// Slices out document `i`'s `[T_i x D_late]` matrix and token IDs.
    pub fn document(&self, i: usize, d_late: usize) -> (&[i8], &[u32]) {
        let start = self.offsets[i];
        let len = self.lengths[i];
        let emb_start = start * d_late;
        let emb_end = emb_start + len * d_late;
        (&self.embeddings[emb_start..emb_end], &self.token_ids[start..start + len])
    }
}

/// The external embedding module's boundary (§1): four operations the
/// retrieval core treats as a black box.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn dense_dimension(&self) -> usize;
    fn late_dimension(&self) -> usize;

    async fn embed_dense(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    async fn embed_late(&self, texts: &[String]) -> Result<LateBatch>;
    /// Encodes a query into a `[T_q x D_late]` matrix, flattened row-major.
    async fn encode_query_late(&self, text: &str) -> Result<Vec<f32>>;
    /// Reranks `candidates` (indices into `docs`) against `q`, returning
    /// indices and scores sorted descending, truncated to `top_k`.
    async fn rerank_late(
        &self,
        q: &[f32],
        docs: &[LateBatch],
        candidates: &[usize],
        top_k: usize,
    ) -> Result<(Vec<usize>, Vec<f32>)>;
}

/// Batches embedding calls so callers never send more than
/// `EMBED_BATCH_SIZE` texts to the underlying model in one request (§4.4).
pub struct EmbeddingAdapter<M: EmbeddingModel> {
    model: M,
}

impl<M: EmbeddingModel> EmbeddingAdapter<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn dense_dimension(&self) -> usize {
        self.model.dense_dimension()
    }

    pub fn late_dimension(&self) -> usize {
        self.model.late_dimension()
    }

    pub async fn embed_dense_batched(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EMBED_BATCH_SIZE) {
            out.extend(self.model.embed_dense(chunk).await?);
        }
        Ok(out)
    }

    pub async fn embed_late_batched(&self, texts: &[String]) -> Result<Vec<LateBatch>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EMBED_BATCH_SIZE) {
            let batch = self.model.embed_late(chunk).await?;
            // Split the concatenated batch back into one LateBatch per text
            // so callers can store/query documents independently.
            for i in 0..chunk.len() {
                let (emb, ids) = batch.document(i, self.model.late_dimension());
                out.push(LateBatch {
                    embeddings: emb.to_vec(),
                    token_ids: ids.to_vec(),
                    lengths: vec![ids.len()],
                    offsets: vec![0],
                });
            }
        }
        Ok(out)
    }

    pub async fn encode_query_late(&self, text: &str) -> Result<Vec<f32>> {
        self.model.encode_query_late(text).await
    }

    pub async fn rerank_late(
        &self,
        q: &[f32],
        docs: &[LateBatch],
        candidates: &[usize],
        top_k: usize,
    ) -> Result<(Vec<usize>, Vec<f32>)> {
        self.model.rerank_late(q, docs, candidates, top_k).await
    }
}
