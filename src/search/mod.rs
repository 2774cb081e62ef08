//! Hybrid retriever (C10, §4.10): ANN + FTS candidate generation → RRF
//! fusion → late-interaction rerank → structural boost → dedup →
//! per-file diversification → calibration. Grounded in the sibling
//! `cocode-rs`/`codex-rs` retrieval crates' `search/hybrid.rs`
//! (`HybridSearcher`), generalized from their BM25+vector+snippet fusion to
//! this spec's ANN+FTS+late-interaction pipeline.

mod dedup;
mod fusion;
mod maxsim;
mod query_normalize;
mod structural;

pub use maxsim::maxsim;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::MAX_PER_FILE;
use crate::config::PRE_K;
use crate::config::RERANK_K;
use crate::config::RRF_K;
use crate::config::W_FUSE;
use crate::embeddings::EmbeddingAdapter;
use crate::embeddings::EmbeddingModel;
use crate::embeddings::LateBatch;
use crate::error::OsgrepError;
use crate::error::Result;
use crate::storage::LanceDbStore;
use crate::types::Chunk;
use crate::types::Confidence;
use crate::types::SearchQuery;
use crate::types::SearchResult;
use crate::types::VectorPayload;

pub struct Retriever<M: EmbeddingModel> {
    store: Arc<LanceDbStore>,
    embeddings: Arc<EmbeddingAdapter<M>>,
}

impl<M: EmbeddingModel> Retriever<M> {
    pub fn new(store: Arc<LanceDbStore>, embeddings: Arc<EmbeddingAdapter<M>>) -> Self {
        Self { store, embeddings }
    }

    /// `search(query, top_k, {rerank}, filters?, path_prefix?, cancel?) →
    /// ranked chunks` (§4.10).
    pub async fn search(&self, query: &SearchQuery, cancel: &CancellationToken) -> Result<Vec<SearchResult>> {
        check_canceled(cancel)?;

        // 1. Encoding.
        let q_dense = self
            .embeddings
            .embed_dense_batched(std::slice::from_ref(&query.text))
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        let q_late = self.embeddings.encode_query_late(&query.text).await?;

        check_canceled(cancel)?;

        // 2. Candidate generation.
        let pre_k = (query.top_k * 5).max(PRE_K);
        let ann_rows = self
            .store
            .vector_search_rows(
                &q_dense,
                pre_k,
                query.path_prefix.as_deref(),
                query.def_filter.as_deref(),
                query.ref_filter.as_deref(),
            )
            .await?;

        let normalized = query_normalize::normalize_for_fts(&query.text);
        let fts_rows = if normalized.is_empty() {
            Vec::new()
        } else {
            self.store
                .fts_search_rows(
                    &normalized,
                    pre_k,
                    query.path_prefix.as_deref(),
                    query.def_filter.as_deref(),
                    query.ref_filter.as_deref(),
                )
                .await?
        };

        check_canceled(cancel)?;

        // 3. Fusion (RRF).
        let ann_ids: Vec<String> = ann_rows.iter().map(|(c, _)| c.id.clone()).collect();
        let fts_ids: Vec<String> = fts_rows.iter().map(|(c, _)| c.id.clone()).collect();
        let fused_ids = fusion::reciprocal_rank_fusion(&[&ann_ids, &fts_ids], RRF_K);

        let mut rows_by_id: HashMap<String, (Chunk, Option<VectorPayload>)> = HashMap::new();
        for (chunk, payload) in ann_rows.into_iter().chain(fts_rows.into_iter()) {
            rows_by_id.entry(chunk.id.clone()).or_insert((chunk, payload));
        }
        let rrf_scores: HashMap<String, f32> = fused_ids.iter().cloned().collect();

        // 4. Rerank set.
        let rerank_set: Vec<&String> = fused_ids.iter().map(|(id, _)| id).take(RERANK_K).collect();

        check_canceled(cancel)?;

        // 5. Late-interaction reranking.
        let mut docs: Vec<LateBatch> = Vec::with_capacity(rerank_set.len());
        let mut doc_ids: Vec<String> = Vec::with_capacity(rerank_set.len());
        for id in &rerank_set {
            let Some((_, Some(payload))) = rows_by_id.get(id.as_str()) else {
                continue;
            };
            docs.push(LateBatch {
                embeddings: payload.colbert.clone(),
                token_ids: payload.doc_token_ids.clone(),
                lengths: vec![payload.doc_token_ids.len()],
                offsets: vec![0],
            });
            doc_ids.push((*id).clone());
        }
        let all_candidates: Vec<usize> = (0..docs.len()).collect();

        let mut score_r: HashMap<String, f32> = HashMap::new();
        if query.rerank && !docs.is_empty() {
            let (idxs, scores) = self
                .embeddings
                .rerank_late(&q_late, &docs, &all_candidates, all_candidates.len())
                .await?;
            for (pos, score) in idxs.into_iter().zip(scores) {
                if let Some(id) = doc_ids.get(pos) {
                    score_r.insert(id.clone(), score);
                }
            }
        } else {
            for (rank, id) in rerank_set.iter().enumerate() {
                let rrf = rrf_scores.get(id.as_str()).copied().unwrap_or(0.0);
                score_r.insert((*id).clone(), rrf + 1.0 / (rank as f32 + 1.0));
            }
        }

        check_canceled(cancel)?;

        // 6. Blend + structural boost.
        let mut results: Vec<SearchResult> = Vec::with_capacity(score_r.len());
        for (id, sr) in &score_r {
            let Some((chunk, _)) = rows_by_id.get(id) else { continue };
            let rrf = rrf_scores.get(id).copied().unwrap_or(0.0);
            let blended = sr + W_FUSE * rrf;
            let score = blended * structural::structural_factor(chunk);
            results.push(SearchResult {
                chunk: chunk.clone(),
                score,
                score_out: 0.0,
                confidence: Confidence::Low,
            });
        }
        results.sort_by(|a, b| b.score.total_cmp(&a.score));

        // 7. Deduplication.
        let deduped = dedup::deduplicate(results);

        // 8. Per-file diversification.
        let diversified = dedup::diversify(deduped, MAX_PER_FILE, query.top_k);

        // 9. Calibration.
        Ok(calibrate(diversified))
    }
}

/// `score_out = score / s*` where `s*` is the top score of the returned
/// list, with a categorical confidence derived from it (§4.10 step 9).
fn calibrate(mut results: Vec<SearchResult>) -> Vec<SearchResult> {
    let top = results.first().map(|r| r.score).unwrap_or(0.0);
    for r in &mut results {
        r.score_out = if top > 0.0 { r.score / top } else { 0.0 };
        r.confidence = Confidence::from_score(r.score_out);
    }
    results
}

fn check_canceled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(OsgrepError::Canceled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HttpEmbeddingModel;

    fn model() -> Arc<EmbeddingAdapter<HttpEmbeddingModel>> {
        Arc::new(EmbeddingAdapter::new(HttpEmbeddingModel::new("key", 4, 2)))
    }

    #[tokio::test]
    async fn search_against_empty_store_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LanceDbStore::open(dir.path(), 4).await.unwrap());
        let retriever = Retriever::new(store, model());
        let query = SearchQuery { text: "parse config".to_string(), ..Default::default() };
        let results = retriever.search(&query, &CancellationToken::new()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn canceled_token_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LanceDbStore::open(dir.path(), 4).await.unwrap());
        let retriever = Retriever::new(store, model());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let query = SearchQuery::default();
        let err = retriever.search(&query, &cancel).await.unwrap_err();
        assert!(matches!(err, OsgrepError::Canceled));
    }

    #[test]
    fn calibrate_sets_top_result_to_high_confidence() {
        let chunk = crate::types::Chunk {
            id: "1".into(),
            path: "a.rs".into(),
            hash: "h".into(),
            chunk_index: 0,
            start_line: 0,
            end_line: 1,
            content: String::new(),
            display_text: String::new(),
            context_prev: None,
            context_next: None,
            chunk_type: crate::types::ChunkType::Function,
            is_anchor: false,
            parent_symbol: None,
            role: crate::types::Role::Implementation,
            complexity: 1,
            is_exported: false,
            defined_symbols: vec![],
            referenced_symbols: vec![],
            imports: vec![],
            exports: vec![],
        };
        let results = vec![SearchResult { chunk, score: 2.0, score_out: 0.0, confidence: Confidence::Low }];
        let out = calibrate(results);
        assert_eq!(out[0].score_out, 1.0);
        assert_eq!(out[0].confidence, Confidence::High);
    }
}
