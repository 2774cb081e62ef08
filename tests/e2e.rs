//! End-to-end scenarios (§8 scenarios 1-6): seeded corpora driven through
//! `Syncer::initial_sync` and `Retriever::search`/`graph::trace`, the way
//! the teacher's own crate exercises its pipeline through public API only
//! rather than mocking internals.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use osgrep::config::ChunkingConfig;
use osgrep::embeddings::EmbeddingAdapter;
use osgrep::embeddings::EmbeddingModel;
use osgrep::embeddings::LateBatch;
use osgrep::error::Result;
use osgrep::graph;
use osgrep::graph::TraceOptions;
use osgrep::indexing::Syncer;
use osgrep::search::maxsim;
use osgrep::storage::LanceDbStore;
use osgrep::storage::MetaCache;
use osgrep::types::SearchQuery;

const DENSE_DIM: usize = 16;
const LATE_DIM: usize = 4;

/// A deterministic, content-sensitive stand-in for a real embedding
/// service: bag-of-words hashing into `DENSE_DIM` buckets for the dense
/// vector, per-token hash rows for the late-interaction matrix. Good
/// enough to produce meaningful rank differences between unrelated texts
/// without any network dependency.
struct TestModel;

fn hash_token(tok: &str) -> u32 {
    tok.bytes().fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619))
}

fn late_row(token_id: u32) -> Vec<i8> {
    let mut row = Vec::with_capacity(LATE_DIM);
    let mut state = token_id.wrapping_mul(2654435761);
    for _ in 0..LATE_DIM {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        row.push(((state >> 24) as i8).max(-127));
    }
    row
}

fn tokenize(text: &str) -> Vec<u32> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(hash_token)
        .collect()
}

fn dense_vector(text: &str) -> Vec<f32> {
    let mut buckets = vec![0f32; DENSE_DIM];
    for tok in tokenize(text) {
        buckets[(tok as usize) % DENSE_DIM] += 1.0;
    }
    let norm = buckets.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        buckets.iter().map(|x| x / norm).collect()
    } else {
        buckets
    }
}

#[async_trait]
impl EmbeddingModel for TestModel {
    fn dense_dimension(&self) -> usize {
        DENSE_DIM
    }
    fn late_dimension(&self) -> usize {
        LATE_DIM
    }

    async fn embed_dense(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| dense_vector(t)).collect())
    }

    async fn embed_late(&self, texts: &[String]) -> Result<LateBatch> {
        let mut batch = LateBatch::default();
        for text in texts {
            let tokens = tokenize(text);
            batch.offsets.push(batch.token_ids.len());
            batch.lengths.push(tokens.len());
            for tok in &tokens {
                batch.embeddings.extend(late_row(*tok));
                batch.token_ids.push(*tok);
            }
        }
        Ok(batch)
    }

    async fn encode_query_late(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = tokenize(text);
        let mut matrix = Vec::with_capacity(tokens.len() * LATE_DIM);
        for tok in tokens {
            for v in late_row(tok) {
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
        let t_q = q.len() / LATE_DIM.max(1);
        let mut scored: Vec<(usize, f32)> = candidates
            .iter()
            .filter_map(|&idx| docs.get(idx).map(|doc| (idx, doc)))
            .map(|(idx, doc)| (idx, maxsim(q, t_q, LATE_DIM, &doc.embeddings, doc.lengths.first().copied().unwrap_or(0))))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);
        Ok(scored.into_iter().unzip())
    }
}

struct Fixture {
    store: Arc<LanceDbStore>,
    meta: Arc<MetaCache>,
    syncer: Syncer<TestModel>,
    _store_dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let store_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LanceDbStore::open(store_dir.path(), DENSE_DIM as i32).await.unwrap());
    let meta = Arc::new(MetaCache::open(&store_dir.path().join("meta.db")).unwrap());
    let embeddings = Arc::new(EmbeddingAdapter::new(TestModel));
    let syncer = Syncer::new(store.clone(), meta.clone(), embeddings, ChunkingConfig::default(), 2);
    Fixture { store, meta, syncer, _store_dir: store_dir }
}

async fn sync(fx: &Fixture, project_root: &Path) -> osgrep::indexing::SyncStats {
    fx.syncer.initial_sync(project_root, false, |_| {}, &CancellationToken::new()).await.unwrap()
}

/// Scenario 1: empty corpus searches to an empty result set.
#[tokio::test]
async fn empty_repo_search_returns_no_results() {
    let project = tempfile::tempdir().unwrap();
    let fx = fixture().await;
    sync(&fx, project.path()).await;

    let embeddings = Arc::new(EmbeddingAdapter::new(TestModel));
    let retriever = osgrep::Retriever::new(fx.store.clone(), embeddings);
    let query = SearchQuery { text: "anything".to_string(), top_k: 10, ..Default::default() };
    let results = retriever.search(&query, &CancellationToken::new()).await.unwrap();
    assert!(results.is_empty());
}

/// Scenario 2: a single indexed file with a defined symbol is found by name.
#[tokio::test]
async fn single_file_index_and_search_finds_defined_symbol() {
    let project = tempfile::tempdir().unwrap();
    std::fs::write(project.path().join("a.ts"), "export function foo(){ return bar() }\nfunction bar(){}\n").unwrap();
    let fx = fixture().await;
    sync(&fx, project.path()).await;

    let embeddings = Arc::new(EmbeddingAdapter::new(TestModel));
    let retriever = osgrep::Retriever::new(fx.store.clone(), embeddings);
    let query = SearchQuery { text: "foo".to_string(), top_k: 5, ..Default::default() };
    let results = retriever.search(&query, &CancellationToken::new()).await.unwrap();

    assert!(!results.is_empty());
    assert!(results.iter().any(|r| r.chunk.defined_symbols.iter().any(|s| s == "foo") && r.chunk.path == "a.ts"));
}

/// Scenario 3: renaming a file is a delete-plus-insert on the next sync.
#[tokio::test]
async fn rename_is_reindex() {
    let project = tempfile::tempdir().unwrap();
    std::fs::write(project.path().join("a.ts"), "export function foo(){}\n").unwrap();
    let fx = fixture().await;
    sync(&fx, project.path()).await;
    assert!(fx.store.list_paths().await.unwrap().contains_key("a.ts"));

    std::fs::rename(project.path().join("a.ts"), project.path().join("b.ts")).unwrap();
    sync(&fx, project.path()).await;

    let paths = fx.store.list_paths().await.unwrap();
    assert!(paths.contains_key("b.ts"));
    assert!(!paths.contains_key("a.ts"));
    assert!(fx.meta.get("b.ts").await.unwrap().is_some());
    assert!(fx.meta.get("a.ts").await.unwrap().is_none());
}

/// Scenario 4: tracing a callee finds its definition and its sole caller.
#[tokio::test]
async fn trace_finds_center_and_caller() {
    let project = tempfile::tempdir().unwrap();
    std::fs::write(project.path().join("a.ts"), "export function foo(){ return bar() }\nfunction bar(){}\n").unwrap();
    let fx = fixture().await;
    sync(&fx, project.path()).await;

    let result = graph::trace(&fx.store, "bar", &TraceOptions::with_defaults()).await.unwrap();
    let center = result.center.expect("bar should have a definition");
    assert_eq!(center.file, "a.ts");
    assert!(result.callers.iter().any(|c| c.symbol == "foo"));
    assert!(result.callees.is_empty());
}

/// Scenario 6: a file producing many near-duplicate chunks is capped at
/// `MAX_PER_FILE` entries in one result set (§4.10 step 8).
#[tokio::test]
async fn diversification_caps_results_per_file() {
    let project = tempfile::tempdir().unwrap();
    let mut body = String::new();
    for i in 0..10 {
        body.push_str(&format!("export function widget_{i}() {{ return render_widget({i}) }}\n"));
    }
    std::fs::write(project.path().join("widgets.ts"), body).unwrap();
    let fx = fixture().await;
    sync(&fx, project.path()).await;

    let embeddings = Arc::new(EmbeddingAdapter::new(TestModel));
    let retriever = osgrep::Retriever::new(fx.store.clone(), embeddings);
    let query = SearchQuery { text: "render widget".to_string(), top_k: 10, ..Default::default() };
    let results = retriever.search(&query, &CancellationToken::new()).await.unwrap();

    let from_widgets = results.iter().filter(|r| r.chunk.path == "widgets.ts").count();
    assert!(from_widgets <= 3, "expected at most MAX_PER_FILE results from widgets.ts, got {from_widgets}");
}
