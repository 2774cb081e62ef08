use axum::extract::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Deserialize;
use serde::Serialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::embeddings::EmbeddingModel;
use crate::error::OsgrepError;
use crate::graph;
use crate::graph::TraceOptions;
use crate::server::AppState;
use crate::server::DEFAULT_REQUEST_TIMEOUT;
use crate::types::SearchQuery;
use crate::types::SearchResult;
use crate::types::TraceResult;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(err: OsgrepError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody { error: err.to_string() })).into_response()
}

/// Rejects `..`-traversal and absolute paths before they reach a store
/// filter (§4.5, §4.12 "Path argument must resolve inside project root").
fn validate_path_arg(raw: &str) -> Result<String, OsgrepError> {
    if raw.is_empty() || raw.contains("..") || raw.starts_with('/') || raw.starts_with('\\') {
        return Err(OsgrepError::InvalidPath { path: raw.to_string() });
    }
    Ok(raw.to_string())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    initial_sync: Option<crate::server::SyncStatus>,
    indexing: bool,
    watch: bool,
}

pub async fn health<M: EmbeddingModel>(State(state): State<AppState<M>>) -> impl IntoResponse {
    let sync = state.sync_status.read().await.clone();
    let body = HealthResponse {
        status: if sync.running { "initializing" } else { "ok" },
        indexing: sync.running,
        watch: state.watch_enabled,
        initial_sync: if sync.running { Some(sync) } else { None },
    };
    Json(body)
}

#[derive(Deserialize)]
pub struct SearchRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    rerank: Option<bool>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
    partial: Option<bool>,
    initial_sync: Option<crate::server::SyncStatus>,
}

pub async fn search<M: EmbeddingModel + 'static>(
    State(state): State<AppState<M>>,
    Json(req): Json<SearchRequest>,
) -> Response {
    let sync = state.sync_status.read().await.clone();

    let path_prefix = match req.path.as_deref().map(validate_path_arg) {
        Some(Ok(p)) => Some(p),
        Some(Err(e)) => return error_response(e),
        None => None,
    };

    let query = SearchQuery {
        text: req.query,
        top_k: req.limit.unwrap_or(10),
        rerank: req.rerank.unwrap_or(true),
        path_prefix,
        def_filter: None,
        ref_filter: None,
    };

    let cancel = CancellationToken::new();
    let result = timeout(DEFAULT_REQUEST_TIMEOUT, state.retriever.search(&query, &cancel)).await;

    match result {
        Ok(Ok(results)) => Json(SearchResponse {
            results,
            partial: if sync.running { Some(true) } else { None },
            initial_sync: if sync.running { Some(sync) } else { None },
        })
        .into_response(),
        Ok(Err(e)) => error_response(e),
        Err(_) => {
            cancel.cancel();
            error_response(OsgrepError::Timeout { millis: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64 })
        }
    }
}

#[derive(Deserialize)]
pub struct TraceRequest {
    symbol: String,
    #[serde(default)]
    depth: Option<usize>,
    #[serde(default)]
    callers: Option<bool>,
    #[serde(default)]
    callees: Option<bool>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Serialize)]
struct TraceResponse {
    #[serde(flatten)]
    result: TraceResult,
}

pub async fn trace<M: EmbeddingModel + 'static>(
    State(state): State<AppState<M>>,
    Json(req): Json<TraceRequest>,
) -> Response {
    let path_prefix = match req.path.as_deref().map(validate_path_arg) {
        Some(Ok(p)) => Some(p),
        Some(Err(e)) => return error_response(e),
        None => None,
    };

    let opts = TraceOptions {
        depth: req.depth.unwrap_or(1),
        callers_only: req.callers.unwrap_or(false) && !req.callees.unwrap_or(false),
        callees_only: req.callees.unwrap_or(false) && !req.callers.unwrap_or(false),
        path_prefix,
    };

    match graph::trace(&state.store, &req.symbol, &opts).await {
        Ok(result) => Json(TraceResponse { result }).into_response(),
        Err(e) => error_response(e),
    }
}
