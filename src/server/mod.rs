//! HTTP server (C12, §4.12): one project root per process, exposing
//! search/trace/health over loopback HTTP. Grounded in the sibling
//! `AlrikOlson-codescope/server` crate's `axum` router/layer shape — the
//! one component the teacher never built itself, so its HTTP plumbing is
//! learned from the wider pack instead.

mod handlers;
mod state;

pub use state::AppState;
pub use state::SyncStatus;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use axum::routing::post;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::embeddings::EmbeddingModel;

/// Request bodies over this are rejected with `413` before parsing (§6).
pub const MAX_BODY_BYTES: usize = 1_000_000;

pub fn router<M: EmbeddingModel + 'static>(state: AppState<M>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::<M>))
        .route("/search", post(handlers::search::<M>))
        .route("/trace", post(handlers::trace::<M>))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `127.0.0.1:<port>` (`0` lets the OS pick) and serves until
/// `cancel` fires, honoring the per-request timeout configured on `state`
/// (§4.12 "Timeouts").
pub async fn serve<M: EmbeddingModel + 'static>(
    state: AppState<M>,
    port: u16,
    cancel: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    info!(port = bound.port(), "osgrep server listening");

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

/// Default per-request search/trace timeout (§4.12).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
