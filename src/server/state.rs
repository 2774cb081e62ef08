use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::embeddings::EmbeddingAdapter;
use crate::embeddings::EmbeddingModel;
use crate::search::Retriever;
use crate::storage::LanceDbStore;

/// Snapshot of the background `initial_sync` progress, published for
/// `GET /health` (§4.12).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub processed: usize,
    pub indexed: usize,
    pub total: usize,
    pub current_file: Option<String>,
}

pub struct AppState<M: EmbeddingModel> {
    pub project_root: PathBuf,
    pub store: Arc<LanceDbStore>,
    pub embeddings: Arc<EmbeddingAdapter<M>>,
    pub retriever: Arc<Retriever<M>>,
    pub sync_status: Arc<RwLock<SyncStatus>>,
    pub watch_enabled: bool,
}

impl<M: EmbeddingModel> Clone for AppState<M> {
    fn clone(&self) -> Self {
        Self {
            project_root: self.project_root.clone(),
            store: self.store.clone(),
            embeddings: self.embeddings.clone(),
            retriever: self.retriever.clone(),
            sync_status: self.sync_status.clone(),
            watch_enabled: self.watch_enabled,
        }
    }
}

impl<M: EmbeddingModel> AppState<M> {
    pub fn new(project_root: PathBuf, store: Arc<LanceDbStore>, embeddings: Arc<EmbeddingAdapter<M>>, watch_enabled: bool) -> Self {
        let retriever = Arc::new(Retriever::new(store.clone(), embeddings.clone()));
        Self {
            project_root,
            store,
            embeddings,
            retriever,
            sync_status: Arc::new(RwLock::new(SyncStatus::default())),
            watch_enabled,
        }
    }
}
