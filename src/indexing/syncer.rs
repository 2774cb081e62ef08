//! Syncer (C8, §4.8): `initial_sync` and the live-index apply path,
//! grounded in the teacher's `indexing/manager.rs` bounded-worker-pool +
//! single-writer shape, rebuilt around this spec's chunk/embed/store
//! pipeline and write-barrier ordering (`delete_paths → insert_batch →
//! meta_cache.put`).

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::chunking;
use crate::config::ChunkingConfig;
use crate::config::EMBED_BATCH_SIZE;
use crate::embeddings::EmbeddingAdapter;
use crate::embeddings::EmbeddingModel;
use crate::error::Result;
use crate::ignore_rules::IgnoreRules;
use crate::ignore_rules::detect_language;
use crate::snapshot;
use crate::storage::FileMeta;
use crate::storage::LanceDbStore;
use crate::storage::MetaCache;
use crate::types::Chunk;
use crate::types::VectorPayload;

#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub processed: usize,
    pub indexed: usize,
    pub total: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct SyncProgress {
    pub processed: usize,
    pub total: usize,
    pub current_file: Option<String>,
}

/// One file's outcome from the per-file pipeline step (§4.8 step 3): what
/// the writer needs to apply, independent of whether it came from
/// `initial_sync`'s stream or the watcher's live-apply path.
enum FileOutcome {
    UpToDate,
    Upsert { path: String, chunks: Vec<Chunk>, payloads: Vec<Option<VectorPayload>>, meta: FileMeta },
    MetaOnly { path: String, meta: FileMeta },
    Delete { path: String },
    Failed,
}

#[derive(Default)]
struct WriterBuffer {
    upsert_paths: Vec<String>,
    rows: Vec<Chunk>,
    row_payloads: Vec<Option<VectorPayload>>,
    meta_updates: Vec<(String, FileMeta)>,
    delete_paths: Vec<String>,
}

pub struct Syncer<M: EmbeddingModel> {
    store: Arc<LanceDbStore>,
    meta: Arc<MetaCache>,
    embeddings: Arc<EmbeddingAdapter<M>>,
    chunking: ChunkingConfig,
    worker_threads: usize,
}

impl<M: EmbeddingModel + 'static> Syncer<M> {
    pub fn new(
        store: Arc<LanceDbStore>,
        meta: Arc<MetaCache>,
        embeddings: Arc<EmbeddingAdapter<M>>,
        chunking: ChunkingConfig,
        worker_threads: usize,
    ) -> Self {
        Self { store, meta, embeddings, chunking, worker_threads: worker_threads.max(1) }
    }

    /// `initial_sync({project_root, dry_run, on_progress, cancel}) →
    /// {processed, indexed, total, failed}` (§4.8).
    pub async fn initial_sync(
        &self,
        project_root: &Path,
        dry_run: bool,
        on_progress: impl Fn(SyncProgress) + Send + Sync,
        cancel: &CancellationToken,
    ) -> Result<SyncStats> {
        let rules = IgnoreRules::load(project_root);
        let files = rules.walk();
        let total = files.len();
        let mut seen_paths: Vec<String> = Vec::with_capacity(total);
        for f in &files {
            if let Ok(rel) = f.strip_prefix(project_root) {
                seen_paths.push(to_posix(rel));
            }
        }

        let buffer = Arc::new(Mutex::new(WriterBuffer::default()));
        let processed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let indexed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let failed = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        futures::stream::iter(files.into_iter())
            .for_each_concurrent(self.worker_threads, |abs_path| {
                let project_root = project_root.to_path_buf();
                let buffer = buffer.clone();
                let processed = processed.clone();
                let indexed = indexed.clone();
                let failed = failed.clone();
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let rel = match abs_path.strip_prefix(&project_root) {
                        Ok(r) => to_posix(r),
                        Err(_) => return,
                    };
                    let outcome = self.process_file(&rel, &abs_path).await;
                    processed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    on_progress(SyncProgress {
                        processed: processed.load(std::sync::atomic::Ordering::Relaxed),
                        total,
                        current_file: Some(rel.clone()),
                    });
                    match outcome {
                        FileOutcome::UpToDate => {}
                        FileOutcome::Failed => {
                            failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                        FileOutcome::Upsert { path, chunks, payloads, meta } => {
                            indexed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            if !dry_run {
                                self.stage_upsert(&buffer, path, chunks, payloads, meta).await;
                            }
                        }
                        FileOutcome::MetaOnly { path, meta } => {
                            if !dry_run {
                                self.meta.put(&path, meta).await.ok();
                            }
                        }
                        FileOutcome::Delete { path } => {
                            if !dry_run {
                                self.stage_delete(&buffer, path).await;
                            }
                        }
                    }
                }
            })
            .await;

        if !dry_run {
            self.flush(&buffer).await?;
        }

        let mut stats = SyncStats {
            processed: processed.load(std::sync::atomic::Ordering::Relaxed),
            indexed: indexed.load(std::sync::atomic::Ordering::Relaxed),
            total,
            failed: failed.load(std::sync::atomic::Ordering::Relaxed),
        };

        if !dry_run && !cancel.is_cancelled() {
            let known = self.meta.all_keys().await?;
            let seen: std::collections::HashSet<&str> = seen_paths.iter().map(String::as_str).collect();
            let stale: Vec<String> = known.into_iter().filter(|p| !seen.contains(p.as_str())).collect();
            if !stale.is_empty() {
                self.store.delete_paths(&stale).await?;
                for p in &stale {
                    self.meta.delete(p).await?;
                }
            }
            self.store.create_fts_index().await.ok();
        } else {
            stats.processed = stats.processed.min(total);
        }

        Ok(stats)
    }

    /// Live-index apply for one upsert/unlink pair from the watcher's
    /// debounced buffer (§4.8 "Live indexing").
    pub async fn apply_live(
        &self,
        project_root: &Path,
        upserts: &[PathBuf],
        unlinks: &[PathBuf],
    ) -> Result<()> {
        let buffer = Arc::new(Mutex::new(WriterBuffer::default()));
        for abs_path in upserts {
            let Ok(rel) = abs_path.strip_prefix(project_root) else { continue };
            let rel = to_posix(rel);
            match self.process_file(&rel, abs_path).await {
                FileOutcome::Upsert { path, chunks, payloads, meta } => {
                    self.stage_upsert(&buffer, path, chunks, payloads, meta).await;
                }
                FileOutcome::MetaOnly { path, meta } => {
                    self.meta.put(&path, meta).await?;
                }
                _ => {}
            }
        }
        for abs_path in unlinks {
            let Ok(rel) = abs_path.strip_prefix(project_root) else { continue };
            self.stage_delete(&buffer, to_posix(rel)).await;
        }
        self.flush(&buffer).await
    }

    async fn process_file(&self, rel_path: &str, abs_path: &Path) -> FileOutcome {
        let rules_ok = abs_path.exists();
        if !rules_ok {
            return FileOutcome::Delete { path: rel_path.to_string() };
        }
        let snap = match snapshot::snapshot(abs_path) {
            Ok(s) => s,
            Err(_) => return FileOutcome::Delete { path: rel_path.to_string() },
        };
        if snapshot::looks_binary(&snap.bytes) {
            return FileOutcome::Delete { path: rel_path.to_string() };
        }

        let cached = self.meta.get(rel_path).await.ok().flatten();
        if let Some(prev) = &cached {
            if prev.mtime_ms == snap.mtime_ms && prev.size == snap.size {
                return FileOutcome::UpToDate;
            }
            if prev.hash == snap.hash {
                return FileOutcome::MetaOnly {
                    path: rel_path.to_string(),
                    meta: FileMeta { hash: snap.hash, mtime_ms: snap.mtime_ms, size: snap.size },
                };
            }
        }

        let content = match String::from_utf8(snap.bytes.clone()) {
            Ok(s) => s,
            Err(_) => return FileOutcome::Delete { path: rel_path.to_string() },
        };
        let language = detect_language(abs_path);
        let (chunks, _meta) = chunking::chunk_file(rel_path, &content, language, &snap.hash, &self.chunking);

        let texts: Vec<String> = chunks.iter().map(|c| c.display_text.clone()).collect();
        let dense = match self.embeddings.embed_dense_batched(&texts).await {
            Ok(d) => d,
            Err(_) => return FileOutcome::Failed,
        };
        let late = match self.embeddings.embed_late_batched(&texts).await {
            Ok(l) => l,
            Err(_) => return FileOutcome::Failed,
        };

        let payloads: Vec<Option<VectorPayload>> = dense
            .into_iter()
            .zip(late)
            .map(|(d, l)| {
                let scale = l.embeddings.iter().map(|b| b.unsigned_abs()).max().unwrap_or(1).max(1) as f32;
                Some(VectorPayload {
                    dense: d,
                    colbert: l.embeddings,
                    colbert_scale: scale,
                    doc_token_ids: l.token_ids,
                })
            })
            .collect();

        FileOutcome::Upsert {
            path: rel_path.to_string(),
            chunks,
            payloads,
            meta: FileMeta { hash: snap.hash, mtime_ms: snap.mtime_ms, size: snap.size },
        }
    }

    async fn stage_upsert(
        &self,
        buffer: &Arc<Mutex<WriterBuffer>>,
        path: String,
        chunks: Vec<Chunk>,
        payloads: Vec<Option<VectorPayload>>,
        meta: FileMeta,
    ) {
        let mut buf = buffer.lock().await;
        buf.upsert_paths.push(path.clone());
        buf.rows.extend(chunks);
        buf.row_payloads.extend(payloads);
        buf.meta_updates.push((path, meta));
        let should_flush = buf.meta_updates.len() >= EMBED_BATCH_SIZE;
        drop(buf);
        if should_flush {
            let _ = self.flush(buffer).await;
        }
    }

    async fn stage_delete(&self, buffer: &Arc<Mutex<WriterBuffer>>, path: String) {
        let mut buf = buffer.lock().await;
        buf.delete_paths.push(path);
    }

    /// One flush transaction: `delete_paths(changed_paths) →
    /// insert_batch(new_rows) → meta_cache.put(new_entries)` (§4.8 step 4);
    /// a file's rows and meta entry become visible atomically relative to
    /// this ordering.
    async fn flush(&self, buffer: &Arc<Mutex<WriterBuffer>>) -> Result<()> {
        let mut buf = buffer.lock().await;
        if buf.upsert_paths.is_empty() && buf.delete_paths.is_empty() {
            return Ok(());
        }
        let mut to_delete = buf.delete_paths.clone();
        to_delete.extend(buf.upsert_paths.iter().cloned());
        if !to_delete.is_empty() {
            self.store.delete_paths(&to_delete).await?;
        }
        if !buf.rows.is_empty() {
            self.store.insert_batch(&buf.rows, &buf.row_payloads).await?;
        }
        for (path, meta) in buf.meta_updates.drain(..) {
            self.meta.put(&path, meta).await?;
        }
        for path in &buf.delete_paths {
            self.meta.delete(path).await?;
        }
        buf.upsert_paths.clear();
        buf.rows.clear();
        buf.row_payloads.clear();
        buf.delete_paths.clear();
        Ok(())
    }
}

fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
