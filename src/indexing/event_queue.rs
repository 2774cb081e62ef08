//! Debounced, key-deduplicating watch event queue (§4.9), grounded in the
//! teacher's generic `indexing/event_queue.rs` (`EventQueue<K, V>` +
//! `watch_event_merge`), trimmed of the batch/trace bookkeeping this
//! spec's simpler watcher doesn't need.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio::sync::broadcast;

/// One filesystem change as seen by the watcher (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
struct Pending {
    kind: WatchEventKind,
    at: Instant,
}

/// A later mutation replaces an earlier pending one for the same path
/// (§5 "Ordering guarantees"): delete always wins, modify coalesces with
/// create into create (no intermediate write needed), anything else takes
/// the newest event.
fn merge(existing: WatchEventKind, new: WatchEventKind) -> WatchEventKind {
    match (existing, new) {
        (_, WatchEventKind::Deleted) => WatchEventKind::Deleted,
        (WatchEventKind::Deleted, _) => new,
        (WatchEventKind::Created, WatchEventKind::Modified) => WatchEventKind::Created,
        _ => new,
    }
}

/// FIFO-by-arrival, dedup-by-path event queue feeding the syncer's live
/// index loop.
pub struct WatchEventQueue {
    pending: RwLock<HashMap<PathBuf, Pending>>,
    notify_tx: broadcast::Sender<()>,
}

impl WatchEventQueue {
    pub fn new(capacity: usize) -> Self {
        let (notify_tx, _) = broadcast::channel(capacity);
        Self {
            pending: RwLock::new(HashMap::new()),
            notify_tx,
        }
    }

    pub async fn push(&self, path: PathBuf, kind: WatchEventKind) {
        let mut pending = self.pending.write().await;
        let merged = match pending.get(&path) {
            Some(existing) => merge(existing.kind, kind),
            None => kind,
        };
        pending.insert(path, Pending { kind: merged, at: Instant::now() });
        let _ = self.notify_tx.send(());
    }

    pub async fn pop(&self) -> Option<(PathBuf, WatchEventKind)> {
        let mut pending = self.pending.write().await;
        let oldest = pending.iter().min_by_key(|(_, e)| e.at).map(|(k, _)| k.clone());
        oldest.map(|path| {
            let kind = pending.remove(&path).unwrap().kind;
            (path, kind)
        })
    }

    pub async fn drain(&self) -> Vec<(PathBuf, WatchEventKind)> {
        let mut out = Vec::new();
        while let Some(item) = self.pop().await {
            out.push(item);
        }
        out
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notify_tx.subscribe()
    }

    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedups_same_path_created_then_modified() {
        let queue = WatchEventQueue::new(16);
        queue.push(PathBuf::from("a.rs"), WatchEventKind::Created).await;
        queue.push(PathBuf::from("a.rs"), WatchEventKind::Modified).await;
        assert_eq!(queue.len().await, 1);
        let (_, kind) = queue.pop().await.unwrap();
        assert_eq!(kind, WatchEventKind::Created);
    }

    #[tokio::test]
    async fn delete_wins_over_pending_modify() {
        let queue = WatchEventQueue::new(16);
        queue.push(PathBuf::from("a.rs"), WatchEventKind::Modified).await;
        queue.push(PathBuf::from("a.rs"), WatchEventKind::Deleted).await;
        let (_, kind) = queue.pop().await.unwrap();
        assert_eq!(kind, WatchEventKind::Deleted);
    }

    #[tokio::test]
    async fn delete_then_create_results_in_create() {
        let queue = WatchEventQueue::new(16);
        queue.push(PathBuf::from("a.rs"), WatchEventKind::Deleted).await;
        queue.push(PathBuf::from("a.rs"), WatchEventKind::Created).await;
        let (_, kind) = queue.pop().await.unwrap();
        assert_eq!(kind, WatchEventKind::Created);
    }

    #[tokio::test]
    async fn drain_empties_the_queue() {
        let queue = WatchEventQueue::new(16);
        queue.push(PathBuf::from("a.rs"), WatchEventKind::Created).await;
        queue.push(PathBuf::from("b.rs"), WatchEventKind::Created).await;
        let drained = queue.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty().await);
    }
}
