//! Filesystem watcher (C9, §4.9): native OS notifications via
//! `notify-debouncer-mini`, falling back to polling when the kernel
//! mechanism is exhausted, feeding events into a `WatchEventQueue` that
//! the syncer drains on its live-apply path. Grounded in the teacher's
//! `cocode-rs/core/system-reminder/src/file_watcher.rs` (`new_debouncer`
//! + `std::sync::mpsc` receiver bridged into async via `spawn_blocking`).

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::DebouncedEvent;
use notify_debouncer_mini::new_debouncer;
use tracing::warn;

use crate::ignore_rules::IgnoreRules;
use crate::indexing::event_queue::WatchEventKind;
use crate::indexing::event_queue::WatchEventQueue;

/// Watches `project_root` and pushes debounced upsert/unlink events onto
/// `queue`, respecting `.osgrepignore`/gitignore rules (§4.9). Runs until
/// `cancel` fires or the native watch channel closes, at which point it
/// falls back to a 1s poll loop (§4.9 "Degradation").
pub async fn watch(
    project_root: PathBuf,
    queue: Arc<WatchEventQueue>,
    debounce: Duration,
    cancel: tokio_util::sync::CancellationToken,
) {
    match watch_native(project_root.clone(), queue.clone(), debounce, cancel.clone()).await {
        Ok(()) => {}
        Err(e) => {
            warn!(error = %e, "native watch unavailable, falling back to polling");
            watch_polling(&project_root, &queue, cancel).await;
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum WatchNativeError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
    #[error("debouncer channel disconnected")]
    Disconnected,
    #[error("watch task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

async fn watch_native(
    project_root: PathBuf,
    queue: Arc<WatchEventQueue>,
    debounce: Duration,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<(), WatchNativeError> {
    let (tx, rx) = std_mpsc::channel();
    let mut debouncer = new_debouncer(debounce, tx)?;
    debouncer.watcher().watch(&project_root, RecursiveMode::Recursive)?;

    loop {
        let recv_cancel = cancel.clone();
        let recv = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_millis(500)));
        tokio::select! {
            _ = recv_cancel.cancelled() => return Ok(()),
            joined = recv => {
                match joined? {
                    Ok(Ok(events)) => push_events(&queue, events).await,
                    Ok(Err(std_mpsc::RecvTimeoutError::Timeout)) => continue,
                    Ok(Err(std_mpsc::RecvTimeoutError::Disconnected)) => return Err(WatchNativeError::Disconnected),
                    Err(errs) => {
                        for e in errs {
                            warn!(error = %e, "watch error");
                        }
                    }
                }
            }
        }
    }
}

async fn push_events(queue: &Arc<WatchEventQueue>, events: Vec<DebouncedEvent>) {
    for event in events {
        let kind = if event.path.exists() { WatchEventKind::Modified } else { WatchEventKind::Deleted };
        queue.push(event.path, kind).await;
    }
}

/// Fallback polling loop (§4.9): re-walks the tree every second and diffs
/// mtimes against a local snapshot, used when native notifications are
/// unavailable (inotify watch-limit exhaustion, unsupported platform).
async fn watch_polling(project_root: &Path, queue: &Arc<WatchEventQueue>, cancel: tokio_util::sync::CancellationToken) {
    let mut known: std::collections::HashMap<PathBuf, u128> = std::collections::HashMap::new();
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let rules = IgnoreRules::load(project_root);
        let files = rules.walk();
        let mut seen = std::collections::HashSet::new();
        for path in &files {
            seen.insert(path.clone());
            let mtime = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis())
                .unwrap_or(0);
            match known.get(path) {
                Some(prev) if *prev == mtime => {}
                Some(_) => queue.push(path.clone(), WatchEventKind::Modified).await,
                None => queue.push(path.clone(), WatchEventKind::Created).await,
            }
            known.insert(path.clone(), mtime);
        }
        let stale: Vec<PathBuf> = known.keys().filter(|p| !seen.contains(*p)).cloned().collect();
        for path in stale {
            known.remove(&path);
            queue.push(path, WatchEventKind::Deleted).await;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn polling_detects_created_and_deleted_files() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(WatchEventQueue::new(16));
        let cancel = tokio_util::sync::CancellationToken::new();

        let file = dir.path().join("a.rs");
        std::fs::write(&file, "fn f() {}\n").unwrap();

        let queue2 = queue.clone();
        let dir_path = dir.path().to_path_buf();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            watch_polling(&dir_path, &queue2, cancel2).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let events = queue.drain().await;
        assert!(events.iter().any(|(p, k)| p == &file && *k == WatchEventKind::Created));

        cancel.cancel();
        let _ = handle.await;
    }
}
