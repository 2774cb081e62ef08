//! Meta cache (C6, §4.6): a key-value `path -> {hash, mtime_ms, size}` store
//! the syncer consults to decide what changed, durable before the next
//! file's write (§4.6's ordering requirement). Grounded in the teacher's
//! `storage/sqlite.rs` async-safe wrapper (`spawn_blocking` + `Arc<Mutex<Connection>>`).

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use tokio::task::spawn_blocking;

use crate::error::OsgrepError;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct FileMeta {
    pub hash: String,
    pub mtime_ms: i64,
    pub size: u64,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS file_meta (
    path TEXT PRIMARY KEY,
    hash TEXT NOT NULL,
    mtime_ms INTEGER NOT NULL,
    size INTEGER NOT NULL
);
"#;

/// rusqlite's `Connection` is `!Sync`, so every query goes through
/// `spawn_blocking` over a shared mutex, same as the teacher's `SqliteStore`.
pub struct MetaCache {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl MetaCache {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();
        spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "meta cache mutex poisoned, recovering");
                poisoned.into_inner()
            });
            f(&guard)
        })
        .await
        .map_err(|e| OsgrepError::ReadFailed {
            path: self.path.clone(),
            cause: format!("spawn_blocking failed: {e}"),
        })?
        .map_err(OsgrepError::from)
    }

    pub async fn get(&self, path: &str) -> Result<Option<FileMeta>> {
        let key = path.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT hash, mtime_ms, size FROM file_meta WHERE path = ?1",
                params![key],
                |row| {
                    Ok(FileMeta {
                        hash: row.get(0)?,
                        mtime_ms: row.get(1)?,
                        size: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .optional()
        })
        .await
    }

    pub async fn put(&self, path: &str, meta: FileMeta) -> Result<()> {
        let key = path.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO file_meta (path, hash, mtime_ms, size) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(path) DO UPDATE SET hash = excluded.hash, mtime_ms = excluded.mtime_ms, size = excluded.size",
                params![key, meta.hash, meta.mtime_ms, meta.size as i64],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let key = path.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM file_meta WHERE path = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    pub async fn all_keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT path FROM file_meta")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetaCache::open(&dir.path().join("meta.db")).unwrap();
        cache
            .put("a.rs", FileMeta { hash: "h1".into(), mtime_ms: 100, size: 42 })
            .await
            .unwrap();
        let got = cache.get("a.rs").await.unwrap().unwrap();
        assert_eq!(got.hash, "h1");
        assert_eq!(got.size, 42);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetaCache::open(&dir.path().join("meta.db")).unwrap();
        assert!(cache.get("missing.rs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetaCache::open(&dir.path().join("meta.db")).unwrap();
        cache.put("a.rs", FileMeta { hash: "h1".into(), mtime_ms: 1, size: 1 }).await.unwrap();
        cache.put("a.rs", FileMeta { hash: "h2".into(), mtime_ms: 2, size: 2 }).await.unwrap();
        assert_eq!(cache.get("a.rs").await.unwrap().unwrap().hash, "h2");
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetaCache::open(&dir.path().join("meta.db")).unwrap();
        cache.put("a.rs", FileMeta { hash: "h1".into(), mtime_ms: 1, size: 1 }).await.unwrap();
        cache.delete("a.rs").await.unwrap();
        assert!(cache.get("a.rs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn all_keys_lists_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetaCache::open(&dir.path().join("meta.db")).unwrap();
        cache.put("a.rs", FileMeta { hash: "h1".into(), mtime_ms: 1, size: 1 }).await.unwrap();
        cache.put("b.rs", FileMeta { hash: "h2".into(), mtime_ms: 1, size: 1 }).await.unwrap();
        let mut keys = cache.all_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a.rs".to_string(), "b.rs".to_string()]);
    }
}
