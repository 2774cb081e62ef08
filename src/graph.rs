//! Call-graph builder (C11, §4.11): `trace(symbol, ...)` answered
//! entirely out of the C5 symbol-array columns already on each chunk row,
//! with no separate graph index. Grounded in the sibling
//! `cocode-rs/retrieval` crate's `repomap/graph.rs` symbol-lookup
//! pattern, simplified from its full PageRank-backed repo map down to
//! this spec's direct caller/callee trace.

use std::collections::HashSet;

use crate::error::Result;
use crate::storage::LanceDbStore;
use crate::types::Chunk;
use crate::types::TraceCaller;
use crate::types::TraceCenter;
use crate::types::TraceResult;

const MAX_CALLERS: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    pub depth: usize,
    pub callers_only: bool,
    pub callees_only: bool,
    pub path_prefix: Option<String>,
}

impl TraceOptions {
    pub fn with_defaults() -> Self {
        Self { depth: 1, ..Default::default() }
    }
}

/// `trace(symbol, {depth=1, callers_only?, callees_only?, path_prefix?}) →
/// {center, callers[], callees[]}` (§4.11).
pub async fn trace(store: &LanceDbStore, symbol: &str, opts: &TraceOptions) -> Result<TraceResult> {
    let depth = opts.depth.max(1);

    let definitions = store.find_by_symbol("defined_symbols", symbol, 50).await?;
    let center_chunk = definitions
        .iter()
        .find(|c| opts.path_prefix.as_deref().is_none_or(|prefix| c.path.starts_with(prefix)))
        .cloned();

    let center = center_chunk.as_ref().map(|c| TraceCenter {
        file: c.path.clone(),
        line: c.start_line as u32,
        role: c.role,
    });

    let callers = if opts.callees_only {
        Vec::new()
    } else {
        find_callers(store, symbol).await?
    };

    let callees = if opts.callers_only {
        Vec::new()
    } else if let Some(center_chunk) = &center_chunk {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(symbol.to_string());
        let mut frontier: Vec<String> = center_chunk.referenced_symbols.clone();
        let mut result: Vec<String> = Vec::new();

        for _ in 0..depth {
            let mut next_frontier = Vec::new();
            for candidate in frontier {
                if !visited.insert(candidate.clone()) {
                    continue;
                }
                if !has_internal_definition(store, &candidate).await? {
                    continue;
                }
                result.push(candidate.clone());
                if depth > 1 {
                    let defs = store.find_by_symbol("defined_symbols", &candidate, 1).await?;
                    if let Some(def) = defs.first() {
                        next_frontier.extend(def.referenced_symbols.clone());
                    }
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }
        result
    } else {
        Vec::new()
    };

    Ok(TraceResult { symbol: symbol.to_string(), center, callers, callees })
}

async fn find_callers(store: &LanceDbStore, symbol: &str) -> Result<Vec<TraceCaller>> {
    let rows = store.find_by_symbol("referenced_symbols", symbol, MAX_CALLERS * 4).await?;
    let mut callers = Vec::new();
    for chunk in rows {
        if defines(&chunk, symbol) {
            continue;
        }
        callers.push(TraceCaller {
            symbol: chunk.parent_symbol.clone().unwrap_or_else(|| chunk.path.clone()),
            file: chunk.path.clone(),
            line: chunk.start_line as u32,
        });
        if callers.len() >= MAX_CALLERS {
            break;
        }
    }
    Ok(callers)
}

fn defines(chunk: &Chunk, symbol: &str) -> bool {
    chunk.defined_symbols.iter().any(|s| s == symbol)
}

async fn has_internal_definition(store: &LanceDbStore, symbol: &str) -> Result<bool> {
    let rows = store.find_by_symbol("defined_symbols", symbol, 1).await?;
    Ok(!rows.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking;
    use crate::config::ChunkingConfig;

    async fn store_with_two_functions() -> LanceDbStore {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceDbStore::open(dir.path(), 4).await.unwrap();
        let content = "pub fn caller() { callee(); }\npub fn callee() {}\n";
        let (chunks, _) = chunking::chunk_file("a.rs", content, Some("rust"), "hash1", &ChunkingConfig::default());
        let payloads = vec![None; chunks.len()];
        store.insert_batch(&chunks, &payloads).await.unwrap();
        store
    }

    #[tokio::test]
    async fn trace_missing_symbol_returns_no_center() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceDbStore::open(dir.path(), 4).await.unwrap();
        let result = trace(&store, "nonexistent", &TraceOptions::with_defaults()).await.unwrap();
        assert!(result.center.is_none());
        assert!(result.callers.is_empty());
        assert!(result.callees.is_empty());
    }

    #[tokio::test]
    async fn trace_finds_center_for_defined_symbol() {
        let store = store_with_two_functions().await;
        let result = trace(&store, "callee", &TraceOptions::with_defaults()).await.unwrap();
        assert!(result.center.is_some());
    }

    #[tokio::test]
    async fn callers_only_skips_callee_lookup() {
        let store = store_with_two_functions().await;
        let opts = TraceOptions { depth: 1, callers_only: true, callees_only: false, path_prefix: None };
        let result = trace(&store, "callee", &opts).await.unwrap();
        assert!(result.callees.is_empty());
    }
}
