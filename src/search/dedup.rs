//! Dedup and per-file diversification (§4.10 steps 7-8), grounded in the
//! sibling `cocode-rs` retrieval crate's `search/dedup.rs` overlap logic,
//! adapted from byte-range overlap to this spec's >50%-of-shorter-range rule.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::types::SearchResult;

/// Drops exact-id duplicates, then collapses same-path results overlapping
/// by more than 50% of the shorter range, keeping the higher-scored one.
pub fn deduplicate(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen_ids = HashSet::new();
    let mut by_id: Vec<SearchResult> = Vec::with_capacity(results.len());
    for r in results {
        if seen_ids.insert(r.chunk.id.clone()) {
            by_id.push(r);
        }
    }

    let mut by_path: HashMap<String, Vec<SearchResult>> = HashMap::new();
    for r in by_id {
        by_path.entry(r.chunk.path.clone()).or_default().push(r);
    }

    let mut out = Vec::new();
    for (_, mut group) in by_path {
        group.sort_by_key(|r| r.chunk.start_line);
        let mut kept: Vec<SearchResult> = Vec::with_capacity(group.len());
        for candidate in group.drain(..) {
            if let Some(last) = kept.last_mut() {
                if overlaps_majority(last, &candidate) {
                    if candidate.score > last.score {
                        *last = candidate;
                    }
                    continue;
                }
            }
            kept.push(candidate);
        }
        out.extend(kept);
    }
    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    out
}

fn overlaps_majority(a: &SearchResult, b: &SearchResult) -> bool {
    let start = a.chunk.start_line.max(b.chunk.start_line);
    let end = a.chunk.end_line.min(b.chunk.end_line);
    if end < start {
        return false;
    }
    let overlap = (end - start + 1) as f32;
    let shorter = a.chunk.num_lines().min(b.chunk.num_lines()) as f32;
    overlap > shorter * 0.5
}

/// Walks `results` (already sorted by score) and accepts at most
/// `max_per_file` results per path, stopping once `top_k` is reached
/// (§4.10 step 8).
pub fn diversify(results: Vec<SearchResult>, max_per_file: usize, top_k: usize) -> Vec<SearchResult> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(top_k.min(results.len()));
    for r in results {
        if out.len() >= top_k {
            break;
        }
        let count = counts.entry(r.chunk.path.clone()).or_insert(0);
        if *count >= max_per_file {
            continue;
        }
        *count += 1;
        out.push(r);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkType;
    use crate::types::Confidence;
    use crate::types::Role;

    fn chunk(id: &str, path: &str, start: u32, end: u32) -> crate::types::Chunk {
        crate::types::Chunk {
            id: id.to_string(),
            path: path.to_string(),
            hash: "h".to_string(),
            chunk_index: 0,
            start_line: start,
            end_line: end,
            content: String::new(),
            display_text: String::new(),
            context_prev: None,
            context_next: None,
            chunk_type: ChunkType::Function,
            is_anchor: false,
            parent_symbol: None,
            role: Role::Implementation,
            complexity: 1,
            is_exported: false,
            defined_symbols: vec![],
            referenced_symbols: vec![],
            imports: vec![],
            exports: vec![],
        }
    }

    fn result(id: &str, path: &str, start: u32, end: u32, score: f32) -> SearchResult {
        SearchResult {
            chunk: chunk(id, path, start, end),
            score,
            score_out: score,
            confidence: Confidence::High,
        }
    }

    #[test]
    fn exact_duplicate_ids_collapse() {
        let results = vec![result("1", "a.rs", 0, 5, 0.9), result("1", "a.rs", 0, 5, 0.9)];
        assert_eq!(deduplicate(results).len(), 1);
    }

    #[test]
    fn majority_overlap_keeps_higher_score() {
        let results = vec![result("1", "a.rs", 0, 10, 0.5), result("2", "a.rs", 2, 8, 0.9)];
        let out = deduplicate(results);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chunk.id, "2");
    }

    #[test]
    fn non_overlapping_results_both_kept() {
        let results = vec![result("1", "a.rs", 0, 5, 0.5), result("2", "a.rs", 20, 25, 0.9)];
        assert_eq!(deduplicate(results).len(), 2);
    }

    #[test]
    fn diversify_caps_per_file() {
        let results = vec![
            result("1", "a.rs", 0, 1, 0.9),
            result("2", "a.rs", 10, 11, 0.8),
            result("3", "a.rs", 20, 21, 0.7),
            result("4", "a.rs", 30, 31, 0.6),
            result("5", "b.rs", 0, 1, 0.5),
        ];
        let out = diversify(results, 3, 10);
        assert_eq!(out.iter().filter(|r| r.chunk.path == "a.rs").count(), 3);
        assert_eq!(out.len(), 4);
    }
}
