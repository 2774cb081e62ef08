//! Reciprocal Rank Fusion (§4.10 step 3), grounded in the sibling
//! `cocode-rs` retrieval crate's `search/fusion.rs`, simplified to the two
//! sources (ANN, FTS) this spec's retriever fuses.

use std::collections::HashMap;

/// `rrf(d) = Σ 1/(K + rank + 1)` over every source `d` appears in.
pub fn reciprocal_rank_fusion(sources: &[&[String]], k: f32) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    for source in sources {
        for (rank, id) in source.iter().enumerate() {
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k + rank as f32 + 1.0);
        }
    }
    let mut fused: Vec<(String, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_in_both_sources_outranks_single_source() {
        let v: Vec<String> = vec!["a".into(), "b".into()];
        let f: Vec<String> = vec!["b".into(), "c".into()];
        let fused = reciprocal_rank_fusion(&[&v, &f], 60.0);
        let rank_of = |id: &str| fused.iter().position(|(d, _)| d == id).unwrap();
        assert_eq!(rank_of("b"), 0);
    }

    #[test]
    fn empty_sources_yield_empty_fusion() {
        let empty: Vec<String> = vec![];
        let fused = reciprocal_rank_fusion(&[&empty, &empty], 60.0);
        assert!(fused.is_empty());
    }
}
