//! Structural boost multipliers (§4.10 step 6).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::Chunk;

const ANCHOR_FACTOR: f32 = 0.99;
const TEST_FACTOR: f32 = 0.5;
const DOC_CONFIG_FACTOR: f32 = 0.6;
const TOOLING_FACTOR: f32 = 0.35;
const GENERATED_FACTOR: f32 = 0.4;

static TEST_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(^|/)(tests?|__tests__|spec)(/|_|\.)|\.test\.|\.spec\.").unwrap());
static DOC_CONFIG_EXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(md|mdx|rst|txt|ya?ml|toml|json|ini|cfg)$").unwrap());
static TOOLING_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(^|/)(tools|scripts|experiments)(/|$)").unwrap());
static GENERATED_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(^|/)(generated|gen|\.generated|vendor|dist|build|target|node_modules)(/|$)|\.pb\.go$|_pb2\.py$")
        .unwrap()
});

/// The product of every structural multiplier that applies to `chunk`.
pub fn structural_factor(chunk: &Chunk) -> f32 {
    let mut factor = 1.0;
    if chunk.is_anchor {
        factor *= ANCHOR_FACTOR;
    }
    if TEST_PATH.is_match(&chunk.path) {
        factor *= TEST_FACTOR;
    }
    if DOC_CONFIG_EXT.is_match(&chunk.path) {
        factor *= DOC_CONFIG_FACTOR;
    }
    if TOOLING_PATH.is_match(&chunk.path) {
        factor *= TOOLING_FACTOR;
    }
    if GENERATED_PATH.is_match(&chunk.path) {
        factor *= GENERATED_FACTOR;
    }
    factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkType;
    use crate::types::Role;

    fn chunk(path: &str, is_anchor: bool) -> Chunk {
        Chunk {
            id: "1".into(),
            path: path.to_string(),
            hash: "h".into(),
            chunk_index: 0,
            start_line: 0,
            end_line: 1,
            content: String::new(),
            display_text: String::new(),
            context_prev: None,
            context_next: None,
            chunk_type: ChunkType::Function,
            is_anchor,
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

    #[test]
    fn plain_source_file_has_no_penalty() {
        assert_eq!(structural_factor(&chunk("src/lib.rs", false)), 1.0);
    }

    #[test]
    fn test_path_is_penalized() {
        assert_eq!(structural_factor(&chunk("tests/foo_test.rs", false)), TEST_FACTOR);
    }

    #[test]
    fn generated_vendor_path_is_heavily_penalized() {
        assert_eq!(structural_factor(&chunk("vendor/lib.rs", false)), GENERATED_FACTOR);
    }

    #[test]
    fn anchor_and_tooling_factors_compose() {
        let expected = ANCHOR_FACTOR * TOOLING_FACTOR;
        assert!((structural_factor(&chunk("scripts/run.rs", true)) - expected).abs() < 1e-6);
    }
}
