//! Chunker (C3, §4.3): tree-sitter parse into semantic chunks with
//! symbol/role/complexity metadata, with a line-based fallback for
//! languages without a grammar here.

mod chunker;
mod languages;

pub use chunker::FileMetadata;
pub use chunker::make_anchor_chunk;

use crate::config::ChunkingConfig;
use crate::types::Chunk;

/// Entry point: relative path + full content string + detected language
/// (if any) → `(chunks, metadata)`, with the anchor chunk appended last
/// (§4.3 step 4, I7).
pub fn chunk_file(
    path: &str,
    content: &str,
    language: Option<&str>,
    hash: &str,
    config: &ChunkingConfig,
) -> (Vec<Chunk>, FileMetadata) {
    let (mut chunks, metadata) = match language.and_then(|lang| {
        chunker::chunk_with_ast(path, content, lang, hash, config)
    }) {
        Some(result) => result,
        None => chunker::chunk_with_fallback(path, content, hash, config),
    };
    chunks.push(make_anchor_chunk(path, hash, &metadata));
    (chunks, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_anchor_chunk_per_file() {
        let config = ChunkingConfig::default();
        let (chunks, _meta) = chunk_file(
            "src/a.rs",
            "pub fn foo() {}\nfn bar() { foo(); }\n",
            Some("rust"),
            "h1",
            &config,
        );
        assert_eq!(chunks.iter().filter(|c| c.is_anchor).count(), 1);
    }

    #[test]
    fn unsupported_language_still_chunks_via_fallback() {
        let config = ChunkingConfig::default();
        let (chunks, _meta) = chunk_file("a.proto", "message Foo {}\n", Some("proto"), "h1", &config);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().any(|c| c.is_anchor));
    }
}
