//! Core data types shared across the chunker, store, and retriever.

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// Chunk type tag assigned by the chunker (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Class,
    Method,
    Interface,
    TypeAlias,
    Anchor,
    Other,
}

impl ChunkType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkType::Function => "function",
            ChunkType::Class => "class",
            ChunkType::Method => "method",
            ChunkType::Interface => "interface",
            ChunkType::TypeAlias => "type_alias",
            ChunkType::Anchor => "anchor",
            ChunkType::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "function" => ChunkType::Function,
            "class" => ChunkType::Class,
            "method" => ChunkType::Method,
            "interface" => ChunkType::Interface,
            "type_alias" => ChunkType::TypeAlias,
            "anchor" => ChunkType::Anchor,
            _ => ChunkType::Other,
        }
    }
}

/// Role tag assigned by the chunker from complexity and structure (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Orchestration,
    Definition,
    Implementation,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Orchestration => "ORCHESTRATION",
            Role::Definition => "DEFINITION",
            Role::Implementation => "IMPLEMENTATION",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ORCHESTRATION" => Role::Orchestration,
            "DEFINITION" => Role::Definition,
            _ => Role::Implementation,
        }
    }
}

/// The unit of retrieval: a contiguous byte range of one source file (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Globally unique identifier (I1).
    pub id: String,
    /// Repo-relative POSIX path.
    pub path: String,
    /// Content hash of the enclosing file at last indexing time (I3).
    pub hash: String,
    /// Chunk index within its file; anchor chunks historically used -1 but
    /// `is_anchor` is the only field callers may rely on (§9 open question).
    pub chunk_index: i32,
    /// 0-based, inclusive line range (I2).
    pub start_line: u32,
    pub end_line: u32,
    /// Raw textual content.
    pub content: String,
    /// `content` prefixed with breadcrumb/imports for embedding context.
    pub display_text: String,
    pub context_prev: Option<String>,
    pub context_next: Option<String>,
    pub chunk_type: ChunkType,
    pub is_anchor: bool,
    /// Names of enclosing chunk-producing nodes, outermost first.
    pub parent_symbol: Option<String>,
    pub role: Role,
    /// 1 + count of branch/loop/logical-operator nodes.
    pub complexity: i32,
    pub is_exported: bool,
    pub defined_symbols: Vec<String>,
    pub referenced_symbols: Vec<String>,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
}

impl Chunk {
    pub fn num_lines(&self) -> u32 {
        self.end_line - self.start_line + 1
    }
}

/// Vector payload materialized for one chunk row (§3).
#[derive(Debug, Clone)]
pub struct VectorPayload {
    /// Dense embedding, L2-normalized, dimension `D_dense`.
    pub dense: Vec<f32>,
    /// Late-interaction matrix, `[T x D_late]` INT8, row-major.
    pub colbert: Vec<i8>,
    /// Per-document dequantization scale for `colbert` (max-abs, §4.10).
    pub colbert_scale: f32,
    /// Token IDs parallel to `colbert`'s T rows.
    pub doc_token_ids: Vec<u32>,
}

/// Content-only SHA-256 hash, hex-encoded (C2's `snapshot` hash; no path
/// component per §4.2).
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// A single search query as it flows into the retriever (§4.10).
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
    pub rerank: bool,
    pub path_prefix: Option<String>,
    pub def_filter: Option<String>,
    pub ref_filter: Option<String>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            top_k: 10,
            rerank: true,
            path_prefix: None,
            def_filter: None,
            ref_filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Categorical confidence from a calibrated score (§4.10 step 9).
    pub fn from_score(score_out: f32) -> Self {
        if score_out > 0.8 {
            Confidence::High
        } else if score_out > 0.5 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// One ranked result from the retriever.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
    pub score_out: f32,
    pub confidence: Confidence,
}

/// Result of a `trace(symbol)` call (§4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceCenter {
    pub file: String,
    pub line: u32,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceCaller {
    pub symbol: String,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceResult {
    pub symbol: String,
    pub center: Option<TraceCenter>,
    pub callers: Vec<TraceCaller>,
    pub callees: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_chunk(id: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            path: "src/a.ts".to_string(),
            hash: "deadbeef".to_string(),
            chunk_index: 0,
            start_line: 0,
            end_line: 2,
            content: "function foo() {}".to_string(),
            display_text: "src/a.ts\nfunction foo() {}".to_string(),
            context_prev: None,
            context_next: None,
            chunk_type: ChunkType::Function,
            is_anchor: false,
            parent_symbol: None,
            role: Role::Implementation,
            complexity: 1,
            is_exported: true,
            defined_symbols: vec!["foo".to_string()],
            referenced_symbols: vec![],
            imports: vec![],
            exports: vec!["foo".to_string()],
        }
    }

    #[test]
    fn num_lines_is_inclusive() {
        let chunk = make_test_chunk("1");
        assert_eq!(chunk.num_lines(), 3);
    }

    #[test]
    fn content_hash_is_deterministic_and_path_independent() {
        let a = content_hash(b"fn foo() {}");
        let b = content_hash(b"fn foo() {}");
        assert_eq!(a, b);
        assert_ne!(a, content_hash(b"fn bar() {}"));
    }

    #[test]
    fn confidence_thresholds() {
        assert_eq!(Confidence::from_score(0.9), Confidence::High);
        assert_eq!(Confidence::from_score(0.6), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.3), Confidence::Low);
    }

    #[test]
    fn chunk_type_round_trips() {
        for ty in [
            ChunkType::Function,
            ChunkType::Class,
            ChunkType::Method,
            ChunkType::Interface,
            ChunkType::TypeAlias,
            ChunkType::Anchor,
            ChunkType::Other,
        ] {
            assert_eq!(ChunkType::from_str(ty.as_str()), ty);
        }
    }
}
