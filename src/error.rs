//! Error types for the indexing and retrieval pipeline.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OsgrepError>;

/// Errors surfaced by any stage of the indexing/retrieval pipeline.
///
/// Variants map onto the propagation policy in the error-handling design:
/// per-file errors are logged and skipped by workers, store-level errors
/// abort and re-queue a flush, and the HTTP-facing variants carry their own
/// status code.
#[derive(Debug, Error)]
pub enum OsgrepError {
    #[error("not indexable: {path}")]
    NotIndexable { path: PathBuf },

    #[error("failed to read {path}: {cause}")]
    ReadFailed { path: PathBuf, cause: String },

    #[error("failed to parse {path}, falling back to line chunker: {cause}")]
    ParseFailed { path: PathBuf, cause: String },

    #[error("embedding failed for batch of {count} texts: {cause}")]
    EmbedFailed { count: usize, cause: String },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("store write failed: {cause}")]
    StoreWriteFailed { cause: String },

    #[error("writer lock contended after {attempts} attempts: {cause}")]
    LockContended { attempts: u32, cause: String },

    #[error("store schema mismatch: {detail}. Run `osgrep index --reset` to rebuild the store.")]
    SchemaMismatch { detail: String },

    #[error("operation canceled")]
    Canceled,

    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    #[error("request body too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("indexing in progress")]
    BusyIndexing,

    #[error("search timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("invalid config field {field}: {cause}")]
    ConfigError { field: String, cause: String },

    #[error("failed to parse config {path}: {cause}")]
    ConfigParseError { path: PathBuf, cause: String },

    #[error("lancedb connection failed: {cause}")]
    LanceDbConnectionFailed { cause: String },

    #[error("lancedb query failed: {cause}")]
    LanceDbQueryFailed { cause: String },

    #[error("sqlite error: {0}")]
    SqliteFailed(#[from] rusqlite::Error),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("tag extraction failed for {path}: {cause}")]
    TagExtractionFailed { path: PathBuf, cause: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OsgrepError {
    /// Maps a store/search-facing error onto the HTTP status code §6
    /// mandates for it. Errors without a defined HTTP mapping are treated
    /// as 500s.
    pub fn http_status(&self) -> u16 {
        match self {
            OsgrepError::InvalidPath { .. } => 400,
            OsgrepError::PayloadTooLarge { .. } => 413,
            OsgrepError::BusyIndexing => 503,
            OsgrepError::Timeout { .. } => 504,
            OsgrepError::Canceled => 504,
            _ => 500,
        }
    }
}
