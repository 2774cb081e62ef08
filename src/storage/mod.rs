//! Storage layer (C5, C6): the vector/FTS table and the file metadata cache.

pub mod lancedb_store;
pub mod meta_cache;
pub mod schema;

pub use lancedb_store::LanceDbStore;
pub use meta_cache::FileMeta;
pub use meta_cache::MetaCache;
