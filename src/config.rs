//! Configuration for the indexing and retrieval pipeline.
//!
//! Loaded from `<project_root>/.osgrep/config.json` (§6, reserved path) with
//! environment-variable overrides applied on top. Defaults are conservative
//! enough that a project with no config file at all still indexes and
//! searches correctly.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::OsgrepError;
use crate::error::Result;

pub const RRF_K: f32 = 60.0;
pub const PRE_K: usize = 500;
pub const RERANK_K: usize = 80;
pub const MAX_PER_FILE: usize = 3;
pub const MAX_CHUNK_LINES: usize = 200;
pub const MAX_CHUNK_CHARS: usize = 4000;
pub const OVERLAP_LINES: usize = 10;
pub const EMBED_BATCH_SIZE: usize = 64;
pub const W_FUSE: f32 = 0.5;

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(4)
}

fn default_watch_debounce_ms() -> u64 {
    250
}

fn default_search_timeout_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    /// `auto|native|poll|off`; `auto` falls back to polling on resource
    /// exhaustion per §4.9.
    pub mode: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: default_watch_debounce_ms(),
            mode: "auto".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chunk_lines: usize,
    pub max_chunk_chars: usize,
    pub overlap_lines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_lines: MAX_CHUNK_LINES,
            max_chunk_chars: MAX_CHUNK_CHARS,
            overlap_lines: OVERLAP_LINES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub pre_k: usize,
    pub rerank_k: usize,
    pub max_per_file: usize,
    pub rrf_k: f32,
    pub w_fuse: f32,
    #[serde(default = "default_search_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            pre_k: PRE_K,
            rerank_k: RERANK_K,
            max_per_file: MAX_PER_FILE,
            rrf_k: RRF_K,
            w_fuse: W_FUSE,
            timeout_ms: default_search_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dense_dimension: usize,
    pub late_dimension: usize,
    pub max_late_tokens: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dense_dimension: 1536,
            late_dimension: 48,
            max_late_tokens: 512,
            batch_size: EMBED_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OsgrepConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<usize>,
    pub watch: WatchConfig,
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for OsgrepConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            watch: WatchConfig::default(),
            chunking: ChunkingConfig::default(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            enabled: true,
        }
    }
}

impl OsgrepConfig {
    /// Resolves the effective worker pool size (§5): explicit config wins,
    /// else `OSGREP_WORKER_THREADS`, else `min(cores, 4)`.
    pub fn worker_threads(&self) -> usize {
        if let Some(n) = self.worker_threads {
            return n.max(1);
        }
        if let Ok(v) = std::env::var("OSGREP_WORKER_THREADS") {
            if let Ok(n) = v.parse::<usize>() {
                return n.max(1);
            }
        }
        default_worker_threads()
    }

    /// Loads `<project_root>/.osgrep/config.json`, applying env overrides.
    /// A missing file yields `Default::default()` with overrides applied.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(".osgrep").join("config.json");
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| OsgrepError::ConfigParseError {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| OsgrepError::ConfigParseError {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })
    }

    /// Applies the `OSGREP_*` environment variables from §6 on top of
    /// whatever was loaded from `config.json`.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OSGREP_WORKER_THREADS") {
            if let Ok(n) = v.parse() {
                self.worker_threads = Some(n);
            }
        }
        if let Ok(v) = std::env::var("OSGREP_WATCH") {
            self.watch.enabled = v == "1";
        }
        if let Ok(v) = std::env::var("OSGREP_WATCH_MODE") {
            self.watch.mode = v;
        }
        if let Ok(v) = std::env::var("OSGREP_WATCH_DEBOUNCE_MS") {
            if let Ok(n) = v.parse() {
                self.watch.debounce_ms = n;
            }
        }
        if let Ok(v) = std::env::var("OSGREP_SERVER_SEARCH_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.search.timeout_ms = n;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.search.pre_k == 0 {
            return Err(OsgrepError::ConfigError {
                field: "search.pre_k".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.embedding.dense_dimension == 0 {
            return Err(OsgrepError::ConfigError {
                field: "embedding.dense_dimension".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// `$HOME/.osgrep` — models/grammars caches, logs, and the server registry
/// (§6, process-wide; not tied to any single project root).
pub fn global_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".osgrep")
}

/// `<project_root>/.osgrep` — the store directory (§6).
pub fn store_dir(project_root: &Path) -> PathBuf {
    project_root.join(".osgrep")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        OsgrepConfig::default().validate().unwrap();
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = OsgrepConfig::load(dir.path()).unwrap();
        assert_eq!(config.search.pre_k, PRE_K);
    }

    #[test]
    fn env_override_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".osgrep")).unwrap();
        std::fs::write(
            dir.path().join(".osgrep").join("config.json"),
            r#"{"watch": {"enabled": false}}"#,
        )
        .unwrap();

        // SAFETY: test-local env var, no concurrent access to it elsewhere.
        unsafe {
            std::env::set_var("OSGREP_WATCH", "1");
        }
        let config = OsgrepConfig::load(dir.path()).unwrap();
        unsafe {
            std::env::remove_var("OSGREP_WATCH");
        }
        assert!(config.watch.enabled);
    }

    #[test]
    fn worker_threads_defaults_to_cores_capped_at_four() {
        let config = OsgrepConfig::default();
        assert!(config.worker_threads() >= 1);
        assert!(config.worker_threads() <= default_worker_threads());
    }
}
