//! File snapshot (C2, §4.2).

use std::path::Path;

use crate::error::OsgrepError;
use crate::error::Result;
use crate::types::content_hash;

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub bytes: Vec<u8>,
    pub mtime_ms: i64,
    pub size: u64,
    pub hash: String,
}

/// Single open/stat/read of `abs_path`. The hash is content-only,
/// deterministic, and independent of the path (§4.2).
pub fn snapshot(abs_path: &Path) -> Result<Snapshot> {
    let bytes = std::fs::read(abs_path).map_err(|e| OsgrepError::ReadFailed {
        path: abs_path.to_path_buf(),
        cause: e.to_string(),
    })?;
    let meta = std::fs::metadata(abs_path).map_err(|e| OsgrepError::ReadFailed {
        path: abs_path.to_path_buf(),
        cause: e.to_string(),
    })?;
    let mtime_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let hash = content_hash(&bytes);
    Ok(Snapshot {
        size: bytes.len() as u64,
        hash,
        bytes,
        mtime_ms,
    })
}

/// NUL-byte heuristic over the first few KiB.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_content_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "fn main() {}").unwrap();
        let snap = snapshot(&file).unwrap();
        assert_eq!(snap.bytes, b"fn main() {}");
        assert_eq!(snap.hash, content_hash(b"fn main() {}"));
        assert!(snap.size > 0);
    }

    #[test]
    fn detects_binary_nul_bytes() {
        assert!(looks_binary(b"abc\0def"));
        assert!(!looks_binary(b"abcdef"));
    }

    #[test]
    fn missing_file_is_read_failed() {
        let dir = tempfile::tempdir().unwrap();
        let err = snapshot(&dir.path().join("missing.rs")).unwrap_err();
        assert!(matches!(err, OsgrepError::ReadFailed { .. }));
    }
}
