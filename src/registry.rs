//! Process-wide server registry (§6, §9): `$HOME/.osgrep/registry.json`
//! lists `{pid, port, project_root, start_time}` per running server so a
//! CLI invocation in a project directory can find (or start) its server.
//! Grounded in the teacher's `dirs::home_dir()`-based config discovery
//! (`core/src/agent_registry.rs`) plus its tmp-file-then-rename write
//! pattern (`core/ignore_service/agent_ignore.rs`).

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::OsgrepError;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryEntry {
    pub pid: u32,
    pub port: u16,
    pub project_root: PathBuf,
    pub start_time: u64,
}

/// `$HOME/.osgrep/registry.json` (§6, §9).
pub fn registry_path() -> PathBuf {
    crate::config::global_dir().join("registry.json")
}

/// Reads the registry, dropping entries whose pid is no longer alive.
pub fn read_live(path: &Path) -> Result<Vec<RegistryEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<RegistryEntry> = serde_json::from_str(&text).map_err(|e| OsgrepError::ConfigParseError {
        path: path.to_path_buf(),
        cause: e.to_string(),
    })?;
    Ok(entries.into_iter().filter(|e| process_alive(e.pid)).collect())
}

/// Finds the live entry for `project_root`, if any server is already
/// running there.
pub fn find_for_root(path: &Path, project_root: &Path) -> Result<Option<RegistryEntry>> {
    let entries = read_live(path)?;
    Ok(entries.into_iter().find(|e| e.project_root == project_root))
}

/// Registers (or replaces) this process's entry, pruning any dead ones.
/// Written via a tmp-file-then-rename so concurrent readers never observe
/// a partially written file.
pub fn register(path: &Path, entry: RegistryEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut entries = read_live(path)?;
    entries.retain(|e| e.project_root != entry.project_root);
    entries.push(entry);

    let json = serde_json::to_string_pretty(&entries).map_err(|e| OsgrepError::ConfigError {
        field: "registry".to_string(),
        cause: e.to_string(),
    })?;

    let tmp_path = path.with_extension("json.tmp");
    {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Removes this process's entry on graceful shutdown.
pub fn unregister(path: &Path, pid: u32) -> Result<()> {
    let mut entries = read_live(path)?;
    let before = entries.len();
    entries.retain(|e| e.pid != pid);
    if entries.len() == before {
        return Ok(());
    }
    let json = serde_json::to_string_pretty(&entries).map_err(|e| OsgrepError::ConfigError {
        field: "registry".to_string(),
        cause: e.to_string(),
    })?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // signal 0: no-op existence probe (POSIX kill(2)).
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32, port: u16, root: &str) -> RegistryEntry {
        RegistryEntry { pid, port, project_root: PathBuf::from(root), start_time: 0 }
    }

    #[test]
    fn register_then_find_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        register(&path, entry(std::process::id(), 9000, "/proj")).unwrap();
        let found = find_for_root(&path, Path::new("/proj")).unwrap();
        assert_eq!(found.unwrap().port, 9000);
    }

    #[test]
    fn register_replaces_existing_entry_for_same_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let pid = std::process::id();
        register(&path, entry(pid, 9000, "/proj")).unwrap();
        register(&path, entry(pid, 9001, "/proj")).unwrap();
        let entries = read_live(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].port, 9001);
    }

    #[test]
    fn unregister_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let pid = std::process::id();
        register(&path, entry(pid, 9000, "/proj")).unwrap();
        unregister(&path, pid).unwrap();
        assert!(read_live(&path).unwrap().is_empty());
    }

    #[test]
    fn dead_pid_entries_are_pruned_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        // A pid essentially guaranteed not to be alive.
        register(&path, entry(u32::MAX - 1, 9000, "/proj")).unwrap();
        assert!(read_live(&path).unwrap().is_empty());
    }
}
