//! Path & ignore resolver (C1, §4.1).
//!
//! Locates the project root and builds the predicate that decides which
//! files are candidates for indexing at all, independent of content.

use std::path::Path;
use std::path::PathBuf;

use ignore::WalkBuilder;
use ignore::gitignore::Gitignore;
use ignore::gitignore::GitignoreBuilder;

/// Marker files/directories that identify a project root when walking
/// ancestors from the current directory.
const ROOT_MARKERS: &[&str] = &[".git", ".osgrep", "Cargo.toml", "package.json", "go.mod"];

/// Base ignore patterns applied regardless of `.gitignore` contents:
/// lockfiles, build outputs, VCS directories, and obvious secrets.
const BASE_IGNORE_PATTERNS: &[&str] = &[
    ".git/",
    ".osgrep/",
    "node_modules/",
    "target/",
    "dist/",
    "build/",
    ".next/",
    "vendor/",
    "*.lock",
    "Cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "*.min.js",
    "*.map",
    "*.env",
    "*.pem",
    "*.key",
];

/// Extensions considered large/binary up front, skipped without reading.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svg", "pdf", "zip", "tar", "gz", "bz2",
    "7z", "rar", "exe", "dll", "so", "dylib", "bin", "wasm", "woff", "woff2", "ttf", "otf", "mp3",
    "mp4", "mov", "avi", "sqlite", "db",
];

/// Extensions allow-listed as indexable code/config/doc content.
const CODE_EXTENSIONS: &[&str] = &[
    "rs", "go", "py", "java", "ts", "tsx", "js", "jsx", "mjs", "cjs", "c", "h", "cpp", "cc", "hpp",
    "cs", "rb", "php", "swift", "kt", "scala", "lua", "sh", "bash", "sql", "md", "mdx", "json",
    "yaml", "yml", "toml", "xml", "html", "css", "scss",
];

pub const MAX_INDEXABLE_BYTES: u64 = 2 * 1024 * 1024;

/// Walks ancestors of `start` for a root marker; falls back to `start`
/// itself if none is found.
pub fn find_project_root(start: &Path) -> PathBuf {
    let mut dir = if start.is_dir() {
        start.to_path_buf()
    } else {
        start.parent().map(Path::to_path_buf).unwrap_or_default()
    };
    loop {
        if ROOT_MARKERS.iter().any(|m| dir.join(m).exists()) {
            return dir;
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => return start.to_path_buf(),
        }
    }
}

/// The ignore predicate: base patterns, `.gitignore`, and `.osgrepignore`
/// (§4.1). Operates on repo-relative POSIX paths.
pub struct IgnoreRules {
    base: Gitignore,
    root: PathBuf,
}

impl IgnoreRules {
    pub fn load(root: &Path) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in BASE_IGNORE_PATTERNS {
            let _ = builder.add_line(None, pattern);
        }
        let gitignore_path = root.join(".gitignore");
        if gitignore_path.exists() {
            let _ = builder.add(gitignore_path);
        }
        let osgrepignore_path = root.join(".osgrepignore");
        if osgrepignore_path.exists() {
            let _ = builder.add(osgrepignore_path);
        }
        let base = builder.build().unwrap_or_else(|_| Gitignore::empty());
        Self {
            base,
            root: root.to_path_buf(),
        }
    }

    pub fn is_ignored(&self, abs_path: &Path, is_dir: bool) -> bool {
        self.base.matched(abs_path, is_dir).is_ignore()
    }

    /// An "indexable" file per §4.1: allow-listed extension, size within
    /// budget, non-empty, and the first few KiB contain no NUL byte.
    pub fn is_indexable(&self, abs_path: &Path) -> bool {
        if self.is_ignored(abs_path, false) {
            return false;
        }
        let Some(ext) = abs_path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        if BINARY_EXTENSIONS.contains(&ext.as_str()) {
            return false;
        }
        if !CODE_EXTENSIONS.contains(&ext.as_str()) {
            return false;
        }
        let Ok(meta) = std::fs::metadata(abs_path) else {
            return false;
        };
        if meta.len() == 0 || meta.len() > MAX_INDEXABLE_BYTES {
            return false;
        }
        !has_early_nul(abs_path)
    }

    /// Streams every non-directory path under the root through the ignore
    /// walker, yielding absolute paths. Directory pruning happens inside
    /// the walker so ignored subtrees are never descended into.
    pub fn walk(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .parents(false);
        for entry in builder.build().flatten() {
            let path = entry.path();
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) && self.is_indexable(path)
            {
                out.push(path.to_path_buf());
            }
        }
        out
    }
}

fn has_early_nul(path: &Path) -> bool {
    use std::io::Read;
    let Ok(mut file) = std::fs::File::open(path) else {
        return true;
    };
    let mut buf = [0u8; 8192];
    let Ok(n) = file.read(&mut buf) else {
        return true;
    };
    buf[..n].contains(&0)
}

/// Detects the chunker's language identifier from a file extension.
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "rs" => "rust",
        "go" => "go",
        "py" => "python",
        "java" => "java",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        "lua" => "lua",
        "sh" | "bash" => "bash",
        "sql" => "sql",
        "md" | "mdx" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "html" => "html",
        "css" | "scss" => "css",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_root_by_marker() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested), dir.path());
    }

    #[test]
    fn ignores_base_patterns() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        let rules = IgnoreRules::load(dir.path());
        assert!(rules.is_ignored(&dir.path().join("node_modules/x.js"), false));
    }

    #[test]
    fn rejects_oversized_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.rs");
        fs::write(&empty, "").unwrap();
        let rules = IgnoreRules::load(dir.path());
        assert!(!rules.is_indexable(&empty));

        let big = dir.path().join("big.rs");
        fs::write(&big, vec![b'a'; (MAX_INDEXABLE_BYTES + 1) as usize]).unwrap();
        assert!(!rules.is_indexable(&big));
    }

    #[test]
    fn rejects_non_allowlisted_extension() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("a.exe");
        fs::write(&bin, "whatever").unwrap();
        let rules = IgnoreRules::load(dir.path());
        assert!(!rules.is_indexable(&bin));
    }

    #[test]
    fn accepts_small_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        fs::write(&file, "fn main() {}").unwrap();
        let rules = IgnoreRules::load(dir.path());
        assert!(rules.is_indexable(&file));
    }

    #[test]
    fn detects_languages() {
        assert_eq!(detect_language(Path::new("a.rs")), Some("rust"));
        assert_eq!(detect_language(Path::new("a.ts")), Some("typescript"));
        assert_eq!(detect_language(Path::new("a.unknown")), None);
    }

    #[test]
    fn respects_osgrepignore() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".osgrepignore"), "secret/\n").unwrap();
        fs::create_dir_all(dir.path().join("secret")).unwrap();
        fs::write(dir.path().join("secret/a.rs"), "fn f(){}").unwrap();
        let rules = IgnoreRules::load(dir.path());
        assert!(!rules.is_indexable(&dir.path().join("secret/a.rs")));
    }
}
