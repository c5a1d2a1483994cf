//! Workspace file discovery and content hashing
//!
//! Walks the workspace tree, applies the admission rules (ignored directory
//! components, ignore globs, extension allowlist, size cap), reads file bytes
//! and computes their SHA-256 fingerprint. Emission order is stable: files
//! are sorted by workspace-relative path so the Merkle tree sees the same
//! leaf order on every run.

use crate::error::{ChunkflowError, ScanError};
use crate::glob_utils::IgnoreGlobs;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// A file admitted by the scanner, with its content and fingerprint
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Path relative to the workspace root, forward slashes
    pub relative_path: String,
    /// Lowercase extension, if any
    pub extension: Option<String>,
    /// Lowercase language tag, or "unknown"
    pub language: String,
    /// Raw file bytes
    pub bytes: Vec<u8>,
    /// sha256 of the raw bytes, hex-lowercase
    pub hash: String,
    /// Size in bytes
    pub size: u64,
}

/// Result of one workspace scan
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Admitted files, sorted by relative path
    pub files: Vec<ScannedFile>,
    /// relative path -> content hash, same order as `files`
    pub file_hashes: BTreeMap<String, String>,
}

/// Walks a workspace and produces hashed file records
pub struct FileScanner {
    root: PathBuf,
    allowed_extensions: HashSet<String>,
    ignored_dirs: HashSet<String>,
    ignore_globs: IgnoreGlobs,
    max_file_size: u64,
}

impl FileScanner {
    pub fn new(
        root: impl AsRef<Path>,
        allowed_extensions: &[String],
        ignored_dirs: &[String],
        ignore_globs: &[String],
        max_file_size: u64,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            allowed_extensions: allowed_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            ignored_dirs: ignored_dirs.iter().cloned().collect(),
            ignore_globs: IgnoreGlobs::compile(ignore_globs),
            max_file_size,
        }
    }

    /// Walk the workspace and collect all admitted files
    ///
    /// The extension allowlist is authoritative: there is no binary
    /// detection. Unreadable admitted files fail the scan; anything under an
    /// ignored directory is skipped before it can be read.
    pub fn scan(&self) -> Result<ScanResult, ChunkflowError> {
        if !self.root.exists() {
            return Err(ScanError::RootNotFound(self.root.display().to_string()).into());
        }
        if !self.root.is_dir() {
            return Err(ScanError::NotADirectory(self.root.display().to_string()).into());
        }

        // Config globs and the ignored-dir set are the single source of
        // ignore truth, so gitignore-style filters stay off.
        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .build();

        let mut admitted: Vec<(String, PathBuf, u64)> = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();

            if path.is_dir() {
                continue;
            }

            let relative = match path.strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };

            if self.has_ignored_component(relative) {
                tracing::debug!("Skipping ignored directory file: {:?}", path);
                continue;
            }

            let relative_path = normalize_relative(relative);

            if self.ignore_globs.is_ignored(&relative_path) {
                tracing::debug!("Skipping glob-ignored file: {}", relative_path);
                continue;
            }

            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase());

            let admitted_ext = extension
                .as_deref()
                .map(|e| self.allowed_extensions.contains(e))
                .unwrap_or(false);
            if !admitted_ext {
                continue;
            }

            let size = match std::fs::metadata(path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    return Err(ScanError::FileReadFailed {
                        file: relative_path,
                        reason: e.to_string(),
                    }
                    .into());
                }
            };
            if size > self.max_file_size {
                tracing::debug!("Skipping large file ({} bytes): {}", size, relative_path);
                continue;
            }

            admitted.push((relative_path, path.to_path_buf(), size));
        }

        // Stable leaf order for the Merkle tree
        admitted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut files = Vec::with_capacity(admitted.len());
        let mut file_hashes = BTreeMap::new();

        for (relative_path, path, size) in admitted {
            // Admitted files must be readable: this is the fail-fast IoError
            // path for files that passed every filter.
            let bytes = std::fs::read(&path).map_err(|e| ScanError::FileReadFailed {
                file: relative_path.clone(),
                reason: e.to_string(),
            })?;

            let hash = hash_bytes(&bytes);
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase());
            let language = extension
                .as_deref()
                .and_then(crate::chunker::language_tag)
                .unwrap_or("unknown")
                .to_string();

            file_hashes.insert(relative_path.clone(), hash.clone());
            files.push(ScannedFile {
                path,
                relative_path,
                extension,
                language,
                bytes,
                hash,
                size,
            });
        }

        tracing::info!("Scan admitted {} files", files.len());
        Ok(ScanResult { files, file_hashes })
    }

    fn has_ignored_component(&self, relative: &Path) -> bool {
        relative.components().any(|c| {
            c.as_os_str()
                .to_str()
                .map(|name| self.ignored_dirs.contains(name))
                .unwrap_or(false)
        })
    }
}

fn normalize_relative(relative: &Path) -> String {
    let raw = relative.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        raw.into_owned()
    } else {
        raw.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// sha256 of raw bytes, hex-lowercase
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn scanner(root: &Path) -> FileScanner {
        FileScanner::new(
            root,
            &["rs".to_string(), "py".to_string(), "txt".to_string()],
            &[".git".to_string(), "node_modules".to_string()],
            &[],
            1024 * 1024,
        )
    }

    #[test]
    fn test_scan_nonexistent_root() {
        let s = scanner(Path::new("/nonexistent/path/12345"));
        assert!(s.scan().is_err());
    }

    #[test]
    fn test_scan_root_not_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        let s = scanner(&file);
        assert!(s.scan().is_err());
    }

    #[test]
    fn test_scan_empty_directory() {
        let dir = TempDir::new().unwrap();
        let result = scanner(dir.path()).scan().unwrap();
        assert!(result.files.is_empty());
        assert!(result.file_hashes.is_empty());
    }

    #[test]
    fn test_scan_orders_by_relative_path() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("zeta.rs"), "fn z() {}").unwrap();
        fs::write(dir.path().join("alpha.rs"), "fn a() {}").unwrap();
        fs::write(dir.path().join("sub").join("mid.rs"), "fn m() {}").unwrap();

        let result = scanner(dir.path()).scan().unwrap();
        let order: Vec<_> = result.files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(order, vec!["alpha.rs", "sub/mid.rs", "zeta.rs"]);
    }

    #[test]
    fn test_extension_allowlist_is_authoritative() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep.py"), "x = 1").unwrap();
        fs::write(dir.path().join("drop.exe"), [0u8, 1, 2, 3]).unwrap();
        fs::write(dir.path().join("noext"), "data").unwrap();

        let result = scanner(dir.path()).scan().unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, "keep.py");
    }

    #[test]
    fn test_ignored_directory_component() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("node_modules").join("pkg")).unwrap();
        fs::write(
            dir.path().join("node_modules").join("pkg").join("index.py"),
            "x",
        )
        .unwrap();
        fs::write(dir.path().join("main.py"), "y").unwrap();

        let result = scanner(dir.path()).scan().unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, "main.py");
    }

    #[test]
    fn test_ignore_glob_on_relative_path() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("gen")).unwrap();
        fs::write(dir.path().join("gen").join("out.py"), "x").unwrap();
        fs::write(dir.path().join("src.py"), "y").unwrap();

        let s = FileScanner::new(
            dir.path(),
            &["py".to_string()],
            &[],
            &["gen/**".to_string()],
            1024,
        );
        let result = s.scan().unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, "src.py");
    }

    #[test]
    fn test_size_cap() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("small.txt"), "tiny").unwrap();
        fs::write(dir.path().join("large.txt"), "a".repeat(4096)).unwrap();

        let s = FileScanner::new(
            dir.path(),
            &["txt".to_string()],
            &[],
            &[],
            100,
        );
        let result = s.scan().unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, "small.txt");
    }

    #[test]
    fn test_hash_is_sha256_of_bytes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();

        let result = scanner(dir.path()).scan().unwrap();
        // SHA-256 of the empty input
        assert_eq!(
            result.files[0].hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hashes_map_matches_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        fs::write(dir.path().join("b.rs"), "fn b() {}").unwrap();

        let result = scanner(dir.path()).scan().unwrap();
        assert_eq!(result.file_hashes.len(), 2);
        for file in &result.files {
            assert_eq!(result.file_hashes.get(&file.relative_path), Some(&file.hash));
        }
    }

    #[test]
    fn test_language_tag_assignment() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1").unwrap();
        fs::write(dir.path().join("b.txt"), "notes").unwrap();

        let result = scanner(dir.path()).scan().unwrap();
        let by_path: std::collections::HashMap<_, _> = result
            .files
            .iter()
            .map(|f| (f.relative_path.as_str(), f.language.as_str()))
            .collect();
        assert_eq!(by_path["a.py"], "python");
        assert_eq!(by_path["b.txt"], "text");
    }

    #[test]
    fn test_extension_case_insensitive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("UPPER.PY"), "x = 1").unwrap();

        let result = scanner(dir.path()).scan().unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].extension.as_deref(), Some("py"));
    }
}
