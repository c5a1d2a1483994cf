/// On-disk state locations for chunkflow
///
/// The chunk cache database and per-workspace Merkle snapshots live under a
/// single chunkflow-scoped cache directory, resolved per the XDG Base
/// Directory specification with a home-relative fallback.
use std::path::PathBuf;

pub struct PlatformPaths;

impl PlatformPaths {
    /// Root of chunkflow's cache state: `$XDG_CACHE_HOME/chunkflow`, or
    /// `~/.cache/chunkflow` when XDG is unset
    pub fn project_cache_dir() -> PathBuf {
        std::env::var("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".cache")))
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("chunkflow")
    }

    /// Default chunk cache database path
    pub fn default_cache_db_path() -> PathBuf {
        Self::project_cache_dir().join("chunk_cache.sqlite3")
    }

    /// Default Merkle snapshot path for a workspace
    ///
    /// Snapshots are namespaced by a short hash of the workspace path so
    /// multiple workspaces never share state.
    pub fn merkle_snapshot_path(workspace: &str) -> PathBuf {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(workspace.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self::project_cache_dir()
            .join(&digest[..16])
            .join("merkle-state.json")
    }
}
