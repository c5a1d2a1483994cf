/// Configuration for the chunking pipeline
///
/// The pipeline consumes a frozen `Config` supplied at construction. Loading
/// supports the usual priority: environment variables > config file > defaults.
use crate::error::{ChunkflowError, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Absolute path of the workspace to process
    #[serde(default)]
    pub workspace_path: PathBuf,

    /// File extensions admitted for chunking (lowercase, no dot)
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Double-star globs matched against workspace-relative paths
    #[serde(default)]
    pub ignore_globs: Vec<String>,

    /// Directory names skipped wherever they appear in the tree
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,

    /// Maximum file size in bytes; larger files are skipped
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Line budget per chunk for the line chunker
    #[serde(default = "default_lines_per_chunk")]
    pub lines_per_chunk: usize,

    /// Hard byte cap on a single chunk's content
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,

    /// Dispatcher worker pool degree
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum chunks per sink call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-file processing timeout in milliseconds
    #[serde(default = "default_file_timeout_ms")]
    pub file_timeout_ms: u64,

    /// Chunk cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Embedding sink configuration
    #[serde(default)]
    pub sink: SinkConfig,
}

/// Chunk cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Total payload size ceiling in bytes
    #[serde(default = "default_cache_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Entry count ceiling
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: u64,

    /// Entry time-to-live in hours
    #[serde(default = "default_cache_ttl_hours")]
    pub ttl_hours: u64,

    /// Gzip oversize payloads before storing
    #[serde(default = "default_cache_compression")]
    pub compression: bool,
}

/// Embedding sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Embed endpoint URL
    #[serde(default)]
    pub endpoint_embed: String,

    /// Upsert endpoint URL
    #[serde(default)]
    pub endpoint_upsert: String,

    /// Bearer token presented on every call
    #[serde(default)]
    pub token: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_sink_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum retry attempts for transient failures
    #[serde(default = "default_sink_max_retries")]
    pub max_retries: u32,

    /// Base retry delay in milliseconds
    #[serde(default = "default_sink_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt
    #[serde(default = "default_sink_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Poll interval for async embed jobs, in milliseconds
    #[serde(default = "default_sink_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum status polls before an async embed job is abandoned
    #[serde(default = "default_sink_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

// Default value functions

fn default_allowed_extensions() -> Vec<String> {
    [
        "py", "java", "js", "mjs", "cjs", "jsx", "ts", "tsx", "c", "h", "cpp", "cc", "cxx",
        "hpp", "cs", "go", "rs", "php", "json", "yaml", "yml", "xml", "html", "css", "md",
        "txt", "sh", "sql", "toml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ignored_dirs() -> Vec<String> {
    [
        ".git",
        "node_modules",
        "target",
        "dist",
        "build",
        "__pycache__",
        ".venv",
        "vendor",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10 MB
}

fn default_lines_per_chunk() -> usize {
    50
}

fn default_max_chunk_bytes() -> usize {
    crate::types::MAX_CHUNK_BYTES
}

fn default_concurrency() -> usize {
    1
}

fn default_batch_size() -> usize {
    100
}

fn default_file_timeout_ms() -> u64 {
    30_000
}

fn default_db_path() -> PathBuf {
    crate::paths::PlatformPaths::default_cache_db_path()
}

fn default_cache_max_size_bytes() -> u64 {
    500 * 1024 * 1024 // 500 MB
}

fn default_cache_max_entries() -> u64 {
    10_000
}

fn default_cache_ttl_hours() -> u64 {
    168 // 7 days
}

fn default_cache_compression() -> bool {
    true
}

fn default_sink_timeout_ms() -> u64 {
    30_000
}

fn default_sink_max_retries() -> u32 {
    3
}

fn default_sink_retry_delay_ms() -> u64 {
    1_000
}

fn default_sink_backoff_multiplier() -> f64 {
    2.0
}

fn default_sink_poll_interval_ms() -> u64 {
    500
}

fn default_sink_max_poll_attempts() -> u32 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_path: PathBuf::new(),
            allowed_extensions: default_allowed_extensions(),
            ignore_globs: Vec::new(),
            ignored_dirs: default_ignored_dirs(),
            max_file_size: default_max_file_size(),
            lines_per_chunk: default_lines_per_chunk(),
            max_chunk_bytes: default_max_chunk_bytes(),
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            file_timeout_ms: default_file_timeout_ms(),
            cache: CacheConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_size_bytes: default_cache_max_size_bytes(),
            max_entries: default_cache_max_entries(),
            ttl_hours: default_cache_ttl_hours(),
            compression: default_cache_compression(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            endpoint_embed: String::new(),
            endpoint_upsert: String::new(),
            token: String::new(),
            timeout_ms: default_sink_timeout_ms(),
            max_retries: default_sink_max_retries(),
            retry_delay_ms: default_sink_retry_delay_ms(),
            backoff_multiplier: default_sink_backoff_multiplier(),
            poll_interval_ms: default_sink_poll_interval_ms(),
            max_poll_attempts: default_sink_max_poll_attempts(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ChunkflowError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ChunkflowError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::SaveFailed(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ChunkflowError> {
        if self.max_chunk_bytes == 0 {
            return Err(invalid("max_chunk_bytes", "must be greater than 0"));
        }

        if self.lines_per_chunk == 0 {
            return Err(invalid("lines_per_chunk", "must be greater than 0"));
        }

        if self.max_file_size == 0 {
            return Err(invalid("max_file_size", "must be greater than 0"));
        }

        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be greater than 0"));
        }

        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be greater than 0"));
        }

        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries", "must be greater than 0"));
        }

        if self.cache.ttl_hours == 0 {
            return Err(invalid("cache.ttl_hours", "must be greater than 0"));
        }

        if self.sink.backoff_multiplier < 1.0 {
            return Err(invalid(
                "sink.backoff_multiplier",
                "must be at least 1.0",
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CHUNKFLOW_WORKSPACE") {
            self.workspace_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("CHUNKFLOW_CACHE_DB") {
            self.cache.db_path = PathBuf::from(path);
        }

        if let Ok(hours) = std::env::var("CHUNKFLOW_CACHE_TTL_HOURS") {
            if let Ok(parsed) = hours.parse() {
                self.cache.ttl_hours = parsed;
            }
        }

        if let Ok(degree) = std::env::var("CHUNKFLOW_CONCURRENCY") {
            if let Ok(parsed) = degree.parse() {
                self.concurrency = parsed;
            }
        }

        if let Ok(size) = std::env::var("CHUNKFLOW_BATCH_SIZE") {
            if let Ok(parsed) = size.parse() {
                self.batch_size = parsed;
            }
        }

        if let Ok(token) = std::env::var("CHUNKFLOW_SINK_TOKEN") {
            self.sink.token = token;
        }
    }

    /// Create a Config with defaults and environment overrides
    pub fn new() -> Result<Self, ChunkflowError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

fn invalid(key: &str, reason: &str) -> ChunkflowError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.lines_per_chunk, 50);
        assert_eq!(config.max_chunk_bytes, 9216);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.cache.ttl_hours, 168);
        assert!(config.cache.compression);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_chunk_cap() {
        let mut config = Config::default();
        config.max_chunk_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_sub_one_backoff() {
        let mut config = Config::default();
        config.sink.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunkflow.toml");

        let mut config = Config::default();
        config.lines_per_chunk = 25;
        config.cache.max_entries = 42;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.lines_per_chunk, 25);
        assert_eq!(loaded.cache.max_entries, 42);
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file(Path::new("/nonexistent/chunkflow.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not [ valid").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_default_extensions_include_ast_languages() {
        let config = Config::default();
        for ext in ["py", "java", "ts", "go", "rs", "php", "cs", "cpp", "c"] {
            assert!(
                config.allowed_extensions.iter().any(|e| e == ext),
                "missing extension {}",
                ext
            );
        }
    }
}
