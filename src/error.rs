/// Centralized error types for chunkflow using thiserror
///
/// Mirrors the pipeline's failure domains: configuration is fatal at
/// construction, per-file failures are local, cache failures are best-effort,
/// sink failures are retried.
use thiserror::Error;

/// Main error type for the chunking pipeline
#[derive(Error, Debug)]
pub enum ChunkflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors raised while validating or loading configuration
///
/// These are the only fatal errors in the pipeline: an invalid Config aborts
/// at construction, before any file is touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to load config: {0}")]
    LoadFailed(String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Failed to save config: {0}")]
    SaveFailed(String),

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Errors raised by the file scanner
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Workspace root does not exist: {0}")]
    RootNotFound(String),

    #[error("Workspace root is not a directory: {0}")]
    NotADirectory(String),

    #[error("Failed to walk workspace: {0}")]
    WalkFailed(String),

    #[error("Failed to read file '{file}': {reason}")]
    FileReadFailed { file: String, reason: String },
}

/// Errors raised during AST parsing
///
/// Never fatal: the chunker's fallback ladder recovers every variant by
/// degrading to line-based chunks.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("No grammar registered for extension '{0}'")]
    UnsupportedLanguage(String),

    #[error("Failed to load grammar for {language}: {reason}")]
    GrammarLoadFailed { language: String, reason: String },

    #[error("Grammar rejected '{file}' at stage {stage}")]
    GrammarRejected { file: String, stage: String },

    #[error("Per-file timeout after {0} ms")]
    Timeout(u64),
}

/// Errors raised by the chunk cache
///
/// Never surfaced to the caller: the pipeline continues uncached and the
/// failure is reported through telemetry.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to open cache database: {0}")]
    OpenFailed(String),

    #[error("Cache query failed: {0}")]
    QueryFailed(String),

    #[error("Failed to serialize chunk set: {0}")]
    SerializeFailed(String),

    #[error("Failed to deserialize cached payload for '{0}'")]
    CorruptPayload(String),
}

/// Errors raised by the chunk sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// Server-side or network failure; the router retries these with backoff.
    #[error("Transient sink failure: {0}")]
    Transient(String),

    /// Client-side rejection (4xx-class); the batch fails without retry.
    #[error("Permanent sink failure: {0}")]
    Permanent(String),

    #[error("Sink request timed out after {0} ms")]
    Timeout(u64),

    #[error("Async embed job did not complete after {attempts} polls")]
    PollExhausted { attempts: u32 },
}

impl SinkError {
    /// Whether the router should retry the batch that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Transient(_) | SinkError::Timeout(_))
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, ChunkflowError>;
