//! Shared data model: chunks, chunk sets, statuses, and sink-facing types

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum size of a single chunk's content in bytes (9 KiB)
pub const MAX_CHUNK_BYTES: usize = 9216;

/// Semantic category of a chunk
///
/// Categories come from the per-language grammar buckets; `LineBased` and
/// `Fallback` are produced by the line chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Module,
    Class,
    Interface,
    Function,
    Method,
    Field,
    Variable,
    Constant,
    Type,
    Macro,
    Include,
    Using,
    Namespace,
    Import,
    Export,
    Comment,
    Preprocessor,
    Other,
    LineBased,
    Fallback,
}

impl ChunkType {
    /// Stable lowercase tag, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Module => "module",
            ChunkType::Class => "class",
            ChunkType::Interface => "interface",
            ChunkType::Function => "function",
            ChunkType::Method => "method",
            ChunkType::Field => "field",
            ChunkType::Variable => "variable",
            ChunkType::Constant => "constant",
            ChunkType::Type => "type",
            ChunkType::Macro => "macro",
            ChunkType::Include => "include",
            ChunkType::Using => "using",
            ChunkType::Namespace => "namespace",
            ChunkType::Import => "import",
            ChunkType::Export => "export",
            ChunkType::Comment => "comment",
            ChunkType::Preprocessor => "preprocessor",
            ChunkType::Other => "other",
            ChunkType::LineBased => "line_based",
            ChunkType::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bounded, addressable span of a source file, ready for embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// sha256("{file_path}:{start_line}:{end_line}"), hex-lowercase.
    /// Split parts append "_part_{n}".
    pub chunk_id: String,
    /// Workspace-relative path of the source file
    pub file_path: String,
    /// Lowercase language tag, or "unknown"
    pub language: String,
    /// 1-based inclusive start line
    pub start_line: usize,
    /// 1-based inclusive end line
    pub end_line: usize,
    /// Exact content of lines [start_line..end_line], newline-joined,
    /// without trailing newline
    pub content: String,
    /// Semantic category
    pub chunk_type: ChunkType,
    /// Name of the producer, e.g. "python_parser", "readline_parser"
    pub parser: String,
    /// First identifier captured in the region, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Chunk {
    /// Compute the canonical chunk id for a file span
    pub fn compute_id(file_path: &str, start_line: usize, end_line: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}:{}", file_path, start_line, end_line).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Content size in bytes
    pub fn byte_len(&self) -> usize {
        self.content.len()
    }
}

/// The chunk list produced for one (path, hash) revision of a file.
/// This is the cache's value type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSet {
    pub file_path: String,
    pub file_hash: String,
    pub chunks: Vec<Chunk>,
    /// Unix timestamp (seconds) of production
    pub produced_at: i64,
}

/// Processing state of a file or chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

/// Vector payload handed to the sink's upsert call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// Result of a sink embed call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedOutcome {
    /// Sink-reported status, e.g. "completed"
    pub status: String,
    /// One id per accepted chunk, in submission order
    pub ids: Vec<String>,
}

/// Acknowledgement of a sink upsert call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertAck {
    pub acknowledged: bool,
}

/// A single hit returned by the sink's search endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub file_path: String,
    pub content: String,
    pub score: f32,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
}

/// Aggregate outcome of one pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub files_scanned: usize,
    pub files_from_cache: usize,
    pub files_parsed: usize,
    pub files_failed: usize,
    pub chunks_emitted: usize,
    pub chunks_accepted: usize,
    pub chunks_failed: usize,
    pub duration_ms: u64,
    /// Non-fatal errors encountered along the way
    #[serde(default)]
    pub errors: Vec<String>,
}
