//! # Chunkflow - Workspace Chunking Pipeline
//!
//! Ingests a developer's workspace, segments every source file into
//! semantically meaningful, bounded code chunks, and streams those chunks to
//! an external embedding service for vector indexing.
//!
//! ## Architecture
//!
//! - **FileScanner**: walks the workspace, applies allow/deny rules, hashes
//!   file contents
//! - **MerkleStore**: Merkle tree over the ordered file hashes; persisted
//!   snapshots short-circuit unchanged re-runs
//! - **ChunkCache**: content-addressed SQLite store of chunk lists with
//!   TTL + LRU + size caps
//! - **LanguageRegistry / AstChunker**: tree-sitter based extraction of
//!   typed regions for ten languages, with adjacent-region merging and a
//!   size cap
//! - **LineChunker**: line-based fallback for non-code files and rejected
//!   parses
//! - **Dispatcher**: bounded worker pool, per-file timeouts, cancellation
//! - **ProgressTracker**: file and chunk state registry with derived
//!   aggregation
//! - **ChunkRouter**: batches chunks to a [`ChunkSink`](router::ChunkSink)
//!   with retry
//! - **SessionManager**: explicit named sessions instead of process globals
//!
//! ## Usage Example
//!
//! ```no_run
//! use chunkflow::{Config, SessionManager};
//! use chunkflow::router::ChunkSink;
//! use std::sync::Arc;
//!
//! # async fn example(sink: Arc<dyn ChunkSink>) -> anyhow::Result<()> {
//! let manager = SessionManager::new(Config::default(), sink)?;
//!
//! let indexed = manager
//!     .process_workspace("user-1", "device-1", "/path/to/workspace", "token", &[])
//!     .await;
//! println!("indexed: {}", indexed);
//!
//! let progress = manager
//!     .file_processing_progress("user-1", "device-1", "/path/to/workspace")
//!     .await;
//! println!("progress: {:.1}%", progress);
//! # Ok(())
//! # }
//! ```

/// Content-addressed chunk cache over SQLite with TTL and LRU limits
pub mod cache;

/// Language registry, AST chunker, and line-based fallback
pub mod chunker;

/// Frozen pipeline configuration with validation and env overrides
pub mod config;

/// Bounded-concurrency file dispatch
pub mod dispatcher;

/// Error types and utilities
pub mod error;

/// Glob pattern matching for ignore rules
pub mod glob_utils;

/// Merkle-tree change detection and snapshot persistence
pub mod merkle;

/// Platform path computation
pub mod paths;

/// File and chunk progress tracking
pub mod progress;

/// Chunk batching, retry, and the sink interface
pub mod router;

/// Workspace scanning and content hashing
pub mod scanner;

/// Sessions and the end-to-end pipeline
pub mod session;

/// Shared data model: chunks, chunk sets, statuses
pub mod types;

// Re-export the types most callers need
pub use config::Config;
pub use error::ChunkflowError;
pub use router::{ChunkSink, RetryPolicy};
pub use session::{Session, SessionManager};
pub use types::{Chunk, ChunkSet, ChunkType, ProcessingStatus, RunSummary, SearchHit};
