//! Bounded-concurrency file processing
//!
//! Each worker takes one file end-to-end: registry lookup, chunking on a
//! blocking thread (parsers are per-task, never shared), cache write, then
//! hand-off to the router. File failures are local; the pool keeps going.
//! A cancel token drains the queue, and a per-file timeout cancels only the
//! file that exceeded it.

use crate::cache::ChunkCache;
use crate::chunker::{plugin_for_extension, AstChunker, LineChunker};
use crate::progress::ProgressTracker;
use crate::router::RoutedFile;
use crate::scanner::ScannedFile;
use crate::types::{Chunk, ChunkSet, ProcessingStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Tallies for one dispatch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub files_processed: usize,
    pub files_failed: usize,
    pub files_cancelled: usize,
    pub chunks_emitted: usize,
}

/// Chunking knobs shared by every worker
#[derive(Debug, Clone, Copy)]
pub struct ChunkerSettings {
    pub lines_per_chunk: usize,
    pub max_chunk_bytes: usize,
}

/// Route a file to its chunker and produce its chunks
///
/// AST-capable extensions go through the grammar (with its internal fallback
/// ladder); everything else is line-chunked. Never fails.
pub fn chunk_file(file: &ScannedFile, settings: ChunkerSettings) -> Vec<Chunk> {
    match file.extension.as_deref().and_then(plugin_for_extension) {
        Some(plugin) => AstChunker::new(plugin, settings.lines_per_chunk, settings.max_chunk_bytes)
            .chunk(&file.bytes, &file.relative_path),
        None => LineChunker::new(settings.lines_per_chunk, settings.max_chunk_bytes).chunk(
            &file.bytes,
            &file.relative_path,
            &file.language,
        ),
    }
}

/// Worker pool that turns scanned files into routed chunk sets
pub struct Dispatcher {
    cache: Arc<ChunkCache>,
    progress: Arc<ProgressTracker>,
    settings: ChunkerSettings,
    concurrency: usize,
    file_timeout: Duration,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        cache: Arc<ChunkCache>,
        progress: Arc<ProgressTracker>,
        settings: ChunkerSettings,
        concurrency: usize,
        file_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache,
            progress,
            settings,
            concurrency: concurrency.max(1),
            file_timeout,
            cancel,
        }
    }

    /// Process every file, sending each file's chunks to `tx` as produced.
    ///
    /// File ordering is not guaranteed; within one file, chunk order is the
    /// chunker's ascending-line order. Returns once all workers finish.
    pub async fn run(
        &self,
        files: Vec<ScannedFile>,
        tx: mpsc::Sender<RoutedFile>,
    ) -> DispatchOutcome {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<FileResult> = JoinSet::new();
        let mut outcome = DispatchOutcome::default();

        for file in files {
            if self.cancel.is_cancelled() {
                // Queued files are dropped and marked failed
                self.progress
                    .update_file_status(&file.relative_path, ProcessingStatus::Failed);
                outcome.files_cancelled += 1;
                continue;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.cancel.cancelled() => {
                    self.progress
                        .update_file_status(&file.relative_path, ProcessingStatus::Failed);
                    outcome.files_cancelled += 1;
                    continue;
                }
            };

            let cache = self.cache.clone();
            let progress = self.progress.clone();
            let settings = self.settings;
            let timeout = self.file_timeout;
            let tx = tx.clone();

            tasks.spawn(async move {
                let _permit = permit;
                process_file(file, cache, progress, settings, timeout, tx).await
            });
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(FileResult::Processed { chunks }) => {
                    outcome.files_processed += 1;
                    outcome.chunks_emitted += chunks;
                }
                Ok(FileResult::Failed) => outcome.files_failed += 1,
                Err(e) => {
                    tracing::warn!("File task panicked: {}", e);
                    outcome.files_failed += 1;
                }
            }
        }

        tracing::info!(
            "Dispatch finished: {} processed, {} failed, {} cancelled, {} chunks",
            outcome.files_processed,
            outcome.files_failed,
            outcome.files_cancelled,
            outcome.chunks_emitted
        );
        outcome
    }
}

enum FileResult {
    Processed { chunks: usize },
    Failed,
}

async fn process_file(
    file: ScannedFile,
    cache: Arc<ChunkCache>,
    progress: Arc<ProgressTracker>,
    settings: ChunkerSettings,
    timeout: Duration,
    tx: mpsc::Sender<RoutedFile>,
) -> FileResult {
    let path = file.relative_path.clone();
    let file_hash = file.hash.clone();
    progress.update_file_status(&path, ProcessingStatus::Processing);

    // Parsing is CPU-bound: run it on a blocking thread, bounded by the
    // per-file timeout. A timeout fails only this file.
    let chunk_task =
        tokio::task::spawn_blocking(move || chunk_file(&file, settings));

    let chunks = match tokio::time::timeout(timeout, chunk_task).await {
        Ok(Ok(chunks)) => chunks,
        Ok(Err(e)) => {
            tracing::warn!("Chunking panicked for {}: {}", path, e);
            progress.update_file_status(&path, ProcessingStatus::Failed);
            return FileResult::Failed;
        }
        Err(_) => {
            tracing::warn!("Chunking timed out for {} after {:?}", path, timeout);
            progress.update_file_status(&path, ProcessingStatus::Failed);
            return FileResult::Failed;
        }
    };

    if chunks.is_empty() {
        // Nothing to embed (empty or whitespace-only file)
        progress.update_file_status(&path, ProcessingStatus::Completed);
        return FileResult::Processed { chunks: 0 };
    }

    for chunk in &chunks {
        progress.register_chunk(&chunk.chunk_id, &path);
    }

    // Populate the cache before hand-off; cache trouble is logged, never
    // fatal (the pipeline continues uncached).
    let chunk_set = ChunkSet {
        file_path: path.clone(),
        file_hash: file_hash.clone(),
        chunks: chunks.clone(),
        produced_at: chrono::Utc::now().timestamp(),
    };
    let cache_write = {
        let path = path.clone();
        let file_hash = file_hash.clone();
        tokio::task::spawn_blocking(move || cache.set(&path, &file_hash, &chunk_set))
    };
    match cache_write.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Cache write failed for {}: {}", path, e),
        Err(e) => tracing::warn!("Cache write task failed for {}: {}", path, e),
    }

    let emitted = chunks.len();
    if tx
        .send(RoutedFile {
            file_hash,
            chunks,
        })
        .await
        .is_err()
    {
        tracing::warn!("Router closed before {} could be delivered", path);
        progress.update_file_status(&path, ProcessingStatus::Failed);
        return FileResult::Failed;
    }

    FileResult::Processed { chunks: emitted }
}
