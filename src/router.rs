//! Chunk routing to the embedding sink
//!
//! Batches processed chunks (at most `batch_size` per call), partitioned by
//! file fingerprint so one file's chunks travel contiguously, and pushes them
//! through the narrow [`ChunkSink`] interface: `embed` first, then `upsert`
//! with the chunk metadata. Transient sink failures retry with exponential
//! backoff; permanent failures mark every chunk in the batch failed. No chunk
//! is ever dropped silently.

use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::progress::ProgressTracker;
use crate::types::{Chunk, EmbedOutcome, ProcessingStatus, SearchHit, UpsertAck, VectorRecord};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Narrow interface to the external embedding service and vector store
///
/// Implementations own the HTTP client, bearer token, and async-job polling;
/// the pipeline never sees past this trait. Search goes through the same
/// interface because the vector store lives on the other side of it.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Submit a batch for embedding. Async sinks poll their job status
    /// internally (up to `max_poll_attempts` at `poll_interval_ms`).
    async fn embed(&self, batch: &[Chunk]) -> Result<EmbedOutcome, SinkError>;

    /// Bind vector ids to chunk metadata in the remote store
    async fn upsert(&self, records: &[VectorRecord]) -> Result<UpsertAck, SinkError>;

    /// Query the remote store
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<serde_json::Value>,
    ) -> Result<Vec<SearchHit>, SinkError>;
}

/// Exponential backoff schedule for transient sink failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            base_delay_ms: config.retry_delay_ms,
            multiplier: config.backoff_multiplier,
            max_retries: config.max_retries,
        }
    }

    /// Delay before retry `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((self.base_delay_ms as f64 * factor) as u64)
    }
}

/// One file's chunks with the file's content fingerprint
#[derive(Debug)]
pub struct RoutedFile {
    pub file_hash: String,
    pub chunks: Vec<Chunk>,
}

/// Outcome of a routing run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub batches_sent: usize,
    pub chunks_accepted: usize,
    pub chunks_failed: usize,
}

/// Batching router between the dispatcher and the sink
pub struct ChunkRouter {
    sink: Arc<dyn ChunkSink>,
    progress: Arc<ProgressTracker>,
    batch_size: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ChunkRouter {
    pub fn new(
        sink: Arc<dyn ChunkSink>,
        progress: Arc<ProgressTracker>,
        batch_size: usize,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sink,
            progress,
            batch_size,
            retry,
            cancel,
        }
    }

    /// Consume routed files until the channel closes or cancellation fires.
    /// On cancel the in-flight batch is flushed before stopping.
    pub async fn run(&self, mut rx: mpsc::Receiver<RoutedFile>) -> RouteStats {
        let mut stats = RouteStats::default();
        let mut pending: Vec<Chunk> = Vec::with_capacity(self.batch_size);

        loop {
            let routed = tokio::select! {
                routed = rx.recv() => routed,
                _ = self.cancel.cancelled() => {
                    tracing::info!("Router cancelled, flushing in-flight batch");
                    break;
                }
            };

            let routed = match routed {
                Some(routed) => routed,
                None => break,
            };

            // Fingerprint partition: a file's chunks enter the batcher as
            // one contiguous run, in chunker order.
            tracing::debug!(
                "Routing {} chunks for fingerprint {}",
                routed.chunks.len(),
                routed.file_hash
            );
            for chunk in routed.chunks {
                pending.push(chunk);
                if pending.len() >= self.batch_size {
                    let batch = std::mem::take(&mut pending);
                    self.send_batch(batch, &mut stats).await;
                }
            }
        }

        if !pending.is_empty() {
            self.send_batch(pending, &mut stats).await;
        }
        stats
    }

    /// Push one batch through embed + upsert, with retry
    async fn send_batch(&self, batch: Vec<Chunk>, stats: &mut RouteStats) {
        for chunk in &batch {
            self.progress
                .update_chunk_status(&chunk.chunk_id, ProcessingStatus::Processing);
        }

        match self.deliver(&batch).await {
            Ok(outcome) => {
                stats.batches_sent += 1;
                stats.chunks_accepted += batch.len();
                tracing::debug!(
                    "Sink accepted batch of {} chunks (status {})",
                    batch.len(),
                    outcome.status
                );
                for chunk in &batch {
                    self.progress
                        .update_chunk_status(&chunk.chunk_id, ProcessingStatus::Completed);
                }
            }
            Err(e) => {
                stats.chunks_failed += batch.len();
                tracing::warn!("Sink rejected batch of {} chunks: {}", batch.len(), e);
                for chunk in &batch {
                    self.progress
                        .update_chunk_status(&chunk.chunk_id, ProcessingStatus::Failed);
                }
            }
        }
    }

    async fn deliver(&self, batch: &[Chunk]) -> Result<EmbedOutcome, SinkError> {
        let outcome = self
            .with_retry("embed", || self.sink.embed(batch))
            .await?;

        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(outcome.ids.iter())
            .map(|(chunk, id)| VectorRecord {
                id: id.clone(),
                // Vectors stay sink-side; the id pairs this record with the
                // embedding produced by the embed call.
                vector: Vec::new(),
                metadata: chunk_metadata(chunk),
            })
            .collect();

        let ack = self
            .with_retry("upsert", || self.sink.upsert(&records))
            .await?;
        if !ack.acknowledged {
            return Err(SinkError::Permanent("upsert not acknowledged".to_string()));
        }
        Ok(outcome)
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, SinkError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, SinkError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        "Transient {} failure (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt,
                        self.retry.max_retries,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn chunk_metadata(chunk: &Chunk) -> serde_json::Value {
    serde_json::json!({
        "chunk_id": chunk.chunk_id,
        "file_path": chunk.file_path,
        "language": chunk.language,
        "start_line": chunk.start_line,
        "end_line": chunk.end_line,
        "type": chunk.chunk_type,
        "parser": chunk.parser,
        "name": chunk.name,
    })
}
