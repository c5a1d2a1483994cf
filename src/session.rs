//! Sessions and the end-to-end pipeline
//!
//! A [`Session`] owns everything one workspace needs: cache, progress
//! tracker, cancel token, and the periodic cache-maintenance task. The
//! [`SessionManager`] replaces the usual global-singleton pattern with
//! explicit named sessions keyed by user, device, and workspace: initialized
//! at first use, torn down on close or shutdown.
//!
//! Pipeline per run: scan -> hash -> merkle diff -> cache partition ->
//! dispatch uncached files (parse + chunk + cache write) -> route fresh
//! chunks to the sink. Cache writes are awaited before the run completes;
//! nothing is fire-and-forget.

use crate::cache::ChunkCache;
use crate::config::Config;
use crate::dispatcher::{ChunkerSettings, Dispatcher};
use crate::error::{ChunkflowError, SinkError};
use crate::merkle::MerkleStore;
use crate::progress::ProgressTracker;
use crate::router::{ChunkRouter, ChunkSink, RetryPolicy};
use crate::scanner::{FileScanner, ScanResult};
use crate::types::{ProcessingStatus, RunSummary, SearchHit};
use anyhow::Context;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Cadence of the background cache maintenance sweep
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(600);

/// One workspace's pipeline state
pub struct Session {
    config: Arc<Config>,
    cache: Arc<ChunkCache>,
    progress: Arc<ProgressTracker>,
    sink: Arc<dyn ChunkSink>,
    cancel: CancellationToken,
    maintenance: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    last_summary: std::sync::Mutex<Option<RunSummary>>,
}

impl Session {
    /// Build a session for the given (frozen) configuration
    ///
    /// Fails fast on invalid configuration or an unopenable cache database;
    /// nothing else here can abort.
    pub fn new(config: Config, sink: Arc<dyn ChunkSink>) -> Result<Self, ChunkflowError> {
        config.validate()?;

        let cache = Arc::new(if config.cache.db_path.as_os_str() == ":memory:" {
            ChunkCache::open_in_memory(config.cache.clone())?
        } else {
            ChunkCache::open(config.cache.clone())?
        });

        let session = Self {
            config: Arc::new(config),
            cache,
            progress: Arc::new(ProgressTracker::new()),
            sink,
            cancel: CancellationToken::new(),
            maintenance: std::sync::Mutex::new(None),
            last_summary: std::sync::Mutex::new(None),
        };
        session.spawn_maintenance();
        Ok(session)
    }

    /// Periodic TTL + LRU sweep, per the cache's maintenance contract
    fn spawn_maintenance(&self) {
        let cache = self.cache.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                let cache = cache.clone();
                let swept = tokio::task::spawn_blocking(move || {
                    let expired = cache.clean_expired()?;
                    let evicted = cache.enforce_limits()?;
                    Ok::<_, crate::error::CacheError>((expired, evicted))
                })
                .await;
                match swept {
                    Ok(Ok((expired, evicted))) if expired + evicted > 0 => {
                        tracing::debug!(
                            "Cache maintenance: {} expired, {} evicted",
                            expired,
                            evicted
                        );
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!("Cache maintenance failed: {}", e),
                    Err(e) => tracing::warn!("Cache maintenance task failed: {}", e),
                }
            }
        });
        *self.maintenance.lock().unwrap() = Some(handle);
    }

    /// Run the full pipeline over the session's workspace
    ///
    /// Returns true when the run produced at least one sink-accepted chunk or
    /// everything resolved from cache; false when the run itself broke
    /// (unscannable workspace) or chunks needed shipping and none were
    /// accepted. Per-file failures never abort the run.
    pub async fn process_workspace(&self, extra_ignore_globs: &[String]) -> bool {
        match self.run_pipeline(extra_ignore_globs).await {
            Ok(summary) => {
                let success = if summary.chunks_emitted > 0 {
                    summary.chunks_accepted > 0
                } else {
                    true
                };
                *self.last_summary.lock().unwrap() = Some(summary);
                success
            }
            Err(e) => {
                tracing::error!("Workspace processing failed: {}", e);
                false
            }
        }
    }

    async fn run_pipeline(&self, extra_ignore_globs: &[String]) -> anyhow::Result<RunSummary> {
        // A cancelled session accepts no further runs
        if self.cancel.is_cancelled() {
            return Err(ChunkflowError::Cancelled.into());
        }

        let start = Instant::now();
        let workspace = self.config.workspace_path.display().to_string();
        let mut summary = RunSummary::default();

        // Fresh per-run view; the tracker is also cleared at shutdown
        self.progress.reset();

        // Scan on a blocking thread (pure filesystem work)
        let mut ignore_globs = self.config.ignore_globs.clone();
        ignore_globs.extend(extra_ignore_globs.iter().cloned());
        let scanner = FileScanner::new(
            &self.config.workspace_path,
            &self.config.allowed_extensions,
            &self.config.ignored_dirs,
            &ignore_globs,
            self.config.max_file_size,
        );
        let ScanResult { files, file_hashes } =
            tokio::task::spawn_blocking(move || scanner.scan())
                .await
                .context("Scanner task failed")??;
        summary.files_scanned = files.len();

        self.progress
            .register_files(files.iter().map(|f| f.relative_path.clone()));

        // Merkle diff against the previous snapshot
        let snapshot_store = MerkleStore::new(
            self.snapshot_path(&workspace),
            self.config.cache.compression,
        );
        let previous = snapshot_store.load();
        let ordered: Vec<(String, String, u64)> = files
            .iter()
            .map(|f| (f.relative_path.clone(), f.hash.clone(), f.size))
            .collect();
        let current = MerkleStore::build_snapshot(&workspace, &ordered);
        let diff = MerkleStore::diff(previous.as_ref(), &current);
        tracing::info!(
            "Merkle diff: {} added, {} modified, {} removed",
            diff.added.len(),
            diff.modified.len(),
            diff.removed.len()
        );

        // Old revisions of modified files are overwritten; removed files are
        // dropped from the cache entirely.
        self.invalidate_stale(&diff.modified, &diff.removed).await;

        // Partition into cached and to-process
        let pairs: Vec<(String, String)> = files
            .iter()
            .map(|f| (f.relative_path.clone(), f.hash.clone()))
            .collect();
        let partition = {
            let cache = self.cache.clone();
            tokio::task::spawn_blocking(move || cache.batch_check(&pairs))
                .await
                .context("Cache partition task failed")?
                .unwrap_or_else(|e| {
                    tracing::warn!("Cache partition failed, processing everything: {}", e);
                    crate::cache::BatchCheckResult {
                        uncached: file_hashes.keys().cloned().collect(),
                        ..Default::default()
                    }
                })
        };

        let cached_paths: HashSet<&String> = partition.cached.iter().collect();
        for path in &partition.cached {
            // Cache hit: the stored chunk set is reused verbatim, no
            // per-chunk transitions.
            self.progress
                .update_file_status(path, ProcessingStatus::Completed);
        }
        summary.files_from_cache = partition.cached.len();

        let to_process: Vec<_> = files
            .into_iter()
            .filter(|f| !cached_paths.contains(&f.relative_path))
            .collect();
        summary.files_parsed = to_process.len();

        // Dispatch and route concurrently; the channel gives the router
        // backpressure against fast workers.
        let (tx, rx) = mpsc::channel(self.config.batch_size.max(16));
        let dispatcher = Dispatcher::new(
            self.cache.clone(),
            self.progress.clone(),
            ChunkerSettings {
                lines_per_chunk: self.config.lines_per_chunk,
                max_chunk_bytes: self.config.max_chunk_bytes,
            },
            self.config.concurrency,
            Duration::from_millis(self.config.file_timeout_ms),
            self.cancel.clone(),
        );
        let router = ChunkRouter::new(
            self.sink.clone(),
            self.progress.clone(),
            self.config.batch_size,
            RetryPolicy::from_config(&self.config.sink),
            self.cancel.clone(),
        );

        let (dispatch_outcome, route_stats) =
            tokio::join!(dispatcher.run(to_process, tx), router.run(rx));

        summary.files_failed = dispatch_outcome.files_failed + dispatch_outcome.files_cancelled;
        summary.chunks_emitted = dispatch_outcome.chunks_emitted;
        summary.chunks_accepted = route_stats.chunks_accepted;
        summary.chunks_failed = route_stats.chunks_failed;

        if dispatch_outcome.files_cancelled > 0 {
            summary.errors.push(format!(
                "{}: {} queued files dropped",
                ChunkflowError::Cancelled,
                dispatch_outcome.files_cancelled
            ));
        }

        // Persist the new snapshot so the next run diffs against this one
        if let Err(e) = snapshot_store.save(&current) {
            tracing::warn!("Failed to persist merkle snapshot: {}", e);
            summary
                .errors
                .push(format!("merkle snapshot not saved: {}", e));
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "Run finished in {} ms: {} scanned, {} cached, {} parsed, {} chunks ({} accepted)",
            summary.duration_ms,
            summary.files_scanned,
            summary.files_from_cache,
            summary.files_parsed,
            summary.chunks_emitted,
            summary.chunks_accepted
        );
        Ok(summary)
    }

    async fn invalidate_stale(&self, modified: &[String], removed: &[String]) {
        let paths: Vec<String> = modified.iter().chain(removed.iter()).cloned().collect();
        if paths.is_empty() {
            return;
        }
        let cache = self.cache.clone();
        let result = tokio::task::spawn_blocking(move || {
            for path in &paths {
                if let Err(e) = cache.invalidate_file(path) {
                    tracing::warn!("Failed to invalidate {}: {}", path, e);
                }
            }
        })
        .await;
        if let Err(e) = result {
            tracing::warn!("Cache invalidation task failed: {}", e);
        }
    }

    fn snapshot_path(&self, workspace: &str) -> PathBuf {
        let db_path = &self.config.cache.db_path;
        match db_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                use sha2::{Digest, Sha256};
                let mut hasher = Sha256::new();
                hasher.update(workspace.as_bytes());
                let digest = format!("{:x}", hasher.finalize());
                parent.join(&digest[..16]).join("merkle-state.json")
            }
            _ => crate::paths::PlatformPaths::merkle_snapshot_path(workspace),
        }
    }

    /// Query the remote store through the sink
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<serde_json::Value>,
    ) -> Result<Vec<SearchHit>, SinkError> {
        self.sink.search(query, top_k, filters).await
    }

    /// Overall completion percentage, in [0, 100]
    pub fn file_processing_progress(&self) -> f64 {
        self.progress.overall_progress()
    }

    /// Summary of the most recent completed run
    pub fn last_run_summary(&self) -> Option<RunSummary> {
        self.last_summary.lock().unwrap().clone()
    }

    /// Progress tracker handle (telemetry surface)
    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Cache handle (telemetry surface)
    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// Request cancellation of in-flight work
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop background work and drop tracked state
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.maintenance.lock().unwrap().take() {
            handle.abort();
        }
        self.progress.reset();
    }
}

/// Explicit owner of named sessions
///
/// Sessions are keyed by `user:device:workspace`, created on first use and
/// torn down on [`close_session`](Self::close_session) or
/// [`shutdown`](Self::shutdown).
pub struct SessionManager {
    base_config: Config,
    sink: Arc<dyn ChunkSink>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    /// Validate the base configuration and create an empty manager
    pub fn new(base_config: Config, sink: Arc<dyn ChunkSink>) -> Result<Self, ChunkflowError> {
        base_config.validate()?;
        Ok(Self {
            base_config,
            sink,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    fn session_key(user_id: &str, device_id: &str, workspace_path: &str) -> String {
        format!("{}:{}:{}", user_id, device_id, workspace_path)
    }

    /// Get or create the session for a (user, device, workspace) triple
    pub async fn session(
        &self,
        user_id: &str,
        device_id: &str,
        workspace_path: &str,
        token: &str,
    ) -> Result<Arc<Session>, ChunkflowError> {
        let key = Self::session_key(user_id, device_id, workspace_path);

        if let Some(session) = self.sessions.read().await.get(&key) {
            return Ok(session.clone());
        }

        let mut sessions = self.sessions.write().await;
        // Double-checked: another caller may have created it meanwhile
        if let Some(session) = sessions.get(&key) {
            return Ok(session.clone());
        }

        let mut config = self.base_config.clone();
        config.workspace_path = PathBuf::from(workspace_path);
        if !token.is_empty() {
            config.sink.token = token.to_string();
        }

        tracing::info!("Creating session for {}", key);
        let session = Arc::new(Session::new(config, self.sink.clone())?);
        sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Entry operation: process one workspace end-to-end
    pub async fn process_workspace(
        &self,
        user_id: &str,
        device_id: &str,
        workspace_path: &str,
        token: &str,
        ignore_patterns: &[String],
    ) -> bool {
        match self.session(user_id, device_id, workspace_path, token).await {
            Ok(session) => session.process_workspace(ignore_patterns).await,
            Err(e) => {
                tracing::error!("Failed to create session for {}: {}", workspace_path, e);
                false
            }
        }
    }

    /// Entry operation: search a workspace's index
    pub async fn search(
        &self,
        user_id: &str,
        device_id: &str,
        workspace_path: &str,
        query: &str,
        top_k: usize,
        filters: Option<serde_json::Value>,
    ) -> Result<Vec<SearchHit>, ChunkflowError> {
        let session = self.session(user_id, device_id, workspace_path, "").await?;
        session
            .search(query, top_k, filters)
            .await
            .map_err(ChunkflowError::from)
    }

    /// Entry operation: overall progress for a workspace, in [0, 100]
    pub async fn file_processing_progress(
        &self,
        user_id: &str,
        device_id: &str,
        workspace_path: &str,
    ) -> f64 {
        let key = Self::session_key(user_id, device_id, workspace_path);
        match self.sessions.read().await.get(&key) {
            Some(session) => session.file_processing_progress(),
            None => 0.0,
        }
    }

    /// Tear down one session
    pub async fn close_session(&self, user_id: &str, device_id: &str, workspace_path: &str) {
        let key = Self::session_key(user_id, device_id, workspace_path);
        if let Some(session) = self.sessions.write().await.remove(&key) {
            session.shutdown().await;
            tracing::info!("Closed session {}", key);
        }
    }

    /// Entry operation: tear down every session
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.write().await;
        for (key, session) in sessions.drain() {
            session.shutdown().await;
            tracing::debug!("Closed session {}", key);
        }
        tracing::info!("Session manager shut down");
    }
}
