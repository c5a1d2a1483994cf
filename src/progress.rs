//! File and chunk progress tracking
//!
//! Keyed status maps behind a single lock. File status is derived from chunk
//! status unless set explicitly (cache hits complete a file without per-chunk
//! transitions). Split chunks (`..._part_<n>`) propagate to their parent
//! entry, which aggregates over all known parts.

use crate::types::ProcessingStatus;
use std::collections::HashMap;
use std::sync::Mutex;

/// Aggregate counters over all registered entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounts {
    pub files_total: usize,
    pub files_completed: usize,
    pub files_failed: usize,
    pub chunks_total: usize,
    pub chunks_completed: usize,
    pub chunks_failed: usize,
}

#[derive(Debug)]
struct ChunkRecord {
    status: ProcessingStatus,
    file_path: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<String, ProcessingStatus>,
    chunks: HashMap<String, ChunkRecord>,
    /// file path -> shipped chunk ids (parts, not their parents)
    file_chunks: HashMap<String, Vec<String>>,
    /// parent chunk id -> part chunk ids
    parts: HashMap<String, Vec<String>>,
}

/// Thread-safe progress registry
///
/// Methods are O(1) except the aggregations, which are linear in the number
/// of registered entries. Entries live until `reset` or shutdown.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    inner: Mutex<Inner>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register files as pending
    pub fn register_files<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.lock();
        for path in paths {
            let path = path.into();
            inner.files.entry(path.clone()).or_insert(ProcessingStatus::Pending);
            inner.file_chunks.entry(path).or_default();
        }
    }

    /// Register one chunk as pending under its file
    ///
    /// A `..._part_<n>` id also registers its parent entry (if new) and links
    /// the part to it for aggregation.
    pub fn register_chunk(&self, chunk_id: &str, file_path: &str) {
        let mut inner = self.lock();

        inner.chunks.insert(
            chunk_id.to_string(),
            ChunkRecord {
                status: ProcessingStatus::Pending,
                file_path: Some(file_path.to_string()),
            },
        );
        inner
            .file_chunks
            .entry(file_path.to_string())
            .or_default()
            .push(chunk_id.to_string());

        if let Some(parent_id) = part_parent(chunk_id) {
            inner.chunks.entry(parent_id.clone()).or_insert(ChunkRecord {
                status: ProcessingStatus::Pending,
                file_path: None,
            });
            inner
                .parts
                .entry(parent_id)
                .or_default()
                .push(chunk_id.to_string());
        }
    }

    /// Explicitly set a file's status, bypassing derivation
    pub fn update_file_status(&self, path: &str, status: ProcessingStatus) {
        let mut inner = self.lock();
        inner.files.insert(path.to_string(), status);
    }

    /// Update a chunk's status; derives the owning file's status and
    /// propagates split-part updates to the parent entry
    pub fn update_chunk_status(&self, chunk_id: &str, status: ProcessingStatus) {
        let mut inner = self.lock();

        let file_path = match inner.chunks.get_mut(chunk_id) {
            Some(record) => {
                record.status = status;
                record.file_path.clone()
            }
            None => return,
        };

        if let Some(parent_id) = part_parent(chunk_id) {
            if let Some(aggregated) = aggregate_parts(&inner, &parent_id) {
                if let Some(parent) = inner.chunks.get_mut(&parent_id) {
                    parent.status = aggregated;
                }
            }
        }

        if let Some(path) = file_path {
            if let Some(derived) = derive_file_status(&inner, &path) {
                inner.files.insert(path, derived);
            }
        }
    }

    /// Status of one file, if registered
    pub fn file_status(&self, path: &str) -> Option<ProcessingStatus> {
        self.lock().files.get(path).copied()
    }

    /// Status of one chunk, if registered
    pub fn chunk_status(&self, chunk_id: &str) -> Option<ProcessingStatus> {
        self.lock().chunks.get(chunk_id).map(|r| r.status)
    }

    /// Completion percentage over registered files, in [0, 100]
    pub fn overall_progress(&self) -> f64 {
        let inner = self.lock();
        if inner.files.is_empty() {
            return 100.0;
        }
        let completed = inner
            .files
            .values()
            .filter(|s| **s == ProcessingStatus::Completed)
            .count();
        completed as f64 / inner.files.len() as f64 * 100.0
    }

    /// Per-file chunk completion percentage, in [0, 100]
    pub fn file_progress(&self, path: &str) -> Option<f64> {
        let inner = self.lock();
        let chunk_ids = inner.file_chunks.get(path)?;
        if chunk_ids.is_empty() {
            // No chunk granularity: fall back to the file's own status
            return Some(match inner.files.get(path) {
                Some(ProcessingStatus::Completed) => 100.0,
                _ => 0.0,
            });
        }
        let completed = chunk_ids
            .iter()
            .filter(|id| {
                inner
                    .chunks
                    .get(*id)
                    .map(|r| r.status == ProcessingStatus::Completed)
                    .unwrap_or(false)
            })
            .count();
        Some(completed as f64 / chunk_ids.len() as f64 * 100.0)
    }

    /// Aggregate counters
    pub fn counts(&self) -> ProgressCounts {
        let inner = self.lock();
        let mut counts = ProgressCounts {
            files_total: inner.files.len(),
            ..Default::default()
        };
        for status in inner.files.values() {
            match status {
                ProcessingStatus::Completed => counts.files_completed += 1,
                ProcessingStatus::Failed => counts.files_failed += 1,
                _ => {}
            }
        }
        for (id, record) in &inner.chunks {
            // Parents of split chunks are bookkeeping, not shipped units
            if inner.parts.contains_key(id) {
                continue;
            }
            counts.chunks_total += 1;
            match record.status {
                ProcessingStatus::Completed => counts.chunks_completed += 1,
                ProcessingStatus::Failed => counts.chunks_failed += 1,
                _ => {}
            }
        }
        counts
    }

    /// Drop all entries (end-of-run teardown)
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = Inner::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("ProgressTracker mutex poisoned")
    }
}

/// Derive a file's status from its chunks:
/// processing if any chunk is processing; completed if all completed;
/// failed if at least one failed and none processing; else pending.
/// Files without chunks keep their explicit status.
fn derive_file_status(inner: &Inner, path: &str) -> Option<ProcessingStatus> {
    let chunk_ids = inner.file_chunks.get(path)?;
    if chunk_ids.is_empty() {
        return None;
    }

    let mut any_processing = false;
    let mut any_failed = false;
    let mut all_completed = true;

    for id in chunk_ids {
        let status = inner.chunks.get(id).map(|r| r.status)?;
        match status {
            ProcessingStatus::Processing => any_processing = true,
            ProcessingStatus::Failed => any_failed = true,
            ProcessingStatus::Completed => {}
            ProcessingStatus::Pending => {}
        }
        if status != ProcessingStatus::Completed {
            all_completed = false;
        }
    }

    Some(if any_processing {
        ProcessingStatus::Processing
    } else if all_completed {
        ProcessingStatus::Completed
    } else if any_failed {
        ProcessingStatus::Failed
    } else {
        ProcessingStatus::Pending
    })
}

/// Aggregate a parent's status over its parts: completed when every part
/// completed; failed once all parts are terminal and at least one failed;
/// otherwise no transition.
fn aggregate_parts(inner: &Inner, parent_id: &str) -> Option<ProcessingStatus> {
    let part_ids = inner.parts.get(parent_id)?;
    let statuses: Vec<ProcessingStatus> = part_ids
        .iter()
        .filter_map(|id| inner.chunks.get(id).map(|r| r.status))
        .collect();

    if statuses.is_empty() {
        return None;
    }
    if statuses.iter().all(|s| *s == ProcessingStatus::Completed) {
        return Some(ProcessingStatus::Completed);
    }
    if statuses.iter().all(|s| s.is_terminal())
        && statuses.iter().any(|s| *s == ProcessingStatus::Failed)
    {
        return Some(ProcessingStatus::Failed);
    }
    None
}

/// Parent id for a `..._part_<n>` chunk id
fn part_parent(chunk_id: &str) -> Option<String> {
    let (prefix, suffix) = chunk_id.rsplit_once("_part_")?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(prefix.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_files_pending() {
        let tracker = ProgressTracker::new();
        tracker.register_files(["a.py", "b.py"]);

        assert_eq!(tracker.file_status("a.py"), Some(ProcessingStatus::Pending));
        assert_eq!(tracker.file_status("b.py"), Some(ProcessingStatus::Pending));
        assert_eq!(tracker.file_status("c.py"), None);
    }

    #[test]
    fn test_explicit_file_status_for_cache_hit() {
        let tracker = ProgressTracker::new();
        tracker.register_files(["a.py"]);
        tracker.update_file_status("a.py", ProcessingStatus::Completed);

        assert_eq!(
            tracker.file_status("a.py"),
            Some(ProcessingStatus::Completed)
        );
        assert_eq!(tracker.overall_progress(), 100.0);
    }

    #[test]
    fn test_file_status_derived_from_chunks() {
        let tracker = ProgressTracker::new();
        tracker.register_files(["a.py"]);
        tracker.register_chunk("c1", "a.py");
        tracker.register_chunk("c2", "a.py");

        tracker.update_chunk_status("c1", ProcessingStatus::Processing);
        assert_eq!(
            tracker.file_status("a.py"),
            Some(ProcessingStatus::Processing)
        );

        tracker.update_chunk_status("c1", ProcessingStatus::Completed);
        assert_eq!(tracker.file_status("a.py"), Some(ProcessingStatus::Pending));

        tracker.update_chunk_status("c2", ProcessingStatus::Completed);
        assert_eq!(
            tracker.file_status("a.py"),
            Some(ProcessingStatus::Completed)
        );
    }

    #[test]
    fn test_failed_chunk_fails_file_once_settled() {
        let tracker = ProgressTracker::new();
        tracker.register_files(["a.py"]);
        tracker.register_chunk("c1", "a.py");
        tracker.register_chunk("c2", "a.py");

        tracker.update_chunk_status("c1", ProcessingStatus::Failed);
        tracker.update_chunk_status("c2", ProcessingStatus::Processing);
        // A chunk still processing keeps the file processing
        assert_eq!(
            tracker.file_status("a.py"),
            Some(ProcessingStatus::Processing)
        );

        tracker.update_chunk_status("c2", ProcessingStatus::Completed);
        assert_eq!(tracker.file_status("a.py"), Some(ProcessingStatus::Failed));
    }

    #[test]
    fn test_overall_progress() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.overall_progress(), 100.0);

        tracker.register_files(["a.py", "b.py", "c.py", "d.py"]);
        assert_eq!(tracker.overall_progress(), 0.0);

        tracker.update_file_status("a.py", ProcessingStatus::Completed);
        assert_eq!(tracker.overall_progress(), 25.0);

        tracker.update_file_status("b.py", ProcessingStatus::Completed);
        tracker.update_file_status("c.py", ProcessingStatus::Completed);
        tracker.update_file_status("d.py", ProcessingStatus::Completed);
        assert_eq!(tracker.overall_progress(), 100.0);
    }

    #[test]
    fn test_file_progress_over_chunks() {
        let tracker = ProgressTracker::new();
        tracker.register_files(["a.py"]);
        tracker.register_chunk("c1", "a.py");
        tracker.register_chunk("c2", "a.py");

        assert_eq!(tracker.file_progress("a.py"), Some(0.0));
        tracker.update_chunk_status("c1", ProcessingStatus::Completed);
        assert_eq!(tracker.file_progress("a.py"), Some(50.0));
        tracker.update_chunk_status("c2", ProcessingStatus::Completed);
        assert_eq!(tracker.file_progress("a.py"), Some(100.0));
    }

    #[test]
    fn test_part_aggregation_completes_parent() {
        let tracker = ProgressTracker::new();
        tracker.register_files(["a.py"]);
        tracker.register_chunk("abc123_part_1", "a.py");
        tracker.register_chunk("abc123_part_2", "a.py");

        // Parent entry was auto-registered
        assert_eq!(
            tracker.chunk_status("abc123"),
            Some(ProcessingStatus::Pending)
        );

        tracker.update_chunk_status("abc123_part_1", ProcessingStatus::Completed);
        assert_eq!(
            tracker.chunk_status("abc123"),
            Some(ProcessingStatus::Pending)
        );

        tracker.update_chunk_status("abc123_part_2", ProcessingStatus::Completed);
        assert_eq!(
            tracker.chunk_status("abc123"),
            Some(ProcessingStatus::Completed)
        );
        assert_eq!(
            tracker.file_status("a.py"),
            Some(ProcessingStatus::Completed)
        );
    }

    #[test]
    fn test_part_aggregation_fails_parent_when_settled() {
        let tracker = ProgressTracker::new();
        tracker.register_files(["a.py"]);
        tracker.register_chunk("abc123_part_1", "a.py");
        tracker.register_chunk("abc123_part_2", "a.py");

        tracker.update_chunk_status("abc123_part_1", ProcessingStatus::Failed);
        // Second part not terminal yet: parent does not transition
        assert_eq!(
            tracker.chunk_status("abc123"),
            Some(ProcessingStatus::Pending)
        );

        tracker.update_chunk_status("abc123_part_2", ProcessingStatus::Completed);
        assert_eq!(
            tracker.chunk_status("abc123"),
            Some(ProcessingStatus::Failed)
        );
    }

    #[test]
    fn test_part_suffix_parsing() {
        assert_eq!(part_parent("abc_part_3"), Some("abc".to_string()));
        assert_eq!(part_parent("abc_part_12"), Some("abc".to_string()));
        assert_eq!(part_parent("abc_part_"), None);
        assert_eq!(part_parent("abc_part_x"), None);
        assert_eq!(part_parent("abc"), None);
    }

    #[test]
    fn test_counts_exclude_parent_entries() {
        let tracker = ProgressTracker::new();
        tracker.register_files(["a.py"]);
        tracker.register_chunk("p_part_1", "a.py");
        tracker.register_chunk("p_part_2", "a.py");
        tracker.register_chunk("standalone", "a.py");

        let counts = tracker.counts();
        assert_eq!(counts.files_total, 1);
        // Two parts plus the standalone chunk; the parent "p" is bookkeeping
        assert_eq!(counts.chunks_total, 3);
    }

    #[test]
    fn test_counts_track_failures() {
        let tracker = ProgressTracker::new();
        tracker.register_files(["a.py", "b.py"]);
        tracker.register_chunk("c1", "a.py");
        tracker.register_chunk("c2", "b.py");

        tracker.update_chunk_status("c1", ProcessingStatus::Completed);
        tracker.update_chunk_status("c2", ProcessingStatus::Failed);

        let counts = tracker.counts();
        assert_eq!(counts.chunks_completed, 1);
        assert_eq!(counts.chunks_failed, 1);
        assert_eq!(counts.files_completed, 1);
        assert_eq!(counts.files_failed, 1);
    }

    #[test]
    fn test_unknown_chunk_update_is_ignored() {
        let tracker = ProgressTracker::new();
        tracker.update_chunk_status("ghost", ProcessingStatus::Completed);
        assert_eq!(tracker.chunk_status("ghost"), None);
    }

    #[test]
    fn test_reset() {
        let tracker = ProgressTracker::new();
        tracker.register_files(["a.py"]);
        tracker.register_chunk("c1", "a.py");
        tracker.reset();

        assert_eq!(tracker.file_status("a.py"), None);
        assert_eq!(tracker.chunk_status("c1"), None);
        assert_eq!(tracker.counts(), ProgressCounts::default());
    }
}
