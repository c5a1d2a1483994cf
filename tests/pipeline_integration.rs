/// End-to-end pipeline tests over real workspaces on disk
use async_trait::async_trait;
use chunkflow::cache::ChunkCache;
use chunkflow::error::SinkError;
use chunkflow::merkle::MerkleStore;
use chunkflow::router::ChunkSink;
use chunkflow::scanner::hash_bytes;
use chunkflow::types::{
    Chunk, ChunkType, EmbedOutcome, SearchHit, UpsertAck, VectorRecord, MAX_CHUNK_BYTES,
};
use chunkflow::{Config, Session, SessionManager};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Sink that records every chunk it accepts
#[derive(Default)]
struct RecordingSink {
    chunks: Mutex<Vec<Chunk>>,
    embed_calls: Mutex<usize>,
}

impl RecordingSink {
    fn accepted(&self) -> Vec<Chunk> {
        self.chunks.lock().unwrap().clone()
    }

    fn embed_calls(&self) -> usize {
        *self.embed_calls.lock().unwrap()
    }
}

#[async_trait]
impl ChunkSink for RecordingSink {
    async fn embed(&self, batch: &[Chunk]) -> Result<EmbedOutcome, SinkError> {
        *self.embed_calls.lock().unwrap() += 1;
        self.chunks.lock().unwrap().extend_from_slice(batch);
        Ok(EmbedOutcome {
            status: "completed".to_string(),
            ids: batch.iter().map(|c| c.chunk_id.clone()).collect(),
        })
    }

    async fn upsert(&self, _records: &[VectorRecord]) -> Result<UpsertAck, SinkError> {
        Ok(UpsertAck { acknowledged: true })
    }

    async fn search(
        &self,
        _query: &str,
        _top_k: usize,
        _filters: Option<serde_json::Value>,
    ) -> Result<Vec<SearchHit>, SinkError> {
        Ok(vec![])
    }
}

fn config_for(workspace: &Path, state: &Path) -> Config {
    let mut config = Config::default();
    config.workspace_path = workspace.to_path_buf();
    config.cache.db_path = state.join("chunk_cache.sqlite3");
    config.concurrency = 2;
    config
}

fn session_with_sink(workspace: &Path, state: &Path) -> (Session, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let session = Session::new(config_for(workspace, state), sink.clone()).unwrap();
    (session, sink)
}

#[tokio::test]
async fn test_single_python_function_chunk() {
    let workspace = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    std::fs::write(workspace.path().join("a.py"), "def f():\n    return 1\n").unwrap();

    let (session, sink) = session_with_sink(workspace.path(), state.path());
    assert!(session.process_workspace(&[]).await);

    let accepted = sink.accepted();
    assert_eq!(accepted.len(), 1);
    let chunk = &accepted[0];
    assert_eq!(chunk.chunk_type, ChunkType::Function);
    assert_eq!(chunk.name.as_deref(), Some("f"));
    assert_eq!(chunk.start_line, 1);
    assert_eq!(chunk.end_line, 2);
    assert_eq!(chunk.content, "def f():\n    return 1");
    assert_eq!(chunk.file_path, "a.py");
    assert_eq!(chunk.language, "python");

    session.shutdown().await;
}

#[tokio::test]
async fn test_adjacent_go_consts_merge() {
    let workspace = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    std::fs::write(
        workspace.path().join("demo.go"),
        "package demo\n\nconst A = 1\n\nconst B = 2\n",
    )
    .unwrap();

    let (session, sink) = session_with_sink(workspace.path(), state.path());
    assert!(session.process_workspace(&[]).await);

    let constants: Vec<Chunk> = sink
        .accepted()
        .into_iter()
        .filter(|c| c.chunk_type == ChunkType::Constant)
        .collect();
    assert_eq!(constants.len(), 1);
    assert_eq!(constants[0].start_line, 3);
    assert_eq!(constants[0].end_line, 5);
    assert_eq!(constants[0].content, "const A = 1\n\nconst B = 2");

    session.shutdown().await;
}

#[tokio::test]
async fn test_unchanged_rerun_serves_everything_from_cache() {
    let workspace = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    for i in 0..3 {
        std::fs::write(
            workspace.path().join(format!("f{}.py", i)),
            format!("def f{}():\n    return {}\n", i, i),
        )
        .unwrap();
    }

    let (session, sink) = session_with_sink(workspace.path(), state.path());
    assert!(session.process_workspace(&[]).await);
    let first_calls = sink.embed_calls();
    assert!(first_calls > 0);

    // Second run: batch_check resolves every file, no parser runs, the
    // sink sees no new traffic, and progress reports 100%.
    assert!(session.process_workspace(&[]).await);
    let summary = session.last_run_summary().unwrap();
    assert_eq!(summary.files_from_cache, 3);
    assert_eq!(summary.files_parsed, 0);
    assert_eq!(summary.chunks_emitted, 0);
    assert_eq!(sink.embed_calls(), first_calls);
    assert_eq!(session.file_processing_progress(), 100.0);

    // Direct cache view agrees
    let pairs: Vec<(String, String)> = (0..3)
        .map(|i| {
            let path = format!("f{}.py", i);
            let bytes = std::fs::read(workspace.path().join(&path)).unwrap();
            (path, hash_bytes(&bytes))
        })
        .collect();
    let check = session.cache().batch_check(&pairs).unwrap();
    assert_eq!(check.cached.len(), 3);
    assert!(check.uncached.is_empty());
    assert!(check.expired.is_empty());

    session.shutdown().await;
}

#[tokio::test]
async fn test_modified_file_is_the_only_one_reprocessed() {
    let workspace = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    std::fs::write(workspace.path().join("stable.py"), "def s():\n    return 0\n").unwrap();
    std::fs::write(workspace.path().join("edited.py"), "def e():\n    return 1\n").unwrap();

    let (session, sink) = session_with_sink(workspace.path(), state.path());
    assert!(session.process_workspace(&[]).await);
    let first_accepted = sink.accepted().len();

    // Change one line in one file
    std::fs::write(workspace.path().join("edited.py"), "def e():\n    return 2\n").unwrap();

    assert!(session.process_workspace(&[]).await);
    let summary = session.last_run_summary().unwrap();
    assert_eq!(summary.files_from_cache, 1);
    assert_eq!(summary.files_parsed, 1);

    // Only the edited file's chunks were re-shipped
    let second_batch: Vec<Chunk> = sink.accepted().split_off(first_accepted);
    assert!(!second_batch.is_empty());
    assert!(second_batch.iter().all(|c| c.file_path == "edited.py"));

    session.shutdown().await;
}

#[tokio::test]
async fn test_merkle_diff_lists_exactly_the_modified_path() {
    let before = vec![
        ("a.py".to_string(), hash_bytes(b"one"), 3u64),
        ("b.py".to_string(), hash_bytes(b"two"), 3u64),
        ("c.py".to_string(), hash_bytes(b"three"), 5u64),
    ];
    let mut after = before.clone();
    after[1].1 = hash_bytes(b"two CHANGED");

    let prev = MerkleStore::build_snapshot("/ws", &before);
    let cur = MerkleStore::build_snapshot("/ws", &after);
    assert_ne!(prev.root_hash, cur.root_hash);

    let diff = MerkleStore::diff(Some(&prev), &cur);
    assert!(diff.added.is_empty());
    assert_eq!(diff.modified, vec!["b.py".to_string()]);
    assert!(diff.removed.is_empty());
}

#[tokio::test]
async fn test_unparseable_file_falls_back_and_run_succeeds() {
    let workspace = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    std::fs::write(
        workspace.path().join("broken.py"),
        "def broken(:\n    ???\n!!!\n",
    )
    .unwrap();

    let (session, sink) = session_with_sink(workspace.path(), state.path());
    assert!(session.process_workspace(&[]).await);

    let accepted = sink.accepted();
    assert!(!accepted.is_empty());
    assert!(accepted.iter().all(|c| c.chunk_type == ChunkType::Fallback));
    assert!(accepted.iter().all(|c| c.parser == "readline_parser"));

    session.shutdown().await;
}

#[tokio::test]
async fn test_lru_eviction_keeps_three_most_recent() {
    let mut cache_config = chunkflow::config::CacheConfig::default();
    cache_config.db_path = std::path::PathBuf::from(":memory:");
    cache_config.max_entries = 3;
    let cache = ChunkCache::open_in_memory(cache_config).unwrap();

    for i in 1..=5 {
        let path = format!("f{}.py", i);
        let hash = format!("hash-{}", i);
        let set = chunkflow::types::ChunkSet {
            file_path: path.clone(),
            file_hash: hash.clone(),
            chunks: vec![],
            produced_at: 0,
        };
        cache.set(&path, &hash, &set).unwrap();
    }

    assert_eq!(cache.stats().unwrap().entries, 3);
    for (path, hash, expect) in [
        ("f1.py", "hash-1", false),
        ("f2.py", "hash-2", false),
        ("f3.py", "hash-3", true),
        ("f4.py", "hash-4", true),
        ("f5.py", "hash-5", true),
    ] {
        assert_eq!(cache.has(path, hash).unwrap(), expect, "{}", path);
    }
}

#[tokio::test]
async fn test_chunk_invariants_over_mixed_workspace() {
    let workspace = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();

    std::fs::write(
        workspace.path().join("app.py"),
        "import os\n\nimport sys\n\n\n\nclass App:\n    def run(self):\n        return os.name\n",
    )
    .unwrap();
    std::fs::write(
        workspace.path().join("lib.rs"),
        "use std::fmt;\n\npub fn format_it(x: i32) -> String {\n    format!(\"{}\", x)\n}\n",
    )
    .unwrap();
    std::fs::write(workspace.path().join("notes.md"), "# Notes\n\nsome text\n").unwrap();
    // Oversized comment block: must arrive split and bounded
    let comment_line = format!("# {}", "c".repeat(98));
    std::fs::write(
        workspace.path().join("banner.py"),
        vec![comment_line.as_str(); 150].join("\n"),
    )
    .unwrap();

    let (session, sink) = session_with_sink(workspace.path(), state.path());
    assert!(session.process_workspace(&[]).await);

    let accepted = sink.accepted();
    assert!(!accepted.is_empty());

    for chunk in &accepted {
        // Universal invariants
        assert!(chunk.byte_len() <= MAX_CHUNK_BYTES, "{} too big", chunk.chunk_id);
        assert!(chunk.start_line >= 1);
        assert!(chunk.end_line >= chunk.start_line);

        // Round trip against the source file
        let source =
            std::fs::read_to_string(workspace.path().join(&chunk.file_path)).unwrap();
        let lines: Vec<&str> = source.lines().collect();
        let expected = lines[chunk.start_line - 1..chunk.end_line].join("\n");
        assert_eq!(chunk.content, expected, "round trip failed for {}", chunk.file_path);
    }

    // Per-file id uniqueness and same-type separation
    use std::collections::{HashMap, HashSet};
    let mut per_file: HashMap<&str, Vec<&Chunk>> = HashMap::new();
    for chunk in &accepted {
        per_file.entry(chunk.file_path.as_str()).or_default().push(chunk);
    }
    for (path, chunks) in per_file {
        let mut ids = HashSet::new();
        for chunk in &chunks {
            assert!(ids.insert(&chunk.chunk_id), "duplicate id in {}", path);
        }
        for a in &chunks {
            for b in &chunks {
                if a.chunk_id < b.chunk_id
                    && a.chunk_type == b.chunk_type
                    && !a.chunk_id.contains("_part_")
                    && !b.chunk_id.contains("_part_")
                {
                    let (first, second) = if a.start_line <= b.start_line {
                        (a, b)
                    } else {
                        (b, a)
                    };
                    assert!(
                        second.start_line > first.end_line + 2,
                        "mergeable pair survived in {}",
                        path
                    );
                }
            }
        }
    }

    session.shutdown().await;
}

#[tokio::test]
async fn test_multibyte_sources_round_trip() {
    let workspace = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    std::fs::write(
        workspace.path().join("cjk.py"),
        "def 你好():\n    return \"世界\"\n",
    )
    .unwrap();

    let (session, sink) = session_with_sink(workspace.path(), state.path());
    assert!(session.process_workspace(&[]).await);

    let accepted = sink.accepted();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].name.as_deref(), Some("你好"));
    assert_eq!(accepted[0].content, "def 你好():\n    return \"世界\"");

    session.shutdown().await;
}

#[tokio::test]
async fn test_empty_file_produces_no_chunks() {
    let workspace = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    std::fs::write(workspace.path().join("empty.py"), "").unwrap();

    let (session, sink) = session_with_sink(workspace.path(), state.path());
    assert!(session.process_workspace(&[]).await);
    assert!(sink.accepted().is_empty());
    assert_eq!(session.file_processing_progress(), 100.0);

    session.shutdown().await;
}

#[tokio::test]
async fn test_session_manager_full_surface() {
    let workspace = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    std::fs::write(
        workspace.path().join("svc.ts"),
        "interface Svc {\n  run(): void;\n}\n",
    )
    .unwrap();

    let sink = Arc::new(RecordingSink::default());
    let manager =
        SessionManager::new(config_for(workspace.path(), state.path()), sink.clone()).unwrap();

    let ws = workspace.path().display().to_string();
    assert!(
        manager
            .process_workspace("user-1", "device-1", &ws, "bearer", &[])
            .await
    );
    assert_eq!(
        manager
            .file_processing_progress("user-1", "device-1", &ws)
            .await,
        100.0
    );

    let hits = manager
        .search("user-1", "device-1", &ws, "interface", 5, None)
        .await
        .unwrap();
    assert!(hits.is_empty()); // recording sink returns no hits

    let accepted = sink.accepted();
    assert!(accepted
        .iter()
        .any(|c| c.chunk_type == ChunkType::Interface && c.name.as_deref() == Some("Svc")));

    manager.close_session("user-1", "device-1", &ws).await;
    manager.shutdown().await;
}
