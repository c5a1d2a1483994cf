//! Content-addressed chunk cache
//!
//! Durable store of [`ChunkSet`]s keyed by `(file_path, file_hash)` over a
//! single SQLite table, with TTL expiry, LRU eviction, and size caps.
//! Uses rusqlite with bundled SQLite, WAL mode, and an embedded schema.
//!
//! Writes serialize behind an internal mutex; every statement is atomic, so
//! a cache entry is either fully written or absent. The cache is best-effort
//! from the pipeline's point of view: a failure here never fails a file.

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::types::ChunkSet;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use rusqlite::{params, Connection, OptionalExtension};
use std::io::{Read, Write};
use std::sync::Mutex;

const SCHEMA: &str = include_str!("schema.sql");

/// Payloads above this serialized size are gzip+base64 wrapped when
/// compression is enabled.
const COMPRESSION_THRESHOLD: usize = 1024;

/// Entry counts and payload bytes currently held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub total_bytes: u64,
}

/// Result of a batch membership check
#[derive(Debug, Default)]
pub struct BatchCheckResult {
    /// Paths with a live entry for their current hash
    pub cached: Vec<String>,
    /// Paths with no entry for their current hash
    pub uncached: Vec<String>,
    /// Paths whose entry exists but aged out (also need re-chunking)
    pub expired: Vec<String>,
}

/// SQLite-backed chunk cache
///
/// Wraps `rusqlite::Connection` in a `Mutex`: one writer at a time, with
/// WAL mode for concurrent readers.
pub struct ChunkCache {
    conn: Mutex<Connection>,
    config: CacheConfig,
}

impl ChunkCache {
    /// Open (or create) the cache database at the configured path
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::OpenFailed(e.to_string()))?;
        }
        let conn = Connection::open(&config.db_path)
            .map_err(|e| CacheError::OpenFailed(e.to_string()))?;
        Self::init(conn, config)
    }

    /// Open an in-memory cache (for testing)
    pub fn open_in_memory(config: CacheConfig) -> Result<Self, CacheError> {
        let conn =
            Connection::open_in_memory().map_err(|e| CacheError::OpenFailed(e.to_string()))?;
        Self::init(conn, config)
    }

    fn init(conn: Connection, config: CacheConfig) -> Result<Self, CacheError> {
        // WAL for concurrent reads alongside the single writer
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| CacheError::OpenFailed(e.to_string()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| CacheError::OpenFailed(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| CacheError::OpenFailed(e.to_string()))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| CacheError::OpenFailed(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    /// Cache key for a (path, hash) pair: md5("{path}:{hash}"), hex-lowercase
    pub fn cache_key(file_path: &str, file_hash: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(format!("{}:{}", file_path, file_hash).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Fetch the chunk set for a (path, hash) pair
    ///
    /// Refreshes `last_accessed` on hit. Expired entries are treated as
    /// absent and deleted lazily.
    pub fn get(&self, file_path: &str, file_hash: &str) -> Result<Option<ChunkSet>, CacheError> {
        let key = Self::cache_key(file_path, file_hash);
        let conn = self.lock();

        let row: Option<(Vec<u8>, String)> = conn
            .query_row(
                "SELECT data, created_at FROM cache_entries WHERE cache_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(query_err)?;

        let (data, created_at) = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        if self.is_expired(&created_at) {
            conn.execute("DELETE FROM cache_entries WHERE cache_key = ?1", params![key])
                .map_err(query_err)?;
            tracing::debug!("Expired cache entry dropped for {}", file_path);
            return Ok(None);
        }

        conn.execute(
            "UPDATE cache_entries SET last_accessed = ?1 WHERE cache_key = ?2",
            params![now_iso(), key],
        )
        .map_err(query_err)?;

        let chunk_set = decode_payload(&data)
            .ok_or_else(|| CacheError::CorruptPayload(file_path.to_string()))?;
        Ok(Some(chunk_set))
    }

    /// Upsert the chunk set for a (path, hash) pair, then enforce the caps
    ///
    /// Idempotent: writing the same pair twice leaves exactly one row.
    pub fn set(
        &self,
        file_path: &str,
        file_hash: &str,
        chunk_set: &ChunkSet,
    ) -> Result<(), CacheError> {
        let key = Self::cache_key(file_path, file_hash);
        let json = serde_json::to_vec(chunk_set)
            .map_err(|e| CacheError::SerializeFailed(e.to_string()))?;

        let data = if self.config.compression && json.len() > COMPRESSION_THRESHOLD {
            encode_compressed(&json).map_err(|e| CacheError::SerializeFailed(e.to_string()))?
        } else {
            json
        };

        {
            let conn = self.lock();
            let now = now_iso();
            conn.execute(
                "INSERT INTO cache_entries
                     (cache_key, file_path, file_hash, data, data_size, created_at, last_accessed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(cache_key) DO UPDATE SET
                     data = excluded.data,
                     data_size = excluded.data_size,
                     created_at = excluded.created_at,
                     last_accessed = excluded.last_accessed",
                params![key, file_path, file_hash, data, data.len() as i64, now],
            )
            .map_err(query_err)?;
        }

        self.enforce_limits()?;
        Ok(())
    }

    /// Whether a live (unexpired) entry exists for the pair
    pub fn has(&self, file_path: &str, file_hash: &str) -> Result<bool, CacheError> {
        let key = Self::cache_key(file_path, file_hash);
        let conn = self.lock();

        let created_at: Option<String> = conn
            .query_row(
                "SELECT created_at FROM cache_entries WHERE cache_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;

        match created_at {
            None => Ok(false),
            Some(created_at) if self.is_expired(&created_at) => {
                conn.execute("DELETE FROM cache_entries WHERE cache_key = ?1", params![key])
                    .map_err(query_err)?;
                Ok(false)
            }
            Some(_) => Ok(true),
        }
    }

    /// Partition files into cached / uncached / expired
    pub fn batch_check(&self, files: &[(String, String)]) -> Result<BatchCheckResult, CacheError> {
        let conn = self.lock();
        let mut result = BatchCheckResult::default();

        for (file_path, file_hash) in files {
            let key = Self::cache_key(file_path, file_hash);
            let created_at: Option<String> = conn
                .query_row(
                    "SELECT created_at FROM cache_entries WHERE cache_key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(query_err)?;

            match created_at {
                None => result.uncached.push(file_path.clone()),
                Some(created_at) if self.is_expired(&created_at) => {
                    conn.execute(
                        "DELETE FROM cache_entries WHERE cache_key = ?1",
                        params![key],
                    )
                    .map_err(query_err)?;
                    result.expired.push(file_path.clone());
                }
                Some(_) => result.cached.push(file_path.clone()),
            }
        }
        Ok(result)
    }

    /// Delete every revision stored for a path
    pub fn invalidate_file(&self, file_path: &str) -> Result<usize, CacheError> {
        let conn = self.lock();
        let deleted = conn
            .execute(
                "DELETE FROM cache_entries WHERE file_path = ?1",
                params![file_path],
            )
            .map_err(query_err)?;
        if deleted > 0 {
            tracing::debug!("Invalidated {} cache entries for {}", deleted, file_path);
        }
        Ok(deleted)
    }

    /// Evict least-recently-accessed entries until both the entry-count cap
    /// and 80% of the size cap are respected. Returns the eviction count.
    pub fn enforce_limits(&self) -> Result<usize, CacheError> {
        let size_budget = (self.config.max_size_bytes as f64 * 0.8) as i64;
        let conn = self.lock();
        let mut evicted = 0usize;

        loop {
            let (entries, total_bytes): (i64, i64) = conn
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(data_size), 0) FROM cache_entries",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(query_err)?;

            if entries as u64 <= self.config.max_entries && total_bytes <= size_budget {
                break;
            }

            let victim: Option<String> = conn
                .query_row(
                    "SELECT cache_key FROM cache_entries ORDER BY last_accessed ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(query_err)?;

            match victim {
                Some(key) => {
                    conn.execute(
                        "DELETE FROM cache_entries WHERE cache_key = ?1",
                        params![key],
                    )
                    .map_err(query_err)?;
                    evicted += 1;
                }
                None => break,
            }
        }

        if evicted > 0 {
            tracing::info!("Evicted {} cache entries (LRU)", evicted);
        }
        Ok(evicted)
    }

    /// Delete all rows older than the TTL. Returns the deletion count.
    pub fn clean_expired(&self) -> Result<usize, CacheError> {
        let cutoff = iso(Utc::now() - Duration::hours(self.config.ttl_hours as i64));
        let conn = self.lock();
        let deleted = conn
            .execute(
                "DELETE FROM cache_entries WHERE created_at < ?1",
                params![cutoff],
            )
            .map_err(query_err)?;
        if deleted > 0 {
            tracing::info!("Cleaned {} expired cache entries", deleted);
        }
        Ok(deleted)
    }

    /// Current entry count and payload byte total
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let conn = self.lock();
        let (entries, total_bytes): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(data_size), 0) FROM cache_entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(query_err)?;
        Ok(CacheStats {
            entries: entries as u64,
            total_bytes: total_bytes as u64,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("ChunkCache mutex poisoned")
    }

    fn is_expired(&self, created_at: &str) -> bool {
        match DateTime::parse_from_rfc3339(created_at) {
            Ok(created) => {
                let age = Utc::now().signed_duration_since(created.with_timezone(&Utc));
                age > Duration::hours(self.config.ttl_hours as i64)
            }
            // Unparseable timestamps count as expired so bad rows age out
            Err(_) => true,
        }
    }

    /// Rewind an entry's created_at for expiry tests
    #[cfg(test)]
    fn backdate(&self, file_path: &str, file_hash: &str, hours: i64) {
        let key = Self::cache_key(file_path, file_hash);
        let past = iso(Utc::now() - Duration::hours(hours));
        let conn = self.lock();
        conn.execute(
            "UPDATE cache_entries SET created_at = ?1 WHERE cache_key = ?2",
            params![past, key],
        )
        .unwrap();
    }
}

fn query_err(e: rusqlite::Error) -> CacheError {
    CacheError::QueryFailed(e.to_string())
}

/// RFC 3339 with microseconds: lexicographic order equals temporal order
fn now_iso() -> String {
    iso(Utc::now())
}

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_compressed(json: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json)?;
    let gz = encoder.finish()?;
    Ok(BASE64.encode(gz).into_bytes())
}

/// Decode a stored payload: raw JSON or base64-wrapped gzip
fn decode_payload(data: &[u8]) -> Option<ChunkSet> {
    if data.first() == Some(&b'{') {
        return serde_json::from_slice(data).ok();
    }
    let gz = BASE64.decode(data).ok()?;
    let mut decoder = GzDecoder::new(gz.as_slice());
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).ok()?;
    serde_json::from_slice(&json).ok()
}
