//! Merkle-tree change detection
//!
//! Builds a Merkle tree over the scanner's ordered file-hash list, persists a
//! snapshot per workspace, and diffs the current tree against the previous
//! snapshot to decide what needs re-chunking. An equal root hash
//! short-circuits the whole diff.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Snapshot format version; mismatched snapshots are discarded
pub const SCHEMA_VERSION: &str = "2.0";

/// Hash and size of one scanned file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub hash: String,
    pub size: u64,
}

/// Persisted per-workspace Merkle state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleSnapshot {
    pub schema_version: String,
    pub root_hash: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub workspace_path: String,
    pub file_hash_map: BTreeMap<String, FileEntry>,
}

/// One step of a Merkle inclusion proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Sibling hash at this level, hex-lowercase
    pub sibling: String,
    /// Whether the sibling sits to the left of the running hash
    pub sibling_is_left: bool,
}

/// Difference between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl MerkleDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Paths that need (re-)chunking
    pub fn changed_paths(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.modified.iter())
    }
}

/// Merkle tree over an ordered list of file hashes
///
/// Level 0 holds the leaves; each internal node is sha256(left ‖ right) over
/// the raw digest bytes, with the last node duplicated on odd layers.
pub struct MerkleTree {
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// Build from hex-encoded leaf hashes in scanner emission order
    pub fn build(leaf_hashes: &[String]) -> Self {
        let leaves: Vec<[u8; 32]> = leaf_hashes.iter().map(|h| decode_digest(h)).collect();

        let mut levels = vec![leaves];
        while levels.last().map(|l| l.len() > 1).unwrap_or(false) {
            let current = levels.last().unwrap();
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let left = pair[0];
                let right = if pair.len() == 2 { pair[1] } else { pair[0] };
                next.push(hash_pair(&left, &right));
            }
            levels.push(next);
        }
        Self { levels }
    }

    /// Root hash, hex-lowercase. The empty tree hashes the empty input.
    pub fn root_hex(&self) -> String {
        match self.levels.last().and_then(|l| l.first()) {
            Some(root) => encode_digest(root),
            None => {
                let digest: [u8; 32] = Sha256::digest([]).into();
                encode_digest(&digest)
            }
        }
    }

    /// Number of leaves
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(|l| l.len()).unwrap_or(0)
    }

    /// Inclusion proof for the leaf at `index`
    pub fn proof(&self, index: usize) -> Option<Vec<ProofStep>> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut steps = Vec::new();
        let mut position = index;
        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            let sibling_index = position ^ 1;
            // Odd layer end duplicates the node itself
            let sibling = level
                .get(sibling_index)
                .copied()
                .unwrap_or(level[position]);
            steps.push(ProofStep {
                sibling: encode_digest(&sibling),
                sibling_is_left: sibling_index < position,
            });
            position /= 2;
        }
        Some(steps)
    }

    /// Re-derive the root from a leaf and its proof
    pub fn verify_proof(leaf_hex: &str, proof: &[ProofStep], root_hex: &str) -> bool {
        let mut running = decode_digest(leaf_hex);
        for step in proof {
            let sibling = decode_digest(&step.sibling);
            running = if step.sibling_is_left {
                hash_pair(&sibling, &running)
            } else {
                hash_pair(&running, &sibling)
            };
        }
        encode_digest(&running) == root_hex
    }
}

/// Snapshot persistence and diffing for one workspace
pub struct MerkleStore {
    snapshot_path: PathBuf,
    compress: bool,
}

impl MerkleStore {
    pub fn new(snapshot_path: impl AsRef<Path>, compress: bool) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
            compress,
        }
    }

    /// Build a snapshot from the scanner's ordered output
    pub fn build_snapshot(
        workspace_path: &str,
        ordered: &[(String, String, u64)],
    ) -> MerkleSnapshot {
        let leaf_hashes: Vec<String> = ordered.iter().map(|(_, hash, _)| hash.clone()).collect();
        let tree = MerkleTree::build(&leaf_hashes);

        let file_hash_map = ordered
            .iter()
            .map(|(path, hash, size)| {
                (
                    path.clone(),
                    FileEntry {
                        hash: hash.clone(),
                        size: *size,
                    },
                )
            })
            .collect();

        MerkleSnapshot {
            schema_version: SCHEMA_VERSION.to_string(),
            root_hash: tree.root_hex(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            workspace_path: workspace_path.to_string(),
            file_hash_map,
        }
    }

    /// Load the previous snapshot, if one is present and intact
    ///
    /// A missing, corrupt, or version-mismatched snapshot yields `None`, which
    /// the pipeline treats as an initial build.
    pub fn load(&self) -> Option<MerkleSnapshot> {
        if !self.snapshot_path.exists() {
            tracing::debug!("No merkle snapshot at {:?}", self.snapshot_path);
            return None;
        }

        let raw = match std::fs::read(&self.snapshot_path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to read merkle snapshot: {}", e);
                return None;
            }
        };

        let json = if raw.first() == Some(&b'{') {
            raw
        } else {
            match decompress_snapshot(&raw) {
                Some(json) => json,
                None => {
                    tracing::warn!("Corrupt merkle snapshot, treating as initial build");
                    return None;
                }
            }
        };

        let snapshot: MerkleSnapshot = match serde_json::from_slice(&json) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(
                    "Corrupt merkle snapshot, treating as initial build: {}",
                    e
                );
                return None;
            }
        };

        if snapshot.schema_version != SCHEMA_VERSION {
            tracing::warn!(
                "Merkle snapshot schema {} != {}, discarding",
                snapshot.schema_version,
                SCHEMA_VERSION
            );
            return None;
        }

        Some(snapshot)
    }

    /// Persist a snapshot, optionally gzip+base64-wrapped
    pub fn save(&self, snapshot: &MerkleSnapshot) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Some(parent) = self.snapshot_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create snapshot directory")?;
        }

        let json = serde_json::to_vec(snapshot).context("Failed to serialize snapshot")?;
        let payload = if self.compress {
            compress_snapshot(&json)?
        } else {
            json
        };

        std::fs::write(&self.snapshot_path, payload).context("Failed to write snapshot")?;
        tracing::debug!("Saved merkle snapshot to {:?}", self.snapshot_path);
        Ok(())
    }

    /// Map-difference between two snapshots, short-circuiting on equal roots
    pub fn diff(previous: Option<&MerkleSnapshot>, current: &MerkleSnapshot) -> MerkleDiff {
        let previous = match previous {
            Some(previous) => previous,
            None => {
                // Initial build: everything is new
                return MerkleDiff {
                    added: current.file_hash_map.keys().cloned().collect(),
                    ..Default::default()
                };
            }
        };

        if previous.root_hash == current.root_hash {
            return MerkleDiff::default();
        }

        let mut diff = MerkleDiff::default();
        for (path, entry) in &current.file_hash_map {
            match previous.file_hash_map.get(path) {
                None => diff.added.push(path.clone()),
                Some(old) if old.hash != entry.hash => diff.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in previous.file_hash_map.keys() {
            if !current.file_hash_map.contains_key(path) {
                diff.removed.push(path.clone());
            }
        }
        diff
    }
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn encode_digest(digest: &[u8; 32]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decode a hex hash; non-hex input degrades to hashing the raw string so a
/// malformed leaf can never panic the tree build.
fn decode_digest(hex: &str) -> [u8; 32] {
    let bytes = hex.as_bytes();
    if bytes.len() == 64 {
        let mut out = [0u8; 32];
        let mut valid = true;
        for (i, pair) in bytes.chunks(2).enumerate() {
            match std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
            {
                Some(byte) => out[i] = byte,
                None => {
                    valid = false;
                    break;
                }
            }
        }
        if valid {
            return out;
        }
    }
    Sha256::digest(hex.as_bytes()).into()
}

fn compress_snapshot(json: &[u8]) -> anyhow::Result<Vec<u8>> {
    use anyhow::Context;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json).context("Failed to gzip snapshot")?;
    let gz = encoder.finish().context("Failed to finish gzip stream")?;
    Ok(BASE64.encode(gz).into_bytes())
}

fn decompress_snapshot(raw: &[u8]) -> Option<Vec<u8>> {
    let gz = BASE64.decode(raw.trim_ascii()).ok()?;
    let mut decoder = GzDecoder::new(gz.as_slice());
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).ok()?;
    Some(json)
}
