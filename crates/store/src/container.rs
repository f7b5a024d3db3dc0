//! The on-disk store container.
//!
//! Layout inside the store directory:
//! ```text
//! world.meta.json            - schema version and per-group counts
//! partition.json             - embedded membership index
//! groups/<kind>/
//!   000001.chunk.cbor.zst    - CBOR+zstd compressed columnar chunk frames
//! integrity/
//!   manifest.json            - hash chain manifest over the chunk files
//! ```
//!
//! Single-writer, multi-reader: a writer finishes (and its manifest is
//! flushed) before any reader opens the directory. `partition.json` sits
//! outside the hash chain because repartitioning rewrites it in place
//! without touching the chunk data.

use popsim_balance::{MembershipError, PartitionMap};
use popsim_common::UnitId;
use popsim_world::ResolveError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::column::Column;

/// Bumped whenever the chunk or meta layout changes incompatibly.
pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("store has no group named {0:?}")]
    MissingGroup(String),
    #[error("group {group:?} chunk is missing or mistyped column {name:?}")]
    BadColumn { group: String, name: &'static str },
    #[error("chunk size must be at least 1")]
    InvalidChunkSize,
    #[error("{unit} has records in the store but no entry in the membership index")]
    StaleIndex { unit: UnitId },
    #[error("store has no embedded membership index")]
    NoPartitionMap,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Membership(#[from] MembershipError),
}

/// Per-group bookkeeping in `world.meta.json`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GroupMeta {
    pub records: u64,
    pub chunks: u32,
}

/// Metadata stored in `world.meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub groups: BTreeMap<String, GroupMeta>,
}

/// A single entry in the integrity manifest. `path` is relative to the
/// store root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

/// One columnar batch of records, the unit of chunked I/O.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkFrame {
    pub rows: u32,
    pub columns: BTreeMap<String, Column>,
}

impl ChunkFrame {
    pub fn new(rows: u32) -> Self {
        Self {
            rows,
            columns: BTreeMap::new(),
        }
    }

    /// Pull a column out by name, with the group name for error context.
    pub fn column(&self, group: &str, name: &'static str) -> Result<&Column, StoreError> {
        self.columns.get(name).ok_or_else(|| StoreError::BadColumn {
            group: group.to_string(),
            name,
        })
    }

    /// Copy out the row range `[start, end)` across every column.
    pub fn slice(&self, start: usize, end: usize) -> ChunkFrame {
        ChunkFrame {
            rows: (end - start) as u32,
            columns: self
                .columns
                .iter()
                .map(|(name, col)| (name.clone(), col.slice(start, end)))
                .collect(),
        }
    }
}

/// Directory-backed store with schema versioning and an integrity chain.
pub struct StoreContainer {
    root: PathBuf,
    meta: StoreMeta,
    manifest: IntegrityManifest,
}

impl StoreContainer {
    /// Create a fresh store, discarding any previous contents of the
    /// directory's store subpaths.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        let groups_dir = root.join("groups");
        if groups_dir.exists() {
            std::fs::remove_dir_all(&groups_dir)?;
        }
        for stale in ["world.meta.json", "partition.json"] {
            let p = root.join(stale);
            if p.exists() {
                std::fs::remove_file(p)?;
            }
        }
        std::fs::create_dir_all(&groups_dir)?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let store = Self {
            root,
            meta: StoreMeta {
                schema_version: STORE_SCHEMA_VERSION,
                groups: BTreeMap::new(),
            },
            manifest: IntegrityManifest::default(),
        };
        store.save_meta()?;
        store.save_manifest()?;
        Ok(store)
    }

    /// Open an existing store. Fails closed on a schema mismatch.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        let meta: StoreMeta =
            serde_json::from_reader(std::fs::File::open(root.join("world.meta.json"))?)?;
        if meta.schema_version != STORE_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                file_version: meta.schema_version,
                expected_version: STORE_SCHEMA_VERSION,
            });
        }
        let manifest: IntegrityManifest = serde_json::from_reader(std::fs::File::open(
            root.join("integrity").join("manifest.json"),
        )?)?;
        Ok(Self {
            root,
            meta,
            manifest,
        })
    }

    /// Append one chunk to a group's dataset, growing it by `frame.rows`
    /// records. Returns the one-based chunk index.
    pub fn append_chunk(&mut self, group: &str, frame: &ChunkFrame) -> Result<u32, StoreError> {
        let entry = self.meta.groups.entry(group.to_string()).or_default();
        entry.chunks += 1;
        entry.records += u64::from(frame.rows);
        let index = entry.chunks;

        let dir = self.root.join("groups").join(group);
        std::fs::create_dir_all(&dir)?;
        let filename = format!("{index:06}.chunk.cbor.zst");
        let compressed = zstd_compress(&cbor_serialize(frame)?)?;
        std::fs::write(dir.join(&filename), &compressed)?;

        let hash = sha256_hex(&compressed);
        let prev_hash = self.manifest.entries.last().map(|e| e.sha256.clone());
        self.manifest.entries.push(ManifestEntry {
            path: format!("groups/{group}/{filename}"),
            sha256: hash,
            prev_hash,
        });

        self.save_meta()?;
        self.save_manifest()?;
        Ok(index)
    }

    /// Read one chunk of a group by its one-based index, verifying its
    /// hash against the manifest.
    pub fn read_chunk(&self, group: &str, index: u32) -> Result<ChunkFrame, StoreError> {
        if !self.meta.groups.contains_key(group) {
            return Err(StoreError::MissingGroup(group.to_string()));
        }
        let rel = format!("groups/{group}/{index:06}.chunk.cbor.zst");
        let compressed = std::fs::read(self.root.join(&rel))?;
        self.verify_file_hash(&rel, &compressed)?;
        cbor_deserialize(&zstd_decompress(&compressed)?)
    }

    pub fn chunk_count(&self, group: &str) -> u32 {
        self.meta.groups.get(group).map_or(0, |g| g.chunks)
    }

    pub fn record_count(&self, group: &str) -> u64 {
        self.meta.groups.get(group).map_or(0, |g| g.records)
    }

    /// Embed the membership index. Deliberately outside the hash chain so
    /// repartitioning can rewrite it without rewriting chunk data.
    pub fn write_partition_map(&self, map: &PartitionMap) -> Result<(), StoreError> {
        serde_json::to_writer_pretty(
            std::fs::File::create(self.root.join("partition.json"))?,
            map,
        )?;
        Ok(())
    }

    pub fn read_partition_map(&self) -> Result<PartitionMap, StoreError> {
        let path = self.root.join("partition.json");
        if !path.exists() {
            return Err(StoreError::NoPartitionMap);
        }
        Ok(serde_json::from_reader(std::fs::File::open(path)?)?)
    }

    /// Verify the hash chain and every file hash in the manifest.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let mut prev_hash: Option<String> = None;
        for entry in &self.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(StoreError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
                });
            }
            let data = std::fs::read(self.root.join(&entry.path))?;
            let actual = sha256_hex(&data);
            if actual != entry.sha256 {
                return Err(StoreError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual,
                });
            }
            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    fn verify_file_hash(&self, rel_path: &str, data: &[u8]) -> Result<(), StoreError> {
        let actual = sha256_hex(data);
        for entry in &self.manifest.entries {
            if entry.path == rel_path {
                if entry.sha256 != actual {
                    return Err(StoreError::IntegrityMismatch {
                        expected: entry.sha256.clone(),
                        actual,
                    });
                }
                return Ok(());
            }
        }
        Err(StoreError::IntegrityMismatch {
            expected: format!("manifest entry for {rel_path}"),
            actual: "no entry".into(),
        })
    }

    fn save_meta(&self) -> Result<(), StoreError> {
        serde_json::to_writer_pretty(
            std::fs::File::create(self.root.join("world.meta.json"))?,
            &self.meta,
        )?;
        Ok(())
    }

    fn save_manifest(&self) -> Result<(), StoreError> {
        serde_json::to_writer_pretty(
            std::fs::File::create(self.root.join("integrity").join("manifest.json"))?,
            &self.manifest,
        )?;
        Ok(())
    }
}

pub(crate) fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
