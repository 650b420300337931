//! # Block Module
//!
//! An on-disk, immutable, time-partitioned unit of storage:
//!
//! ```text
//! <ulid>/
//!   meta.json             stats and time bounds, pretty-printed JSON
//!   chunks/
//!     <16-hex series hash>  concatenated sealed chunk frames
//! ```
//!
//! The directory name is a 26-character ULID whose timestamp component is
//! the block's `minTime`, so a lexicographic sort of block directories is
//! chronological. A block is complete once `meta.json` is written; from
//! then on it is immutable until a compaction supersedes it or retention
//! deletes it, both by whole-directory removal.
//!
//! Chunk files carry no frame count — readers loop until a clean EOF, so
//! corruption in frame `k` makes frames `k+1…` unreachable for that
//! series in this block only.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::chunk::{Chunk, ChunkError, ChunkReader};
use crate::series::Sample;
use crate::util::unix_millis;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Metadata file name inside a block directory.
pub const META_FILE: &str = "meta.json";

/// Chunk directory name inside a block directory.
pub const CHUNKS_DIR: &str = "chunks";

/// Current block metadata version.
pub const META_VERSION: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by block operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlockError {
    /// Missing or malformed metadata, chunk/sample count mismatch, or a
    /// foreign on-disk layout.
    #[error("corrupted block: {0}")]
    Corrupted(String),

    /// Chunk-level failure while reading or writing frames.
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ------------------------------------------------------------------------------------------------
// Metadata
// ------------------------------------------------------------------------------------------------

/// Aggregate counts stored in `meta.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlockStats {
    /// Total samples across all chunks.
    pub num_samples: u64,
    /// Distinct series (chunk files).
    pub num_series: u64,
    /// Total chunk frames.
    pub num_chunks: u64,
}

/// The `meta.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlockMeta {
    /// 26-character ULID naming the block directory.
    pub ulid: String,
    /// Smallest sample timestamp in the block.
    pub min_time: i64,
    /// Largest sample timestamp in the block.
    pub max_time: i64,
    /// Aggregate counts.
    pub stats: BlockStats,
    /// Format version.
    pub version: u32,
}

// ------------------------------------------------------------------------------------------------
// Block
// ------------------------------------------------------------------------------------------------

/// One on-disk block: a ULID-named directory of per-series chunk files
/// plus a JSON metadata sidecar.
#[derive(Debug)]
pub struct Block {
    dir: PathBuf,
    meta: BlockMeta,
    /// Hashes already given a chunk file, for `numSeries` accounting
    /// while the block is being built.
    series_seen: HashSet<u64>,
}

impl Block {
    /// Creates a fresh block directory under `parent` covering
    /// `[min_time, max_time]`. Both the block directory and its `chunks/`
    /// subdirectory are created immediately.
    ///
    /// The ULID timestamp is `min_time`, so directory names sort
    /// chronologically; the entropy component is creation-ordered, so
    /// blocks sharing a `min_time` sort in write order.
    pub fn create(parent: &Path, min_time: i64, max_time: i64) -> Result<Self, BlockError> {
        static CREATE_SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = CREATE_SEQ.fetch_add(1, Ordering::Relaxed);
        let entropy = ((unix_millis() as u128) << 32)
            | (((seq & 0xFFFF) as u128) << 16)
            | rand::random::<u16>() as u128;

        let ulid = Ulid::from_parts(min_time.max(0) as u64, entropy);
        let dir = parent.join(ulid.to_string());
        fs::create_dir_all(dir.join(CHUNKS_DIR))?;

        debug!(ulid = %ulid, min_time, max_time, "block created");
        Ok(Self {
            dir,
            meta: BlockMeta {
                ulid: ulid.to_string(),
                min_time,
                max_time,
                stats: BlockStats::default(),
                version: META_VERSION,
            },
            series_seen: HashSet::new(),
        })
    }

    /// Opens an existing block directory, validating `meta.json`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, BlockError> {
        let dir = dir.into();
        let meta_path = dir.join(META_FILE);
        let raw = fs::read_to_string(&meta_path).map_err(|e| {
            BlockError::Corrupted(format!("missing meta.json at {}: {e}", meta_path.display()))
        })?;
        let meta: BlockMeta = serde_json::from_str(&raw)
            .map_err(|e| BlockError::Corrupted(format!("malformed meta.json: {e}")))?;
        if meta.version != META_VERSION {
            return Err(BlockError::Corrupted(format!(
                "unsupported block version {}",
                meta.version
            )));
        }
        if !dir.join(CHUNKS_DIR).is_dir() {
            return Err(BlockError::Corrupted("missing chunks directory".into()));
        }

        Ok(Self {
            dir,
            meta,
            series_seen: HashSet::new(),
        })
    }

    /// The block's ULID string.
    pub fn ulid(&self) -> &str {
        &self.meta.ulid
    }

    /// The block directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Smallest covered timestamp.
    pub fn min_time(&self) -> i64 {
        self.meta.min_time
    }

    /// Largest covered timestamp.
    pub fn max_time(&self) -> i64 {
        self.meta.max_time
    }

    /// Covered duration in milliseconds.
    pub fn duration(&self) -> i64 {
        self.meta.max_time - self.meta.min_time
    }

    /// Aggregate counts.
    pub fn stats(&self) -> &BlockStats {
        &self.meta.stats
    }

    /// Returns `true` when `[t0, t1]` intersects the block's time range.
    #[inline]
    pub fn overlaps(&self, t0: i64, t1: i64) -> bool {
        !(t1 < self.meta.min_time || t0 > self.meta.max_time)
    }

    /// Returns `true` when `t` falls inside the block's time range.
    #[inline]
    pub fn contains(&self, t: i64) -> bool {
        self.meta.min_time <= t && t <= self.meta.max_time
    }

    /// Appends a sealed chunk's frame to the series' chunk file, creating
    /// the file on first use, and updates the in-memory stats.
    pub fn write_chunk(&mut self, hash: u64, chunk: &Chunk) -> Result<(), BlockError> {
        let path = self.chunk_path(hash);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        chunk.write_to(&mut file)?;
        file.sync_all()?;

        self.meta.stats.num_chunks += 1;
        self.meta.stats.num_samples += chunk.num_samples() as u64;
        if self.series_seen.insert(hash) {
            self.meta.stats.num_series += 1;
        }
        // Defensive widening; builders normally pass exact bounds upfront.
        self.meta.min_time = self.meta.min_time.min(chunk.min_time());
        self.meta.max_time = self.meta.max_time.max(chunk.max_time());
        Ok(())
    }

    /// Writes `samples` for one series as a run of sealed chunks of up to
    /// `capacity` samples each. Timestamps must be strictly increasing.
    pub fn write_series(
        &mut self,
        hash: u64,
        samples: &[Sample],
        capacity: usize,
    ) -> Result<(), BlockError> {
        let mut chunk = Chunk::with_capacity(capacity);
        for &sample in samples {
            if chunk.is_full() {
                chunk.seal()?;
                self.write_chunk(hash, &chunk)?;
                chunk = Chunk::with_capacity(capacity);
            }
            chunk.append(sample)?;
        }
        if chunk.num_samples() > 0 {
            chunk.seal()?;
            self.write_chunk(hash, &chunk)?;
        }
        Ok(())
    }

    /// Streams every chunk frame recorded for `hash`, stopping on clean
    /// EOF. A series with no chunk file yields an empty vector.
    pub fn read_chunks(&self, hash: u64) -> Result<Vec<Chunk>, BlockError> {
        let path = self.chunk_path(hash);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BlockError::Io(e)),
        };

        let mut chunks = Vec::new();
        for chunk in ChunkReader::new(BufReader::new(file)) {
            chunks.push(chunk?);
        }
        Ok(chunks)
    }

    /// Returns the samples for `hash` within `[t0, t1]`.
    ///
    /// Returns an empty vector without touching chunk files when the
    /// block does not overlap the range. Chunks whose own range falls
    /// outside the query are skipped without decoding.
    pub fn query(&self, hash: u64, t0: i64, t1: i64) -> Result<Vec<Sample>, BlockError> {
        if !self.overlaps(t0, t1) {
            return Ok(Vec::new());
        }

        let mut samples = Vec::new();
        for chunk in self.read_chunks(hash)? {
            if !chunk.overlaps(t0, t1) {
                continue;
            }
            for sample in chunk.iter().map_err(BlockError::Chunk)? {
                if sample.t >= t0 && sample.t <= t1 {
                    samples.push(sample);
                }
            }
        }
        Ok(samples)
    }

    /// All series hashes with a chunk file in this block.
    pub fn series_hashes(&self) -> Result<Vec<u64>, BlockError> {
        let mut hashes = Vec::new();
        for entry in fs::read_dir(self.dir.join(CHUNKS_DIR))? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            match u64::from_str_radix(name, 16) {
                Ok(hash) if name.len() == 16 => hashes.push(hash),
                _ => {
                    warn!(file = name, dir = %self.dir.display(), "stray file in chunks directory")
                }
            }
        }
        hashes.sort_unstable();
        Ok(hashes)
    }

    /// Serialises the metadata sidecar as pretty-printed JSON and fsyncs
    /// both the file and the block directory.
    pub fn write_meta(&self) -> Result<(), BlockError> {
        let json = serde_json::to_string_pretty(&self.meta)
            .map_err(|e| BlockError::Corrupted(format!("meta serialisation failed: {e}")))?;

        let path = self.dir.join(META_FILE);
        let mut file = File::create(&path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        File::open(&self.dir)?.sync_all()?;

        info!(
            ulid = %self.meta.ulid,
            samples = self.meta.stats.num_samples,
            series = self.meta.stats.num_series,
            chunks = self.meta.stats.num_chunks,
            "block metadata written"
        );
        Ok(())
    }

    /// Recomputes sample, series, and chunk counts by walking the chunk
    /// files, failing with [`BlockError::Corrupted`] on any mismatch with
    /// `meta.json`.
    pub fn validate(&self) -> Result<(), BlockError> {
        let chunks_dir = self.dir.join(CHUNKS_DIR);
        if !chunks_dir.is_dir() {
            return Err(BlockError::Corrupted("missing chunks directory".into()));
        }

        let mut found = BlockStats::default();
        for hash in self.series_hashes()? {
            found.num_series += 1;
            for chunk in self.read_chunks(hash)? {
                found.num_chunks += 1;
                found.num_samples += chunk.num_samples() as u64;
            }
        }

        if found != self.meta.stats {
            return Err(BlockError::Corrupted(format!(
                "stats mismatch: meta {:?} vs disk {:?}",
                self.meta.stats, found
            )));
        }
        Ok(())
    }

    /// Total on-disk size of the block directory in bytes.
    pub fn disk_size(&self) -> Result<u64, BlockError> {
        let mut total = fs::metadata(self.dir.join(META_FILE)).map(|m| m.len()).unwrap_or(0);
        for entry in fs::read_dir(self.dir.join(CHUNKS_DIR))? {
            total += entry?.metadata()?.len();
        }
        Ok(total)
    }

    /// Removes the block directory and everything under it.
    pub fn delete(&self) -> Result<(), BlockError> {
        fs::remove_dir_all(&self.dir)?;
        info!(ulid = %self.meta.ulid, "block deleted");
        Ok(())
    }

    fn chunk_path(&self, hash: u64) -> PathBuf {
        self.dir.join(CHUNKS_DIR).join(format!("{hash:016x}"))
    }
}

// ------------------------------------------------------------------------------------------------
// Directory listing
// ------------------------------------------------------------------------------------------------

/// Loads every block under `data_dir`, sorted by ULID (chronologically).
///
/// Directories that fail to open as blocks are skipped with a warning —
/// corruption is fatal for that block only.
pub fn list_blocks(data_dir: &Path) -> Result<Vec<Block>, BlockError> {
    let mut blocks = Vec::new();
    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if Ulid::from_string(name).is_err() {
            continue; // wal/ and other non-block directories
        }

        match Block::open(&path) {
            Ok(block) => blocks.push(block),
            Err(e) => warn!(dir = %path.display(), error = %e, "skipping unreadable block"),
        }
    }
    blocks.sort_by(|a, b| a.ulid().cmp(b.ulid()));
    Ok(blocks)
}
