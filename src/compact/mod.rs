//! # Compaction Module
//!
//! The tiered block compactor. Blocks are assigned a level by the time
//! span they cover — L0 ≈ 2 h, L1 ≈ 12 h, L2 ≈ 7 d, each with an hour of
//! tolerance — and once a level accumulates three or more blocks,
//! adjacent blocks falling into the same next-level time window are
//! merged into a single larger block.
//!
//! ## Merge semantics
//!
//! All series across the inputs are collected; per series the samples
//! are concatenated in input (chronological) order, stably sorted by
//! timestamp, and deduplicated so that on a timestamp tie the
//! later-written value survives. The merged block is fully persisted and
//! fsynced **before** any input directory is removed — a crash mid-cycle
//! leaves either both sides (reconciled by re-merging on the next cycle)
//! or only the originals.
//!
//! ## Concurrency
//!
//! A cycle runs under an exclusive mutex. The shared in-memory block
//! list is updated surgically (inputs removed, merged block added) so a
//! concurrent flush publishing a new block is never lost.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::block::{Block, BlockError, list_blocks};
use crate::chunk::ChunkError;
use crate::series::Sample;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Nominal level durations in milliseconds: L0 = 2 h, L1 = 12 h, L2 = 7 d.
pub const LEVEL_DURATIONS_MS: [i64; 3] =
    [2 * 3_600_000, 12 * 3_600_000, 7 * 24 * 3_600_000];

/// Tolerance applied when inferring a block's level from its duration.
pub const LEVEL_TOLERANCE_MS: i64 = 3_600_000;

/// Minimum number of same-level blocks before a level is considered for
/// compaction.
const LEVEL_MIN_BLOCKS: usize = 3;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by compaction.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompactError {
    /// Block-level failure.
    #[error("block error: {0}")]
    Block(#[from] BlockError),

    /// Chunk-level failure while rebuilding merged chunks.
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Stats
// ------------------------------------------------------------------------------------------------

/// Counters exposed by [`Compactor::stats`].
#[derive(Debug, Clone, Default)]
pub struct CompactorStats {
    /// Merges performed since startup.
    pub compactions: u64,
    /// Input blocks consumed by merges.
    pub blocks_merged: u64,
    /// Bytes reclaimed (input size minus merged output size).
    pub bytes_reclaimed: u64,
    /// Duration of the most recent cycle in milliseconds.
    pub last_cycle_ms: u64,
    /// Failed merge attempts.
    pub errors: u64,
    /// Merges performed per source level.
    pub per_level: [u64; 3],
}

// ------------------------------------------------------------------------------------------------
// Compactor
// ------------------------------------------------------------------------------------------------

/// The tiered L0→L1→L2 block compactor.
pub struct Compactor {
    data_dir: PathBuf,
    chunk_capacity: usize,
    /// Block list shared with the database; updated after each cycle.
    blocks: Arc<RwLock<Vec<Block>>>,
    /// Serialises cycles; also guards the on-disk listing while merging.
    cycle_lock: Mutex<()>,
    stats: Mutex<CompactorStats>,
}

impl Compactor {
    /// Creates a compactor over `data_dir`, publishing results into the
    /// shared block list.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        chunk_capacity: usize,
        blocks: Arc<RwLock<Vec<Block>>>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            chunk_capacity,
            blocks,
            cycle_lock: Mutex::new(()),
            stats: Mutex::new(CompactorStats::default()),
        }
    }

    /// Infers a block's level from the time span it covers.
    pub fn level_of(duration_ms: i64) -> usize {
        if duration_ms <= LEVEL_DURATIONS_MS[0] + LEVEL_TOLERANCE_MS {
            0
        } else if duration_ms <= LEVEL_DURATIONS_MS[1] + LEVEL_TOLERANCE_MS {
            1
        } else {
            2
        }
    }

    /// Runs one compaction cycle and returns the number of merges
    /// performed. Failed groups are logged and counted; they do not
    /// abort the cycle.
    pub fn run_cycle(&self) -> Result<usize, CompactError> {
        let _guard = self
            .cycle_lock
            .lock()
            .map_err(|_| CompactError::Internal("compactor mutex poisoned".into()))?;
        let started = Instant::now();

        // Reload from disk: the directory tree is the source of truth.
        let disk_blocks = list_blocks(&self.data_dir)?;
        let mut levels: [Vec<Block>; 3] = Default::default();
        for block in disk_blocks {
            levels[Self::level_of(block.duration())].push(block);
        }

        let mut merges = 0usize;
        let mut removed_ulids: HashSet<String> = HashSet::new();
        let mut merged_blocks: Vec<Block> = Vec::new();

        for level in 0..2 {
            let blocks = std::mem::take(&mut levels[level]);
            if blocks.len() < LEVEL_MIN_BLOCKS {
                continue;
            }

            let window = LEVEL_DURATIONS_MS[level + 1];
            for group in window_groups(blocks, window) {
                if group.len() < 2 {
                    continue;
                }
                match self.merge_group(&group) {
                    Ok(merged) => {
                        merges += 1;
                        removed_ulids.extend(group.iter().map(|b| b.ulid().to_string()));
                        info!(
                            level,
                            inputs = group.len(),
                            merged = %merged.ulid(),
                            "blocks compacted"
                        );
                        merged_blocks.push(merged);
                        let mut stats = self.lock_stats()?;
                        stats.compactions += 1;
                        stats.blocks_merged += group.len() as u64;
                        stats.per_level[level] += 1;
                    }
                    Err(e) => {
                        error!(level, inputs = group.len(), error = %e, "merge failed");
                        self.lock_stats()?.errors += 1;
                    }
                }
            }
        }

        // Publish: drop consumed blocks, add merged ones. Blocks added by
        // a concurrent flush are left untouched.
        if merges > 0 {
            let mut shared = self
                .blocks
                .write()
                .map_err(|_| CompactError::Internal("block list lock poisoned".into()))?;
            shared.retain(|b| !removed_ulids.contains(b.ulid()));
            shared.extend(merged_blocks);
            shared.sort_by(|a, b| a.ulid().cmp(b.ulid()));
        }

        let elapsed = started.elapsed().as_millis() as u64;
        self.lock_stats()?.last_cycle_ms = elapsed;
        debug!(merges, elapsed_ms = elapsed, "compaction cycle finished");
        Ok(merges)
    }

    /// Merges one group of adjacent same-level blocks into a single
    /// block, deleting the inputs once the output is durable.
    fn merge_group(&self, inputs: &[Block]) -> Result<Block, CompactError> {
        // Collect every series across the inputs, concatenating samples
        // in input order so later blocks win timestamp ties.
        let mut per_series: BTreeMap<u64, Vec<Sample>> = BTreeMap::new();
        for block in inputs {
            for hash in block.series_hashes()? {
                let entry = per_series.entry(hash).or_default();
                for chunk in block.read_chunks(hash)? {
                    entry.extend(chunk.iter()?);
                }
            }
        }

        let mut min_time = i64::MAX;
        let mut max_time = i64::MIN;
        let mut total = 0usize;
        for samples in per_series.values_mut() {
            *samples = dedup_later_wins(std::mem::take(samples));
            if let (Some(first), Some(last)) = (samples.first(), samples.last()) {
                min_time = min_time.min(first.t);
                max_time = max_time.max(last.t);
            }
            total += samples.len();
        }
        if total == 0 {
            return Err(CompactError::Internal("merge group holds no samples".into()));
        }

        let input_bytes: u64 = inputs
            .iter()
            .map(|b| b.disk_size().unwrap_or(0))
            .sum();

        let mut merged = Block::create(&self.data_dir, min_time, max_time)?;
        if let Err(e) = self.write_merged(&mut merged, &per_series) {
            if let Err(cleanup) = merged.delete() {
                warn!(ulid = %merged.ulid(), error = %cleanup, "failed to remove partial merge output");
            }
            return Err(e);
        }

        // The merged block must be durable before any input disappears.
        File::open(&self.data_dir)?.sync_all()?;

        let merged_bytes = merged.disk_size().unwrap_or(0);
        for block in inputs {
            block.delete()?;
        }
        self.lock_stats()?.bytes_reclaimed += input_bytes.saturating_sub(merged_bytes);

        Ok(merged)
    }

    fn write_merged(
        &self,
        merged: &mut Block,
        per_series: &BTreeMap<u64, Vec<Sample>>,
    ) -> Result<(), CompactError> {
        for (&hash, samples) in per_series {
            if samples.is_empty() {
                continue;
            }
            merged.write_series(hash, samples, self.chunk_capacity)?;
        }
        merged.write_meta()?;
        Ok(())
    }

    /// Snapshot of the compaction counters.
    pub fn stats(&self) -> Result<CompactorStats, CompactError> {
        Ok(self.lock_stats()?.clone())
    }

    fn lock_stats(&self) -> Result<std::sync::MutexGuard<'_, CompactorStats>, CompactError> {
        self.stats
            .lock()
            .map_err(|_| CompactError::Internal("stats mutex poisoned".into()))
    }
}

impl std::fmt::Debug for Compactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compactor")
            .field("data_dir", &self.data_dir)
            .field("chunk_capacity", &self.chunk_capacity)
            .finish_non_exhaustive()
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Splits a chronologically sorted block run into groups of adjacent
/// blocks whose `minTime` falls into the same window.
fn window_groups(blocks: Vec<Block>, window_ms: i64) -> Vec<Vec<Block>> {
    let mut groups: Vec<Vec<Block>> = Vec::new();
    let mut current_window = i64::MIN;
    for block in blocks {
        let window = block.min_time().div_euclid(window_ms);
        if groups.is_empty() || window != current_window {
            groups.push(Vec::new());
            current_window = window;
        }
        groups.last_mut().expect("group pushed above").push(block);
    }
    groups
}

/// Stable-sorts by timestamp and keeps exactly one sample per timestamp,
/// preferring the later-written one (later position after the stable
/// sort). Implemented by scanning in reverse and retaining the first
/// occurrence of each timestamp.
pub(crate) fn dedup_later_wins(mut samples: Vec<Sample>) -> Vec<Sample> {
    samples.sort_by_key(|s| s.t);
    let mut deduped: Vec<Sample> = Vec::with_capacity(samples.len());
    for sample in samples.into_iter().rev() {
        if deduped.last().is_none_or(|last| last.t != sample.t) {
            deduped.push(sample);
        }
    }
    deduped.reverse();
    deduped
}
