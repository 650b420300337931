//! # MemTable Module
//!
//! The in-memory write buffer. Samples are grouped per series hash and
//! kept in arrival order; the table tracks an approximate byte size and
//! reports `Full` once an insert would cross the configured watermark,
//! at which point the database swaps in a fresh table and drains this
//! one into a block.
//!
//! ## Accounting
//!
//! Each sample is charged a flat 24 bytes. The first appearance of a
//! series additionally charges its label bytes plus 16 bytes per label.
//! The accounting is approximate by design; what matters is that
//! fullness is monotonic in the number of samples for a fixed series.
//!
//! ## Concurrency
//!
//! One reader-writer lock guards all state. Queries return materialised
//! copies, so callers never observe later mutations.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::trace;

use crate::series::{Sample, Series};
use crate::util::unix_millis;

/// Flat per-sample size charge in bytes (timestamp + value + slack).
const SAMPLE_SIZE: usize = 24;

/// Per-label overhead charged on first appearance of a series.
const LABEL_OVERHEAD: usize = 16;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by memtable operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MemTableError {
    /// An empty sample batch was rejected.
    #[error("empty sample batch")]
    EmptySamples,

    /// The size watermark would be exceeded; flush and retry.
    #[error("memtable full ({size} + {needed} > {max} bytes)")]
    Full {
        size: usize,
        needed: usize,
        max: usize,
    },

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// MemTable
// ------------------------------------------------------------------------------------------------

/// Snapshot of memtable statistics returned by [`MemTable::stats`].
#[derive(Debug, Clone)]
pub struct MemTableStats {
    /// Number of distinct series buffered.
    pub series_count: usize,
    /// Total buffered samples.
    pub sample_count: usize,
    /// Approximate byte footprint.
    pub size_bytes: usize,
    /// Smallest buffered timestamp, `0` when empty.
    pub min_time: i64,
    /// Largest buffered timestamp, `0` when empty.
    pub max_time: i64,
    /// Wall-clock creation time in milliseconds.
    pub created_at: i64,
}

struct MemTableInner {
    /// Samples per series hash, in arrival order.
    series: HashMap<u64, Vec<Sample>>,
    /// Series metadata captured on first appearance.
    meta: HashMap<u64, Arc<Series>>,
    sample_count: usize,
    size: usize,
    min_time: i64,
    max_time: i64,
}

/// The concurrent in-memory write buffer.
pub struct MemTable {
    inner: RwLock<MemTableInner>,
    max_size: usize,
    created_at: i64,
}

impl MemTable {
    /// Creates an empty memtable with the given size watermark.
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(MemTableInner {
                series: HashMap::new(),
                meta: HashMap::new(),
                sample_count: 0,
                size: 0,
                min_time: i64::MAX,
                max_time: i64::MIN,
            }),
            max_size,
            created_at: unix_millis(),
        }
    }

    /// Buffers `samples` under the hash of `series`.
    ///
    /// Rejects empty batches, and reports [`MemTableError::Full`] without
    /// mutating anything when the watermark would be crossed.
    pub fn insert(&self, series: &Arc<Series>, samples: &[Sample]) -> Result<(), MemTableError> {
        if samples.is_empty() {
            return Err(MemTableError::EmptySamples);
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| MemTableError::Internal("memtable lock poisoned".into()))?;

        let needed = SAMPLE_SIZE * samples.len();
        if inner.size + needed > self.max_size {
            return Err(MemTableError::Full {
                size: inner.size,
                needed,
                max: self.max_size,
            });
        }

        let hash = series.hash();
        if !inner.meta.contains_key(&hash) {
            let label_bytes: usize = series
                .labels()
                .iter()
                .map(|(k, v)| k.len() + v.len() + LABEL_OVERHEAD)
                .sum();
            inner.size += label_bytes;
            inner.meta.insert(hash, Arc::clone(series));
        }

        for sample in samples {
            inner.min_time = inner.min_time.min(sample.t);
            inner.max_time = inner.max_time.max(sample.t);
        }
        inner
            .series
            .entry(hash)
            .or_default()
            .extend_from_slice(samples);
        inner.sample_count += samples.len();
        inner.size += needed;

        trace!(
            hash = format_args!("{hash:016x}"),
            count = samples.len(),
            size = inner.size,
            "samples buffered"
        );
        Ok(())
    }

    /// Returns all samples for `hash` within `[t0, t1]`, or every sample
    /// when both bounds are zero. The result is a materialised copy.
    pub fn query(&self, hash: u64, t0: i64, t1: i64) -> Result<Vec<Sample>, MemTableError> {
        let inner = self.read_inner()?;

        let Some(samples) = inner.series.get(&hash) else {
            return Ok(Vec::new());
        };

        if t0 == 0 && t1 == 0 {
            return Ok(samples.clone());
        }
        Ok(samples
            .iter()
            .filter(|s| s.t >= t0 && s.t <= t1)
            .copied()
            .collect())
    }

    /// The series metadata recorded for `hash`, if present.
    pub fn series_meta(&self, hash: u64) -> Result<Option<Arc<Series>>, MemTableError> {
        Ok(self.read_inner()?.meta.get(&hash).cloned())
    }

    /// Materialises every buffered series with its samples, for flushing.
    /// Does not mutate the table.
    pub fn snapshot(&self) -> Result<Vec<(u64, Arc<Series>, Vec<Sample>)>, MemTableError> {
        let inner = self.read_inner()?;

        let mut out = Vec::with_capacity(inner.series.len());
        for (&hash, samples) in &inner.series {
            let Some(meta) = inner.meta.get(&hash) else {
                continue;
            };
            out.push((hash, Arc::clone(meta), samples.clone()));
        }
        Ok(out)
    }

    /// Number of distinct buffered series.
    pub fn series_count(&self) -> Result<usize, MemTableError> {
        Ok(self.read_inner()?.series.len())
    }

    /// Total buffered samples.
    pub fn sample_count(&self) -> Result<usize, MemTableError> {
        Ok(self.read_inner()?.sample_count)
    }

    /// Approximate byte footprint.
    pub fn size(&self) -> Result<usize, MemTableError> {
        Ok(self.read_inner()?.size)
    }

    /// Returns `true` once the buffered size has reached the watermark.
    pub fn is_full(&self) -> Result<bool, MemTableError> {
        Ok(self.read_inner()?.size >= self.max_size)
    }

    /// `[minTime, maxTime]` over all buffered samples, `(0, 0)` when empty.
    pub fn time_range(&self) -> Result<(i64, i64), MemTableError> {
        let inner = self.read_inner()?;
        if inner.sample_count == 0 {
            return Ok((0, 0));
        }
        Ok((inner.min_time, inner.max_time))
    }

    /// Snapshot of all counters.
    pub fn stats(&self) -> Result<MemTableStats, MemTableError> {
        let inner = self.read_inner()?;
        let (min_time, max_time) = if inner.sample_count == 0 {
            (0, 0)
        } else {
            (inner.min_time, inner.max_time)
        };
        Ok(MemTableStats {
            series_count: inner.series.len(),
            sample_count: inner.sample_count,
            size_bytes: inner.size,
            min_time,
            max_time,
            created_at: self.created_at,
        })
    }

    /// Resets the table to its empty state.
    pub fn clear(&self) -> Result<(), MemTableError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| MemTableError::Internal("memtable lock poisoned".into()))?;
        inner.series.clear();
        inner.meta.clear();
        inner.sample_count = 0;
        inner.size = 0;
        inner.min_time = i64::MAX;
        inner.max_time = i64::MIN;
        Ok(())
    }

    fn read_inner(&self) -> Result<std::sync::RwLockReadGuard<'_, MemTableInner>, MemTableError> {
        self.inner
            .read()
            .map_err(|_| MemTableError::Internal("memtable lock poisoned".into()))
    }
}

impl std::fmt::Debug for MemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTable")
            .field("max_size", &self.max_size)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
