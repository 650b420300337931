//! # Series Module
//!
//! The data model shared by every layer of the engine:
//!
//! - [`Sample`] — a `(timestamp, value)` pair. Timestamps are
//!   milliseconds since the Unix epoch; values are `f64` carried by bit
//!   pattern everywhere, so NaN and ±Inf survive storage.
//! - [`Series`] — an immutable, sorted label map. Its identity is a
//!   64-bit FNV-1a hash over `name\0value\0` frames in label-name order,
//!   which makes the hash independent of insertion order.
//! - [`SeriesRegistry`] — assigns dense monotonic [`SeriesId`]s on first
//!   appearance, with an LRU cache in front of the hash→id map for the
//!   hot ingest path.
//!
//! ## Registry concurrency
//!
//! The two maps live under one reader-writer lock; the LRU has its own
//! mutex so a cache hit never touches the main lock. `get_or_create`
//! probes LRU → read-locked map → write-locked double-check-and-insert.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicU64, Ordering},
};

use lru::LruCache;
use thiserror::Error;
use tracing::{debug, trace};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the series registry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The configured series limit was reached.
    #[error("series cardinality limit reached ({0})")]
    CardinalityExceeded(u32),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Sample
// ------------------------------------------------------------------------------------------------

/// A single data point: millisecond timestamp and value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Milliseconds since the Unix epoch.
    pub t: i64,
    /// Sample value. All bit patterns, including NaN payloads and signed
    /// zeros, are preserved end to end.
    pub v: f64,
}

impl Sample {
    /// Creates a new sample.
    pub fn new(t: i64, v: f64) -> Self {
        Self { t, v }
    }

    /// Bit-pattern equality — the comparison tests use this so NaN
    /// samples compare equal to themselves.
    pub fn bits_eq(&self, other: &Sample) -> bool {
        self.t == other.t && self.v.to_bits() == other.v.to_bits()
    }
}

// ------------------------------------------------------------------------------------------------
// Series
// ------------------------------------------------------------------------------------------------

/// Dense series identifier assigned by the registry. `0` means not found.
pub type SeriesId = u32;

/// FNV-1a offset basis (64-bit).
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
/// FNV-1a prime (64-bit).
const FNV_PRIME: u64 = 0x1_0000_0000_01b3;

/// An immutable set of labels identifying one stream of samples.
///
/// Two series are equal iff their label maps are equal; equal series have
/// equal hashes. The hash is computed once at construction.
#[derive(Debug, Clone)]
pub struct Series {
    labels: BTreeMap<String, String>,
    hash: u64,
}

impl Series {
    /// Builds a series from label pairs. Later duplicates of a name
    /// overwrite earlier ones; ordering of the input is irrelevant.
    pub fn new<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let labels: BTreeMap<String, String> = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let hash = Self::hash_labels(&labels);
        Self { labels, hash }
    }

    /// Wraps an already-sorted label map.
    pub fn from_map(labels: BTreeMap<String, String>) -> Self {
        let hash = Self::hash_labels(&labels);
        Self { labels, hash }
    }

    /// The series' 64-bit FNV-1a identity.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The sorted label map.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Looks up one label value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` when the series carries no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// FNV-1a over `name\0value\0` frames in lexicographic name order.
    fn hash_labels(labels: &BTreeMap<String, String>) -> u64 {
        let mut h = FNV_OFFSET;
        let mut step = |bytes: &[u8]| {
            for &b in bytes {
                h ^= b as u64;
                h = h.wrapping_mul(FNV_PRIME);
            }
            h ^= 0;
            h = h.wrapping_mul(FNV_PRIME);
        };
        for (name, value) in labels {
            step(name.as_bytes());
            step(value.as_bytes());
        }
        h
    }
}

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
    }
}

impl Eq for Series {}

impl std::fmt::Display for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{name}=\"{value}\"")?;
        }
        write!(f, "}}")
    }
}

// ------------------------------------------------------------------------------------------------
// SeriesRegistry
// ------------------------------------------------------------------------------------------------

/// Snapshot of registry statistics returned by [`SeriesRegistry::stats`].
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Series currently registered.
    pub cardinality: usize,
    /// Series created since the registry was built.
    pub created: u64,
    /// Series explicitly deleted.
    pub deleted: u64,
    /// LRU cache hits on the lookup fast path.
    pub lru_hits: u64,
    /// LRU cache misses.
    pub lru_misses: u64,
}

impl RegistryStats {
    /// LRU hit rate in `[0, 1]`; `0` before any lookup.
    pub fn lru_hit_rate(&self) -> f64 {
        let total = self.lru_hits + self.lru_misses;
        if total == 0 {
            0.0
        } else {
            self.lru_hits as f64 / total as f64
        }
    }
}

struct RegistryInner {
    by_hash: HashMap<u64, SeriesId>,
    by_id: HashMap<SeriesId, Arc<Series>>,
    next_id: SeriesId,
}

/// Monotonic ID assignment per unique label set.
pub struct SeriesRegistry {
    inner: RwLock<RegistryInner>,
    /// Hot-path cache probed without taking the main lock.
    lru: Mutex<LruCache<u64, SeriesId>>,
    max_cardinality: u32,
    created: AtomicU64,
    deleted: AtomicU64,
    lru_hits: AtomicU64,
    lru_misses: AtomicU64,
}

impl SeriesRegistry {
    /// Creates a registry capped at `max_cardinality` live series, with an
    /// LRU of `lru_size` entries in front of the hash→id map.
    pub fn new(max_cardinality: u32, lru_size: usize) -> Self {
        let cap = NonZeroUsize::new(lru_size.max(1)).expect("non-zero LRU capacity");
        Self {
            inner: RwLock::new(RegistryInner {
                by_hash: HashMap::new(),
                by_id: HashMap::new(),
                next_id: 1,
            }),
            lru: Mutex::new(LruCache::new(cap)),
            max_cardinality,
            created: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
            lru_hits: AtomicU64::new(0),
            lru_misses: AtomicU64::new(0),
        }
    }

    /// Returns the ID for `series`, assigning the next monotonic ID on
    /// first appearance.
    pub fn get_or_create(&self, series: &Arc<Series>) -> Result<SeriesId, RegistryError> {
        let hash = series.hash();

        // 1. LRU probe — no registry lock.
        {
            let mut lru = self
                .lru
                .lock()
                .map_err(|_| RegistryError::Internal("LRU mutex poisoned".into()))?;
            if let Some(&id) = lru.get(&hash) {
                self.lru_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(id);
            }
        }
        self.lru_misses.fetch_add(1, Ordering::Relaxed);

        // 2. Read-locked map probe.
        {
            let inner = self
                .inner
                .read()
                .map_err(|_| RegistryError::Internal("registry lock poisoned".into()))?;
            if let Some(&id) = inner.by_hash.get(&hash) {
                self.cache(hash, id)?;
                return Ok(id);
            }
        }

        // 3. Write-locked double-check and insert.
        let mut inner = self
            .inner
            .write()
            .map_err(|_| RegistryError::Internal("registry lock poisoned".into()))?;
        if let Some(&id) = inner.by_hash.get(&hash) {
            self.cache(hash, id)?;
            return Ok(id);
        }

        if inner.by_id.len() >= self.max_cardinality as usize {
            return Err(RegistryError::CardinalityExceeded(self.max_cardinality));
        }
        let id = inner.next_id;
        inner.next_id = inner
            .next_id
            .checked_add(1)
            .ok_or(RegistryError::CardinalityExceeded(u32::MAX))?;

        inner.by_hash.insert(hash, id);
        inner.by_id.insert(id, Arc::clone(series));
        drop(inner);

        self.created.fetch_add(1, Ordering::Relaxed);
        self.cache(hash, id)?;
        trace!(id, hash = format_args!("{hash:016x}"), "series registered");
        Ok(id)
    }

    /// Returns the series for `id`, if registered.
    pub fn get(&self, id: SeriesId) -> Result<Option<Arc<Series>>, RegistryError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| RegistryError::Internal("registry lock poisoned".into()))?;
        Ok(inner.by_id.get(&id).cloned())
    }

    /// Returns the ID registered for `hash`, or `None`.
    pub fn get_by_hash(&self, hash: u64) -> Result<Option<SeriesId>, RegistryError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| RegistryError::Internal("registry lock poisoned".into()))?;
        Ok(inner.by_hash.get(&hash).copied())
    }

    /// Removes a series from both maps and the LRU. Returns `true` if the
    /// ID was registered.
    pub fn delete(&self, id: SeriesId) -> Result<bool, RegistryError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| RegistryError::Internal("registry lock poisoned".into()))?;
        let Some(series) = inner.by_id.remove(&id) else {
            return Ok(false);
        };
        inner.by_hash.remove(&series.hash());
        drop(inner);

        let mut lru = self
            .lru
            .lock()
            .map_err(|_| RegistryError::Internal("LRU mutex poisoned".into()))?;
        lru.pop(&series.hash());
        drop(lru);

        self.deleted.fetch_add(1, Ordering::Relaxed);
        debug!(id, "series deleted from registry");
        Ok(true)
    }

    /// Number of live series.
    pub fn cardinality(&self) -> Result<usize, RegistryError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| RegistryError::Internal("registry lock poisoned".into()))?;
        Ok(inner.by_id.len())
    }

    /// Snapshot of the registry counters.
    pub fn stats(&self) -> Result<RegistryStats, RegistryError> {
        Ok(RegistryStats {
            cardinality: self.cardinality()?,
            created: self.created.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            lru_hits: self.lru_hits.load(Ordering::Relaxed),
            lru_misses: self.lru_misses.load(Ordering::Relaxed),
        })
    }

    fn cache(&self, hash: u64, id: SeriesId) -> Result<(), RegistryError> {
        let mut lru = self
            .lru
            .lock()
            .map_err(|_| RegistryError::Internal("LRU mutex poisoned".into()))?;
        lru.put(hash, id);
        Ok(())
    }
}

impl std::fmt::Debug for SeriesRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesRegistry")
            .field("max_cardinality", &self.max_cardinality)
            .finish_non_exhaustive()
    }
}
