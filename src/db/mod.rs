//! # Database Module
//!
//! The orchestrator tying the storage core together: one WAL, one active
//! memtable, at most one flushing memtable, the on-disk block list, the
//! series registry, the inverted index, and the background workers.
//!
//! ## Write path
//!
//! ```text
//! insert → registry + index → WAL append + fsync → memtable insert
//!        → (watermark) → flush: swap memtable → write block → truncate WAL
//! ```
//!
//! A successful insert is durable (WAL fsynced) *before* it becomes
//! visible to queries through the memtable.
//!
//! ## Read path
//!
//! ```text
//! select(matchers, [t0, t1]) → index lookup
//!     → per series: merge{blocks…, flushing memtable, active memtable}
//! ```
//!
//! During a flush the same samples are visible from both the flushing
//! memtable and the freshly written block; the merge iterator collapses
//! the duplicates.
//!
//! ## Background workers
//!
//! Three worker threads — flusher, compactor, retention — each run a
//! `select!` loop over a shutdown channel and a period tick; the flusher
//! additionally listens on a single-slot wake-up channel signalled by
//! inserts that hit a full memtable. `close` disconnects the shutdown
//! channel, joins all workers, performs a final flush, and closes the
//! WAL. A second `close` is a no-op.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::block::{Block, BlockError, list_blocks};
use crate::chunk::{ChunkError, DEFAULT_CHUNK_CAPACITY};
use crate::compact::{CompactError, Compactor, CompactorStats, dedup_later_wins};
use crate::index::{IndexError, InvertedIndex, Matcher};
use crate::memtable::{MemTable, MemTableError, MemTableStats};
use crate::query::{MergeIter, QueryResult};
use crate::retention::{Retention, RetentionError, RetentionPolicy, RetentionStats};
use crate::series::{RegistryError, RegistryStats, Sample, Series, SeriesRegistry};
use crate::util::unix_millis;
use crate::wal::{Wal, WalError, WalRecord};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// WAL directory name under the data directory.
pub const WAL_DIR: &str = "wal";

/// Polling interval while waiting for the flusher to swap tables.
const INSERT_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Upper bound on the wait for a memtable swap before the single retry
/// runs regardless.
const INSERT_RETRY_TIMEOUT: Duration = Duration::from_millis(500);

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by database operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DbError {
    /// The database was used after [`Database::close`].
    #[error("database is closed")]
    Closed,

    /// Empty batch, label-less series, or an empty label name.
    #[error("invalid sample: {0}")]
    InvalidSample(String),

    /// Malformed query input.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// WAL failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Memtable failure.
    #[error("memtable error: {0}")]
    MemTable(#[from] MemTableError),

    /// Chunk failure.
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// Block failure.
    #[error("block error: {0}")]
    Block(#[from] BlockError),

    /// Registry failure (including cardinality limits).
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Index failure.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Compaction failure.
    #[error("compaction error: {0}")]
    Compact(#[from] CompactError),

    /// Retention failure.
    #[error("retention error: {0}")]
    Retention(#[from] RetentionError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Database`] instance. Every field except
/// `data_dir` has a production default.
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Root path of the store.
    pub data_dir: PathBuf,
    /// Period of background flush checks.
    pub flush_interval: Duration,
    /// Maximum bytes per WAL segment before rotation.
    pub wal_segment_size: u64,
    /// Memtable watermark triggering a flush.
    pub mem_table_max_bytes: usize,
    /// Run the background compactor.
    pub enable_compaction: bool,
    /// Period of compaction cycles.
    pub compaction_interval: Duration,
    /// Run background retention.
    pub enable_retention: bool,
    /// Age threshold for retention.
    pub retention_max_age: Duration,
    /// Registry series cap.
    pub max_cardinality: u32,
    /// Registry LRU capacity.
    pub lru_size: usize,
    /// Samples per chunk.
    pub chunk_capacity: usize,
}

impl DbOptions {
    /// Options rooted at `data_dir` with all defaults.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            flush_interval: Duration::from_secs(30),
            wal_segment_size: 128 * 1024 * 1024,
            mem_table_max_bytes: 256 * 1024 * 1024,
            enable_compaction: true,
            compaction_interval: Duration::from_secs(5 * 60),
            enable_retention: true,
            retention_max_age: Duration::from_secs(30 * 24 * 3600),
            max_cardinality: u32::MAX,
            lru_size: 100_000,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
        }
    }

    fn validate(&self) -> Result<(), DbError> {
        if self.wal_segment_size == 0 {
            return Err(DbError::Config("wal_segment_size must be positive".into()));
        }
        if self.mem_table_max_bytes == 0 {
            return Err(DbError::Config("mem_table_max_bytes must be positive".into()));
        }
        if self.chunk_capacity == 0 || self.chunk_capacity > u16::MAX as usize {
            return Err(DbError::Config(format!(
                "chunk_capacity {} out of range",
                self.chunk_capacity
            )));
        }
        if self.max_cardinality == 0 {
            return Err(DbError::Config("max_cardinality must be positive".into()));
        }
        if self.flush_interval.is_zero() || self.compaction_interval.is_zero() {
            return Err(DbError::Config("intervals must be positive".into()));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Database
// ------------------------------------------------------------------------------------------------

struct Tables {
    /// The memtable accepting writes.
    active: Arc<MemTable>,
    /// A swapped-out memtable currently being drained into a block. Still
    /// served by queries until the flush completes.
    flushing: Option<Arc<MemTable>>,
}

struct DbInner {
    opts: DbOptions,
    wal: Wal,
    tables: RwLock<Tables>,
    blocks: Arc<RwLock<Vec<Block>>>,
    registry: SeriesRegistry,
    index: InvertedIndex,
    compactor: Compactor,
    retention: Retention,
    /// Serialises flushes; held across swap and block build.
    flush_lock: Mutex<()>,
    /// Single-slot wake-up for the flusher.
    flush_tx: Sender<()>,
    closed: AtomicBool,
}

/// The embedded time-series database handle.
pub struct Database {
    inner: Arc<DbInner>,
    /// Dropped on close to disconnect every worker's shutdown receiver.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Database {
    /// Opens (or creates) a database rooted at `opts.data_dir`.
    ///
    /// Creates the directory tree, opens the WAL, replays it into a fresh
    /// memtable (best effort — a corrupt tail loses only the records past
    /// it), loads the block list, and starts the background workers.
    pub fn open(opts: DbOptions) -> Result<Self, DbError> {
        opts.validate()?;
        fs::create_dir_all(&opts.data_dir)?;

        let wal = Wal::open(opts.data_dir.join(WAL_DIR), opts.wal_segment_size)?;
        let registry = SeriesRegistry::new(opts.max_cardinality, opts.lru_size);
        let index = InvertedIndex::new();
        let active = Arc::new(MemTable::new(opts.mem_table_max_bytes));

        let mut replayed = 0usize;
        for record in wal.replay()? {
            let WalRecord::Samples {
                series, samples, ..
            } = record
            else {
                continue;
            };
            let series = Arc::new(series);
            match registry.get_or_create(&series) {
                Ok(id) => {
                    if let Err(e) = index.add(id, &series) {
                        warn!(series = %series, error = %e, "index rebuild failed for series");
                    }
                }
                Err(e) => warn!(series = %series, error = %e, "registry rebuild failed for series"),
            }
            match active.insert(&series, &samples) {
                Ok(()) => replayed += samples.len(),
                Err(e) => warn!(series = %series, error = %e, "replayed samples dropped"),
            }
        }

        let blocks = Arc::new(RwLock::new(list_blocks(&opts.data_dir)?));
        let block_count = blocks
            .read()
            .map_err(|_| DbError::Internal("block list lock poisoned".into()))?
            .len();

        let compactor = Compactor::new(&opts.data_dir, opts.chunk_capacity, Arc::clone(&blocks));
        let retention = Retention::new(
            RetentionPolicy {
                max_age: opts.retention_max_age,
                enabled: opts.enable_retention,
                ..RetentionPolicy::default()
            },
            Arc::clone(&blocks),
        );

        let (flush_tx, flush_rx) = channel::bounded::<()>(1);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        let inner = Arc::new(DbInner {
            opts,
            wal,
            tables: RwLock::new(Tables {
                active,
                flushing: None,
            }),
            blocks,
            registry,
            index,
            compactor,
            retention,
            flush_lock: Mutex::new(()),
            flush_tx,
            closed: AtomicBool::new(false),
        });

        let mut workers = vec![spawn_flusher(
            Arc::clone(&inner),
            flush_rx,
            shutdown_rx.clone(),
        )];
        if inner.opts.enable_compaction {
            workers.push(spawn_compactor(Arc::clone(&inner), shutdown_rx.clone()));
        }
        if inner.opts.enable_retention {
            workers.push(spawn_retention(Arc::clone(&inner), shutdown_rx));
        }

        info!(
            data_dir = %inner.opts.data_dir.display(),
            replayed_samples = replayed,
            blocks = block_count,
            "database opened"
        );

        Ok(Self {
            inner,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Ingests a batch of samples for one series.
    ///
    /// The batch is durable (WAL fsynced) before it becomes queryable.
    /// When the memtable is full the flusher is signalled, the call backs
    /// off briefly, and one retry runs against the swapped-in table; the
    /// second outcome is returned.
    pub fn insert(&self, series: Series, samples: &[Sample]) -> Result<(), DbError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        if samples.is_empty() {
            return Err(DbError::InvalidSample("empty sample batch".into()));
        }
        if series.is_empty() {
            return Err(DbError::InvalidSample("series has no labels".into()));
        }
        if series.labels().keys().any(String::is_empty) {
            return Err(DbError::InvalidSample("empty label name".into()));
        }

        let series = Arc::new(series);

        // Register before logging so a rejected series (cardinality cap)
        // never leaves a WAL record behind.
        let id = self.inner.registry.get_or_create(&series)?;
        self.inner.index.add(id, &series)?;

        // Durability before visibility.
        self.inner.wal.append(&series, samples)?;

        let active = self.inner.active()?;
        match active.insert(&series, samples) {
            Ok(()) => Ok(()),
            Err(MemTableError::Full { .. }) => {
                // A full signal slot means a flush is already scheduled.
                let _ = self.inner.flush_tx.try_send(());

                // Back off until the flusher has swapped in a fresh
                // table (bounded), then retry exactly once.
                let full_table = Arc::as_ptr(&active);
                let deadline = Instant::now() + INSERT_RETRY_TIMEOUT;
                let mut current = self.inner.active()?;
                while Arc::as_ptr(&current) == full_table && Instant::now() < deadline {
                    thread::sleep(INSERT_RETRY_BACKOFF);
                    current = self.inner.active()?;
                }
                current.insert(&series, samples).map_err(DbError::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Raw per-series read: concatenates matching samples from the active
    /// memtable, the flushing memtable, and every overlapping block, in
    /// that order.
    ///
    /// The result is not deduplicated — callers needing a single ordered
    /// stream use [`Database::select`], which merges per source.
    pub fn query(&self, hash: u64, t0: i64, t1: i64) -> Result<Vec<Sample>, DbError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }

        let (active, flushing) = self.inner.table_handles()?;
        let mut out = active.query(hash, t0, t1)?;
        if let Some(flushing) = flushing {
            out.extend(flushing.query(hash, t0, t1)?);
        }

        let blocks = self
            .inner
            .blocks
            .read()
            .map_err(|_| DbError::Internal("block list lock poisoned".into()))?;
        for block in blocks.iter() {
            if !block.overlaps(t0, t1) {
                continue;
            }
            match block.query(hash, t0, t1) {
                Ok(samples) => out.extend(samples),
                // Corruption is fatal for this block only.
                Err(e) => warn!(ulid = %block.ulid(), error = %e, "block query failed"),
            }
        }
        Ok(out)
    }

    /// Matcher-based read: resolves series through the inverted index and
    /// returns, per series, a merged, timestamp-ordered, deduplicated
    /// sample stream over `[t0, t1]`.
    pub fn select(
        &self,
        matchers: &[Matcher],
        t0: i64,
        t1: i64,
    ) -> Result<Vec<QueryResult>, DbError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }

        let ids = self.inner.index.lookup(matchers)?;
        let (active, flushing) = self.inner.table_handles()?;
        let blocks = self
            .inner
            .blocks
            .read()
            .map_err(|_| DbError::Internal("block list lock poisoned".into()))?;

        let mut results = Vec::new();
        for id in ids.iter() {
            let Some(series) = self.inner.registry.get(id)? else {
                continue;
            };
            let hash = series.hash();

            // Sources oldest first so the merge iterator's tie rule keeps
            // the most recently written value.
            let mut sources: Vec<Box<dyn Iterator<Item = Sample>>> = Vec::new();
            for block in blocks.iter() {
                if !block.overlaps(t0, t1) {
                    continue;
                }
                match block.query(hash, t0, t1) {
                    Ok(samples) if !samples.is_empty() => {
                        sources.push(Box::new(samples.into_iter()))
                    }
                    Ok(_) => {}
                    Err(e) => warn!(ulid = %block.ulid(), error = %e, "block query failed"),
                }
            }
            for table in flushing.iter().chain(std::iter::once(&active)) {
                let mut samples = table.query(hash, t0, t1)?;
                if !samples.is_empty() {
                    samples.sort_by_key(|s| s.t);
                    sources.push(Box::new(samples.into_iter()));
                }
            }

            let samples: Vec<Sample> = MergeIter::new(sources).collect();
            if !samples.is_empty() {
                results.push(QueryResult { series, samples });
            }
        }
        Ok(results)
    }

    /// Forces a flush of the active memtable. Returns `false` when there
    /// was nothing to flush.
    pub fn flush(&self) -> Result<bool, DbError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        DbInner::flush(&self.inner)
    }

    /// Runs one compaction cycle immediately, returning the number of
    /// merges performed.
    pub fn compact(&self) -> Result<usize, DbError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        Ok(self.inner.compactor.run_cycle()?)
    }

    /// Runs one retention cycle immediately, returning the number of
    /// blocks deleted.
    pub fn run_retention(&self) -> Result<usize, DbError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        Ok(self.inner.retention.run_cycle(unix_millis())?)
    }

    /// Deletes a series from the registry and the index. Stored samples
    /// are unaffected and age out through retention.
    pub fn delete_series(&self, id: crate::series::SeriesId) -> Result<bool, DbError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        self.inner.index.delete(id)?;
        Ok(self.inner.registry.delete(id)?)
    }

    /// Compaction counters.
    pub fn compactor_stats(&self) -> Result<CompactorStats, DbError> {
        Ok(self.inner.compactor.stats()?)
    }

    /// Retention counters.
    pub fn retention_stats(&self) -> Result<RetentionStats, DbError> {
        Ok(self.inner.retention.stats()?)
    }

    /// Registry counters.
    pub fn registry_stats(&self) -> Result<RegistryStats, DbError> {
        Ok(self.inner.registry.stats()?)
    }

    /// Counters of the active memtable.
    pub fn memtable_stats(&self) -> Result<MemTableStats, DbError> {
        Ok(self.inner.active()?.stats()?)
    }

    /// Number of blocks currently on disk.
    pub fn block_count(&self) -> Result<usize, DbError> {
        Ok(self
            .inner
            .blocks
            .read()
            .map_err(|_| DbError::Internal("block list lock poisoned".into()))?
            .len())
    }

    /// Shuts the database down: stops the workers, performs a final
    /// flush, and closes the WAL. Idempotent.
    pub fn close(&self) -> Result<(), DbError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Disconnecting the shutdown channel wakes every worker select.
        if let Ok(mut tx) = self.shutdown_tx.lock() {
            tx.take();
        }
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
        }

        if let Err(e) = DbInner::flush(&self.inner) {
            warn!(error = %e, "final flush failed");
        }
        self.inner.wal.close()?;
        info!(data_dir = %self.inner.opts.data_dir.display(), "database closed");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.inner.opts.data_dir)
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

// ------------------------------------------------------------------------------------------------
// Flush
// ------------------------------------------------------------------------------------------------

impl DbInner {
    fn active(&self) -> Result<Arc<MemTable>, DbError> {
        Ok(self
            .tables
            .read()
            .map_err(|_| DbError::Internal("tables lock poisoned".into()))?
            .active
            .clone())
    }

    fn table_handles(&self) -> Result<(Arc<MemTable>, Option<Arc<MemTable>>), DbError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| DbError::Internal("tables lock poisoned".into()))?;
        Ok((tables.active.clone(), tables.flushing.clone()))
    }

    /// Drains one memtable into a new block.
    ///
    /// A pending flushing table (from an earlier failed attempt) is
    /// drained before a new swap happens; on failure the table stays in
    /// the flushing slot, queryable, for a retry on the next cycle.
    fn flush(inner: &Arc<DbInner>) -> Result<bool, DbError> {
        let _guard = inner
            .flush_lock
            .lock()
            .map_err(|_| DbError::Internal("flush mutex poisoned".into()))?;

        let to_flush: Arc<MemTable> = {
            let mut tables = inner
                .tables
                .write()
                .map_err(|_| DbError::Internal("tables lock poisoned".into()))?;
            match &tables.flushing {
                Some(pending) => Arc::clone(pending),
                None => {
                    if tables.active.sample_count()? == 0 {
                        return Ok(false);
                    }
                    let fresh = Arc::new(MemTable::new(inner.opts.mem_table_max_bytes));
                    let old = std::mem::replace(&mut tables.active, fresh);
                    tables.flushing = Some(Arc::clone(&old));
                    old
                }
            }
        };

        let (min_time, max_time) = to_flush.time_range()?;
        let snapshot = to_flush.snapshot()?;
        let stats = to_flush.stats()?;

        let mut block = Block::create(&inner.opts.data_dir, min_time, max_time)?;
        let built = (|| -> Result<(), DbError> {
            for (hash, _series, samples) in &snapshot {
                let samples = dedup_later_wins(samples.clone());
                block.write_series(*hash, &samples, inner.opts.chunk_capacity)?;
            }
            block.write_meta()?;
            Ok(())
        })();
        if let Err(e) = built {
            if let Err(cleanup) = block.delete() {
                warn!(ulid = %block.ulid(), error = %cleanup, "failed to remove partial block");
            }
            return Err(e);
        }
        // Make the new directory entry durable before dropping the
        // memtable or truncating the WAL.
        File::open(&inner.opts.data_dir)?.sync_all()?;

        let ulid = block.ulid().to_string();
        {
            let mut blocks = inner
                .blocks
                .write()
                .map_err(|_| DbError::Internal("block list lock poisoned".into()))?;
            blocks.push(block);
            blocks.sort_by(|a, b| a.ulid().cmp(b.ulid()));
        }

        inner.wal.log_flush(max_time)?;
        if let Err(e) = inner.wal.truncate(max_time) {
            warn!(error = %e, "WAL truncation failed");
        }

        inner
            .tables
            .write()
            .map_err(|_| DbError::Internal("tables lock poisoned".into()))?
            .flushing = None;

        info!(
            ulid = %ulid,
            samples = stats.sample_count,
            series = stats.series_count,
            min_time,
            max_time,
            "memtable flushed to block"
        );
        Ok(true)
    }
}

// ------------------------------------------------------------------------------------------------
// Background workers
// ------------------------------------------------------------------------------------------------

fn spawn_flusher(
    inner: Arc<DbInner>,
    flush_rx: Receiver<()>,
    shutdown_rx: Receiver<()>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("tempusdb-flush".into())
        .spawn(move || {
            loop {
                channel::select! {
                    recv(flush_rx) -> _ => {
                        if let Err(e) = DbInner::flush(&inner) {
                            error!(error = %e, "background flush failed");
                        }
                    }
                    recv(shutdown_rx) -> _ => break,
                    default(inner.opts.flush_interval) => {
                        let full = inner
                            .active()
                            .and_then(|t| t.is_full().map_err(DbError::from))
                            .unwrap_or(false);
                        if full && let Err(e) = DbInner::flush(&inner) {
                            error!(error = %e, "periodic flush failed");
                        }
                    }
                }
            }
            debug!("flusher stopped");
        })
        .expect("spawn flusher thread")
}

fn spawn_compactor(inner: Arc<DbInner>, shutdown_rx: Receiver<()>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("tempusdb-compact".into())
        .spawn(move || {
            loop {
                channel::select! {
                    recv(shutdown_rx) -> _ => break,
                    default(inner.opts.compaction_interval) => {
                        if let Err(e) = inner.compactor.run_cycle() {
                            error!(error = %e, "compaction cycle failed");
                        }
                    }
                }
            }
            debug!("compactor stopped");
        })
        .expect("spawn compactor thread")
}

fn spawn_retention(inner: Arc<DbInner>, shutdown_rx: Receiver<()>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("tempusdb-retention".into())
        .spawn(move || {
            let interval = inner.retention.policy().interval;
            loop {
                channel::select! {
                    recv(shutdown_rx) -> _ => break,
                    default(interval) => {
                        if let Err(e) = inner.retention.run_cycle(unix_millis()) {
                            error!(error = %e, "retention cycle failed");
                        }
                    }
                }
            }
            debug!("retention stopped");
        })
        .expect("spawn retention thread")
}
