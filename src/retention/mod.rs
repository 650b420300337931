//! # Retention Module
//!
//! Age-based garbage collection of blocks. A periodic cycle computes
//! `cutoff = now − max_age` and removes every block whose `maxTime` is
//! older. Disabled policies make the cycle a no-op.
//!
//! Block sizes are measured before deletion but recorded only on
//! success, so the byte counter can under-report after a crash between
//! the delete and the stats update — the counter is diagnostic, never a
//! correctness input.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::block::Block;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by retention cycles.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RetentionError {
    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Policy
// ------------------------------------------------------------------------------------------------

/// Retention configuration.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Blocks whose `maxTime` is older than `now − max_age` are deleted.
    pub max_age: Duration,
    /// When `false`, cycles do nothing.
    pub enabled: bool,
    /// Period of the background retention task.
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(30 * 24 * 3600),
            enabled: true,
            interval: Duration::from_secs(3600),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Stats
// ------------------------------------------------------------------------------------------------

/// Counters exposed by [`Retention::stats`].
#[derive(Debug, Clone, Default)]
pub struct RetentionStats {
    /// Cycles executed (including no-op cycles while disabled).
    pub cycles: u64,
    /// Blocks deleted since startup.
    pub blocks_deleted: u64,
    /// Bytes reclaimed by successful deletions.
    pub bytes_reclaimed: u64,
    /// Failed deletions.
    pub errors: u64,
    /// Duration of the most recent cycle in milliseconds.
    pub last_cycle_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// Retention
// ------------------------------------------------------------------------------------------------

/// The periodic block garbage collector.
pub struct Retention {
    policy: RetentionPolicy,
    /// Block list shared with the database.
    blocks: Arc<RwLock<Vec<Block>>>,
    cycle_lock: Mutex<()>,
    stats: Mutex<RetentionStats>,
}

impl Retention {
    /// Creates a retention manager over the shared block list.
    pub fn new(policy: RetentionPolicy, blocks: Arc<RwLock<Vec<Block>>>) -> Self {
        Self {
            policy,
            blocks,
            cycle_lock: Mutex::new(()),
            stats: Mutex::new(RetentionStats::default()),
        }
    }

    /// The configured policy.
    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Runs one cycle against the wall-clock time `now_ms`, returning the
    /// number of blocks deleted.
    pub fn run_cycle(&self, now_ms: i64) -> Result<usize, RetentionError> {
        let _guard = self
            .cycle_lock
            .lock()
            .map_err(|_| RetentionError::Internal("retention mutex poisoned".into()))?;
        let started = Instant::now();

        let mut stats = self
            .stats
            .lock()
            .map_err(|_| RetentionError::Internal("stats mutex poisoned".into()))?;
        stats.cycles += 1;
        drop(stats);

        if !self.policy.enabled {
            return Ok(0);
        }

        let cutoff = now_ms - self.policy.max_age.as_millis() as i64;
        let mut deleted = 0usize;

        let mut shared = self
            .blocks
            .write()
            .map_err(|_| RetentionError::Internal("block list lock poisoned".into()))?;
        let mut kept = Vec::with_capacity(shared.len());
        for block in shared.drain(..) {
            if block.max_time() >= cutoff {
                kept.push(block);
                continue;
            }

            // Size first; recorded only if the delete succeeds.
            let size = block.disk_size().unwrap_or(0);
            match block.delete() {
                Ok(()) => {
                    deleted += 1;
                    info!(ulid = %block.ulid(), max_time = block.max_time(), cutoff, "block expired");
                    let mut stats = self
                        .stats
                        .lock()
                        .map_err(|_| RetentionError::Internal("stats mutex poisoned".into()))?;
                    stats.blocks_deleted += 1;
                    stats.bytes_reclaimed += size;
                }
                Err(e) => {
                    warn!(ulid = %block.ulid(), error = %e, "block deletion failed");
                    let mut stats = self
                        .stats
                        .lock()
                        .map_err(|_| RetentionError::Internal("stats mutex poisoned".into()))?;
                    stats.errors += 1;
                    kept.push(block);
                }
            }
        }
        *shared = kept;
        drop(shared);

        let elapsed = started.elapsed().as_millis() as u64;
        self.stats
            .lock()
            .map_err(|_| RetentionError::Internal("stats mutex poisoned".into()))?
            .last_cycle_ms = elapsed;

        debug!(deleted, cutoff, elapsed_ms = elapsed, "retention cycle finished");
        Ok(deleted)
    }

    /// Snapshot of the retention counters.
    pub fn stats(&self) -> Result<RetentionStats, RetentionError> {
        Ok(self
            .stats
            .lock()
            .map_err(|_| RetentionError::Internal("stats mutex poisoned".into()))?
            .clone())
    }
}

impl std::fmt::Debug for Retention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retention")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
