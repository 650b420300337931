//! # Write-Ahead Log Module
//!
//! A durable, append-only log of write intents, sharded into fixed-size
//! segment files `wal-00000000`, `wal-00000001`, … under one directory.
//! Every accepted insert is framed, CRC-protected, and fsynced here
//! before it becomes visible in the memtable.
//!
//! ## Record layout
//!
//! ```text
//! [1 B]  version   (= 1)
//! [1 B]  type      (1 = samples, 2 = flush mark, 3 = truncate mark)
//! [4 B]  payloadLen (BE u32)
//! [4 B]  checksum  (BE u32, CRC32 IEEE over timestamp + reserved + payload)
//! [8 B]  timestamp (BE i64; creation time for samples, watermark for marks)
//! [2 B]  reserved
//! [payloadLen B] payload
//! ```
//!
//! A samples payload carries the sorted label pairs, the series hash, and
//! the raw `(i64, f64-bits)` sample pairs, all big-endian. Values travel
//! as `f64::to_bits`, so the pattern survives NaN and signed zeros.
//!
//! ## Guarantees
//!
//! - **Durability** — `append` returns only after `sync_all`.
//! - **Best-effort replay** — on CRC mismatch or a short read, replay of
//!   the current segment stops and later segments are skipped; everything
//!   decoded so far is returned.
//! - **Bounded disk use** — `truncate(before)` removes fully-closed
//!   segments whose last record timestamp is older than the flush
//!   watermark. The active segment is never removed.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::series::{Sample, Series};
use crate::util::unix_millis;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Current record format version.
pub const RECORD_VERSION: u8 = 1;

/// Record type: a batch of samples for one series.
pub const REC_SAMPLES: u8 = 1;
/// Record type: flush watermark mark.
pub const REC_FLUSH: u8 = 2;
/// Record type: truncation mark.
pub const REC_TRUNCATE: u8 = 3;

/// Fixed record header size: version + type + len + crc + timestamp + reserved.
const RECORD_HEADER_SIZE: usize = 1 + 1 + 4 + 4 + 8 + 2;

/// Offset of the CRC-covered region within the header.
const CRC_REGION_OFFSET: usize = 10;

/// Hard cap on a single record payload; larger lengths are treated as
/// corruption during replay.
const MAX_PAYLOAD_LEN: u32 = 16 << 20;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record checksum did not match.
    #[error("record checksum mismatch")]
    ChecksumMismatch,

    /// A record ended before its framed length.
    #[error("unexpected end of segment")]
    UnexpectedEof,

    /// Malformed record framing or payload.
    #[error("corrupted record: {0}")]
    Corrupted(String),

    /// The log was used after [`Wal::close`].
    #[error("WAL is closed")]
    Closed,

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

/// A decoded WAL record.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    /// A batch of samples for one series.
    Samples {
        series: Series,
        hash: u64,
        samples: Vec<Sample>,
        /// Wall-clock time the batch was appended.
        created_at: i64,
    },
    /// Data up to `watermark` has been persisted into a block.
    FlushMark { watermark: i64 },
    /// Segments with older records than `before` were removed.
    TruncateMark { before: i64 },
}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

/// Metadata of a fully-closed segment.
#[derive(Debug, Clone)]
struct SegmentInfo {
    seq: u64,
    path: PathBuf,
    /// Timestamp of the last well-formed record, `i64::MIN` when empty.
    last_ts: i64,
}

struct WalInner {
    file: File,
    seq: u64,
    size: u64,
    last_ts: i64,
    /// Fully-closed segments in ascending sequence order.
    sealed: Vec<SegmentInfo>,
    closed: bool,
}

/// The segment-rotated write-ahead log.
pub struct Wal {
    dir: PathBuf,
    segment_size: u64,
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Opens (or creates) a WAL under `dir`, resuming at the
    /// highest-numbered segment.
    ///
    /// Any torn record at the tail of the active segment — the signature
    /// of a crash mid-append — is trimmed so that subsequent appends land
    /// on a well-formed boundary.
    pub fn open(dir: impl AsRef<Path>, segment_size: u64) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut seqs: Vec<u64> = fs::read_dir(&dir)?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                parse_segment_seq(&entry.file_name().to_string_lossy())
            })
            .collect();
        seqs.sort_unstable();

        let (active_seq, sealed) = match seqs.last() {
            None => (0, Vec::new()),
            Some(&last) => {
                let mut sealed = Vec::with_capacity(seqs.len() - 1);
                for &seq in &seqs[..seqs.len() - 1] {
                    let path = segment_path(&dir, seq);
                    let (last_ts, _) = scan_segment(&path)?;
                    sealed.push(SegmentInfo { seq, path, last_ts });
                }
                (last, sealed)
            }
        };

        let active_path = segment_path(&dir, active_seq);
        let (last_ts, valid_len) = if active_path.exists() {
            scan_segment(&active_path)?
        } else {
            (i64::MIN, 0)
        };

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&active_path)?;
        if file.metadata()?.len() > valid_len {
            warn!(
                path = %active_path.display(),
                valid_len,
                "trimming torn tail of active WAL segment"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let mut file = file;
        file.seek(SeekFrom::End(0))?;

        info!(
            dir = %dir.display(),
            active_seq,
            sealed = sealed.len(),
            "WAL opened"
        );

        Ok(Self {
            dir,
            segment_size,
            inner: Mutex::new(WalInner {
                file,
                seq: active_seq,
                size: valid_len,
                last_ts,
                sealed,
                closed: false,
            }),
        })
    }

    /// Appends a samples record, rotating to a fresh segment first when
    /// the entry would overflow the current one. Durable on return.
    pub fn append(&self, series: &Series, samples: &[Sample]) -> Result<(), WalError> {
        let created_at = unix_millis();
        let payload = encode_samples_payload(series, samples);
        let record = frame_record(REC_SAMPLES, created_at, &payload);
        self.write_record(&record, created_at)
    }

    /// Appends a flush mark carrying the timestamp up to which data has
    /// been persisted into a block.
    pub fn log_flush(&self, watermark: i64) -> Result<(), WalError> {
        let record = frame_record(REC_FLUSH, watermark, &[]);
        self.write_record(&record, watermark)
    }

    /// Replays all segments in numeric order.
    ///
    /// On the first CRC mismatch or short read, replay stops — later
    /// records *and* later segments are skipped — and every record decoded
    /// so far is returned. The caller treats the result as best-effort
    /// recovery.
    pub fn replay(&self) -> Result<Vec<WalRecord>, WalError> {
        let inner = self.lock()?;
        let mut paths: Vec<PathBuf> = inner.sealed.iter().map(|s| s.path.clone()).collect();
        paths.push(segment_path(&self.dir, inner.seq));
        drop(inner);

        let mut records = Vec::new();
        'segments: for path in paths {
            let mut file = File::open(&path)?;
            loop {
                match read_record(&mut file) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            recovered = records.len(),
                            "WAL replay stopped at corrupted record"
                        );
                        break 'segments;
                    }
                }
            }
        }

        debug!(records = records.len(), "WAL replay finished");
        Ok(records)
    }

    /// Removes every fully-closed segment whose last record timestamp is
    /// `< before`. The active segment is never removed. Returns the
    /// number of segments deleted.
    pub fn truncate(&self, before: i64) -> Result<usize, WalError> {
        // Record the truncation point first so recovery can see it.
        let record = frame_record(REC_TRUNCATE, before, &[]);
        self.write_record(&record, before)?;

        let mut inner = self.lock()?;
        let mut removed = 0;
        let mut kept = Vec::with_capacity(inner.sealed.len());
        for segment in inner.sealed.drain(..) {
            if segment.last_ts < before {
                fs::remove_file(&segment.path)?;
                info!(seq = segment.seq, path = %segment.path.display(), "WAL segment removed");
                removed += 1;
            } else {
                kept.push(segment);
            }
        }
        inner.sealed = kept;
        Ok(removed)
    }

    /// Flushes and closes the log. Idempotent; later appends fail with
    /// [`WalError::Closed`].
    pub fn close(&self) -> Result<(), WalError> {
        let mut inner = self.lock()?;
        if inner.closed {
            return Ok(());
        }
        inner.file.sync_all()?;
        inner.closed = true;
        info!(dir = %self.dir.display(), "WAL closed");
        Ok(())
    }

    /// Sequence number of the active segment.
    pub fn active_seq(&self) -> Result<u64, WalError> {
        Ok(self.lock()?.seq)
    }

    /// Number of fully-closed segments on disk.
    pub fn sealed_segment_count(&self) -> Result<usize, WalError> {
        Ok(self.lock()?.sealed.len())
    }

    /// Byte size of the active segment.
    pub fn active_size(&self) -> Result<u64, WalError> {
        Ok(self.lock()?.size)
    }

    fn write_record(&self, record: &[u8], record_ts: i64) -> Result<(), WalError> {
        let mut inner = self.lock()?;
        if inner.closed {
            return Err(WalError::Closed);
        }

        if inner.size > 0 && inner.size + record.len() as u64 > self.segment_size {
            Self::rotate(&self.dir, &mut inner)?;
        }

        inner.file.write_all(record)?;
        inner.file.sync_all()?;
        inner.size += record.len() as u64;
        inner.last_ts = record_ts;

        trace!(
            seq = inner.seq,
            len = record.len(),
            size = inner.size,
            "WAL record appended"
        );
        Ok(())
    }

    fn rotate(dir: &Path, inner: &mut WalInner) -> Result<(), WalError> {
        inner.file.sync_all()?;

        let old_seq = inner.seq;
        let next_seq = old_seq
            .checked_add(1)
            .ok_or_else(|| WalError::Internal("segment sequence overflow".into()))?;
        let next_path = segment_path(dir, next_seq);
        let new_file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&next_path)?;

        let old_file = std::mem::replace(&mut inner.file, new_file);
        drop(old_file);

        inner.sealed.push(SegmentInfo {
            seq: old_seq,
            path: segment_path(dir, old_seq),
            last_ts: inner.last_ts,
        });
        inner.seq = next_seq;
        inner.size = 0;
        inner.last_ts = i64::MIN;

        info!(old_seq, next_seq, "WAL segment rotated");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, WalInner>, WalError> {
        self.inner
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.dir)
            .field("segment_size", &self.segment_size)
            .finish_non_exhaustive()
    }
}

// ------------------------------------------------------------------------------------------------
// Segment helpers
// ------------------------------------------------------------------------------------------------

fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("wal-{seq:08}"))
}

fn parse_segment_seq(name: &str) -> Option<u64> {
    name.strip_prefix("wal-")?.parse::<u64>().ok()
}

/// Scans a segment, returning the timestamp of its last well-formed
/// record and the byte length of the well-formed prefix. Payloads are
/// skipped, not decoded.
fn scan_segment(path: &Path) -> Result<(i64, u64), WalError> {
    let mut file = File::open(path)?;
    let mut last_ts = i64::MIN;
    let mut valid_len = 0u64;

    loop {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        match read_exact_or_eof(&mut file, &mut header) {
            Ok(false) => break,
            Ok(true) => {}
            Err(_) => break,
        }

        let payload_len = u32::from_be_bytes(header[2..6].try_into().expect("4-byte slice"));
        if header[0] != RECORD_VERSION || payload_len > MAX_PAYLOAD_LEN {
            break;
        }
        let ts = i64::from_be_bytes(header[10..18].try_into().expect("8-byte slice"));

        match file.seek(SeekFrom::Current(payload_len as i64)) {
            Ok(pos) => {
                if pos > file.metadata().map(|m| m.len()).unwrap_or(0) {
                    break;
                }
                last_ts = ts;
                valid_len = pos;
            }
            Err(_) => break,
        }
    }

    Ok((last_ts, valid_len))
}

// ------------------------------------------------------------------------------------------------
// Record framing
// ------------------------------------------------------------------------------------------------

/// Builds one framed record: header, checksum, timestamp, payload.
fn frame_record(rec_type: u8, timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    record.push(RECORD_VERSION);
    record.push(rec_type);
    record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    record.extend_from_slice(&[0u8; 4]); // checksum placeholder
    record.extend_from_slice(&timestamp.to_be_bytes());
    record.extend_from_slice(&[0u8; 2]); // reserved
    record.extend_from_slice(payload);

    let mut hasher = Crc32::new();
    hasher.update(&record[CRC_REGION_OFFSET..]);
    let checksum = hasher.finalize();
    record[6..10].copy_from_slice(&checksum.to_be_bytes());
    record
}

/// Reads and verifies one record. `Ok(None)` signals a clean EOF at a
/// record boundary.
fn read_record<R: Read>(r: &mut R) -> Result<Option<WalRecord>, WalError> {
    let mut header = [0u8; RECORD_HEADER_SIZE];
    if !read_exact_or_eof(r, &mut header)? {
        return Ok(None);
    }

    let version = header[0];
    if version != RECORD_VERSION {
        return Err(WalError::Corrupted(format!(
            "unsupported record version {version}"
        )));
    }
    let rec_type = header[1];
    let payload_len = u32::from_be_bytes(header[2..6].try_into().expect("4-byte slice"));
    let stored_crc = u32::from_be_bytes(header[6..10].try_into().expect("4-byte slice"));
    let timestamp = i64::from_be_bytes(header[10..18].try_into().expect("8-byte slice"));

    if payload_len > MAX_PAYLOAD_LEN {
        return Err(WalError::Corrupted(format!(
            "implausible payload length {payload_len}"
        )));
    }

    let mut payload = vec![0u8; payload_len as usize];
    if !payload.is_empty() && !read_exact_or_eof(r, &mut payload)? {
        return Err(WalError::UnexpectedEof);
    }

    let mut hasher = Crc32::new();
    hasher.update(&header[CRC_REGION_OFFSET..]);
    hasher.update(&payload);
    if hasher.finalize() != stored_crc {
        return Err(WalError::ChecksumMismatch);
    }

    match rec_type {
        REC_SAMPLES => {
            let (series, hash, samples) = decode_samples_payload(&payload)?;
            Ok(Some(WalRecord::Samples {
                series,
                hash,
                samples,
                created_at: timestamp,
            }))
        }
        REC_FLUSH => Ok(Some(WalRecord::FlushMark {
            watermark: timestamp,
        })),
        REC_TRUNCATE => Ok(Some(WalRecord::TruncateMark { before: timestamp })),
        other => Err(WalError::Corrupted(format!("unknown record type {other}"))),
    }
}

/// Encodes a samples payload: sorted labels, series hash, raw sample
/// pairs. Values are framed by bit pattern.
fn encode_samples_payload(series: &Series, samples: &[Sample]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + samples.len() * 16);

    buf.extend_from_slice(&(series.labels().len() as u32).to_be_bytes());
    for (name, value) in series.labels() {
        buf.extend_from_slice(&(name.len() as u32).to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        buf.extend_from_slice(value.as_bytes());
    }

    buf.extend_from_slice(&series.hash().to_be_bytes());
    buf.extend_from_slice(&(samples.len() as u32).to_be_bytes());
    for sample in samples {
        buf.extend_from_slice(&sample.t.to_be_bytes());
        buf.extend_from_slice(&sample.v.to_bits().to_be_bytes());
    }
    buf
}

fn decode_samples_payload(payload: &[u8]) -> Result<(Series, u64, Vec<Sample>), WalError> {
    let mut cursor = Cursor::new(payload);

    let label_count = cursor.read_u32()?;
    let mut labels = std::collections::BTreeMap::new();
    for _ in 0..label_count {
        let name = cursor.read_string()?;
        let value = cursor.read_string()?;
        labels.insert(name, value);
    }

    let hash = cursor.read_u64()?;
    let sample_count = cursor.read_u32()? as usize;
    let mut samples = Vec::with_capacity(sample_count);
    for _ in 0..sample_count {
        let t = cursor.read_u64()? as i64;
        let v = f64::from_bits(cursor.read_u64()?);
        samples.push(Sample { t, v });
    }

    Ok((Series::from_map(labels), hash, samples))
}

// ------------------------------------------------------------------------------------------------
// Byte cursor
// ------------------------------------------------------------------------------------------------

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WalError> {
        if self.pos + n > self.buf.len() {
            return Err(WalError::Corrupted("short samples payload".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, WalError> {
        Ok(u32::from_be_bytes(
            self.take(4)?.try_into().expect("4-byte slice"),
        ))
    }

    fn read_u64(&mut self) -> Result<u64, WalError> {
        Ok(u64::from_be_bytes(
            self.take(8)?.try_into().expect("8-byte slice"),
        ))
    }

    fn read_string(&mut self) -> Result<String, WalError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| WalError::Corrupted("non-UTF-8 label".into()))
    }
}

// ------------------------------------------------------------------------------------------------
// Read helpers
// ------------------------------------------------------------------------------------------------

/// Fills `buf` completely, returning `Ok(false)` on a clean EOF before the
/// first byte and [`WalError::UnexpectedEof`] on a partial fill.
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool, WalError> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(WalError::UnexpectedEof);
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(WalError::Io(e)),
        }
    }
    Ok(true)
}
