//! # Chunk Module
//!
//! A chunk is a bounded container of samples for one series. It buffers
//! raw samples until sealed, then holds only the two Gorilla streams.
//!
//! ## Lifecycle
//!
//! - **Staging** — `append` accepts up to `capacity` samples with strictly
//!   increasing timestamps.
//! - **Sealed** — `seal` compresses both streams and drops the staging
//!   buffer. A sealed chunk is immutable; `iter` decodes it on demand.
//!
//! ## On-disk frame
//!
//! ```text
//! [8 B]  minTime      (BE i64)
//! [8 B]  maxTime      (BE i64)
//! [2 B]  numSamples   (BE u16)
//! [4 B]  payloadLen   (BE u32)
//! [2 B]  encoding     (BE u16, 1 = Gorilla)
//! [payloadLen B] payload:
//!     [4 B] tsLen (BE u32), [tsLen B] timestamp stream, [rest] value stream
//! [4 B]  CRC32 (IEEE) over all preceding bytes
//! ```
//!
//! Chunks for one series are concatenated into a single file;
//! [`ChunkReader`] streams frames until a clean EOF rather than trusting
//! an external count.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::io::{self, Read, Write};

use crc32fast::Hasher as Crc32;
use thiserror::Error;

use crate::codec::{CodecError, timestamp, value};
use crate::series::Sample;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Default number of samples a chunk accepts before reporting `Full`.
pub const DEFAULT_CHUNK_CAPACITY: usize = 120;

/// Wire identifier of the Gorilla encoding.
pub const ENCODING_GORILLA: u16 = 1;

/// Fixed frame header size: minTime + maxTime + numSamples + payloadLen + encoding.
const HEADER_SIZE: usize = 8 + 8 + 2 + 4 + 2;

/// Upper bound on a frame payload. A full 120-sample chunk stays far
/// below this even with incompressible values; anything larger is a
/// corrupted length field.
const MAX_PAYLOAD_LEN: u32 = 1 << 20;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by chunk operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChunkError {
    /// Mutation attempted on a sealed chunk.
    #[error("chunk is sealed")]
    Sealed,

    /// Read attempted on a chunk that has not been sealed.
    #[error("chunk is not sealed")]
    NotSealed,

    /// The chunk holds no samples.
    #[error("chunk is empty")]
    Empty,

    /// Capacity reached; the caller should seal and start a new chunk.
    #[error("chunk is full ({0} samples)")]
    Full(usize),

    /// Timestamps within a chunk must be strictly increasing.
    #[error("out-of-order sample: timestamp {ts} <= last {last}")]
    OutOfOrder { ts: i64, last: i64 },

    /// CRC mismatch, bad encoding id, or inconsistent lengths.
    #[error("corrupted chunk: {0}")]
    Corrupted(String),

    /// The underlying reader ended mid-frame.
    #[error("unexpected end of chunk stream")]
    UnexpectedEnd,

    /// Codec-level failure while sealing or decoding.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ------------------------------------------------------------------------------------------------
// Chunk
// ------------------------------------------------------------------------------------------------

/// A bounded, sealable container of samples for a single series.
#[derive(Debug, Clone)]
pub struct Chunk {
    capacity: usize,
    min_time: i64,
    max_time: i64,
    num_samples: u16,
    /// Raw samples while staging; emptied by `seal`.
    staging: Vec<Sample>,
    /// Compressed streams once sealed.
    sealed: Option<SealedStreams>,
}

#[derive(Debug, Clone)]
struct SealedStreams {
    timestamps: Vec<u8>,
    values: Vec<u8>,
}

impl Chunk {
    /// Creates an empty chunk with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHUNK_CAPACITY)
    }

    /// Creates an empty chunk accepting up to `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity > 0 && capacity <= u16::MAX as usize);
        Self {
            capacity,
            min_time: 0,
            max_time: 0,
            num_samples: 0,
            staging: Vec::with_capacity(capacity),
            sealed: None,
        }
    }

    /// Appends one sample.
    ///
    /// Fails with [`ChunkError::Sealed`] after sealing, [`ChunkError::Full`]
    /// at capacity, and [`ChunkError::OutOfOrder`] unless the timestamp is
    /// strictly greater than the last appended one.
    pub fn append(&mut self, sample: Sample) -> Result<(), ChunkError> {
        if self.sealed.is_some() {
            return Err(ChunkError::Sealed);
        }
        if self.staging.len() >= self.capacity {
            return Err(ChunkError::Full(self.capacity));
        }
        if let Some(last) = self.staging.last()
            && sample.t <= last.t
        {
            return Err(ChunkError::OutOfOrder {
                ts: sample.t,
                last: last.t,
            });
        }

        if self.staging.is_empty() {
            self.min_time = sample.t;
        }
        self.max_time = sample.t;
        self.staging.push(sample);
        self.num_samples = self.staging.len() as u16;
        Ok(())
    }

    /// Compresses both streams and freezes the chunk. The staging sample
    /// list is dropped; only the compressed payload remains.
    pub fn seal(&mut self) -> Result<(), ChunkError> {
        if self.sealed.is_some() {
            return Err(ChunkError::Sealed);
        }
        if self.staging.is_empty() {
            return Err(ChunkError::Empty);
        }

        let timestamps: Vec<i64> = self.staging.iter().map(|s| s.t).collect();
        let values: Vec<f64> = self.staging.iter().map(|s| s.v).collect();

        self.sealed = Some(SealedStreams {
            timestamps: timestamp::compress(&timestamps)?,
            values: value::compress(&values),
        });
        self.staging = Vec::new();
        Ok(())
    }

    /// Returns `true` once the chunk has been sealed.
    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    /// Returns `true` when no further samples can be appended.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.sealed.is_some() || self.staging.len() >= self.capacity
    }

    /// Number of samples held (staged or sealed).
    #[inline]
    pub fn num_samples(&self) -> usize {
        self.num_samples as usize
    }

    /// Smallest timestamp in the chunk.
    #[inline]
    pub fn min_time(&self) -> i64 {
        self.min_time
    }

    /// Largest timestamp in the chunk.
    #[inline]
    pub fn max_time(&self) -> i64 {
        self.max_time
    }

    /// Returns `true` when `[t0, t1]` intersects the chunk's time range.
    #[inline]
    pub fn overlaps(&self, t0: i64, t1: i64) -> bool {
        !(t1 < self.min_time || t0 > self.max_time)
    }

    /// Decodes the sealed payload and iterates its samples in timestamp
    /// order. Requires the chunk to be sealed.
    pub fn iter(&self) -> Result<ChunkSamples, ChunkError> {
        let streams = self.sealed.as_ref().ok_or(ChunkError::NotSealed)?;
        let n = self.num_samples as usize;

        let timestamps = timestamp::decompress(&streams.timestamps, n)?;
        let values = value::decompress(&streams.values, n)?;

        let samples: Vec<Sample> = timestamps
            .into_iter()
            .zip(values)
            .map(|(t, v)| Sample { t, v })
            .collect();
        Ok(ChunkSamples {
            inner: samples.into_iter(),
        })
    }

    /// Serialises the sealed chunk as one binary frame, returning the
    /// number of bytes written.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<usize, ChunkError> {
        let streams = self.sealed.as_ref().ok_or(ChunkError::NotSealed)?;

        let ts_len = streams.timestamps.len() as u32;
        let payload_len = 4 + streams.timestamps.len() + streams.values.len();

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload_len + 4);
        frame.extend_from_slice(&self.min_time.to_be_bytes());
        frame.extend_from_slice(&self.max_time.to_be_bytes());
        frame.extend_from_slice(&self.num_samples.to_be_bytes());
        frame.extend_from_slice(&(payload_len as u32).to_be_bytes());
        frame.extend_from_slice(&ENCODING_GORILLA.to_be_bytes());
        frame.extend_from_slice(&ts_len.to_be_bytes());
        frame.extend_from_slice(&streams.timestamps);
        frame.extend_from_slice(&streams.values);

        let mut hasher = Crc32::new();
        hasher.update(&frame);
        frame.extend_from_slice(&hasher.finalize().to_be_bytes());

        w.write_all(&frame)?;
        Ok(frame.len())
    }

    /// Reads one frame from `r`, verifying the CRC and encoding id.
    ///
    /// Fails with [`ChunkError::Corrupted`] on checksum mismatch, an
    /// unknown encoding, or inconsistent lengths, and with
    /// [`ChunkError::UnexpectedEnd`] on a short read.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, ChunkError> {
        let mut header = [0u8; HEADER_SIZE];
        if !read_exact_or_eof(r, &mut header)? {
            return Err(ChunkError::UnexpectedEnd);
        }
        Self::read_body(r, header)
    }

    /// Parses the frame body given an already-read header.
    fn read_body<R: Read>(r: &mut R, header: [u8; HEADER_SIZE]) -> Result<Self, ChunkError> {
        let min_time = i64::from_be_bytes(header[0..8].try_into().expect("8-byte slice"));
        let max_time = i64::from_be_bytes(header[8..16].try_into().expect("8-byte slice"));
        let num_samples = u16::from_be_bytes(header[16..18].try_into().expect("2-byte slice"));
        let payload_len = u32::from_be_bytes(header[18..22].try_into().expect("4-byte slice"));
        let encoding = u16::from_be_bytes(header[22..24].try_into().expect("2-byte slice"));

        if payload_len < 4 || payload_len > MAX_PAYLOAD_LEN {
            return Err(ChunkError::Corrupted(format!(
                "implausible payload length {payload_len}"
            )));
        }

        let mut payload = vec![0u8; payload_len as usize];
        if !read_exact_or_eof(r, &mut payload)? {
            return Err(ChunkError::UnexpectedEnd);
        }

        let mut footer = [0u8; 4];
        if !read_exact_or_eof(r, &mut footer)? {
            return Err(ChunkError::UnexpectedEnd);
        }
        let stored_crc = u32::from_be_bytes(footer);

        let mut hasher = Crc32::new();
        hasher.update(&header);
        hasher.update(&payload);
        if hasher.finalize() != stored_crc {
            return Err(ChunkError::Corrupted("CRC32 mismatch".into()));
        }

        if encoding != ENCODING_GORILLA {
            return Err(ChunkError::Corrupted(format!(
                "unsupported encoding {encoding}"
            )));
        }

        let ts_len = u32::from_be_bytes(payload[0..4].try_into().expect("4-byte slice")) as usize;
        if 4 + ts_len > payload.len() {
            return Err(ChunkError::Corrupted(format!(
                "timestamp stream length {ts_len} exceeds payload"
            )));
        }

        let timestamps = payload[4..4 + ts_len].to_vec();
        let values = payload[4 + ts_len..].to_vec();

        Ok(Self {
            capacity: (num_samples as usize).max(DEFAULT_CHUNK_CAPACITY),
            min_time,
            max_time,
            num_samples,
            staging: Vec::new(),
            sealed: Some(SealedStreams { timestamps, values }),
        })
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

// ------------------------------------------------------------------------------------------------
// Decoded sample iterator
// ------------------------------------------------------------------------------------------------

/// Iterator over the decoded samples of a sealed chunk.
#[derive(Debug)]
pub struct ChunkSamples {
    inner: std::vec::IntoIter<Sample>,
}

impl Iterator for ChunkSamples {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

// ------------------------------------------------------------------------------------------------
// ChunkReader
// ------------------------------------------------------------------------------------------------

/// Streams consecutive chunk frames from a reader.
///
/// Yields `None` on a clean EOF at a frame boundary. A frame that starts
/// but cannot be completed surfaces as an error, after which iteration
/// stops — corruption in frame `k` makes frames `k+1…` unreachable.
pub struct ChunkReader<R: Read> {
    reader: R,
    failed: bool,
}

impl<R: Read> ChunkReader<R> {
    /// Wraps `reader`, positioned at the first frame.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            failed: false,
        }
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = Result<Chunk, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let mut header = [0u8; HEADER_SIZE];
        match read_exact_or_eof(&mut self.reader, &mut header) {
            Ok(false) => return None,
            Ok(true) => {}
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        }

        match Chunk::read_body(&mut self.reader, header) {
            Ok(chunk) => Some(Ok(chunk)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Read helpers
// ------------------------------------------------------------------------------------------------

/// Fills `buf` completely, returning `Ok(false)` on a clean EOF before the
/// first byte and [`ChunkError::UnexpectedEnd`] on a partial fill.
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool, ChunkError> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(ChunkError::UnexpectedEnd);
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(ChunkError::Io(e)),
        }
    }
    Ok(true)
}
