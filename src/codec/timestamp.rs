//! Delta-of-delta timestamp compression (Gorilla).
//!
//! The first timestamp is stored as 64 raw bits, the second as 64 raw
//! bits carrying the signed first delta. From the third sample on, the
//! delta-of-delta is emitted behind a variable-length control prefix:
//!
//! | range of `dod`   | prefix | payload |
//! |------------------|--------|---------|
//! | `= 0`            | `0`    | —       |
//! | `[-63, 64]`      | `10`   | 7 bits  |
//! | `[-255, 256]`    | `110`  | 9 bits  |
//! | `[-2047, 2048]`  | `1110` | 12 bits |
//! | otherwise        | `1111` | 32 bits |
//!
//! Payloads are two's complement and sign-extended on read. A
//! delta-of-delta outside the 32-bit payload range cannot be represented
//! and is rejected at encode time.

use super::{BitReader, BitWriter, CodecError, sign_extend};

/// Streaming encoder for a monotonic timestamp sequence.
#[derive(Debug)]
pub struct TimestampEncoder {
    buf: BitWriter,
    count: usize,
    prev_ts: i64,
    prev_delta: i64,
}

impl TimestampEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self {
            buf: BitWriter::with_capacity(64),
            count: 0,
            prev_ts: 0,
            prev_delta: 0,
        }
    }

    /// Appends one timestamp to the stream.
    pub fn append(&mut self, ts: i64) -> Result<(), CodecError> {
        match self.count {
            0 => self.buf.write_u64(ts as u64),
            1 => {
                let delta = ts.wrapping_sub(self.prev_ts);
                self.buf.write_u64(delta as u64);
                self.prev_delta = delta;
            }
            _ => {
                let delta = ts.wrapping_sub(self.prev_ts);
                let dod = delta.wrapping_sub(self.prev_delta);
                self.write_dod(dod)?;
                self.prev_delta = delta;
            }
        }
        self.prev_ts = ts;
        self.count += 1;
        Ok(())
    }

    /// Number of timestamps appended so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Finalises the stream, returning the zero-padded byte buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf.finish()
    }

    fn write_dod(&mut self, dod: i64) -> Result<(), CodecError> {
        if dod == 0 {
            self.buf.write_bit(false);
        } else if (-63..=64).contains(&dod) {
            self.buf.write_bits(0b10, 2);
            self.buf.write_bits(dod as u64 & 0x7F, 7);
        } else if (-255..=256).contains(&dod) {
            self.buf.write_bits(0b110, 3);
            self.buf.write_bits(dod as u64 & 0x1FF, 9);
        } else if (-2047..=2048).contains(&dod) {
            self.buf.write_bits(0b1110, 4);
            self.buf.write_bits(dod as u64 & 0xFFF, 12);
        } else {
            let narrow = i32::try_from(dod).map_err(|_| {
                CodecError::Corrupted(format!("delta-of-delta {dod} exceeds 32-bit payload"))
            })?;
            self.buf.write_bits(0b1111, 4);
            self.buf.write_bits(narrow as u32 as u64, 32);
        }
        Ok(())
    }
}

impl Default for TimestampEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Compresses a full timestamp slice in one call.
pub fn compress(timestamps: &[i64]) -> Result<Vec<u8>, CodecError> {
    let mut enc = TimestampEncoder::new();
    for &ts in timestamps {
        enc.append(ts)?;
    }
    Ok(enc.finish())
}

/// Decompresses exactly `count` timestamps from `buf`.
///
/// The count is owned by the chunk header; the stream itself carries no
/// terminator. Malformed control prefixes and short reads surface as
/// [`CodecError`].
pub fn decompress(buf: &[u8], count: usize) -> Result<Vec<i64>, CodecError> {
    let mut out = Vec::with_capacity(count);
    if count == 0 {
        return Ok(out);
    }

    let mut reader = BitReader::new(buf);

    let first = reader.read_u64()? as i64;
    out.push(first);
    if count == 1 {
        return Ok(out);
    }

    let mut prev_delta = reader.read_u64()? as i64;
    let mut prev_ts = first.wrapping_add(prev_delta);
    out.push(prev_ts);

    while out.len() < count {
        let dod = read_dod(&mut reader)?;
        prev_delta = prev_delta.wrapping_add(dod);
        prev_ts = prev_ts.wrapping_add(prev_delta);
        out.push(prev_ts);
    }

    Ok(out)
}

fn read_dod(reader: &mut BitReader<'_>) -> Result<i64, CodecError> {
    if !reader.read_bit()? {
        return Ok(0);
    }
    if !reader.read_bit()? {
        return Ok(sign_extend(reader.read_bits(7)?, 7));
    }
    if !reader.read_bit()? {
        return Ok(sign_extend(reader.read_bits(9)?, 9));
    }
    if !reader.read_bit()? {
        return Ok(sign_extend(reader.read_bits(12)?, 12));
    }
    Ok(sign_extend(reader.read_bits(32)?, 32))
}
