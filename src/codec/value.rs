//! XOR value compression (Gorilla).
//!
//! The first value is stored as 64 raw bits. Each subsequent value is
//! XORed with its predecessor:
//!
//! - XOR of zero → a single `0` bit.
//! - Otherwise a `1` bit, then either:
//!   - `0` and the middle block re-using the previous leading/trailing
//!     window (only once a prior window exists), or
//!   - `1`, 5 bits of leading-zero count (clamped to 31), 6 bits of
//!     significant-bit count, and the significant payload.
//!
//! The 6-bit significant-bit field wraps on the `significant = 64` edge:
//! `64 & 0x3F == 0`, so a `0` on the wire denotes 64 on read.

use super::{BitReader, BitWriter, CodecError};

/// Leading-zero counts are carried in 5 bits and clamped to this value.
const MAX_LEADING: u8 = 31;

/// Streaming encoder for an `f64` value sequence.
#[derive(Debug)]
pub struct ValueEncoder {
    buf: BitWriter,
    count: usize,
    prev_bits: u64,
    prev_leading: u8,
    prev_trailing: u8,
}

impl ValueEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self {
            buf: BitWriter::with_capacity(64),
            count: 0,
            prev_bits: 0,
            prev_leading: 0,
            prev_trailing: 0,
        }
    }

    /// Appends one value to the stream. The bit pattern is preserved
    /// exactly, so NaN payloads and signed zeros round-trip.
    pub fn append(&mut self, value: f64) {
        let bits = value.to_bits();

        if self.count == 0 {
            self.buf.write_u64(bits);
            self.prev_bits = bits;
            self.count = 1;
            return;
        }

        let xor = bits ^ self.prev_bits;
        if xor == 0 {
            self.buf.write_bit(false);
        } else {
            self.buf.write_bit(true);

            let leading = (xor.leading_zeros() as u8).min(MAX_LEADING);
            let trailing = xor.trailing_zeros() as u8;

            // The window-reuse branch needs a prior delta to have
            // established the window; the second sample always opens one.
            let reuse = self.count >= 2
                && xor.leading_zeros() as u8 >= self.prev_leading
                && trailing >= self.prev_trailing;

            if reuse {
                self.buf.write_bit(false);
                let width = 64 - self.prev_leading - self.prev_trailing;
                self.buf.write_bits(xor >> self.prev_trailing, width);
            } else {
                self.buf.write_bit(true);
                let significant = 64 - leading - trailing;
                self.buf.write_bits(leading as u64, 5);
                self.buf.write_bits(significant as u64 & 0x3F, 6);
                self.buf.write_bits(xor >> trailing, significant);
                self.prev_leading = leading;
                self.prev_trailing = trailing;
            }
        }

        self.prev_bits = bits;
        self.count += 1;
    }

    /// Number of values appended so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Finalises the stream, returning the zero-padded byte buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf.finish()
    }
}

impl Default for ValueEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Compresses a full value slice in one call.
pub fn compress(values: &[f64]) -> Vec<u8> {
    let mut enc = ValueEncoder::new();
    for &v in values {
        enc.append(v);
    }
    enc.finish()
}

/// Decompresses exactly `count` values from `buf`.
pub fn decompress(buf: &[u8], count: usize) -> Result<Vec<f64>, CodecError> {
    let mut out = Vec::with_capacity(count);
    if count == 0 {
        return Ok(out);
    }

    let mut reader = BitReader::new(buf);

    let mut prev_bits = reader.read_u64()?;
    out.push(f64::from_bits(prev_bits));

    let mut prev_leading = 0u8;
    let mut prev_trailing = 0u8;

    while out.len() < count {
        if !reader.read_bit()? {
            out.push(f64::from_bits(prev_bits));
            continue;
        }

        let xor = if !reader.read_bit()? {
            // Re-use the previous window.
            let width = 64 - prev_leading - prev_trailing;
            if width == 0 {
                return Err(CodecError::Corrupted(
                    "window re-use with zero significant bits".into(),
                ));
            }
            reader.read_bits(width)? << prev_trailing
        } else {
            let leading = reader.read_bits(5)? as u8;
            let raw = reader.read_bits(6)? as u8;
            // A zero on the wire denotes the full 64-bit payload.
            let significant = if raw == 0 { 64 } else { raw };
            if leading as u16 + significant as u16 > 64 {
                return Err(CodecError::Corrupted(format!(
                    "leading {leading} + significant {significant} exceeds 64 bits"
                )));
            }
            let trailing = 64 - leading - significant;
            prev_leading = leading;
            prev_trailing = trailing;
            reader.read_bits(significant)? << trailing
        };

        prev_bits ^= xor;
        out.push(f64::from_bits(prev_bits));
    }

    Ok(out)
}
