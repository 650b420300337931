#[cfg(test)]
mod tests {
    use crate::codec::CodecError;
    use crate::codec::timestamp::{TimestampEncoder, compress, decompress};

    fn round_trip(timestamps: &[i64]) {
        let encoded = compress(timestamps).unwrap();
        let decoded = decompress(&encoded, timestamps.len()).unwrap();
        assert_eq!(decoded, timestamps);
    }

    #[test]
    fn test_empty_and_single() {
        round_trip(&[]);
        round_trip(&[0]);
        round_trip(&[1_640_000_000_000]);
        round_trip(&[-42]);
    }

    #[test]
    fn test_two_timestamps_carry_raw_delta() {
        round_trip(&[1000, 2000]);
        round_trip(&[1000, 1001]);
        // The first delta is a raw 64-bit field, so it may be huge or negative.
        round_trip(&[i64::MIN / 2, i64::MAX / 2]);
        round_trip(&[5000, 1000]);
    }

    #[test]
    fn test_regular_interval() {
        let input: Vec<i64> = (0..1000).map(|i| 1_640_000_000_000 + i * 15_000).collect();
        round_trip(&input);
    }

    #[test]
    fn test_jittered_interval() {
        let mut ts = 1_640_000_000_000i64;
        let mut input = Vec::new();
        for i in 0..500i64 {
            ts += 15_000 + (i % 7) - 3;
            input.push(ts);
        }
        round_trip(&input);
    }

    #[test]
    fn test_dod_bucket_boundaries() {
        // Construct sequences whose delta-of-delta hits each bucket edge.
        for dod in [
            0i64, -63, 64, -64, 65, -255, 256, -256, 257, -2047, 2048, -2048, 2049, 100_000,
            -100_000, i32::MAX as i64, i32::MIN as i64,
        ] {
            let delta = 10_000i64;
            let input = [0, delta, 2 * delta + dod];
            round_trip(&input);
        }
    }

    #[test]
    fn test_negative_timestamps() {
        round_trip(&[-5000, -3000, -1000, 0, 1000]);
    }

    #[test]
    fn test_dod_overflow_rejected_at_encode() {
        let mut enc = TimestampEncoder::new();
        enc.append(0).unwrap();
        enc.append(0).unwrap();
        // delta jumps from 0 to far beyond the 32-bit payload range
        let err = enc.append(i64::MAX / 2).unwrap_err();
        assert!(matches!(err, CodecError::Corrupted(_)));
    }

    #[test]
    fn test_truncated_stream_fails() {
        let input: Vec<i64> = (0..10).map(|i| 1000 + i * 60_000).collect();
        let encoded = compress(&input).unwrap();
        let err = decompress(&encoded[..encoded.len() - 4], input.len()).unwrap_err();
        assert_eq!(err, CodecError::UnexpectedEnd);
    }

    #[test]
    fn test_regular_timestamps_compress_below_point_eight_bytes_per_sample() {
        // 5 760 scrape timestamps at a 15 s interval: one day of data.
        let input: Vec<i64> = (0..5_760).map(|i| 1_640_000_000_000 + i * 15_000).collect();
        let encoded = compress(&input).unwrap();

        let decoded = decompress(&encoded, input.len()).unwrap();
        assert_eq!(decoded, input);

        let raw_bytes = 8 * input.len();
        assert!(
            raw_bytes as f64 / encoded.len() as f64 >= 10.0,
            "compression ratio too low: {} raw vs {} encoded",
            raw_bytes,
            encoded.len()
        );
        assert!((encoded.len() as f64 / input.len() as f64) < 0.8);
    }
}
