#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::chunk::{Chunk, ChunkError, ChunkReader, DEFAULT_CHUNK_CAPACITY};
    use crate::series::Sample;

    fn filled_chunk(count: usize) -> Chunk {
        let mut chunk = Chunk::new();
        for i in 0..count {
            chunk
                .append(Sample::new(1000 + i as i64 * 500, i as f64 * 0.5))
                .unwrap();
        }
        chunk
    }

    #[test]
    fn test_append_tracks_bounds() {
        let chunk = filled_chunk(10);
        assert_eq!(chunk.num_samples(), 10);
        assert_eq!(chunk.min_time(), 1000);
        assert_eq!(chunk.max_time(), 1000 + 9 * 500);
        assert!(!chunk.is_sealed());
    }

    #[test]
    fn test_append_rejects_non_increasing_timestamps() {
        let mut chunk = Chunk::new();
        chunk.append(Sample::new(1000, 1.0)).unwrap();
        let same = chunk.append(Sample::new(1000, 2.0)).unwrap_err();
        assert!(matches!(same, ChunkError::OutOfOrder { .. }));
        let earlier = chunk.append(Sample::new(500, 2.0)).unwrap_err();
        assert!(matches!(earlier, ChunkError::OutOfOrder { .. }));
        // The rejected samples must not have corrupted state.
        chunk.append(Sample::new(1001, 2.0)).unwrap();
        assert_eq!(chunk.num_samples(), 2);
    }

    #[test]
    fn test_capacity_limit() {
        let mut chunk = filled_chunk(DEFAULT_CHUNK_CAPACITY);
        assert!(chunk.is_full());
        let err = chunk
            .append(Sample::new(i64::MAX / 2, 0.0))
            .unwrap_err();
        assert!(matches!(err, ChunkError::Full(_)));
    }

    #[test]
    fn test_custom_capacity() {
        let mut chunk = Chunk::with_capacity(3);
        for i in 0..3 {
            chunk.append(Sample::new(i, 0.0)).unwrap();
        }
        assert!(matches!(
            chunk.append(Sample::new(100, 0.0)),
            Err(ChunkError::Full(3))
        ));
    }

    #[test]
    fn test_seal_then_iter_round_trips() {
        let mut chunk = filled_chunk(120);
        chunk.seal().unwrap();
        assert!(chunk.is_sealed());

        let decoded: Vec<Sample> = chunk.iter().unwrap().collect();
        assert_eq!(decoded.len(), 120);
        for (i, sample) in decoded.iter().enumerate() {
            assert_eq!(sample.t, 1000 + i as i64 * 500);
            assert_eq!(sample.v, i as f64 * 0.5);
        }
    }

    #[test]
    fn test_sealed_chunk_rejects_append_and_reseal() {
        let mut chunk = filled_chunk(5);
        chunk.seal().unwrap();
        assert!(matches!(
            chunk.append(Sample::new(10_000, 1.0)),
            Err(ChunkError::Sealed)
        ));
        assert!(matches!(chunk.seal(), Err(ChunkError::Sealed)));
    }

    #[test]
    fn test_iter_requires_sealed_state() {
        let chunk = filled_chunk(5);
        assert!(matches!(chunk.iter(), Err(ChunkError::NotSealed)));
    }

    #[test]
    fn test_seal_empty_chunk_fails() {
        let mut chunk = Chunk::new();
        assert!(matches!(chunk.seal(), Err(ChunkError::Empty)));
    }

    #[test]
    fn test_write_read_round_trip() {
        let mut chunk = filled_chunk(77);
        chunk.seal().unwrap();

        let mut buf = Vec::new();
        let written = chunk.write_to(&mut buf).unwrap();
        assert_eq!(written, buf.len());

        let read = Chunk::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(read.num_samples(), 77);
        assert_eq!(read.min_time(), chunk.min_time());
        assert_eq!(read.max_time(), chunk.max_time());

        let original: Vec<Sample> = chunk.iter().unwrap().collect();
        let decoded: Vec<Sample> = read.iter().unwrap().collect();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_write_requires_sealed_state() {
        let chunk = filled_chunk(5);
        let mut buf = Vec::new();
        assert!(matches!(
            chunk.write_to(&mut buf),
            Err(ChunkError::NotSealed)
        ));
    }

    #[test]
    fn test_special_values_survive_the_frame() {
        let mut chunk = Chunk::new();
        let values = [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0, 0.0];
        for (i, &v) in values.iter().enumerate() {
            chunk.append(Sample::new(i as i64 + 1, v)).unwrap();
        }
        chunk.seal().unwrap();

        let mut buf = Vec::new();
        chunk.write_to(&mut buf).unwrap();
        let read = Chunk::read_from(&mut Cursor::new(&buf)).unwrap();

        let decoded: Vec<Sample> = read.iter().unwrap().collect();
        for (sample, &want) in decoded.iter().zip(values.iter()) {
            assert_eq!(sample.v.to_bits(), want.to_bits());
        }
    }

    #[test]
    fn test_overlaps() {
        let mut chunk = filled_chunk(10); // covers [1000, 5500]
        chunk.seal().unwrap();
        assert!(chunk.overlaps(0, 1000));
        assert!(chunk.overlaps(5500, 9000));
        assert!(chunk.overlaps(2000, 3000));
        assert!(!chunk.overlaps(0, 999));
        assert!(!chunk.overlaps(5501, 9000));
    }

    #[test]
    fn test_chunk_reader_streams_concatenated_frames() {
        let mut buf = Vec::new();
        for start in [1000i64, 100_000, 200_000] {
            let mut chunk = Chunk::new();
            for i in 0..40 {
                chunk.append(Sample::new(start + i * 15, i as f64)).unwrap();
            }
            chunk.seal().unwrap();
            chunk.write_to(&mut buf).unwrap();
        }

        let chunks: Vec<Chunk> = ChunkReader::new(Cursor::new(&buf))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].min_time(), 1000);
        assert_eq!(chunks[1].min_time(), 100_000);
        assert_eq!(chunks[2].min_time(), 200_000);
        for chunk in &chunks {
            assert_eq!(chunk.num_samples(), 40);
        }
    }

    #[test]
    fn test_chunk_reader_empty_input() {
        let mut reader = ChunkReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.next().is_none());
    }
}
