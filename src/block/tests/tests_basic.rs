#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::block::{Block, CHUNKS_DIR, META_FILE, list_blocks};
    use crate::chunk::Chunk;
    use crate::series::Sample;

    fn sealed_chunk(start: i64, count: usize) -> Chunk {
        let mut chunk = Chunk::new();
        for i in 0..count {
            chunk
                .append(Sample::new(start + i as i64 * 1000, i as f64))
                .unwrap();
        }
        chunk.seal().unwrap();
        chunk
    }

    #[test]
    fn test_create_lays_out_directories() {
        let tmp = TempDir::new().unwrap();
        let block = Block::create(tmp.path(), 1000, 9000).unwrap();

        assert_eq!(block.ulid().len(), 26);
        assert!(block.dir().join(CHUNKS_DIR).is_dir());
        assert_eq!(block.min_time(), 1000);
        assert_eq!(block.max_time(), 9000);
    }

    #[test]
    fn test_ulid_sorts_chronologically() {
        let tmp = TempDir::new().unwrap();
        let old = Block::create(tmp.path(), 1_000_000, 2_000_000).unwrap();
        let new = Block::create(tmp.path(), 9_000_000, 9_500_000).unwrap();
        assert!(old.ulid() < new.ulid());
    }

    #[test]
    fn test_write_and_read_chunks() {
        let tmp = TempDir::new().unwrap();
        let mut block = Block::create(tmp.path(), 1000, 120_000).unwrap();
        let hash = 0xABCD_EF01_2345_6789u64;

        block.write_chunk(hash, &sealed_chunk(1000, 50)).unwrap();
        block.write_chunk(hash, &sealed_chunk(60_000, 50)).unwrap();

        let chunks = block.read_chunks(hash).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].num_samples(), 50);
        assert_eq!(chunks[1].min_time(), 60_000);

        assert_eq!(block.stats().num_chunks, 2);
        assert_eq!(block.stats().num_samples, 100);
        assert_eq!(block.stats().num_series, 1);
    }

    #[test]
    fn test_write_chunk_requires_sealed() {
        let tmp = TempDir::new().unwrap();
        let mut block = Block::create(tmp.path(), 0, 1000).unwrap();
        let mut chunk = Chunk::new();
        chunk.append(Sample::new(1, 1.0)).unwrap();
        assert!(block.write_chunk(1, &chunk).is_err());
    }

    #[test]
    fn test_read_chunks_for_unknown_series_is_empty() {
        let tmp = TempDir::new().unwrap();
        let block = Block::create(tmp.path(), 0, 1000).unwrap();
        assert!(block.read_chunks(42).unwrap().is_empty());
    }

    #[test]
    fn test_write_series_splits_at_capacity() {
        let tmp = TempDir::new().unwrap();
        let mut block = Block::create(tmp.path(), 0, 1_000_000).unwrap();
        let samples: Vec<Sample> = (0..250).map(|i| Sample::new(i * 100, i as f64)).collect();

        block.write_series(7, &samples, 120).unwrap();

        let chunks = block.read_chunks(7).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].num_samples(), 120);
        assert_eq!(chunks[1].num_samples(), 120);
        assert_eq!(chunks[2].num_samples(), 10);
    }

    #[test]
    fn test_meta_round_trips_through_open() {
        let tmp = TempDir::new().unwrap();
        let ulid;
        {
            let mut block = Block::create(tmp.path(), 5000, 50_000).unwrap();
            block.write_chunk(3, &sealed_chunk(5000, 46)).unwrap();
            block.write_meta().unwrap();
            ulid = block.ulid().to_string();
        }

        let reopened = Block::open(tmp.path().join(&ulid)).unwrap();
        assert_eq!(reopened.ulid(), ulid);
        assert_eq!(reopened.min_time(), 5000);
        assert_eq!(reopened.max_time(), 50_000);
        assert_eq!(reopened.stats().num_samples, 46);
        assert_eq!(reopened.stats().num_series, 1);
        assert_eq!(reopened.stats().num_chunks, 1);
        reopened.validate().unwrap();
    }

    #[test]
    fn test_meta_json_shape() {
        let tmp = TempDir::new().unwrap();
        let mut block = Block::create(tmp.path(), 5000, 50_000).unwrap();
        block.write_chunk(3, &sealed_chunk(5000, 10)).unwrap();
        block.write_meta().unwrap();

        let raw = std::fs::read_to_string(block.dir().join(META_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["minTime"], 5000);
        assert_eq!(json["maxTime"], 50_000);
        assert_eq!(json["stats"]["numSamples"], 10);
        assert_eq!(json["stats"]["numSeries"], 1);
        assert_eq!(json["stats"]["numChunks"], 1);
        assert_eq!(json["version"], 1);
        assert_eq!(json["ulid"].as_str().unwrap().len(), 26);
        // Pretty-printed, not a single line.
        assert!(raw.lines().count() > 1);
    }

    #[test]
    fn test_query_filters_by_range() {
        let tmp = TempDir::new().unwrap();
        let mut block = Block::create(tmp.path(), 1000, 100_000).unwrap();
        block.write_chunk(1, &sealed_chunk(1000, 100)).unwrap(); // [1000, 100000]

        let got = block.query(1, 5000, 10_000).unwrap();
        assert_eq!(got.len(), 6);
        assert!(got.iter().all(|s| (5000..=10_000).contains(&s.t)));

        let all = block.query(1, 0, i64::MAX).unwrap();
        assert_eq!(all.len(), 100);
    }

    #[test]
    fn test_query_outside_range_reads_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut block = Block::create(tmp.path(), 1000, 100_000).unwrap();
        block.write_chunk(1, &sealed_chunk(1000, 100)).unwrap();

        // Destroy the chunk file: a non-overlapping query must still
        // succeed because it never opens chunk files.
        let chunk_file = block.dir().join(CHUNKS_DIR).join(format!("{:016x}", 1u64));
        std::fs::write(&chunk_file, b"garbage").unwrap();

        assert!(block.query(1, 200_000, 300_000).unwrap().is_empty());
        assert!(block.query(1, 5000, 10_000).is_err());
    }

    #[test]
    fn test_query_skips_non_overlapping_chunks() {
        let tmp = TempDir::new().unwrap();
        let mut block = Block::create(tmp.path(), 0, 1_000_000).unwrap();
        block.write_chunk(1, &sealed_chunk(0, 10)).unwrap(); // [0, 9000]
        block.write_chunk(1, &sealed_chunk(500_000, 10)).unwrap(); // [500000, 509000]

        let got = block.query(1, 500_000, 600_000).unwrap();
        assert_eq!(got.len(), 10);
        assert!(got.iter().all(|s| s.t >= 500_000));
    }

    #[test]
    fn test_overlaps_and_contains() {
        let tmp = TempDir::new().unwrap();
        let block = Block::create(tmp.path(), 1000, 2000).unwrap();

        assert!(block.overlaps(0, 1000));
        assert!(block.overlaps(2000, 3000));
        assert!(block.overlaps(1500, 1600));
        assert!(!block.overlaps(0, 999));
        assert!(!block.overlaps(2001, 9999));

        assert!(block.contains(1000));
        assert!(block.contains(2000));
        assert!(!block.contains(999));
        assert!(!block.contains(2001));
    }

    #[test]
    fn test_series_hashes_lists_chunk_files() {
        let tmp = TempDir::new().unwrap();
        let mut block = Block::create(tmp.path(), 0, 1_000_000).unwrap();
        block.write_chunk(0x01, &sealed_chunk(0, 5)).unwrap();
        block.write_chunk(0xFFEE_DDCC_BBAA_0099, &sealed_chunk(0, 5)).unwrap();

        let hashes = block.series_hashes().unwrap();
        assert_eq!(hashes, vec![0x01, 0xFFEE_DDCC_BBAA_0099]);
    }

    #[test]
    fn test_list_blocks_sorted_and_skips_wal_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("wal")).unwrap();

        for min_time in [500_000i64, 100_000, 900_000] {
            let mut block = Block::create(tmp.path(), min_time, min_time + 1000).unwrap();
            block.write_chunk(1, &sealed_chunk(min_time, 2)).unwrap();
            block.write_meta().unwrap();
        }

        let blocks = list_blocks(tmp.path()).unwrap();
        assert_eq!(blocks.len(), 3);
        let mins: Vec<i64> = blocks.iter().map(|b| b.min_time()).collect();
        assert_eq!(mins, vec![100_000, 500_000, 900_000]);
    }

    #[test]
    fn test_delete_removes_directory() {
        let tmp = TempDir::new().unwrap();
        let mut block = Block::create(tmp.path(), 0, 1000).unwrap();
        block.write_chunk(1, &sealed_chunk(0, 5)).unwrap();
        block.write_meta().unwrap();

        let dir = block.dir().to_path_buf();
        assert!(block.disk_size().unwrap() > 0);
        block.delete().unwrap();
        assert!(!dir.exists());
    }
}
