#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::series::{Sample, Series};
    use crate::wal::{Wal, WalRecord};

    fn series(host: &str) -> Series {
        Series::new([("__name__", "rotation_test"), ("host", host)])
    }

    /// A segment size small enough that every record rotates.
    const TINY_SEGMENT: u64 = 96;

    fn count_samples(wal: &Wal) -> usize {
        wal.replay()
            .unwrap()
            .iter()
            .filter(|r| matches!(r, WalRecord::Samples { .. }))
            .count()
    }

    #[test]
    fn test_appends_rotate_into_numbered_segments() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), TINY_SEGMENT).unwrap();

        for i in 0..5i64 {
            wal.append(&series("a"), &[Sample::new(i * 1000, i as f64)])
                .unwrap();
        }

        assert!(wal.active_seq().unwrap() >= 4);
        assert!(wal.sealed_segment_count().unwrap() >= 4);

        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"wal-00000000".to_string()));
        assert!(names.contains(&"wal-00000001".to_string()));
    }

    #[test]
    fn test_replay_spans_segments_in_order() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), TINY_SEGMENT).unwrap();
        for i in 0..20i64 {
            wal.append(&series("a"), &[Sample::new(i, i as f64)]).unwrap();
        }

        let timestamps: Vec<i64> = wal
            .replay()
            .unwrap()
            .into_iter()
            .filter_map(|r| match r {
                WalRecord::Samples { samples, .. } => Some(samples[0].t),
                _ => None,
            })
            .collect();
        assert_eq!(timestamps, (0..20).collect::<Vec<i64>>());
    }

    #[test]
    fn test_reopen_resumes_at_highest_segment() {
        let tmp = TempDir::new().unwrap();
        {
            let wal = Wal::open(tmp.path(), TINY_SEGMENT).unwrap();
            for i in 0..6i64 {
                wal.append(&series("a"), &[Sample::new(i, 0.0)]).unwrap();
            }
            wal.close().unwrap();
        }

        let wal = Wal::open(tmp.path(), TINY_SEGMENT).unwrap();
        let seq_before = wal.active_seq().unwrap();
        assert!(seq_before >= 5);

        wal.append(&series("a"), &[Sample::new(100, 1.0)]).unwrap();
        assert_eq!(count_samples(&wal), 7);
    }

    #[test]
    fn test_truncate_removes_only_old_closed_segments() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), TINY_SEGMENT).unwrap();

        // Each record lands in its own segment; record timestamps are
        // wall-clock creation times.
        for i in 0..5i64 {
            wal.append(&series("a"), &[Sample::new(i, 0.0)]).unwrap();
        }
        let sealed_before = wal.sealed_segment_count().unwrap();
        assert!(sealed_before >= 4);

        // A cutoff far in the future covers every closed segment.
        let removed = wal.truncate(i64::MAX).unwrap();
        assert!(removed >= sealed_before);
        assert_eq!(wal.sealed_segment_count().unwrap(), 0);

        // The active segment survives and the log still accepts appends.
        let active = format!("wal-{:08}", wal.active_seq().unwrap());
        assert!(tmp.path().join(active).exists());
        wal.append(&series("a"), &[Sample::new(100, 1.0)]).unwrap();
    }

    #[test]
    fn test_truncate_with_past_cutoff_keeps_everything() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), TINY_SEGMENT).unwrap();
        for i in 0..4i64 {
            wal.append(&series("a"), &[Sample::new(i, 0.0)]).unwrap();
        }
        let sealed = wal.sealed_segment_count().unwrap();

        // Record timestamps are current wall-clock millis; a cutoff of 0
        // is older than all of them.
        let removed = wal.truncate(0).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(wal.sealed_segment_count().unwrap(), sealed);
    }

    #[test]
    fn test_truncate_leaves_a_mark() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), 1 << 20).unwrap();
        wal.append(&series("a"), &[Sample::new(1, 1.0)]).unwrap();
        wal.truncate(0).unwrap();

        let records = wal.replay().unwrap();
        assert!(records
            .iter()
            .any(|r| matches!(r, WalRecord::TruncateMark { before: 0 })));
    }

    #[test]
    fn test_oversized_record_still_lands() {
        let tmp = TempDir::new().unwrap();
        let wal = Wal::open(tmp.path(), TINY_SEGMENT).unwrap();

        // One batch far larger than the segment size: rotation must not
        // loop, the record is written into a fresh oversized segment.
        let batch: Vec<Sample> = (0..100).map(|i| Sample::new(i, i as f64)).collect();
        wal.append(&series("a"), &batch).unwrap();
        wal.append(&series("a"), &batch).unwrap();

        let replayed = wal.replay().unwrap();
        assert_eq!(replayed.len(), 2);
    }
}
