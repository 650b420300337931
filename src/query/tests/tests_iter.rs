#[cfg(test)]
mod tests {
    use crate::query::{MergeIter, QueryError, StepIter};
    use crate::series::Sample;

    fn samples(pairs: &[(i64, f64)]) -> Vec<Sample> {
        pairs.iter().map(|&(t, v)| Sample::new(t, v)).collect()
    }

    fn merge(inputs: Vec<Vec<Sample>>) -> Vec<Sample> {
        let boxed: Vec<Box<dyn Iterator<Item = Sample>>> = inputs
            .into_iter()
            .map(|v| Box::new(v.into_iter()) as Box<dyn Iterator<Item = Sample>>)
            .collect();
        MergeIter::new(boxed).collect()
    }

    #[test]
    fn test_merge_interleaves_sorted_inputs() {
        let got = merge(vec![
            samples(&[(1, 1.0), (4, 4.0), (7, 7.0)]),
            samples(&[(2, 2.0), (5, 5.0)]),
            samples(&[(3, 3.0), (6, 6.0)]),
        ]);
        let ts: Vec<i64> = got.iter().map(|s| s.t).collect();
        assert_eq!(ts, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_merge_output_is_non_decreasing_without_duplicates() {
        let got = merge(vec![
            samples(&[(1, 0.0), (2, 0.0), (3, 0.0)]),
            samples(&[(2, 0.0), (3, 0.0), (4, 0.0)]),
            samples(&[(1, 0.0), (4, 0.0)]),
        ]);
        let ts: Vec<i64> = got.iter().map(|s| s.t).collect();
        assert_eq!(ts, vec![1, 2, 3, 4]);
        for window in ts.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn test_merge_duplicate_timestamp_takes_latest_source() {
        // Sources are ordered oldest first; the last input wins ties.
        let got = merge(vec![
            samples(&[(1000, 1.0), (2000, 2.0)]),
            samples(&[(2000, 20.0), (3000, 3.0)]),
            samples(&[(2000, 200.0)]),
        ]);
        assert_eq!(got.len(), 3);
        assert_eq!(got[1].t, 2000);
        assert_eq!(got[1].v, 200.0);
    }

    #[test]
    fn test_merge_handles_empty_inputs() {
        assert!(merge(vec![]).is_empty());
        assert!(merge(vec![vec![], vec![]]).is_empty());
        let got = merge(vec![vec![], samples(&[(1, 1.0)]), vec![]]);
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn test_step_rejects_non_positive_step() {
        let inner = samples(&[(0, 1.0)]).into_iter();
        assert!(matches!(
            StepIter::new(inner, 0, 100, 0),
            Err(QueryError::InvalidQuery(_))
        ));
        let inner = samples(&[(0, 1.0)]).into_iter();
        assert!(StepIter::new(inner, 0, 100, -5).is_err());
    }

    #[test]
    fn test_step_emits_one_sample_per_boundary() {
        let inner = samples(&[
            (1000, 1.0),
            (1200, 1.2), // same boundary as 1000 — skipped
            (2000, 2.0),
            (2900, 2.9), // same boundary as 2000 — skipped
            (3100, 3.1),
        ])
        .into_iter();
        let got: Vec<Sample> = StepIter::new(inner, 1000, 10_000, 1000).unwrap().collect();

        let pairs: Vec<(i64, f64)> = got.iter().map(|s| (s.t, s.v)).collect();
        assert_eq!(pairs, vec![(1000, 1.0), (2000, 2.0), (3000, 3.1)]);
    }

    #[test]
    fn test_step_aligns_reported_timestamps() {
        let inner = samples(&[(1530, 1.0), (4210, 4.0)]).into_iter();
        let got: Vec<Sample> = StepIter::new(inner, 1000, 10_000, 1000).unwrap().collect();
        // 1530 aligns to 1000, 4210 aligns to 4000.
        assert_eq!(got[0].t, 1000);
        assert_eq!(got[1].t, 4000);
    }

    #[test]
    fn test_step_respects_bounds() {
        let inner = samples(&[(500, 0.5), (1500, 1.5), (9500, 9.5)]).into_iter();
        let got: Vec<Sample> = StepIter::new(inner, 1000, 5000, 1000).unwrap().collect();
        // 500 is before min_time's first boundary window; 9500 is past max.
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].t, 1000);
        assert_eq!(got[0].v, 1.5);
    }
}
