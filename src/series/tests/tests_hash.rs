#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::series::Series;

    #[test]
    fn test_hash_is_insertion_order_independent() {
        let a = Series::new([("host", "web-1"), ("env", "prod"), ("metric", "cpu")]);
        let b = Series::new([("metric", "cpu"), ("host", "web-1"), ("env", "prod")]);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_is_deterministic_across_instances() {
        let build = || Series::new([("__name__", "http_requests"), ("code", "200")]);
        assert_eq!(build().hash(), build().hash());
    }

    #[test]
    fn test_distinct_label_sets_differ() {
        let base = Series::new([("host", "web-1")]);
        assert_ne!(base.hash(), Series::new([("host", "web-2")]).hash());
        assert_ne!(base.hash(), Series::new([("host", "web-1"), ("x", "y")]).hash());
        assert_ne!(base.hash(), Series::new([("hose", "web-1")]).hash());
        assert_ne!(base, Series::new([("host", "web-2")]));
    }

    #[test]
    fn test_name_value_framing_prevents_concatenation_collisions() {
        // Without per-field framing these would hash identically.
        let a = Series::new([("ab", "c")]);
        let b = Series::new([("a", "bc")]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_collision_rate_on_synthetic_corpus() {
        let mut hashes = HashSet::new();
        let mut total = 0u32;
        for host in 0..100 {
            for metric in 0..100 {
                let series = Series::new([
                    ("host", format!("node-{host:03}")),
                    ("metric", format!("metric_{metric:03}")),
                    ("env", "prod".to_string()),
                ]);
                hashes.insert(series.hash());
                total += 1;
            }
        }
        let collisions = total as usize - hashes.len();
        // Below 10⁻³ over 10 000 label sets.
        assert!(collisions <= 10, "{collisions} collisions out of {total}");
    }

    #[test]
    fn test_duplicate_label_names_keep_last() {
        let series = Series::new([("host", "old"), ("host", "new")]);
        assert_eq!(series.get("host"), Some("new"));
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_display_is_sorted() {
        let series = Series::new([("b", "2"), ("a", "1")]);
        assert_eq!(series.to_string(), "{a=\"1\",b=\"2\"}");
    }
}
