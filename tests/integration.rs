//! Integration tests for the public `Database` API.
//!
//! These exercise the full storage stack (WAL → memtable → block →
//! compaction → retention) through `tempusdb::{Database, DbOptions, …}`
//! only. No internal modules are referenced.
//!
//! ## Coverage areas
//! - **Lifecycle**: open, close, idempotent close, Drop-based cleanup
//! - **Ingest**: batches, many series, NaN/Inf payloads
//! - **Query**: raw per-hash reads, matcher selection, aggregation
//! - **Persistence**: data survives close → reopen
//! - **Concurrency**: parallel writers, readers during writes
//!
//! ## See also
//! - `tests/scenarios.rs` — the six end-to-end scenarios
//! - per-module unit tests under `src/*/tests/`

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use tempusdb::query::{AggregateOp, Grouping, aggregate, rate};
use tempusdb::{Database, DbOptions, Matcher, Sample, Series};

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn quiet_opts(dir: &std::path::Path) -> DbOptions {
    DbOptions {
        flush_interval: Duration::from_secs(3600),
        compaction_interval: Duration::from_secs(3600),
        enable_retention: false,
        ..DbOptions::new(dir)
    }
}

fn cpu_series(host: &str) -> Series {
    Series::new([("__name__", "cpu_usage"), ("host", host), ("env", "prod")])
}

// ================================================================================================
// Lifecycle
// ================================================================================================

/// # Scenario
/// Open a fresh database and immediately close it, twice.
#[test]
fn test_open_close_idempotent() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(quiet_opts(tmp.path())).unwrap();
    db.close().unwrap();
    db.close().unwrap();
}

/// # Scenario
/// Drop a database without closing; the drop path flushes buffered data
/// so a reopen reads it back from a block.
#[test]
fn test_drop_flushes_like_close() {
    let tmp = TempDir::new().unwrap();
    let series = cpu_series("web-1");
    {
        let db = Database::open(quiet_opts(tmp.path())).unwrap();
        db.insert(series.clone(), &[Sample::new(1000, 0.5)]).unwrap();
        // No close: Drop handles shutdown.
    }

    let db = Database::open(quiet_opts(tmp.path())).unwrap();
    assert_eq!(db.block_count().unwrap(), 1);
    let results = db
        .select(&[Matcher::equal("host", "web-1")], 500, 1500)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].samples.len(), 1);
    db.close().unwrap();
}

/// # Scenario
/// Two databases in separate directories do not interfere.
#[test]
fn test_independent_stores() {
    let tmp = TempDir::new().unwrap();
    let a = Database::open(quiet_opts(&tmp.path().join("a"))).unwrap();
    let b = Database::open(quiet_opts(&tmp.path().join("b"))).unwrap();

    let series = cpu_series("web-1");
    a.insert(series.clone(), &[Sample::new(1000, 1.0)]).unwrap();

    assert_eq!(a.query(series.hash(), 0, 0).unwrap().len(), 1);
    assert!(b.query(series.hash(), 0, 0).unwrap().is_empty());

    a.close().unwrap();
    b.close().unwrap();
}

// ================================================================================================
// Ingest and query
// ================================================================================================

/// # Scenario
/// A fleet of series written through flushes stays fully selectable, and
/// the aggregation layer sums it per environment.
#[test]
fn test_fleet_ingest_select_aggregate() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(quiet_opts(tmp.path())).unwrap();

    for host in 0..20 {
        let series = cpu_series(&format!("web-{host:02}"));
        let batch: Vec<Sample> = (0..50)
            .map(|i| Sample::new(1_000_000 + i * 15_000, host as f64))
            .collect();
        db.insert(series, &batch).unwrap();
        if host % 5 == 4 {
            db.flush().unwrap();
        }
    }

    let results = db
        .select(
            &[Matcher::regexp("host", "web-.*").unwrap()],
            0,
            i64::MAX,
        )
        .unwrap();
    assert_eq!(results.len(), 20);
    for result in &results {
        assert_eq!(result.samples.len(), 50);
    }

    let summed = aggregate(
        &results,
        AggregateOp::Sum,
        15_000,
        &Grouping::By(vec!["env".into()]),
    )
    .unwrap();
    assert_eq!(summed.len(), 1);
    assert_eq!(summed[0].series.get("env"), Some("prod"));
    // Σ 0..19 per bucket.
    assert_eq!(summed[0].samples[0].v, 190.0);

    db.close().unwrap();
}

/// # Scenario
/// Counter samples ingested across a flush produce sane rates.
#[test]
fn test_rate_over_flushed_counter() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(quiet_opts(tmp.path())).unwrap();
    let series = Series::new([("__name__", "http_requests_total")]);

    let batch: Vec<Sample> = (0..100).map(|i| Sample::new(i * 10_000, (i * 5) as f64)).collect();
    db.insert(series.clone(), &batch).unwrap();
    db.flush().unwrap();

    let results = db
        .select(&[Matcher::equal("__name__", "http_requests_total")], 0, i64::MAX)
        .unwrap();
    let rates = rate(&results, 0);
    assert_eq!(rates[0].samples.len(), 99);
    // 5 units every 10 s → 0.5/s everywhere.
    for sample in &rates[0].samples {
        assert!((sample.v - 0.5).abs() < 1e-12);
    }

    db.close().unwrap();
}

/// # Scenario
/// Non-finite values survive the whole pipeline: WAL, flush, chunk
/// compression, and read-back.
#[test]
fn test_non_finite_values_survive_full_pipeline() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(quiet_opts(tmp.path())).unwrap();
    let series = Series::new([("__name__", "weird_values")]);

    let nan = f64::from_bits(0x7FF8_0000_0000_1234);
    let batch = vec![
        Sample::new(1000, nan),
        Sample::new(2000, f64::INFINITY),
        Sample::new(3000, f64::NEG_INFINITY),
        Sample::new(4000, -0.0),
    ];
    db.insert(series.clone(), &batch).unwrap();
    db.flush().unwrap();

    let got = db.query(series.hash(), 0, 10_000).unwrap();
    assert_eq!(got.len(), 4);
    for (got, want) in got.iter().zip(&batch) {
        assert_eq!(got.v.to_bits(), want.v.to_bits());
    }

    db.close().unwrap();
}

// ================================================================================================
// Concurrency
// ================================================================================================

/// # Scenario
/// Eight writer threads ingest disjoint series through background
/// flushes; every sample is accounted for afterwards.
#[test]
fn test_parallel_writers() {
    let tmp = TempDir::new().unwrap();
    let db = Arc::new(
        Database::open(DbOptions {
            mem_table_max_bytes: 8 * 1024,
            ..quiet_opts(tmp.path())
        })
        .unwrap(),
    );

    let mut handles = Vec::new();
    for w in 0..8 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            let series = cpu_series(&format!("writer-{w}"));
            for i in 0..100i64 {
                db.insert(series.clone(), &[Sample::new(i * 1000, i as f64)])
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let results = db
        .select(&[Matcher::regexp("host", "writer-.*").unwrap()], 0, i64::MAX)
        .unwrap();
    assert_eq!(results.len(), 8);
    for result in &results {
        assert_eq!(result.samples.len(), 100);
    }

    db.close().unwrap();
}

/// # Scenario
/// Readers run concurrently with a writer; every observed snapshot is
/// internally consistent (sorted, no duplicates).
#[test]
fn test_readers_during_writes() {
    let tmp = TempDir::new().unwrap();
    let db = Arc::new(Database::open(quiet_opts(tmp.path())).unwrap());
    let series = cpu_series("shared");

    let writer = {
        let db = Arc::clone(&db);
        let series = series.clone();
        thread::spawn(move || {
            for i in 0..300i64 {
                db.insert(series.clone(), &[Sample::new(i * 1000, i as f64)])
                    .unwrap();
            }
        })
    };

    let reader = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for _ in 0..50 {
                let results = db
                    .select(&[Matcher::equal("host", "shared")], 0, i64::MAX)
                    .unwrap();
                if let Some(result) = results.first() {
                    for pair in result.samples.windows(2) {
                        assert!(pair[0].t < pair[1].t);
                    }
                }
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();

    assert_eq!(db.query(series.hash(), 0, 0).unwrap().len(), 300);
    db.close().unwrap();
}
