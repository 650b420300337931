//! # TempusDB
//!
//! An embeddable time-series storage engine. Labelled `f64` samples are
//! ingested through a write-ahead log, buffered in a concurrent
//! memtable, and persisted as Gorilla-compressed chunks inside
//! time-partitioned, immutable blocks that are compacted in tiers and
//! aged out by retention.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        Database                            │
//! │  ┌──────────┐   ┌───────────┐   ┌────────────────────────┐ │
//! │  │  Active  │   │ Flushing  │   │  Blocks (on disk)      │ │
//! │  │ MemTable │   │ MemTable  │   │  <ulid>/meta.json      │ │
//! │  │  + WAL   │   │           │   │  <ulid>/chunks/<hash>  │ │
//! │  └────┬─────┘   └─────┬─────┘   └───────────┬────────────┘ │
//! │       │  swap         │  flush              │              │
//! │       └─────────►     └──────────►          │              │
//! │                                             │              │
//! │  ┌──────────────────────────────────────────┘              │
//! │  │  Compactor (L0 → L1 → L2)  ·  Retention GC             │
//! │  └────────────────────────────────────────────────────────┘│
//! │                                                            │
//! │  SeriesRegistry (hash → id)  ·  InvertedIndex (postings)   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`codec`] | Bit streams, delta-of-delta timestamp codec, XOR value codec |
//! | [`chunk`] | Sealed, CRC-framed containers of up to 120 samples |
//! | [`series`] | Sample/series data model, FNV-1a identity, ID registry |
//! | [`index`] | Label inverted index with roaring-bitmap postings |
//! | [`memtable`] | Concurrent, watermarked in-memory write buffer |
//! | [`wal`] | Segment-rotated, CRC-framed, replayable write-ahead log |
//! | [`block`] | Immutable on-disk blocks: meta.json + per-series chunk files |
//! | [`db`] | Orchestrator: ingest, background flush, query fan-out |
//! | [`compact`] | Tiered L0→L1→L2 merge with last-write-wins dedup |
//! | [`retention`] | Age-based block garbage collection |
//! | [`query`] | Merge/step iterators, aggregations, rate functions |
//!
//! ## Guarantees
//!
//! - **Durability** — every accepted insert is fsynced to the WAL before
//!   it becomes visible to queries.
//! - **Crash recovery** — on open the WAL is replayed into a fresh
//!   memtable; a torn tail loses only the records past it.
//! - **Integrity** — chunk frames and WAL records carry CRC32 checksums;
//!   corruption is confined to the damaged record, block, or segment.
//! - **Bit fidelity** — values round-trip by bit pattern; NaN payloads
//!   and signed zeros survive compression, logging, and merging.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tempusdb::{Database, DbOptions, Matcher, Sample, Series};
//!
//! let db = Database::open(DbOptions::new("/tmp/tsdb")).unwrap();
//!
//! let series = Series::new([("__name__", "cpu_usage"), ("host", "web-1")]);
//! db.insert(series.clone(), &[Sample::new(1_700_000_000_000, 0.42)])
//!     .unwrap();
//!
//! let results = db
//!     .select(&[Matcher::equal("host", "web-1")], 0, i64::MAX)
//!     .unwrap();
//! assert_eq!(results.len(), 1);
//!
//! db.close().unwrap();
//! ```

pub mod block;
pub mod chunk;
pub mod codec;
pub mod compact;
pub mod db;
pub mod index;
pub mod memtable;
pub mod query;
pub mod retention;
pub mod series;
pub mod wal;

mod util;

pub use db::{Database, DbError, DbOptions};
pub use index::Matcher;
pub use query::{AggregateOp, Grouping, QueryResult};
pub use series::{Sample, Series, SeriesId};
