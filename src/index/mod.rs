//! # Inverted Index Module
//!
//! Maps `label name → label value → postings`, where a posting is a
//! roaring bitmap of [`SeriesId`]s. The index answers matcher queries
//! with set algebra over postings:
//!
//! - `Equal` — the posting at `[name][value]`.
//! - `NotEqual` — the universe minus that posting.
//! - `Regexp` — union over all values under `name` whose string matches.
//! - `NotRegexp` — the universe minus the `Regexp` result.
//!
//! The universe is the union of every posting in the index. Evaluation
//! intersects matcher results left to right and short-circuits once the
//! running intersection is empty.
//!
//! ## Persistence
//!
//! `write_to` / `read_from` dump the index as a little-endian binary
//! stream: magic `0x54534458`, version 1, series count, then sorted
//! names and values with roaring-serialized postings. The bitmap bytes
//! are pinned to the standard roaring serialization; switching bitmap
//! libraries requires a version bump.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::RwLock;

use regex::Regex;
use roaring::RoaringBitmap;
use thiserror::Error;
use tracing::debug;

use crate::series::{Series, SeriesId};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Magic number of the persisted index ("TSDX" read as a big-endian u32).
pub const INDEX_MAGIC: u32 = 0x5453_4458;

/// Current persisted format version.
pub const INDEX_VERSION: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by index operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IndexError {
    /// Empty matcher list, empty regex, or other malformed query input.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Persisted index failed validation.
    #[error("corrupted index: {0}")]
    Corrupted(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Matchers
// ------------------------------------------------------------------------------------------------

/// A single label selector. Regular expressions are compiled at matcher
/// construction time, never during lookup.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// `name == value`
    Equal { name: String, value: String },
    /// `name != value`
    NotEqual { name: String, value: String },
    /// `name =~ pattern`
    Regexp { name: String, re: Regex },
    /// `name !~ pattern`
    NotRegexp { name: String, re: Regex },
}

impl Matcher {
    /// Exact-match selector.
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equal {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Negated exact-match selector.
    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::NotEqual {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Regex selector. The pattern is anchored as given; an empty pattern
    /// is rejected.
    pub fn regexp(name: impl Into<String>, pattern: &str) -> Result<Self, IndexError> {
        Ok(Self::Regexp {
            name: name.into(),
            re: compile(pattern)?,
        })
    }

    /// Negated regex selector.
    pub fn not_regexp(name: impl Into<String>, pattern: &str) -> Result<Self, IndexError> {
        Ok(Self::NotRegexp {
            name: name.into(),
            re: compile(pattern)?,
        })
    }

    /// The label name this matcher applies to.
    pub fn name(&self) -> &str {
        match self {
            Self::Equal { name, .. }
            | Self::NotEqual { name, .. }
            | Self::Regexp { name, .. }
            | Self::NotRegexp { name, .. } => name,
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, IndexError> {
    if pattern.is_empty() {
        return Err(IndexError::InvalidQuery("empty regex pattern".into()));
    }
    Regex::new(pattern).map_err(|e| IndexError::InvalidQuery(format!("bad regex: {e}")))
}

// ------------------------------------------------------------------------------------------------
// InvertedIndex
// ------------------------------------------------------------------------------------------------

type PostingsMap = BTreeMap<String, BTreeMap<String, RoaringBitmap>>;

/// The label inverted index. All operations run under one reader-writer
/// lock; lookups take the read side only.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    postings: RwLock<PostingsMap>,
}

impl InvertedIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `id` under every label of `series`. Idempotent for repeat
    /// adds of the same id.
    pub fn add(&self, id: SeriesId, series: &Series) -> Result<(), IndexError> {
        let mut postings = self
            .postings
            .write()
            .map_err(|_| IndexError::Internal("index lock poisoned".into()))?;
        for (name, value) in series.labels() {
            postings
                .entry(name.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(id);
        }
        Ok(())
    }

    /// Clears `id` from every posting, dropping postings and label names
    /// that become empty.
    pub fn delete(&self, id: SeriesId) -> Result<(), IndexError> {
        let mut postings = self
            .postings
            .write()
            .map_err(|_| IndexError::Internal("index lock poisoned".into()))?;
        for values in postings.values_mut() {
            for bitmap in values.values_mut() {
                bitmap.remove(id);
            }
            values.retain(|_, bitmap| !bitmap.is_empty());
        }
        postings.retain(|_, values| !values.is_empty());
        Ok(())
    }

    /// Evaluates `matchers` and returns the intersection of their
    /// postings. Fails with [`IndexError::InvalidQuery`] on an empty
    /// matcher list.
    pub fn lookup(&self, matchers: &[Matcher]) -> Result<RoaringBitmap, IndexError> {
        if matchers.is_empty() {
            return Err(IndexError::InvalidQuery("no matchers given".into()));
        }

        let postings = self
            .postings
            .read()
            .map_err(|_| IndexError::Internal("index lock poisoned".into()))?;

        // The universe is only needed for negated matchers; computed at
        // most once per lookup.
        let mut universe: Option<RoaringBitmap> = None;
        let mut universe_of = |postings: &PostingsMap| -> RoaringBitmap {
            universe
                .get_or_insert_with(|| {
                    let mut all = RoaringBitmap::new();
                    for values in postings.values() {
                        for bitmap in values.values() {
                            all |= bitmap;
                        }
                    }
                    all
                })
                .clone()
        };

        let mut result: Option<RoaringBitmap> = None;
        for matcher in matchers {
            let ids = match matcher {
                Matcher::Equal { name, value } => postings
                    .get(name)
                    .and_then(|values| values.get(value))
                    .cloned()
                    .unwrap_or_default(),
                Matcher::NotEqual { name, value } => {
                    let mut all = universe_of(&postings);
                    if let Some(bitmap) = postings.get(name).and_then(|values| values.get(value)) {
                        all -= bitmap;
                    }
                    all
                }
                Matcher::Regexp { name, re } => regex_union(&postings, name, re),
                Matcher::NotRegexp { name, re } => {
                    let mut all = universe_of(&postings);
                    all -= &regex_union(&postings, name, re);
                    all
                }
            };

            let acc = match result.take() {
                None => ids,
                Some(acc) => acc & ids,
            };
            if acc.is_empty() {
                return Ok(acc);
            }
            result = Some(acc);
        }

        Ok(result.unwrap_or_default())
    }

    /// Number of distinct label names indexed.
    pub fn label_name_count(&self) -> Result<usize, IndexError> {
        let postings = self
            .postings
            .read()
            .map_err(|_| IndexError::Internal("index lock poisoned".into()))?;
        Ok(postings.len())
    }

    /// Number of distinct series ids across all postings.
    pub fn series_count(&self) -> Result<u64, IndexError> {
        let postings = self
            .postings
            .read()
            .map_err(|_| IndexError::Internal("index lock poisoned".into()))?;
        let mut all = RoaringBitmap::new();
        for values in postings.values() {
            for bitmap in values.values() {
                all |= bitmap;
            }
        }
        Ok(all.len())
    }

    // --------------------------------------------------------------------------------------------
    // Persistence
    // --------------------------------------------------------------------------------------------

    /// Serialises the index. Names and values are written in sorted order
    /// so the dump is deterministic for a given index state.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), IndexError> {
        let postings = self
            .postings
            .read()
            .map_err(|_| IndexError::Internal("index lock poisoned".into()))?;

        let mut all = RoaringBitmap::new();
        for values in postings.values() {
            for bitmap in values.values() {
                all |= bitmap;
            }
        }

        w.write_all(&INDEX_MAGIC.to_le_bytes())?;
        w.write_all(&INDEX_VERSION.to_le_bytes())?;
        w.write_all(&all.len().to_le_bytes())?;
        w.write_all(&(postings.len() as u32).to_le_bytes())?;

        for (name, values) in postings.iter() {
            write_str(w, name)?;
            w.write_all(&(values.len() as u32).to_le_bytes())?;
            for (value, bitmap) in values {
                write_str(w, value)?;
                let mut bytes = Vec::with_capacity(bitmap.serialized_size());
                bitmap
                    .serialize_into(&mut bytes)
                    .map_err(IndexError::Io)?;
                w.write_all(&(bytes.len() as u32).to_le_bytes())?;
                w.write_all(&bytes)?;
            }
        }

        debug!(
            label_names = postings.len(),
            series = all.len(),
            "index serialised"
        );
        Ok(())
    }

    /// Loads an index previously written by [`InvertedIndex::write_to`].
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, IndexError> {
        let magic = read_u32(r)?;
        if magic != INDEX_MAGIC {
            return Err(IndexError::Corrupted(format!("bad magic {magic:#010x}")));
        }
        let version = read_u32(r)?;
        if version != INDEX_VERSION {
            return Err(IndexError::Corrupted(format!(
                "unsupported version {version}"
            )));
        }
        let _series_count = read_u64(r)?;
        let name_count = read_u32(r)?;

        let mut postings: PostingsMap = BTreeMap::new();
        for _ in 0..name_count {
            let name = read_str(r)?;
            let value_count = read_u32(r)?;
            let mut values = BTreeMap::new();
            for _ in 0..value_count {
                let value = read_str(r)?;
                let bm_len = read_u32(r)? as usize;
                let mut bytes = vec![0u8; bm_len];
                r.read_exact(&mut bytes)?;
                let bitmap = RoaringBitmap::deserialize_from(&bytes[..])
                    .map_err(|e| IndexError::Corrupted(format!("bad posting bitmap: {e}")))?;
                values.insert(value, bitmap);
            }
            postings.insert(name, values);
        }

        Ok(Self {
            postings: RwLock::new(postings),
        })
    }
}

/// Union of all postings under `name` whose value matches `re`.
fn regex_union(postings: &PostingsMap, name: &str, re: &Regex) -> RoaringBitmap {
    let mut out = RoaringBitmap::new();
    if let Some(values) = postings.get(name) {
        for (value, bitmap) in values {
            if re.is_match(value) {
                out |= bitmap;
            }
        }
    }
    out
}

// ------------------------------------------------------------------------------------------------
// Little-endian framing helpers
// ------------------------------------------------------------------------------------------------

fn write_str<W: Write>(w: &mut W, s: &str) -> Result<(), IndexError> {
    w.write_all(&(s.len() as u32).to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_str<R: Read>(r: &mut R) -> Result<String, IndexError> {
    let len = read_u32(r)? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| IndexError::Corrupted("non-UTF-8 label".into()))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, IndexError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, IndexError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
