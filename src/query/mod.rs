//! # Query Module
//!
//! Iterator plumbing and the numeric functions layered over raw series
//! reads:
//!
//! - [`MergeIter`] — merges N sample streams into one non-decreasing
//!   stream, collapsing duplicate timestamps. Inputs are ordered oldest
//!   source first; on a timestamp tie the latest source wins, matching
//!   the compactor's deduplication rule.
//! - [`StepIter`] — emits at most one sample per step boundary, the first
//!   whose timestamp reaches the boundary, reported at the aligned time.
//! - [`aggregate`] — Sum/Avg/Min/Max/Count/StdDev/StdVar over step
//!   buckets with `by`/`without` label grouping.
//! - [`rate`], [`increase`], [`delta`], [`derivative`] — counter and
//!   gauge functions over per-series sample vectors.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::series::{Sample, Series};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by query evaluation.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueryError {
    /// Non-positive step, empty matcher set, or other malformed input.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

// ------------------------------------------------------------------------------------------------
// Results
// ------------------------------------------------------------------------------------------------

/// Samples selected for one series.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// The series the samples belong to.
    pub series: Arc<Series>,
    /// Samples in non-decreasing timestamp order.
    pub samples: Vec<Sample>,
}

// ------------------------------------------------------------------------------------------------
// MergeIter
// ------------------------------------------------------------------------------------------------

/// Merges N sample iterators into a single stream sorted non-decreasing
/// by timestamp with duplicate timestamps dropped.
///
/// Every input whose head carries the emitted timestamp is advanced, and
/// the value comes from the highest-indexed such input — callers list
/// sources oldest first, so the later writer wins.
pub struct MergeIter<'a> {
    inputs: Vec<Box<dyn Iterator<Item = Sample> + 'a>>,
    heads: Vec<Option<Sample>>,
}

impl<'a> MergeIter<'a> {
    /// Builds a merge iterator over `inputs`, ordered oldest source first.
    pub fn new(mut inputs: Vec<Box<dyn Iterator<Item = Sample> + 'a>>) -> Self {
        let heads = inputs.iter_mut().map(|it| it.next()).collect();
        Self { inputs, heads }
    }
}

impl Iterator for MergeIter<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        let min_t = self.heads.iter().flatten().map(|s| s.t).min()?;

        let mut emit: Option<Sample> = None;
        for (head, input) in self.heads.iter_mut().zip(self.inputs.iter_mut()) {
            if let Some(sample) = *head
                && sample.t == min_t
            {
                // Later sources overwrite earlier ones on a tie.
                emit = Some(sample);
                *head = input.next();
            }
        }
        emit
    }
}

// ------------------------------------------------------------------------------------------------
// StepIter
// ------------------------------------------------------------------------------------------------

/// Wraps a sample iterator with `[min_time, max_time, step]` alignment.
///
/// For each step boundary at most one sample is emitted: the first whose
/// timestamp reaches the boundary, reported at the boundary-aligned time.
pub struct StepIter<I> {
    inner: I,
    origin: i64,
    next_time: i64,
    max_time: i64,
    step: i64,
    exhausted: bool,
}

impl<I: Iterator<Item = Sample>> StepIter<I> {
    /// Creates a step iterator; fails when `step <= 0`.
    pub fn new(inner: I, min_time: i64, max_time: i64, step: i64) -> Result<Self, QueryError> {
        if step <= 0 {
            return Err(QueryError::InvalidQuery(format!("non-positive step {step}")));
        }
        Ok(Self {
            inner,
            origin: min_time,
            next_time: min_time,
            max_time,
            step,
            exhausted: false,
        })
    }
}

impl<I: Iterator<Item = Sample>> Iterator for StepIter<I> {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        for sample in self.inner.by_ref() {
            if sample.t > self.max_time {
                self.exhausted = true;
                return None;
            }
            if sample.t < self.next_time {
                continue;
            }
            let steps = (sample.t - self.origin).div_euclid(self.step);
            let aligned = self.origin + steps * self.step;
            self.next_time = aligned + self.step;
            return Some(Sample {
                t: aligned,
                v: sample.v,
            });
        }
        self.exhausted = true;
        None
    }
}

// ------------------------------------------------------------------------------------------------
// Aggregation
// ------------------------------------------------------------------------------------------------

/// Aggregation functions applied per step bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    StdDev,
    StdVar,
}

/// How input series are grouped before aggregation.
#[derive(Debug, Clone)]
pub enum Grouping {
    /// All inputs collapse into one group with no labels.
    All,
    /// Keep only the listed label names.
    By(Vec<String>),
    /// Keep all labels except the listed ones.
    Without(Vec<String>),
}

impl Grouping {
    fn key(&self, series: &Series) -> BTreeMap<String, String> {
        match self {
            Self::All => BTreeMap::new(),
            Self::By(names) => series
                .labels()
                .iter()
                .filter(|(name, _)| names.iter().any(|n| n == *name))
                .map(|(n, v)| (n.clone(), v.clone()))
                .collect(),
            Self::Without(names) => series
                .labels()
                .iter()
                .filter(|(name, _)| !names.iter().any(|n| n == *name))
                .map(|(n, v)| (n.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Buckets every input sample by `floor(t / step) * step`, applies `op`
/// per group and bucket, and returns one result series per group with
/// samples sorted by bucket time.
pub fn aggregate(
    results: &[QueryResult],
    op: AggregateOp,
    step: i64,
    grouping: &Grouping,
) -> Result<Vec<QueryResult>, QueryError> {
    if step <= 0 {
        return Err(QueryError::InvalidQuery(format!("non-positive step {step}")));
    }

    let mut groups: BTreeMap<BTreeMap<String, String>, BTreeMap<i64, Vec<f64>>> = BTreeMap::new();
    for result in results {
        let key = grouping.key(&result.series);
        let buckets = groups.entry(key).or_default();
        for sample in &result.samples {
            let bucket = sample.t.div_euclid(step) * step;
            buckets.entry(bucket).or_default().push(sample.v);
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    for (labels, buckets) in groups {
        let samples = buckets
            .into_iter()
            .map(|(t, values)| Sample {
                t,
                v: apply(op, &values),
            })
            .collect();
        out.push(QueryResult {
            series: Arc::new(Series::from_map(labels)),
            samples,
        });
    }
    Ok(out)
}

fn apply(op: AggregateOp, values: &[f64]) -> f64 {
    match op {
        AggregateOp::Sum => values.iter().sum(),
        AggregateOp::Avg => values.iter().sum::<f64>() / values.len() as f64,
        AggregateOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregateOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregateOp::Count => values.len() as f64,
        AggregateOp::StdDev => variance(values).sqrt(),
        AggregateOp::StdVar => variance(values),
    }
}

/// Population variance.
fn variance(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64
}

// ------------------------------------------------------------------------------------------------
// Counter / gauge functions
// ------------------------------------------------------------------------------------------------

/// Per-second rate over adjacent sample pairs, emitted at the later
/// timestamp of each pair.
///
/// A value drop is treated as a counter reset: the current value is
/// taken as the whole increase. When `range_secs > 0`, pairs further
/// apart than the range are skipped as gaps.
pub fn rate(results: &[QueryResult], range_secs: i64) -> Vec<QueryResult> {
    per_pair(results, range_secs, |prev, cur, dt_secs| {
        let dv = if cur.v < prev.v { cur.v } else { cur.v - prev.v };
        dv / dt_secs
    })
}

/// Like [`rate`] but without counter-reset handling; negative slopes are
/// reported as-is.
pub fn derivative(results: &[QueryResult], range_secs: i64) -> Vec<QueryResult> {
    per_pair(results, range_secs, |prev, cur, dt_secs| {
        (cur.v - prev.v) / dt_secs
    })
}

fn per_pair(
    results: &[QueryResult],
    range_secs: i64,
    f: impl Fn(&Sample, &Sample, f64) -> f64,
) -> Vec<QueryResult> {
    let mut out = Vec::new();
    for result in results {
        if result.samples.len() < 2 {
            continue;
        }
        let mut samples = Vec::with_capacity(result.samples.len() - 1);
        for pair in result.samples.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            let dt_ms = cur.t - prev.t;
            if dt_ms <= 0 {
                continue;
            }
            if range_secs > 0 && dt_ms > range_secs * 1000 {
                continue;
            }
            let dt_secs = dt_ms as f64 / 1000.0;
            samples.push(Sample {
                t: cur.t,
                v: f(prev, cur, dt_secs),
            });
        }
        if !samples.is_empty() {
            out.push(QueryResult {
                series: Arc::clone(&result.series),
                samples,
            });
        }
    }
    out
}

/// Counter-reset-adjusted total increase per series, emitted as a single
/// sample at the last timestamp.
pub fn increase(results: &[QueryResult]) -> Vec<QueryResult> {
    let mut out = Vec::new();
    for result in results {
        if result.samples.len() < 2 {
            continue;
        }
        let mut total = 0.0;
        for pair in result.samples.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            total += if cur.v < prev.v { cur.v } else { cur.v - prev.v };
        }
        let last = result.samples.last().expect("len >= 2");
        out.push(QueryResult {
            series: Arc::clone(&result.series),
            samples: vec![Sample { t: last.t, v: total }],
        });
    }
    out
}

/// Raw `last − first` per series, sign preserved, emitted at the last
/// timestamp.
pub fn delta(results: &[QueryResult]) -> Vec<QueryResult> {
    let mut out = Vec::new();
    for result in results {
        if result.samples.len() < 2 {
            continue;
        }
        let first = result.samples.first().expect("len >= 2");
        let last = result.samples.last().expect("len >= 2");
        out.push(QueryResult {
            series: Arc::clone(&result.series),
            samples: vec![Sample {
                t: last.t,
                v: last.v - first.v,
            }],
        });
    }
    out
}
