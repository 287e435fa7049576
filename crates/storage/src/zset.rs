//! Sorted set
//!
//! Members ordered by `(score, member)`, matching Redis: equal scores fall
//! back to byte-wise member order, and descending operations reverse the
//! whole ordering. Lookups by member go through a hash map; positional
//! operations walk the ordered set.

use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ops::Bound;

/// Totally ordered wrapper for a non-NaN score
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Resolve Redis-style inclusive `start..=stop` indexes against `len`
///
/// Negative indexes count from the end. Returns `None` for an empty range.
pub(crate) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// In-memory sorted set
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    scores: FxHashMap<String, f64>,
    order: BTreeSet<(Score, String)>,
}

impl SortedSet {
    /// Create an empty sorted set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether the set has no members
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Add or re-score a member; returns true if the member is new
    ///
    /// With `nx`, an existing member keeps its score. The caller rejects NaN.
    pub fn insert(&mut self, member: &str, score: f64, nx: bool) -> bool {
        // -0.0 and 0.0 must rank together
        let score = if score == 0.0 { 0.0 } else { score };
        match self.scores.get(member).copied() {
            Some(_) if nx => false,
            Some(old) => {
                self.order.remove(&(Score(old), member.to_string()));
                self.order.insert((Score(score), member.to_string()));
                self.scores.insert(member.to_string(), score);
                false
            }
            None => {
                self.order.insert((Score(score), member.to_string()));
                self.scores.insert(member.to_string(), score);
                true
            }
        }
    }

    /// Remove a member; returns true if it was present
    pub fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.order.remove(&(Score(score), member.to_string()));
                true
            }
            None => false,
        }
    }

    /// Score of a member
    pub fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Zero-based position of a member, ascending or descending
    pub fn rank(&self, member: &str, rev: bool) -> Option<usize> {
        let score = self.scores.get(member).copied()?;
        let key = (Score(score), member.to_string());
        let below = self.order.range(..&key).count();
        Some(if rev { self.len() - 1 - below } else { below })
    }

    /// Members at positions `start..=stop`
    pub fn range_by_rank(&self, start: i64, stop: i64, rev: bool) -> Vec<String> {
        let Some((start, stop)) = normalize_range(start, stop, self.len()) else {
            return Vec::new();
        };
        let take = stop - start + 1;
        if rev {
            self.order
                .iter()
                .rev()
                .skip(start)
                .take(take)
                .map(|(_, m)| m.clone())
                .collect()
        } else {
            self.order
                .iter()
                .skip(start)
                .take(take)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    /// Members whose score lies within `min..max`
    pub fn range_by_score(&self, min: Bound<f64>, max: Bound<f64>, rev: bool) -> Vec<String> {
        let within = |score: f64| {
            let above = match min {
                Bound::Included(m) => score >= m,
                Bound::Excluded(m) => score > m,
                Bound::Unbounded => true,
            };
            let below = match max {
                Bound::Included(m) => score <= m,
                Bound::Excluded(m) => score < m,
                Bound::Unbounded => true,
            };
            above && below
        };
        let hits = self
            .order
            .iter()
            .filter(|(s, _)| within(s.0))
            .map(|(_, m)| m.clone());
        if rev {
            let mut out: Vec<String> = hits.collect();
            out.reverse();
            out
        } else {
            hits.collect()
        }
    }

    /// Remove members at ascending positions `start..=stop`
    pub fn remove_range_by_rank(&mut self, start: i64, stop: i64) -> usize {
        let doomed = self.range_by_rank(start, stop, false);
        for member in &doomed {
            self.remove(member);
        }
        doomed.len()
    }
}
