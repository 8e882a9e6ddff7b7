//! # Interval
//!
//! Half-open one-dimensional index ranges `[from, to)` and the algebra used to
//! address, split and look up partitions of a global index space.

use crate::error::{DistError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::{max, min, Ordering};
use std::collections::BTreeMap;
use std::fmt;

/// A half-open index range `[from, to)` with `from <= to`.
///
/// The range is empty when `from == to`; an empty interval still has a
/// position and overlaps another interval iff that position lies inside it.
/// Intervals are ordered by `from`, ties broken by `to`, so they can key a
/// sorted map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(i64, i64)", into = "(i64, i64)")]
pub struct Interval {
    from: i64,
    to: i64,
}

impl Interval {
    /// Create an interval, rejecting `from > to`.
    pub fn new(from: i64, to: i64) -> Result<Self> {
        if from > to {
            return Err(DistError::MalformedInterval { from, to });
        }
        Ok(Self { from, to })
    }

    /// The empty interval positioned at `index`.
    pub const fn empty_at(index: i64) -> Self {
        Self {
            from: index,
            to: index,
        }
    }

    /// The single-index interval `[index, index + 1)`.
    ///
    /// `i64::MAX` lies in no half-open interval, so its singleton is the
    /// empty interval at `i64::MAX` and overlaps nothing.
    pub const fn singleton(index: i64) -> Self {
        Self {
            from: index,
            to: index.saturating_add(1),
        }
    }

    /// Inclusive lower bound.
    #[inline]
    pub const fn from(&self) -> i64 {
        self.from
    }

    /// Exclusive upper bound.
    #[inline]
    pub const fn to(&self) -> i64 {
        self.to
    }

    /// Number of indices covered.
    #[inline]
    pub const fn size(&self) -> u64 {
        self.to.abs_diff(self.from)
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.from == self.to
    }

    /// Check whether `index` lies in `[from, to)`.
    #[inline]
    pub const fn contains(&self, index: i64) -> bool {
        self.from <= index && index < self.to
    }

    /// Check whether `other` lies entirely inside this interval.
    ///
    /// An empty interval is contained iff its position is within `[from, to]`.
    #[inline]
    pub const fn contains_range(&self, other: &Interval) -> bool {
        self.from <= other.from && other.to <= self.to
    }

    /// Symmetric overlap test following the half-open rule.
    pub const fn is_overlapped(&self, other: &Interval) -> bool {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => self.from == other.from,
            (true, false) => other.from <= self.from && self.from < other.to,
            (false, true) => self.from <= other.from && other.from < self.to,
            (false, false) => self.from < other.to && other.from < self.to,
        }
    }

    /// Intersection of two overlapping intervals, `None` when they do not overlap.
    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        if !self.is_overlapped(other) {
            return None;
        }
        Some(Interval {
            from: max(self.from, other.from),
            to: min(self.to, other.to),
        })
    }

    /// Smallest interval covering both, when they overlap or touch.
    pub fn union(&self, other: &Interval) -> Option<Interval> {
        if self.is_overlapped(other) || self.to == other.from || other.to == self.from {
            Some(Interval {
                from: min(self.from, other.from),
                to: max(self.to, other.to),
            })
        } else {
            None
        }
    }

    /// The parts of this interval not covered by `other` (zero, one or two pieces).
    pub fn difference(&self, other: &Interval) -> Vec<Interval> {
        let Some(common) = self.intersection(other) else {
            return vec![*self];
        };
        let mut result = Vec::with_capacity(2);
        if self.from < common.from {
            result.push(Interval {
                from: self.from,
                to: common.from,
            });
        }
        if common.to < self.to {
            result.push(Interval {
                from: common.to,
                to: self.to,
            });
        }
        result
    }

    /// Split into `n` consecutive pieces.
    ///
    /// The first `size % n` pieces get `ceil(size / n)` indices, the rest
    /// `floor(size / n)`. Pieces may be empty when `n > size`.
    pub fn split(&self, n: usize) -> Result<Vec<Interval>> {
        if n == 0 {
            return Err(DistError::IllegalState(
                "cannot split an interval into zero pieces".to_string(),
            ));
        }
        let size = self.size();
        let base = size / n as u64;
        let remainder = size % n as u64;
        let mut pieces = Vec::with_capacity(n);
        let mut cursor = self.from;
        for k in 0..n as u64 {
            let len = base + u64::from(k < remainder);
            // Never passes `to`.
            let next = cursor.wrapping_add_unsigned(len);
            pieces.push(Interval {
                from: cursor,
                to: next,
            });
            cursor = next;
        }
        Ok(pieces)
    }

    /// Split the concatenation of `list` into `n` lists of equal weight.
    ///
    /// Weights follow [`Interval::split`]; individual intervals are cut at
    /// list boundaries as needed and empty pieces are dropped.
    pub fn split_list(n: usize, list: &[Interval]) -> Result<Vec<Vec<Interval>>> {
        if n == 0 {
            return Err(DistError::IllegalState(
                "cannot split a range list into zero parts".to_string(),
            ));
        }
        let total: u64 = list.iter().map(Interval::size).sum();
        let base = total / n as u64;
        let remainder = total % n as u64;

        let mut parts: Vec<Vec<Interval>> = (0..n).map(|_| Vec::new()).collect();
        let mut part = 0usize;
        let mut budget = base + u64::from(remainder > 0);

        for range in list {
            let mut from = range.from;
            while from < range.to {
                while budget == 0 {
                    part += 1;
                    budget = base + u64::from((part as u64) < remainder);
                }
                let take = min(budget, range.to.abs_diff(from));
                let to = from.wrapping_add_unsigned(take);
                parts[part].push(Interval { from, to });
                budget -= take;
                from = to;
            }
        }
        Ok(parts)
    }

    /// Iterate the indices of the interval.
    pub fn indices(&self) -> std::ops::Range<i64> {
        self.from..self.to
    }

    /// `[from, to)`, collapsed to the empty interval at `from` when `to < from`.
    #[inline]
    pub(crate) fn clamped(from: i64, to: i64) -> Self {
        Self {
            from,
            to: max(from, to),
        }
    }

    /// Search key that sorts after every interval starting at or before `index`.
    #[inline]
    pub(crate) const fn floor_key(index: i64) -> Self {
        Self {
            from: index,
            to: i64::MAX,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Interval {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.from.cmp(&other.from) {
            Ordering::Equal => self.to.cmp(&other.to),
            ordering => ordering,
        }
    }
}

impl TryFrom<(i64, i64)> for Interval {
    type Error = DistError;

    fn try_from((from, to): (i64, i64)) -> Result<Self> {
        Interval::new(from, to)
    }
}

impl From<Interval> for (i64, i64) {
    fn from(interval: Interval) -> Self {
        (interval.from, interval.to)
    }
}

impl TryFrom<std::ops::Range<i64>> for Interval {
    type Error = DistError;

    fn try_from(range: std::ops::Range<i64>) -> Result<Self> {
        Interval::new(range.start, range.end)
    }
}

/// Merge overlapping and touching intervals into a sorted, disjoint list.
pub fn coalesce(intervals: impl IntoIterator<Item = Interval>) -> Vec<Interval> {
    let mut sorted: Vec<Interval> = intervals.into_iter().filter(|r| !r.is_empty()).collect();
    sorted.sort();

    let mut result: Vec<Interval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match result.last_mut() {
            Some(current) => match current.union(&interval) {
                Some(merged) => *current = merged,
                None => result.push(interval),
            },
            None => result.push(interval),
        }
    }
    result
}

/// Entry whose key overlaps `range` in a map of pairwise disjoint intervals.
///
/// Looks up the floor key and then the next-higher key; at most two lookups.
pub fn find_overlapping<'a, V>(
    map: &'a BTreeMap<Interval, V>,
    range: &Interval,
) -> Option<(&'a Interval, &'a V)> {
    if let Some((key, value)) = map.range(..=Interval::floor_key(range.from)).next_back() {
        if key.is_overlapped(range) {
            return Some((key, value));
        }
    }
    map.range(Interval::floor_key(range.from)..)
        .next()
        .filter(|(key, _)| key.is_overlapped(range))
}

/// All entries whose keys overlap `range`, in key order.
///
/// Keys of `map` must be pairwise disjoint.
pub fn overlapping<'a, V>(
    map: &'a BTreeMap<Interval, V>,
    range: Interval,
) -> impl Iterator<Item = (&'a Interval, &'a V)> + 'a {
    let start = map
        .range(..=Interval::floor_key(range.from))
        .next_back()
        .filter(|(key, _)| key.is_overlapped(&range))
        .map(|(key, _)| *key)
        .unwrap_or(Interval::floor_key(range.from));
    map.range(start..)
        .take_while(move |(key, _)| key.from < range.to || key.from == range.from)
        .filter(move |(key, _)| key.is_overlapped(&range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn iv(from: i64, to: i64) -> Interval {
        Interval::new(from, to).unwrap()
    }

    #[test]
    fn test_interval_creation() {
        let interval = iv(100, 200);
        assert_eq!(interval.from(), 100);
        assert_eq!(interval.to(), 200);
        assert_eq!(interval.size(), 100);
        assert!(iv(5, 5).is_empty());
    }

    #[test]
    fn test_interval_validation() {
        assert!(matches!(
            Interval::new(200, 100),
            Err(DistError::MalformedInterval { from: 200, to: 100 })
        ));
        assert!(Interval::try_from(3..1).is_err());
    }

    #[test]
    fn test_interval_contains() {
        let interval = iv(100, 200);
        assert!(interval.contains(100));
        assert!(interval.contains(199));
        assert!(!interval.contains(200));
        assert!(!interval.contains(99));
        assert!(interval.contains_range(&iv(120, 200)));
        assert!(interval.contains_range(&Interval::empty_at(200)));
        assert!(!interval.contains_range(&iv(150, 201)));
    }

    #[test]
    fn test_empty_interval_overlap() {
        let range = iv(10, 20);
        assert!(Interval::empty_at(10).is_overlapped(&range));
        assert!(Interval::empty_at(15).is_overlapped(&range));
        assert!(!Interval::empty_at(20).is_overlapped(&range));
        assert!(range.is_overlapped(&Interval::empty_at(19)));
        assert!(Interval::empty_at(3).is_overlapped(&Interval::empty_at(3)));
        assert!(!Interval::empty_at(3).is_overlapped(&Interval::empty_at(4)));
    }

    #[test]
    fn test_adjacent_intervals_do_not_overlap() {
        assert!(!iv(0, 10).is_overlapped(&iv(10, 20)));
        assert_eq!(iv(0, 10).intersection(&iv(10, 20)), None);
        assert_eq!(iv(0, 10).union(&iv(10, 20)), Some(iv(0, 20)));
    }

    #[test]
    fn test_intersection_symmetric_and_contained() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2_000 {
            let a_from = rng.random_range(-50..50);
            let a = iv(a_from, a_from + rng.random_range(0..40));
            let b_from = rng.random_range(-50..50);
            let b = iv(b_from, b_from + rng.random_range(0..40));
            let ab = a.intersection(&b);
            assert_eq!(ab, b.intersection(&a), "{a} vs {b}");
            assert_eq!(a.is_overlapped(&b), b.is_overlapped(&a));
            if let Some(common) = ab {
                assert!(a.contains_range(&common));
                assert!(b.contains_range(&common));
            }
        }
    }

    #[test]
    fn test_split_reconstructs_interval() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let from = rng.random_range(-1_000..1_000);
            let interval = iv(from, from + rng.random_range(0..300));
            let n = rng.random_range(1..17);
            let pieces = interval.split(n).unwrap();
            assert_eq!(pieces.len(), n);
            assert_eq!(pieces[0].from(), interval.from());
            assert_eq!(pieces[n - 1].to(), interval.to());
            for pair in pieces.windows(2) {
                assert_eq!(pair[0].to(), pair[1].from());
                assert!(pair[0] <= pair[1]);
                assert!(pair[0].size() >= pair[1].size());
                assert!(pair[0].size() - pair[1].size() <= 1);
            }
            let total: u64 = pieces.iter().map(Interval::size).sum();
            assert_eq!(total, interval.size());
        }
    }

    #[test]
    fn test_split_remainder_goes_first() {
        let pieces = iv(0, 10).split(3).unwrap();
        assert_eq!(pieces, vec![iv(0, 4), iv(4, 7), iv(7, 10)]);
        assert!(iv(0, 10).split(0).is_err());
    }

    #[test]
    fn test_split_list_across_boundaries() {
        let list = vec![iv(0, 5), iv(10, 13), iv(20, 22)];
        let parts = Interval::split_list(2, &list).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], vec![iv(0, 5)]);
        assert_eq!(parts[1], vec![iv(10, 13), iv(20, 22)]);

        let parts = Interval::split_list(3, &list).unwrap();
        assert_eq!(parts[0], vec![iv(0, 4)]);
        assert_eq!(parts[1], vec![iv(4, 5), iv(10, 12)]);
        assert_eq!(parts[2], vec![iv(12, 13), iv(20, 22)]);
    }

    #[test]
    fn test_split_list_more_parts_than_elements() {
        let parts = Interval::split_list(4, &[iv(0, 2)]).unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], vec![iv(0, 1)]);
        assert_eq!(parts[1], vec![iv(1, 2)]);
        assert!(parts[2].is_empty() && parts[3].is_empty());
    }

    #[test]
    fn test_ordering() {
        let mut ranges = vec![iv(5, 9), iv(0, 3), iv(5, 6), iv(0, 1)];
        ranges.sort();
        assert_eq!(ranges, vec![iv(0, 1), iv(0, 3), iv(5, 6), iv(5, 9)]);
    }

    #[test]
    fn test_difference() {
        assert_eq!(iv(0, 10).difference(&iv(3, 5)), vec![iv(0, 3), iv(5, 10)]);
        assert_eq!(iv(0, 10).difference(&iv(0, 5)), vec![iv(5, 10)]);
        assert_eq!(iv(0, 10).difference(&iv(20, 30)), vec![iv(0, 10)]);
        assert!(iv(3, 5).difference(&iv(0, 10)).is_empty());
    }

    #[test]
    fn test_coalesce() {
        let merged = coalesce(vec![iv(10, 20), iv(0, 5), iv(15, 25), iv(5, 7), iv(30, 30)]);
        assert_eq!(merged, vec![iv(0, 7), iv(10, 25)]);
    }

    #[test]
    fn test_find_overlapping_two_lookups() {
        let mut map = BTreeMap::new();
        map.insert(iv(0, 10), 'a');
        map.insert(iv(10, 20), 'b');
        map.insert(iv(30, 40), 'c');

        assert_eq!(find_overlapping(&map, &iv(5, 6)).map(|(_, v)| *v), Some('a'));
        assert_eq!(find_overlapping(&map, &iv(25, 35)).map(|(_, v)| *v), Some('c'));
        assert_eq!(find_overlapping(&map, &Interval::empty_at(10)).map(|(_, v)| *v), Some('b'));
        assert!(find_overlapping(&map, &iv(20, 30)).is_none());
    }

    #[test]
    fn test_overlapping_iterates_in_order() {
        let mut map = BTreeMap::new();
        map.insert(iv(0, 10), 'a');
        map.insert(iv(10, 20), 'b');
        map.insert(iv(30, 40), 'c');

        let hits: Vec<char> = overlapping(&map, iv(5, 35)).map(|(_, v)| *v).collect();
        assert_eq!(hits, vec!['a', 'b', 'c']);
        let hits: Vec<char> = overlapping(&map, iv(20, 30)).map(|(_, v)| *v).collect();
        assert!(hits.is_empty());
        let hits: Vec<char> = overlapping(&map, Interval::empty_at(35)).map(|(_, v)| *v).collect();
        assert_eq!(hits, vec!['c']);
    }

    #[test]
    fn test_interval_serde_validates() {
        let bytes = bincode::serialize(&(9i64, 3i64)).unwrap();
        assert!(bincode::deserialize::<Interval>(&bytes).is_err());
        let bytes = bincode::serialize(&iv(3, 9)).unwrap();
        assert_eq!(bincode::deserialize::<Interval>(&bytes).unwrap(), iv(3, 9));
    }

    #[test]
    fn test_full_domain_does_not_overflow() {
        let all = iv(i64::MIN, i64::MAX);
        assert_eq!(all.size(), u64::MAX);

        let halves = all.split(2).unwrap();
        assert_eq!(halves[0], iv(i64::MIN, 0));
        assert_eq!(halves[1], iv(0, i64::MAX));
        assert_eq!(halves.iter().map(Interval::size).sum::<u64>(), u64::MAX);

        let parts = Interval::split_list(3, &[iv(i64::MIN, 0), iv(0, i64::MAX)]).unwrap();
        let total: u64 = parts.iter().flatten().map(Interval::size).sum();
        assert_eq!(total, u64::MAX);
        assert_eq!(parts[2].last().map(Interval::to), Some(i64::MAX));

        let last = Interval::singleton(i64::MAX);
        assert!(last.is_empty());
        assert!(!all.contains(i64::MAX));
        let mut map = BTreeMap::new();
        map.insert(all, ());
        assert!(find_overlapping(&map, &last).is_none());
    }
}
